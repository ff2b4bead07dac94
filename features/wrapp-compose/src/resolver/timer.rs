use std::{
    sync::{
        mpsc::{self, RecvTimeoutError},
        Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use futures_channel::oneshot;

struct Alarm {
    deadline: Instant,
    fire: oneshot::Sender<()>,
}

/// A single thread firing the deadlines of all timed resolutions
pub(crate) struct Timer {
    alarms: Mutex<mpsc::Sender<Alarm>>,
}

impl Timer {
    pub(crate) fn start() -> std::io::Result<Timer> {
        let (alarms, requests) = mpsc::channel();
        thread::Builder::new()
            .name("wrapp-compose-timer".to_string())
            .spawn(move || run(requests))?;

        Ok(Timer {
            alarms: Mutex::new(alarms),
        })
    }

    /// The process wide timer, started on first use
    pub(crate) fn shared() -> Option<&'static Timer> {
        static SHARED: OnceLock<Option<Timer>> = OnceLock::new();
        SHARED
            .get_or_init(|| match Timer::start() {
                Ok(timer) => Some(timer),
                Err(e) => {
                    tracing::error!("Failed to start timer thread - error: {e}");
                    None
                }
            })
            .as_ref()
    }

    /// Completes with `Ok` after `duration`
    ///
    /// Dropping the receiver cancels the alarm. It completes with `Err` if the timer is gone.
    pub(crate) fn delay(&self, duration: Duration) -> oneshot::Receiver<()> {
        let (fire, fired) = oneshot::channel();
        let alarm = Alarm {
            deadline: Instant::now() + duration,
            fire,
        };

        let sent = match self.alarms.lock() {
            Ok(alarms) => alarms.send(alarm).is_ok(),
            Err(_) => false,
        };
        if !sent {
            tracing::error!("Timer thread is gone, delay of {duration:?} will not fire");
        }
        fired
    }
}

fn run(requests: mpsc::Receiver<Alarm>) {
    let mut alarms: Vec<Alarm> = Vec::new();
    loop {
        let now = Instant::now();
        let (due, pending): (Vec<Alarm>, Vec<Alarm>) = alarms
            .drain(..)
            .filter(|alarm| !alarm.fire.is_canceled())
            .partition(|alarm| alarm.deadline <= now);
        for alarm in due {
            let _ = alarm.fire.send(());
        }
        alarms = pending;

        let request = match alarms.iter().map(|alarm| alarm.deadline).min() {
            Some(next) => requests.recv_timeout(next.saturating_duration_since(now)),
            None => requests.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match request {
            Ok(alarm) => alarms.push(alarm),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::trace!("Timer stopped with {} pending alarms", alarms.len());
                return;
            }
        }
    }
}
