use std::future::Future;

use futures::{executor::ThreadPool, task::SpawnExt};

use crate::errors::ResolveError;

/// Runs blocking work on dedicated threads so providers can await it
///
/// # Example
/// ```
/// use futures::executor::block_on;
/// use wrapp_compose::resolver::BlockingPool;
///
/// let pool = BlockingPool::new(1).unwrap();
/// let sum = block_on(pool.run(|| (1..=10).sum::<u32>())).unwrap();
/// assert_eq!(sum, 55);
/// ```
#[derive(Debug, Clone)]
pub struct BlockingPool {
    pool: ThreadPool,
}

impl BlockingPool {
    pub fn new(threads: usize) -> Result<Self, ResolveError> {
        let pool = ThreadPool::builder()
            .pool_size(threads.max(1))
            .name_prefix("wrapp-blocking-")
            .create()
            .map_err(|e| ResolveError::Offload(e.to_string()))?;

        Ok(BlockingPool { pool })
    }

    /// Runs `work` on the pool, the returned future completes with its result
    pub fn run<T, Work>(&self, work: Work) -> impl Future<Output = Result<T, ResolveError>>
    where
        T: Send + 'static,
        Work: FnOnce() -> T + Send + 'static,
    {
        let handle = self
            .pool
            .spawn_with_handle(async move { work() })
            .map_err(|e| ResolveError::Offload(e.to_string()));

        async move { Ok(handle?.await) }
    }
}
