use std::{
    collections::{BTreeMap, BTreeSet},
    convert::Infallible,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::{executor::block_on, future, FutureExt};
use thiserror::Error;
use wrapp_compose::{
    errors::Panicked, BindingRegistry, BlockingPool, Descriptor, DynError, Expr, Kwargs, Provider,
    ResolveError, Resolver, Value,
};

#[derive(Debug, Error)]
#[error("{0}")]
struct ValueError(&'static str);

/// Returns pending once, waking itself right away
#[derive(Default)]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Provider without dependencies, counting its invocations and yielding once before returning `value`
fn counted(counter: &Arc<AtomicUsize>, value: i64) -> Provider {
    let counter = counter.clone();
    Provider::new(Vec::<String>::new(), move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            YieldNow::default().await;
            Ok::<_, Infallible>(value)
        }
    })
}

/// Provider returning the value of its only dependency
fn identity(name: &str) -> Provider {
    Provider::new([name], |value: Arc<i64>| async move { Ok::<_, Infallible>(*value) })
}

/// Provider which never completes
fn stalled(counter: &Arc<AtomicUsize>) -> Provider {
    let counter = counter.clone();
    Provider::new(Vec::<String>::new(), move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            future::pending::<()>().await;
            Ok::<_, Infallible>(0_i64)
        }
    })
}

fn is_cycle(error: &ResolveError) -> bool {
    match error {
        ResolveError::CycleDetected { .. } => true,
        ResolveError::Group(errors) => errors.iter().all(is_cycle),
        _ => false,
    }
}

#[test]
fn sum_of_two_constants() {
    let registry = BindingRegistry::new()
        .add_delegate("a", Descriptor::pure(2_i64))
        .add_delegate("b", Descriptor::pure(3_i64))
        .add_provider(
            "sum",
            Provider::new(["a", "b"], |a: Arc<i64>, b: Arc<i64>| async move {
                Ok::<_, Infallible>(*a + *b)
            }),
        );

    let resolver = Resolver::new(registry);
    assert_eq!(*block_on(resolver.get::<i64>("sum")).unwrap(), 5);
}

#[test]
fn merged_registry_resolves_override() {
    let registry1 = BindingRegistry::new().add_delegate("x", Descriptor::pure(1_i64));
    let registry2 = registry1.merge(&BindingRegistry::new().add_delegate("x", Descriptor::pure(2_i64)));

    assert_eq!(*block_on(Resolver::new(registry2).get::<i64>("x")).unwrap(), 2);
    assert_eq!(*block_on(Resolver::new(registry1).get::<i64>("x")).unwrap(), 1);
}

#[test]
fn provider_error_keeps_original_cause() {
    let registry = BindingRegistry::new().add_provider(
        "f",
        Provider::new(Vec::<String>::new(), || async { Err::<i64, _>(ValueError("boom")) }),
    );

    let error = block_on(Resolver::new(registry).resolve("f")).unwrap_err();
    match &error {
        ResolveError::Provider { name, .. } => assert_eq!(name, "f"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(error.cause_as::<ValueError>().map(|e| e.0), Some("boom"));
}

#[test]
fn blocking_bridge_inside_resolution_fails() {
    let registry = BindingRegistry::new().add_provider(
        "outer",
        Provider::new(Vec::<String>::new(), || async {
            let inner = Resolver::new(BindingRegistry::new().add_value("x", 1_i64)).to_blocking();
            inner.get::<i64>("x").map(|x| *x)
        }),
    );

    let resolver = Resolver::new(registry).to_blocking();
    assert!(matches!(
        resolver.resolve("outer"),
        Err(ResolveError::BlockingBridgeMisuse)
    ));
}

#[test]
fn blocking_bridge_inside_executor_fails() {
    let resolver = Resolver::new(BindingRegistry::new().add_value("x", 1_i64)).to_blocking();
    let result = block_on(async { resolver.resolve("x") });
    assert!(matches!(result, Err(ResolveError::BlockingBridgeMisuse)));

    // Fine again once outside
    assert_eq!(*resolver.get::<i64>("x").unwrap(), 1);
}

#[test]
fn pure_invokes_no_provider() {
    let provider_calls = counter();
    let registry = BindingRegistry::new().add_provider("unused", counted(&provider_calls, 1));
    let resolver = Resolver::new(registry);

    let value = block_on(resolver.get::<&str>(Descriptor::pure("constant"))).unwrap();
    assert_eq!(*value, "constant");
    assert_eq!(calls(&provider_calls), 0);
}

#[test]
fn map_over_pure_applies_transform_once() {
    let transform_calls = counter();
    let transform_counter = transform_calls.clone();
    let mapped = Descriptor::pure(20_i64).map(move |value: Value| {
        transform_counter.fetch_add(1, Ordering::SeqCst);
        let doubled = value.downcast::<i64>().map(|v| Value::new(*v * 2));
        async move { doubled.map_err(DynError::from) }
    });

    let resolver = Resolver::new(BindingRegistry::new());
    assert_eq!(*block_on(resolver.get::<i64>(&mapped)).unwrap(), 40);
    assert_eq!(calls(&transform_calls), 1);
}

#[test]
fn provider_runs_once_per_session() {
    let provider_calls = counter();
    let registry = BindingRegistry::new().add_provider("shared", counted(&provider_calls, 7));
    let resolver = Resolver::new(registry);

    // Two concurrent branches requesting the same name
    let both = Descriptor::zip([
        Descriptor::inject("shared"),
        Descriptor::bind(["shared"], |kwargs: Kwargs| {
            let value = kwargs.value("shared").cloned();
            async move { value.map_err(DynError::from) }
        }),
    ]);
    let values = block_on(resolver.get::<Vec<Value>>(both)).unwrap();
    assert!(values[0].ptr_eq(&values[1]));

    // And once more afterwards
    assert_eq!(*block_on(resolver.get::<i64>("shared")).unwrap(), 7);
    assert_eq!(calls(&provider_calls), 1);

    // A new session runs it again
    let registry = BindingRegistry::new().add_provider("shared", counted(&provider_calls, 7));
    block_on(Resolver::new(registry).resolve("shared")).unwrap();
    assert_eq!(calls(&provider_calls), 2);
}

#[test]
fn cycle_fails_instead_of_hanging() {
    let registry = BindingRegistry::new()
        .add_provider("a", identity("b"))
        .add_provider("b", identity("a"));

    match block_on(Resolver::new(registry).resolve("a")) {
        Err(ResolveError::CycleDetected { chain }) => assert_eq!(chain, vec!["a", "b", "a"]),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn self_reference_is_a_cycle() {
    let registry = BindingRegistry::new().add_provider("a", identity("a"));
    let error = block_on(Resolver::new(registry).resolve("a")).unwrap_err();
    assert!(is_cycle(&error), "{error}");
}

#[test]
fn cycle_across_concurrent_branches_is_detected() {
    let gate_calls = counter();
    let registry = BindingRegistry::new()
        .add_provider("gate", counted(&gate_calls, 0))
        // "a" only learns it needs "b" after the gate resolved, by then "b" is in flight waiting for "a"
        .add_delegate(
            "a",
            Descriptor::bind_dynamic(
                ["gate"],
                |_known: &Kwargs| ["b"],
                |kwargs: Kwargs| {
                    let value = kwargs.value("b").cloned();
                    async move { value.map_err(DynError::from) }
                },
            ),
        )
        .add_provider("b", identity("a"));

    let both = Descriptor::zip([Descriptor::inject("a"), Descriptor::inject("b")]);
    let error = block_on(Resolver::new(registry).resolve(both)).unwrap_err();
    assert!(is_cycle(&error), "{error}");
}

#[test]
fn dynamic_dependency_follows_flag() {
    let postgres_calls = counter();
    let redis_calls = counter();
    let base = BindingRegistry::new()
        .add_provider("postgres", counted(&postgres_calls, 5432))
        .add_provider("redis", counted(&redis_calls, 6379))
        .add_delegate("store", Descriptor::select("backend", |backend: &String| backend.clone()));

    let with_postgres = base.merge(&BindingRegistry::new().add_value("backend", "postgres".to_string()));
    let with_redis = base.merge(&BindingRegistry::new().add_value("backend", "redis".to_string()));

    assert_eq!(*block_on(Resolver::new(with_postgres).get::<i64>("store")).unwrap(), 5432);
    assert_eq!((calls(&postgres_calls), calls(&redis_calls)), (1, 0));

    assert_eq!(*block_on(Resolver::new(with_redis).get::<i64>("store")).unwrap(), 6379);
    assert_eq!((calls(&postgres_calls), calls(&redis_calls)), (1, 1));
}

#[test]
fn provider_receives_exactly_complete_dependencies() {
    let registry = BindingRegistry::new()
        .add_value("flag", "chosen".to_string())
        .add_value("static", 1_i64)
        .add_value("chosen", 2_i64)
        .add_value("unrelated", 3_i64)
        .add_provider(
            "checked",
            Provider::from_kwargs(["flag", "static"], |kwargs: Kwargs| async move {
                Ok::<_, Infallible>(kwargs.names())
            })
            .with_dynamic(|known: &Kwargs| {
                known
                    .get::<String>("flag")
                    .map(|flag| vec![(*flag).clone()])
                    .unwrap_or_default()
            }),
        );

    let received = block_on(Resolver::new(registry).get::<BTreeSet<String>>("checked")).unwrap();
    assert_eq!(
        *received,
        BTreeSet::from(["chosen".to_string(), "flag".to_string(), "static".to_string()])
    );
}

#[test]
fn missing_name_reports_requirer() {
    let registry = BindingRegistry::new().add_provider("needs", identity("missing"));

    match block_on(Resolver::new(registry).resolve("needs")) {
        Err(ResolveError::UnresolvedDependency { name, required_by }) => {
            assert_eq!(name, "missing");
            assert_eq!(required_by.as_deref(), Some("needs"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn failures_are_not_retried() {
    let provider_calls = counter();
    let provider_counter = provider_calls.clone();
    let registry = BindingRegistry::new().add_provider(
        "flaky",
        Provider::new(Vec::<String>::new(), move || {
            provider_counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<i64, _>(ValueError("flaky")) }
        }),
    );
    let resolver = Resolver::new(registry);

    assert!(block_on(resolver.resolve("flaky")).is_err());
    assert!(block_on(resolver.resolve("flaky")).is_err());
    assert_eq!(calls(&provider_calls), 1);
}

#[test]
fn group_reports_every_ready_failure() {
    let registry = BindingRegistry::new()
        .add_provider(
            "first",
            Provider::new(Vec::<String>::new(), || async { Err::<i64, _>(ValueError("first")) }),
        )
        .add_provider(
            "second",
            Provider::new(Vec::<String>::new(), || async { Err::<i64, _>(ValueError("second")) }),
        );

    let both = Descriptor::dict([
        ("first", Descriptor::inject("first")),
        ("second", Descriptor::inject("second")),
    ]);
    match block_on(Resolver::new(registry).resolve(both)) {
        Err(ResolveError::Group(errors)) => {
            let mut causes: Vec<_> = errors
                .iter()
                .filter_map(|e| e.cause_as::<ValueError>())
                .map(|e| e.0)
                .collect();
            causes.sort();
            assert_eq!(causes, vec!["first", "second"]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn dict_pairs_names_with_results() {
    let registry = BindingRegistry::new()
        .add_value("x", 1_i64)
        .add_value("y", 2_i64);

    let pairs = Descriptor::dict([("b", Descriptor::inject("x")), ("a", Descriptor::inject("y"))]);
    let resolved = block_on(Resolver::new(registry).get::<BTreeMap<String, Value>>(pairs)).unwrap();

    let values: Vec<(&str, i64)> = resolved
        .iter()
        .map(|(name, value)| (name.as_str(), *value.downcast::<i64>().unwrap()))
        .collect();
    assert_eq!(values, vec![("a", 2), ("b", 1)]);
}

#[test]
fn out_of_range_index_fails_the_resolution() {
    let registry = BindingRegistry::new().add_value("ports", vec![80_u16]);
    let resolver = Resolver::new(registry);

    let missing = Expr::<Vec<u16>>::inject("ports").at(5_usize);
    match block_on(resolver.eval(&missing)) {
        Err(error @ ResolveError::Provider { .. }) => {
            assert!(error.cause_as::<Panicked>().is_some());
        }
        other => panic!("unexpected {other:?}"),
    }

    // The session keeps working after the failure
    assert_eq!(*block_on(resolver.get::<Vec<u16>>("ports")).unwrap(), vec![80]);
}

#[test]
fn division_by_zero_fails_the_resolution() {
    let registry = BindingRegistry::new()
        .add_value("n", 10_i64)
        .add_value("z", 0_i64);
    let resolver = Resolver::new(registry);

    let quotient = Expr::<i64>::inject("n") / Expr::<i64>::inject("z");
    let error = block_on(resolver.eval(&quotient)).unwrap_err();
    assert!(error.cause_as::<Panicked>().is_some());

    let remainder = Expr::<i64>::inject("n") % Expr::<i64>::inject("z");
    assert!(matches!(
        block_on(resolver.eval(&remainder)),
        Err(ResolveError::Provider { .. })
    ));
}

#[test]
fn panicking_provider_is_failed_not_stuck() {
    let registry = BindingRegistry::new()
        .add_provider(
            "explodes",
            Provider::new(Vec::<String>::new(), || async {
                if true {
                    panic!("provider exploded");
                }
                Ok::<_, Infallible>(0_i64)
            }),
        )
        .add_provider("depends", identity("explodes"));
    let resolver = Resolver::new(registry);

    let error = block_on(resolver.resolve("depends")).unwrap_err();
    assert_eq!(
        error.cause_as::<Panicked>().map(|p| p.message.as_str()),
        Some("provider exploded")
    );

    // Terminal, not left in flight
    assert!(matches!(
        block_on(resolver.resolve("explodes")),
        Err(ResolveError::Provider { name, .. }) if name == "explodes"
    ));
}

#[test]
fn failing_branch_cancels_siblings() {
    let stalled_calls = counter();
    let registry = BindingRegistry::new()
        .add_provider(
            "fails",
            Provider::new(Vec::<String>::new(), || async { Err::<i64, _>(ValueError("boom")) }),
        )
        .add_provider("slow", stalled(&stalled_calls));
    let resolver = Resolver::new(registry);

    let both = Descriptor::zip([Descriptor::inject("fails"), Descriptor::inject("slow")]);
    let error = block_on(resolver.resolve(both)).unwrap_err();
    assert!(error.cause_as::<ValueError>().is_some());

    // The cancelled entry stays failed for this session
    assert!(matches!(
        block_on(resolver.resolve("slow")),
        Err(ResolveError::Cancelled { name }) if name == "slow"
    ));
    assert_eq!(calls(&stalled_calls), 1);
}

#[test]
fn dropping_root_cancels_resolution() {
    let stalled_calls = counter();
    let registry = BindingRegistry::new()
        .add_provider("slow", stalled(&stalled_calls))
        .add_provider("depends", identity("slow"));
    let resolver = Resolver::new(registry);

    assert!(resolver.resolve("depends").now_or_never().is_none());

    for name in ["depends", "slow"] {
        assert!(matches!(
            block_on(resolver.resolve(name)),
            Err(ResolveError::Cancelled { .. })
        ));
    }
}

#[test]
fn completed_entries_survive_cancellation() {
    let stalled_calls = counter();
    let registry = BindingRegistry::new()
        .add_value("ready", 1_i64)
        .add_provider("slow", stalled(&stalled_calls))
        .add_provider(
            "both",
            Provider::new(["ready", "slow"], |ready: Arc<i64>, slow: Arc<i64>| async move {
                Ok::<_, Infallible>(*ready + *slow)
            }),
        );
    let resolver = Resolver::new(registry);

    assert!(resolver.resolve("both").now_or_never().is_none());
    assert_eq!(*block_on(resolver.get::<i64>("ready")).unwrap(), 1);
}

#[test]
fn timeout_cancels_resolution() {
    let stalled_calls = counter();
    let registry = BindingRegistry::new().add_provider("slow", stalled(&stalled_calls));
    let resolver = Resolver::builder(registry)
        .timeout(Duration::from_millis(20))
        .build();

    assert!(matches!(
        block_on(resolver.resolve("slow")),
        Err(ResolveError::Timeout)
    ));
    assert!(matches!(
        block_on(resolver.resolve("slow")),
        Err(ResolveError::Cancelled { .. })
    ));
}

#[test]
fn timeout_does_not_hold_back_quick_resolutions() {
    let registry = BindingRegistry::new().add_value("ready", 1_i64);
    let resolver = Resolver::builder(registry)
        .timeout(Duration::from_secs(3600))
        .build()
        .to_blocking();

    let started = Instant::now();
    for _ in 0..200 {
        assert_eq!(*resolver.get::<i64>("ready").unwrap(), 1);
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn defaults_fill_in_missing_names() {
    let defaults = BindingRegistry::new()
        .add_value("host", "default-host".to_string())
        .add_value("port", 80_u16);
    let registry = BindingRegistry::new().add_value("host", "local-host".to_string());

    let resolver = Resolver::builder(registry).with_defaults(defaults).build();
    assert!(resolver.is_bound("port"));
    assert!(!resolver.is_bound("user"));
    assert_eq!(*block_on(resolver.get::<String>("host")).unwrap(), "local-host");
    assert_eq!(*block_on(resolver.get::<u16>("port")).unwrap(), 80);
}

#[test]
fn destruct_tears_down_in_reverse_order() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let scoped = |name: &'static str, provider: Provider| {
        let released = released.clone();
        provider.with_teardown(move |_value: Arc<i64>| {
            released.lock().unwrap().push(name);
            async { Ok::<_, Infallible>(()) }
        })
    };

    let registry = BindingRegistry::new()
        .add_value("seed", 1_i64)
        .add_provider("first", scoped("first", identity("seed")))
        .add_provider("second", scoped("second", identity("first")));
    let resolver = Resolver::new(registry);

    assert_eq!(*block_on(resolver.get::<i64>("second")).unwrap(), 1);
    assert_eq!(resolver.owned_resources(), 2);

    block_on(resolver.destruct()).unwrap();
    assert_eq!(*released.lock().unwrap(), vec!["second", "first"]);

    assert!(matches!(
        block_on(resolver.resolve("seed")),
        Err(ResolveError::SessionClosed)
    ));
    assert!(matches!(
        block_on(resolver.destruct()),
        Err(ResolveError::SessionClosed)
    ));
}

#[test]
fn failing_teardown_does_not_stop_others() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let released_by_teardown = released.clone();

    let registry = BindingRegistry::new()
        .add_provider(
            "kept",
            Provider::new(Vec::<String>::new(), || async { Ok::<_, Infallible>(1_i64) }).with_teardown(
                move |_value: Arc<i64>| {
                    released_by_teardown.lock().unwrap().push("kept");
                    async { Ok::<_, Infallible>(()) }
                },
            ),
        )
        .add_provider(
            "broken",
            Provider::new(["kept"], |kept: Arc<i64>| async move { Ok::<_, Infallible>(*kept) })
                .with_teardown(|_value: Arc<i64>| async { Err::<(), _>(ValueError("stuck")) }),
        );

    let resolver = Resolver::new(registry).to_blocking();
    resolver.resolve("broken").unwrap();

    let error = resolver.destruct().unwrap_err();
    assert_eq!(error.cause_as::<ValueError>().map(|e| e.0), Some("stuck"));
    assert_eq!(*released.lock().unwrap(), vec!["kept"]);
}

#[test]
fn signature_mismatch_fails_at_resolution() {
    let registry = BindingRegistry::new()
        .add_value("a", 1_i64)
        .add_value("b", 2_i64)
        .add_provider(
            "wrong",
            Provider::new(["a", "b"], |a: Arc<i64>| async move { Ok::<_, Infallible>(*a) }),
        );

    assert!(matches!(
        block_on(Resolver::new(registry).resolve("wrong")),
        Err(ResolveError::Signature { expected: 1, .. })
    ));
}

#[test]
fn blocking_work_is_offloaded() {
    let pool = BlockingPool::new(1).unwrap();
    let registry = BindingRegistry::new()
        .add_value("n", 10_u64)
        .add_provider(
            "sum",
            Provider::new(["n"], move |n: Arc<u64>| {
                let pool = pool.clone();
                async move { pool.run(move || (1..=*n).sum::<u64>()).await }
            }),
        );

    assert_eq!(*block_on(Resolver::new(registry).get::<u64>("sum")).unwrap(), 55);
}
