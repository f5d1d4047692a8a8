//! End-to-end pinning through the public API.
//!
//! Tests that touch real affinity need Linux and skip themselves when the
//! process lacks permission to change it.

use {
    pinning_cpu_utils::AffinityDescriptor,
    pinning_thread_manager::{test_utils::MockAffinity, *},
    std::{sync::Arc, thread},
};

#[cfg(target_os = "linux")]
fn first_allowed_core() -> AffinityDescriptor {
    let me = pinning_cpu_utils::current_native_id().unwrap();
    let allowed = pinning_cpu_utils::thread_affinity(me).unwrap();
    AffinityDescriptor::from_cores([allowed.cores()[0]]).unwrap()
}

#[test]
#[cfg(target_os = "linux")]
fn test_pinned_thread_with_system_binding() {
    solana_logger::setup();
    let target = first_allowed_core();

    let started = PinnedThread::new(|| {
        let me = pinning_cpu_utils::current_native_id().unwrap();
        pinning_cpu_utils::thread_affinity(me).unwrap()
    })
    .name("itestPinned")
    .affinity(target.clone())
    .start();

    match started {
        Ok(started) => {
            assert_eq!(started.handle().affinity().unwrap(), target);
            assert_eq!(started.join().unwrap(), target);
        }
        Err(PinningError::Affinity(e)) if e.is_permission_denied() => {
            eprintln!("Skipping pinned thread test: insufficient permissions");
        }
        Err(e) => panic!("Unexpected error: {e:?}"),
    }
}

#[test]
#[cfg(target_os = "linux")]
fn test_global_policy_pins_intercepted_thread() {
    solana_logger::setup();
    let target = first_allowed_core();
    let config = AffinityConfig {
        groups: [("itest".to_string(), CoreAllocation::from(&target))]
            .into_iter()
            .collect(),
        rules: vec![MatchRuleConfig {
            pattern: "itestHook-*".to_string(),
            group: "itest".to_string(),
        }],
        ..AffinityConfig::default()
    };
    let registry = AffinityGroupRegistry::global();
    registry.swap_configuration(&config).unwrap();

    // plain thread firing the hook itself, as a host start callback would
    let outcome = thread::Builder::new()
        .name("itestHook-0".to_string())
        .spawn(|| {
            let hook = InterceptionHook::global();
            (hook.on_thread_start(), hook.on_thread_start())
        })
        .unwrap()
        .join()
        .unwrap();

    let observed = spawn_intercepted(
        thread::Builder::new().name("itestHook-1".to_string()),
        InterceptionHook::global(),
        || {
            let me = pinning_cpu_utils::current_native_id().unwrap();
            pinning_cpu_utils::thread_affinity(me).unwrap()
        },
    )
    .unwrap()
    .join()
    .unwrap();
    registry.clear();

    assert_eq!(outcome.1, HookOutcome::AlreadyHandled);
    match outcome.0 {
        HookOutcome::Pinned(descriptor) => {
            assert_eq!(descriptor, target);
            assert_eq!(observed, target);
        }
        // best effort, without permission the thread stays unpinned
        HookOutcome::Failed(descriptor) => assert_eq!(descriptor, target),
        other => panic!("Unexpected outcome {other:?}"),
    }
}

#[test]
fn test_factory_pool_and_runtime_with_mock_binding() {
    solana_logger::setup();
    let config = AffinityConfig::from_toml_str(
        r#"
        [groups]
        compute = { cores = [2, 3] }
        net = { mask = 1 }

        [[rules]]
        pattern = "itestNet-*"
        group = "net"
        "#,
    )
    .unwrap();
    let policy = PolicyConfiguration::try_from_config_within(&config, 4).unwrap();
    let mock = Arc::new(MockAffinity::new(4));

    let factory =
        AffinityThreadFactory::from_allocation(&CoreAllocation::from_group("compute"), &policy)
            .unwrap()
            .with_binding(mock.clone());
    let pool = PinnedRayonPool::new(
        "itestCompute".to_string(),
        RayonConfig {
            worker_threads: 2,
            ..RayonConfig::default()
        },
        factory,
    )
    .unwrap();
    let sum: u64 = pool.install(|| (1..=100u64).sum());
    assert_eq!(sum, 5050);
    assert_eq!(mock.set_calls(), 2);

    let hook = InterceptionHook::new(Arc::new(AffinityGroupRegistry::new(policy)))
        .with_binding(mock.clone());
    let runtime = TokioRuntime::new(
        "itestNet".to_string(),
        TokioConfig {
            worker_threads: 1,
            ..TokioConfig::default()
        },
        hook,
    )
    .unwrap();
    let doubled = runtime.start(async { tokio::spawn(async { 21 * 2 }).await.unwrap() });
    assert_eq!(doubled, 42);
    assert!(mock.set_calls() >= 3);
    assert_eq!(
        mock.last_applied(),
        Some(AffinityDescriptor::from_cores_within([0], 4).unwrap())
    );
}
