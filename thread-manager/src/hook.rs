//! Policy-driven pinning for threads that were not created as pinned threads.
//!
//! A host runtime calls [`InterceptionHook::before_task`] (or
//! [`InterceptionHook::on_thread_start`]) on the new thread itself, right
//! before the thread's task body runs: tokio's `on_thread_start`, rayon's
//! `start_handler`, or a wrapped `std::thread` closure via [`intercept`].
//! Pinning is best effort: no matching policy leaves the thread unpinned, and
//! a native failure is logged and otherwise ignored.

use {
    crate::registry::AffinityGroupRegistry,
    log::{debug, trace, warn},
    pinning_cpu_utils::{AffinityDescriptor, NativeAffinity, SystemAffinity},
    std::{cell::Cell, io, sync::Arc, thread},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ThreadDisposition {
    Untouched,
    /// Created through PinnedThread, owns its own affinity
    AffinityAware,
    /// The hook already ran on this thread
    Intercepted,
}

thread_local! {
    static DISPOSITION: Cell<ThreadDisposition> = const { Cell::new(ThreadDisposition::Untouched) };
}

/// Excludes the calling thread from policy-driven pinning.
pub(crate) fn mark_affinity_aware() {
    let _ = DISPOSITION.try_with(|d| d.set(ThreadDisposition::AffinityAware));
}

/// What a hook invocation did to the calling thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookOutcome {
    /// Policy resolved and applied
    Pinned(AffinityDescriptor),
    /// No rule and no default matched, thread left unpinned
    NoPolicy,
    /// Applying the resolved descriptor failed, thread left unpinned
    Failed(AffinityDescriptor),
    /// The hook already fired on this thread
    AlreadyHandled,
    /// The thread manages its own affinity
    AffinityAware,
}

/// Applies the registry's policy to the calling thread, at most once per thread.
#[derive(Clone, Debug)]
pub struct InterceptionHook {
    registry: Arc<AffinityGroupRegistry>,
    native: Arc<dyn NativeAffinity>,
}

impl InterceptionHook {
    pub fn new(registry: Arc<AffinityGroupRegistry>) -> Self {
        Self {
            registry,
            native: Arc::new(SystemAffinity),
        }
    }

    /// Hook bound to [`AffinityGroupRegistry::global`].
    pub fn global() -> Self {
        Self::new(AffinityGroupRegistry::global())
    }

    pub fn with_binding(mut self, native: Arc<dyn NativeAffinity>) -> Self {
        self.native = native;
        self
    }

    pub fn registry(&self) -> &Arc<AffinityGroupRegistry> {
        &self.registry
    }

    /// Fires the hook using the calling thread's own name.
    pub fn on_thread_start(&self) -> HookOutcome {
        let current = thread::current();
        self.before_task(current.name())
    }

    /// Fires the hook for the calling thread, known by `thread_name`.
    ///
    /// Must be invoked on the thread that is about to run its task body, since
    /// the native identity is taken from the caller. Unnamed threads are
    /// matched as the empty string. Never panics and never fails the thread.
    pub fn before_task(&self, thread_name: Option<&str>) -> HookOutcome {
        let previous = DISPOSITION
            .try_with(|d| d.replace(ThreadDisposition::Intercepted))
            .unwrap_or(ThreadDisposition::Intercepted);
        match previous {
            ThreadDisposition::Untouched => {}
            ThreadDisposition::Intercepted => return HookOutcome::AlreadyHandled,
            ThreadDisposition::AffinityAware => {
                let _ = DISPOSITION.try_with(|d| d.set(ThreadDisposition::AffinityAware));
                return HookOutcome::AffinityAware;
            }
        }

        let name = thread_name.unwrap_or_default();
        let Some(descriptor) = self.registry.resolve(name) else {
            trace!("No affinity policy for thread {name:?}, leaving it unpinned");
            return HookOutcome::NoPolicy;
        };

        let applied = self
            .native
            .current_native_id()
            .and_then(|id| self.native.set_affinity(id, &descriptor));
        match applied {
            Ok(()) => {
                debug!("Pinned thread {name:?} to cores {descriptor}");
                HookOutcome::Pinned(descriptor)
            }
            Err(err) => {
                warn!("Failed to pin thread {name:?} to cores {descriptor}, continuing unpinned: {err}");
                HookOutcome::Failed(descriptor)
            }
        }
    }
}

/// Wraps `f` so the hook fires on the executing thread before `f` runs.
///
/// The wrapped closure returns exactly what `f` returns and unwinds exactly
/// as `f` does.
pub fn intercept<F, T>(hook: InterceptionHook, f: F) -> impl FnOnce() -> T + Send + 'static
where
    F: FnOnce() -> T + Send + 'static,
    T: 'static,
{
    move || {
        hook.on_thread_start();
        f()
    }
}

/// Spawns `f` on a thread built by `builder`, with the hook firing first.
pub fn spawn_intercepted<F, T>(
    builder: thread::Builder,
    hook: InterceptionHook,
    f: F,
) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    builder.spawn(intercept(hook, f))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::{AffinityConfig, PolicyConfiguration},
            test_utils::MockAffinity,
        },
        std::panic,
    };

    fn registry_with(toml: &str) -> Arc<AffinityGroupRegistry> {
        let config = AffinityConfig::from_toml_str(toml).unwrap();
        let policy = PolicyConfiguration::try_from_config_within(&config, 4).unwrap();
        Arc::new(AffinityGroupRegistry::new(policy))
    }

    const WORKERS_ON_IO: &str = r#"
        [groups]
        io = { cores = [0, 1] }

        [[rules]]
        pattern = "worker-*"
        group = "io"
    "#;

    #[test]
    fn test_pins_matching_thread() {
        let mock = Arc::new(MockAffinity::new(4));
        let hook = InterceptionHook::new(registry_with(WORKERS_ON_IO)).with_binding(mock.clone());

        let outcome = spawn_intercepted(
            thread::Builder::new().name("worker-1".to_string()),
            hook,
            || 42,
        )
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(outcome, 42);
        assert_eq!(mock.set_calls(), 1);
        assert_eq!(
            mock.last_applied(),
            Some(AffinityDescriptor::from_cores_within([0, 1], 4).unwrap())
        );
    }

    #[test]
    fn test_fires_at_most_once_per_thread() {
        let mock = Arc::new(MockAffinity::new(4));
        let hook = InterceptionHook::new(registry_with(WORKERS_ON_IO)).with_binding(mock.clone());

        let outcomes = thread::Builder::new()
            .name("worker-2".to_string())
            .spawn(move || {
                let first = hook.on_thread_start();
                let second = hook.on_thread_start();
                (first, second)
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(outcomes.0, HookOutcome::Pinned(_)));
        assert_eq!(outcomes.1, HookOutcome::AlreadyHandled);
        assert_eq!(mock.set_calls(), 1);
    }

    #[test]
    fn test_layered_interception_pins_once() {
        let mock = Arc::new(MockAffinity::new(4));
        let hook = InterceptionHook::new(registry_with(WORKERS_ON_IO)).with_binding(mock.clone());
        let inner = intercept(hook.clone(), || "done");
        let layered = intercept(hook, inner);

        let result = thread::Builder::new()
            .name("worker-3".to_string())
            .spawn(layered)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(mock.set_calls(), 1);
    }

    #[test]
    fn test_no_policy_leaves_thread_unpinned() {
        let mock = Arc::new(MockAffinity::new(4));
        let hook = InterceptionHook::new(registry_with(WORKERS_ON_IO)).with_binding(mock.clone());

        let outcome = thread::Builder::new()
            .name("misc-thread".to_string())
            .spawn(move || hook.on_thread_start())
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(outcome, HookOutcome::NoPolicy);
        assert_eq!(mock.set_calls(), 0);
    }

    #[test]
    fn test_unnamed_thread_uses_default() {
        let mock = Arc::new(MockAffinity::new(4));
        let registry = registry_with(
            r#"
            default = { mask = 4 }
            "#,
        );
        let hook = InterceptionHook::new(registry).with_binding(mock.clone());

        let outcome = thread::spawn(move || hook.on_thread_start()).join().unwrap();
        assert_eq!(
            outcome,
            HookOutcome::Pinned(AffinityDescriptor::from_cores_within([2], 4).unwrap())
        );
    }

    #[test]
    fn test_native_failure_does_not_affect_task() {
        let mock = Arc::new(MockAffinity::new(4).failing_set());
        let hook = InterceptionHook::new(registry_with(WORKERS_ON_IO)).with_binding(mock.clone());

        let result = spawn_intercepted(
            thread::Builder::new().name("worker-4".to_string()),
            hook.clone(),
            || "business as usual",
        )
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(result, "business as usual");
        assert_eq!(mock.set_calls(), 1);
        assert_eq!(mock.last_applied(), None);

        let err: Result<(), &str> = spawn_intercepted(
            thread::Builder::new().name("worker-5".to_string()),
            hook.clone(),
            || Err("task failure"),
        )
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(err, Err("task failure"));

        let panicked = spawn_intercepted(
            thread::Builder::new().name("worker-6".to_string()),
            hook,
            || panic::panic_any(7u32),
        )
        .unwrap()
        .join()
        .unwrap_err();
        assert_eq!(panicked.downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn test_failure_outcome_reported() {
        let mock = Arc::new(MockAffinity::new(4).failing_set());
        let hook = InterceptionHook::new(registry_with(WORKERS_ON_IO)).with_binding(mock);
        let outcome = thread::Builder::new()
            .name("worker-7".to_string())
            .spawn(move || hook.on_thread_start())
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(outcome, HookOutcome::Failed(_)));
    }

    #[test]
    fn test_affinity_aware_threads_are_skipped() {
        let mock = Arc::new(MockAffinity::new(4));
        let hook = InterceptionHook::new(registry_with(WORKERS_ON_IO)).with_binding(mock.clone());

        let outcomes = thread::Builder::new()
            .name("worker-8".to_string())
            .spawn(move || {
                mark_affinity_aware();
                (hook.on_thread_start(), hook.on_thread_start())
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(
            outcomes,
            (HookOutcome::AffinityAware, HookOutcome::AffinityAware)
        );
        assert_eq!(mock.set_calls(), 0);
    }
}
