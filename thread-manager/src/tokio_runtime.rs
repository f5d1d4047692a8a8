use {
    crate::hook::InterceptionHook,
    log::info,
    serde::{Deserialize, Serialize},
    std::{
        future::Future,
        sync::atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokioConfig {
    ///number of worker threads tokio is allowed to spawn, 0 means one per core
    pub worker_threads: usize,
    ///max number of blocking threads tokio is allowed to spawn
    pub max_blocking_threads: usize,
    pub stack_size_bytes: usize,
    pub event_interval: u32,
}

impl Default for TokioConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            max_blocking_threads: 1,
            stack_size_bytes: 2 * 1024 * 1024,
            event_interval: 61,
        }
    }
}

/// A multi-thread tokio runtime whose threads are pinned by name policy.
///
/// Worker and blocking threads are named `<name>-<n>`; the interception hook
/// fires on each of them from `on_thread_start`, before tokio hands it any
/// task. Affinity binds to the OS thread, so every task scheduled on a pinned
/// worker shares that worker's cores.
#[derive(Debug)]
pub struct TokioRuntime {
    pub(crate) tokio: tokio::runtime::Runtime,
    pub config: TokioConfig,
}

impl TokioRuntime {
    pub fn new(name: String, cfg: TokioConfig, hook: InterceptionHook) -> anyhow::Result<Self> {
        let num_workers = if cfg.worker_threads == 0 {
            pinning_cpu_utils::core_count()?
        } else {
            cfg.worker_threads
        };
        info!("Starting tokio runtime {name} with {num_workers} workers");

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        let atomic_id: AtomicUsize = AtomicUsize::new(0);
        builder
            .worker_threads(num_workers)
            .event_interval(cfg.event_interval)
            .thread_name_fn(move || {
                let id = atomic_id.fetch_add(1, Ordering::SeqCst);
                format!("{name}-{id}")
            })
            .thread_stack_size(cfg.stack_size_bytes)
            .enable_all()
            .max_blocking_threads(cfg.max_blocking_threads)
            .on_thread_start(move || {
                hook.on_thread_start();
            });
        Ok(TokioRuntime {
            tokio: builder.build()?,
            config: cfg,
        })
    }

    /// Runs `fut` to completion on the calling thread, which is not pinned.
    pub fn start<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        self.tokio.block_on(fut)
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        self.tokio.handle()
    }
}
