use {
    crate::factory::AffinityThreadFactory,
    log::info,
    serde::{Deserialize, Serialize},
    std::{io, ops::Deref, sync::Arc},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RayonConfig {
    pub worker_threads: usize,
    pub stack_size_bytes: usize,
}

impl Default for RayonConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            stack_size_bytes: 2 * 1024 * 1024,
        }
    }
}

/// A rayon pool whose every worker is produced by one [`AffinityThreadFactory`],
/// so all workers are pinned to the same cores before they take work.
#[derive(Debug)]
pub struct PinnedRayonPool {
    pub rayon_pool: rayon::ThreadPool,
    pub config: RayonConfig,
    factory: Arc<AffinityThreadFactory>,
}

impl Deref for PinnedRayonPool {
    type Target = rayon::ThreadPool;

    fn deref(&self) -> &Self::Target {
        &self.rayon_pool
    }
}

impl PinnedRayonPool {
    pub fn new(
        name: String,
        config: RayonConfig,
        factory: AffinityThreadFactory,
    ) -> anyhow::Result<Self> {
        let factory = Arc::new(factory);
        info!(
            "Starting rayon pool {name} with {} workers on cores {}",
            config.worker_threads,
            factory.descriptor()
        );
        let spawn_factory = factory.clone();
        let stack_size = config.stack_size_bytes;
        let rayon_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(move |i| format!("{name}-{i}"))
            .stack_size(stack_size)
            .spawn_handler(move |thread| {
                let name = thread
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| spawn_factory.next_name());
                // detached, workers exit once the pool is dropped
                spawn_factory
                    .new_named_thread(name, move || thread.run())
                    .stack_size(stack_size)
                    .start()
                    .map(drop)
                    .map_err(io::Error::other)
            })
            .build()?;
        Ok(Self {
            rayon_pool,
            config,
            factory,
        })
    }

    pub fn factory(&self) -> &AffinityThreadFactory {
        &self.factory
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{pinned_thread::PinnedThreadHandle, test_utils::MockAffinity},
        pinning_cpu_utils::AffinityDescriptor,
    };

    #[test]
    fn test_workers_are_pinned_by_the_factory() {
        let mock = Arc::new(MockAffinity::new(4));
        let cores = AffinityDescriptor::from_cores_within([1, 3], 4).unwrap();
        let factory = AffinityThreadFactory::new(cores.clone()).with_binding(mock.clone());
        let pool = PinnedRayonPool::new(
            "solPool".to_string(),
            RayonConfig {
                worker_threads: 3,
                ..RayonConfig::default()
            },
            factory,
        )
        .unwrap();

        assert_eq!(mock.set_calls(), 3);
        let (name, affinity) = pool.install(|| {
            let handle = PinnedThreadHandle::current().unwrap();
            (handle.name(), handle.affinity().unwrap())
        });
        assert!(name.starts_with("solPool-"), "{name}");
        assert_eq!(affinity, cores);
        assert_eq!(pool.factory().descriptor(), &cores);
    }
}
