use {
    crate::{
        config::{AffinityConfig, PolicyConfiguration},
        error::ConfigError,
    },
    arc_swap::ArcSwap,
    log::info,
    pinning_cpu_utils::AffinityDescriptor,
    std::sync::{Arc, LazyLock},
};

static GLOBAL_REGISTRY: LazyLock<Arc<AffinityGroupRegistry>> =
    LazyLock::new(|| Arc::new(AffinityGroupRegistry::default()));

/// Holds the active [`PolicyConfiguration`] snapshot.
///
/// Readers load the snapshot without locking; a swap replaces it as a whole,
/// so a resolution observes either the old or the new configuration and never
/// a mixture of the two.
#[derive(Debug, Default)]
pub struct AffinityGroupRegistry {
    active: ArcSwap<PolicyConfiguration>,
}

impl AffinityGroupRegistry {
    pub fn new(config: PolicyConfiguration) -> Self {
        Self {
            active: ArcSwap::from_pointee(config),
        }
    }

    /// The process-wide registry. Starts with an empty configuration.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Affinity for a thread named `thread_name` under the active snapshot.
    ///
    /// `None` means the thread should be left unpinned.
    pub fn resolve(&self, thread_name: &str) -> Option<AffinityDescriptor> {
        self.active.load().resolve(thread_name).cloned()
    }

    /// Validates `config` and makes it the active snapshot.
    ///
    /// Returns the replaced snapshot. On error the active snapshot is unchanged.
    pub fn swap_configuration(
        &self,
        config: &AffinityConfig,
    ) -> Result<Arc<PolicyConfiguration>, ConfigError> {
        let validated = PolicyConfiguration::try_from_config(config)?;
        Ok(self.install(validated))
    }

    /// Makes an already validated snapshot active, returning the replaced one.
    pub fn install(&self, config: PolicyConfiguration) -> Arc<PolicyConfiguration> {
        info!(
            "Installing affinity policy with {} rules, {} groups, default {:?}",
            config.rules().len(),
            config.groups().count(),
            config.default_descriptor(),
        );
        self.active.swap(Arc::new(config))
    }

    /// Drops back to the "no configuration" state.
    pub fn clear(&self) -> Arc<PolicyConfiguration> {
        self.install(PolicyConfiguration::empty())
    }

    pub fn snapshot(&self) -> Arc<PolicyConfiguration> {
        self.active.load_full()
    }
}
