use {
    crate::{config::PolicyConfiguration, error::ConfigError},
    pinning_cpu_utils::{AffinityDescriptor, CpuAffinityError},
    serde::{Deserialize, Serialize},
};

/// A core set as written in configuration, possibly deferred to a named group.
///
/// In TOML an allocation is written as a single-key table, e.g.
/// `{ mask = 3 }`, `{ text = "1100" }`, `{ cpu_list = "0-3,8" }`,
/// `{ cores = [0, 1] }` or `{ group = "io" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreAllocation {
    ///Bit `n` selects core `n`
    Mask(u64),
    ///Binary string, most significant bit first
    Text(String),
    ///Kernel range list such as "0-3,8"
    CpuList(String),
    ///Explicit core indices
    Cores(Vec<usize>),
    ///Cores of a named group, resolved against a PolicyConfiguration
    Group(String),
}

impl CoreAllocation {
    /// A deferred allocation naming a group.
    pub fn from_group(name: impl Into<String>) -> Self {
        Self::Group(name.into())
    }

    /// The referenced group name, if this allocation is deferred.
    pub fn group_name(&self) -> Option<&str> {
        match self {
            Self::Group(name) => Some(name),
            _ => None,
        }
    }

    /// Converts a concrete allocation into a descriptor. Returns `None` for group references.
    pub fn concrete(
        &self,
        core_count: usize,
    ) -> Option<Result<AffinityDescriptor, CpuAffinityError>> {
        self.build(|| Ok(core_count)).ok()
    }

    /// Resolves to concrete cores, looking group references up in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownGroup`] if the group does not exist in `config`
    /// and [`ConfigError::Affinity`] if a concrete allocation is invalid.
    pub fn resolve(&self, config: &PolicyConfiguration) -> Result<AffinityDescriptor, ConfigError> {
        match self.build(pinning_cpu_utils::core_count) {
            Ok(descriptor) => Ok(descriptor?),
            Err(name) => config
                .group(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownGroup {
                    group: name.to_string(),
                    referenced_by: "allocation".to_string(),
                }),
        }
    }

    /// Builds a concrete form, asking for the core count only then.
    /// A group reference comes back as `Err(name)`.
    fn build(
        &self,
        core_count: impl FnOnce() -> Result<usize, CpuAffinityError>,
    ) -> Result<Result<AffinityDescriptor, CpuAffinityError>, &str> {
        let descriptor = match self {
            Self::Group(name) => return Err(name),
            Self::Mask(mask) => {
                core_count().and_then(|n| AffinityDescriptor::from_mask_within(*mask, n))
            }
            Self::Text(bits) => {
                core_count().and_then(|n| AffinityDescriptor::from_text_within(bits, n))
            }
            Self::CpuList(list) => {
                core_count().and_then(|n| AffinityDescriptor::from_cpu_list_within(list, n))
            }
            Self::Cores(cores) => core_count()
                .and_then(|n| AffinityDescriptor::from_cores_within(cores.iter().copied(), n)),
        };
        Ok(descriptor)
    }
}

impl From<&AffinityDescriptor> for CoreAllocation {
    fn from(descriptor: &AffinityDescriptor) -> Self {
        Self::Cores(descriptor.cores().to_vec())
    }
}
