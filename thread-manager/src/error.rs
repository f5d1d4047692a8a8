//! Error types for pinned threads and affinity policy configuration.

use {
    pinning_cpu_utils::{AffinityDescriptor, CpuAffinityError},
    std::io,
    thiserror::Error,
};

/// Errors reported to callers of explicit pinning operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PinningError {
    /// Descriptor or native call failure
    #[error(transparent)]
    Affinity(#[from] CpuAffinityError),

    /// Affinity accessed before the thread captured its native identity
    #[error("pinned thread is not bound to a native thread yet, cannot access affinity information")]
    Uninitialized,

    /// Affinity accessed after the thread's native identity became invalid
    #[error("pinned thread has terminated, last known affinity was {last_known:?}")]
    ThreadTerminated {
        last_known: Option<AffinityDescriptor>,
    },

    /// The OS refused to create the thread
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    /// The thread went away before reporting its binding
    #[error("pinned thread exited before binding to a native thread")]
    StartupAborted,
}

impl PinningError {
    /// True for accesses outside of the window in which the native identity is valid.
    pub fn is_uninitialized_access(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::ThreadTerminated { .. })
    }
}

/// Errors detected while validating an affinity policy configuration.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A rule or the default references a group that is not configured
    #[error("group {group:?} referenced by {referenced_by} is not configured")]
    UnknownGroup { group: String, referenced_by: String },

    /// A group is defined in terms of another group
    #[error("group {group:?} must be a concrete core set, found reference to group {target:?}")]
    NestedGroup { group: String, target: String },

    /// A group's core set is malformed or out of range
    #[error("group {group:?} has an invalid core set: {source}")]
    InvalidGroup {
        group: String,
        #[source]
        source: CpuAffinityError,
    },

    /// A thread-name pattern could not be compiled
    #[error("invalid thread name pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A directly supplied core set is malformed or out of range
    #[error(transparent)]
    Affinity(#[from] CpuAffinityError),

    /// The configuration document could not be parsed
    #[error("failed to parse affinity configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
