//! Error types for CPU affinity operations.

use {std::io, thiserror::Error};

/// Errors that can occur while building affinity descriptors or talking to the OS.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CpuAffinityError {
    /// The OS rejected an affinity or identity call
    #[error("native call {op} failed: {source}")]
    NativeCall {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Operation not supported on this platform
    #[error("CPU affinity operations are not supported on this platform")]
    NotSupported,

    /// Core index outside of the platform's range
    #[error("CPU {cpu} is invalid (max CPU is {max})")]
    InvalidCpu { cpu: usize, max: usize },

    /// Descriptor would not contain any core
    #[error("CPU list cannot be empty")]
    EmptyCpuList,

    /// Failed to parse a textual mask or CPU range
    #[error("Failed to parse CPU specification: {0}")]
    ParseError(String),
}

impl CpuAffinityError {
    pub(crate) fn native(op: &'static str) -> Self {
        Self::NativeCall {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// True for malformed masks and out-of-range core indices.
    pub fn is_invalid_mask(&self) -> bool {
        matches!(
            self,
            Self::InvalidCpu { .. } | Self::EmptyCpuList | Self::ParseError(_)
        )
    }

    /// True when the OS reported that the addressed thread no longer exists.
    pub fn is_stale_thread(&self) -> bool {
        match self {
            Self::NativeCall { source, .. } => source.raw_os_error() == Some(libc::ESRCH),
            _ => false,
        }
    }

    /// True when the OS refused the call for lack of privileges.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::NativeCall { source, .. } => {
                source.kind() == io::ErrorKind::PermissionDenied
                    || source.raw_os_error() == Some(libc::EPERM)
            }
            _ => false,
        }
    }
}
