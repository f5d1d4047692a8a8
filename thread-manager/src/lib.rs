//! Pinned threads, affinity thread factories and name-based affinity policy.
//!
//! Threads get their cores in one of three ways:
//!
//! * explicitly, as a [`PinnedThread`] started with an initial descriptor,
//! * from an [`AffinityThreadFactory`] that pins every thread it makes identically,
//! * by name, when an [`InterceptionHook`] fires at the start of a thread the
//!   application did not create itself and resolves the name against the
//!   [`AffinityGroupRegistry`].
//!
//! ```no_run
//! use pinning_thread_manager::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AffinityConfig::from_toml_str(
//!     r#"
//!     [groups]
//!     net = { cpu_list = "0-1" }
//!
//!     [[rules]]
//!     pattern = "solNet-*"
//!     group = "net"
//!     "#,
//! )?;
//! AffinityGroupRegistry::global().swap_configuration(&config)?;
//!
//! let runtime = TokioRuntime::new(
//!     "solNet".to_string(),
//!     TokioConfig::default(),
//!     InterceptionHook::global(),
//! )?;
//! runtime.start(async { /* every worker runs on cores 0 and 1 */ });
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod hook;
pub mod pattern;
pub mod pinned_thread;
pub mod policy;
pub mod rayon_runtime;
pub mod registry;
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod test_utils;
pub mod tokio_runtime;

pub use {
    config::{AffinityConfig, AffinityGroup, MatchRule, MatchRuleConfig, PolicyConfiguration},
    error::{ConfigError, PinningError},
    factory::AffinityThreadFactory,
    hook::{intercept, spawn_intercepted, HookOutcome, InterceptionHook},
    pattern::ThreadNamePattern,
    pinned_thread::{PinnedJoinHandle, PinnedThread, PinnedThreadHandle, PinnedThreadState},
    policy::CoreAllocation,
    rayon_runtime::{PinnedRayonPool, RayonConfig},
    registry::AffinityGroupRegistry,
    tokio_runtime::{TokioConfig, TokioRuntime},
};
