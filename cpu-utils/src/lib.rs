// Activate some of the Rust 2024 lints to make the future migration easier.
#![warn(if_let_rescope)]
#![warn(keyword_idents_2024)]
#![warn(missing_unsafe_on_extern)]
#![warn(rust_2024_guarded_string_incompatible_syntax)]
#![warn(rust_2024_incompatible_pat)]
#![warn(tail_expr_drop_order)]
#![warn(unsafe_attr_outside_unsafe)]
#![warn(unsafe_op_in_unsafe_fn)]

//! CPU affinity descriptors and native thread bindings.
//!
//! This crate is the only place that talks to the platform's affinity system
//! calls. It provides an immutable [`AffinityDescriptor`] value describing a set
//! of cores, and the [`NativeAffinity`] contract (identify the calling thread,
//! get and set a thread's cores, count the cores) with [`SystemAffinity`] as its
//! OS-backed implementation.
//!
//! # Platform Support
//!
//! Linux only. Native calls return [`CpuAffinityError::NotSupported`] on other
//! platforms; descriptors remain usable everywhere.
//!
//! # Examples
//!
//! ```no_run
//! use pinning_cpu_utils::*;
//!
//! # fn main() -> Result<(), CpuAffinityError> {
//! let io_cores = AffinityDescriptor::from_text("0011")?;
//! let me = SystemAffinity.current_native_id()?;
//! SystemAffinity.set_affinity(me, &io_cores)?;
//! assert_eq!(SystemAffinity.affinity(me)?, io_cores);
//! # Ok(())
//! # }
//! ```
//!

mod affinity;
mod descriptor;
mod error;

pub use {
    affinity::{
        core_count, current_native_id, set_thread_affinity, thread_affinity, NativeAffinity,
        NativeThreadId, SystemAffinity, CPU_SETSIZE,
    },
    descriptor::AffinityDescriptor,
    error::CpuAffinityError,
};
