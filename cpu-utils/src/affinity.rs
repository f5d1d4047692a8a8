//! Native thread identity and affinity system calls.

#[cfg(target_os = "linux")]
use {log::debug, std::fs};
use {
    crate::{descriptor::AffinityDescriptor, error::CpuAffinityError},
    std::{fmt, sync::OnceLock},
};

/// Maximum CPU ID that can be used with CPU_SET.
///
/// This is the standard Linux value defined in glibc. The kernel itself supports
/// more CPUs, but the cpu_set_t structure in glibc is fixed at this size.
pub const CPU_SETSIZE: usize = 1024;

static CORE_COUNT: OnceLock<Result<usize, String>> = OnceLock::new();

/// OS-level identity of a running thread.
///
/// On Linux this is the kernel thread id. The value only addresses affinity
/// calls; it never owns or controls the thread it names, and it may be reused
/// by the OS after the thread exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeThreadId(i64);

impl NativeThreadId {
    pub fn as_raw(&self) -> i64 {
        self.0
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for NativeThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

/// The four-call platform contract every affinity operation goes through.
///
/// [`SystemAffinity`] is the real implementation; tests substitute recording
/// or failing bindings.
pub trait NativeAffinity: Send + Sync + fmt::Debug {
    /// Identity of the calling thread.
    fn current_native_id(&self) -> Result<NativeThreadId, CpuAffinityError>;

    /// Cores the addressed thread may currently run on.
    fn affinity(&self, thread: NativeThreadId) -> Result<AffinityDescriptor, CpuAffinityError>;

    /// Restrict the addressed thread to `descriptor`.
    fn set_affinity(
        &self,
        thread: NativeThreadId,
        descriptor: &AffinityDescriptor,
    ) -> Result<(), CpuAffinityError>;

    /// Number of cores available to the process.
    fn core_count(&self) -> Result<usize, CpuAffinityError>;
}

/// [`NativeAffinity`] backed by the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAffinity;

impl NativeAffinity for SystemAffinity {
    fn current_native_id(&self) -> Result<NativeThreadId, CpuAffinityError> {
        current_native_id()
    }

    fn affinity(&self, thread: NativeThreadId) -> Result<AffinityDescriptor, CpuAffinityError> {
        thread_affinity(thread)
    }

    fn set_affinity(
        &self,
        thread: NativeThreadId,
        descriptor: &AffinityDescriptor,
    ) -> Result<(), CpuAffinityError> {
        set_thread_affinity(thread, descriptor)
    }

    fn core_count(&self) -> Result<usize, CpuAffinityError> {
        core_count()
    }
}

/// Kernel identity of the calling thread.
///
/// # Errors
///
/// Returns [`CpuAffinityError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn current_native_id() -> Result<NativeThreadId, CpuAffinityError> {
    // safety: gettid has no preconditions and cannot fail
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    if tid <= 0 {
        return Err(CpuAffinityError::native("gettid"));
    }
    Ok(NativeThreadId(i64::from(tid)))
}

#[cfg(not(target_os = "linux"))]
pub fn current_native_id() -> Result<NativeThreadId, CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Restrict the addressed thread to the cores of `descriptor`.
///
/// # Examples
///
/// ```no_run
/// # use pinning_cpu_utils::*;
/// # fn main() -> Result<(), CpuAffinityError> {
/// let me = current_native_id()?;
/// set_thread_affinity(me, &AffinityDescriptor::from_cores([0])?)?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`CpuAffinityError::InvalidCpu`] if any core is not below [`core_count`].
/// Returns [`CpuAffinityError::NativeCall`] if the system call fails (e.g., permission
/// denied, or the thread no longer exists).
/// Returns [`CpuAffinityError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn set_thread_affinity(
    thread: NativeThreadId,
    descriptor: &AffinityDescriptor,
) -> Result<(), CpuAffinityError> {
    descriptor.validate(core_count()?)?;

    // safety: cpu_set_t is a POD type, zero-initialization is standard
    let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    for cpu in descriptor.iter() {
        // safety: validate() above bounds every cpu below CPU_SETSIZE
        unsafe {
            libc::CPU_SET(cpu, &mut cpu_set);
        }
    }

    // safety: sched_setaffinity is safe with valid parameters
    let result = unsafe {
        libc::sched_setaffinity(
            thread.0 as libc::pid_t,
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpu_set,
        )
    };

    if result != 0 {
        return Err(CpuAffinityError::native("sched_setaffinity"));
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_thread_affinity(
    _thread: NativeThreadId,
    _descriptor: &AffinityDescriptor,
) -> Result<(), CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Get the cores the addressed thread is allowed to run on.
///
/// # Errors
///
/// Returns [`CpuAffinityError::NativeCall`] if the system call fails, e.g. when the
/// thread has exited.
/// Returns [`CpuAffinityError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn thread_affinity(thread: NativeThreadId) -> Result<AffinityDescriptor, CpuAffinityError> {
    // safety: cpu_set_t is a POD type, zero-initialization is standard
    let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };

    // safety: sched_getaffinity is safe with valid parameters
    let result = unsafe {
        libc::sched_getaffinity(
            thread.0 as libc::pid_t,
            std::mem::size_of::<libc::cpu_set_t>(),
            &mut cpu_set,
        )
    };

    if result != 0 {
        return Err(CpuAffinityError::native("sched_getaffinity"));
    }

    let cores = (0..CPU_SETSIZE).filter(|&cpu| {
        // safety: CPU_ISSET is safe with valid cpu_set_t and cpu < CPU_SETSIZE
        unsafe { libc::CPU_ISSET(cpu, &cpu_set) }
    });
    AffinityDescriptor::from_cores_within(cores, CPU_SETSIZE)
}

#[cfg(not(target_os = "linux"))]
pub fn thread_affinity(_thread: NativeThreadId) -> Result<AffinityDescriptor, CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Get the maximum CPU ID on the system (online CPUs only).
///
/// Reads from `/sys/devices/system/cpu/online` or falls back to `sysconf(_SC_NPROCESSORS_ONLN)`.
///
/// # Errors
///
/// Returns [`CpuAffinityError::NativeCall`] if unable to determine CPU count.
#[cfg(target_os = "linux")]
fn max_cpu_id() -> Result<usize, CpuAffinityError> {
    if let Ok(content) = fs::read_to_string("/sys/devices/system/cpu/online") {
        let content = content.trim();

        // Parse range (e.g., "0-127" or just "0"); the last range ends at the max id
        let last = content.rsplit(',').next().unwrap_or(content);
        let max = match last.split_once('-') {
            Some((_, end)) => end.parse::<usize>(),
            None => last.parse::<usize>(),
        };
        if let Ok(max) = max {
            return Ok(max);
        }
    }

    debug!("Online CPU list unavailable, falling back to sysconf");
    // safety: sysconf is safe to call
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };

    if count <= 0 {
        return Err(CpuAffinityError::native("sysconf"));
    }

    Ok((count as usize).saturating_sub(1))
}

#[cfg(target_os = "linux")]
fn detect_core_count() -> Result<usize, CpuAffinityError> {
    let count = max_cpu_id()?.saturating_add(1).min(CPU_SETSIZE);
    debug!("Detected {count} online cores");
    Ok(count)
}

#[cfg(not(target_os = "linux"))]
fn detect_core_count() -> Result<usize, CpuAffinityError> {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .map_err(|source| CpuAffinityError::NativeCall {
            op: "available_parallelism",
            source,
        })
}

/// Get the total number of online CPUs on the system.
///
/// Queried once and cached for the lifetime of the process; CPU hot-plug is
/// not tracked.
///
/// # Errors
///
/// Returns [`CpuAffinityError::NativeCall`] if the count could not be determined
/// when it was first queried.
pub fn core_count() -> Result<usize, CpuAffinityError> {
    CORE_COUNT
        .get_or_init(|| detect_core_count().map_err(|err| err.to_string()))
        .clone()
        .map_err(|msg| CpuAffinityError::NativeCall {
            op: "core_count",
            source: std::io::Error::other(msg),
        })
}
