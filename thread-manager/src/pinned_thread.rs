//! Threads that are bound to a core set before their task body runs.

use {
    crate::{error::PinningError, hook},
    log::{debug, error},
    pinning_cpu_utils::{AffinityDescriptor, NativeAffinity, NativeThreadId, SystemAffinity},
    std::{
        any::Any,
        cell::RefCell,
        fmt, io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex, MutexGuard, PoisonError,
        },
        thread,
    },
};

static NEXT_UNNAMED_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CURRENT: RefCell<Option<PinnedThreadHandle>> = const { RefCell::new(None) };
}

/// Lifecycle of a [`PinnedThread`]. States only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PinnedThreadState {
    /// Constructed, no OS thread yet
    Created,
    /// OS thread running, native identity not captured yet
    Initializing,
    /// Native identity captured and the initial descriptor, if any, applied
    Bound,
    /// Task body executing
    Running,
    /// Task body finished, or the native identity was found stale
    Terminated,
}

struct Binding {
    state: PinnedThreadState,
    name: String,
    native: Arc<dyn NativeAffinity>,
    native_id: Option<NativeThreadId>,
    last_known: Option<AffinityDescriptor>,
}

/// Shared view of a pinned thread, usable from any thread.
///
/// Affinity reads and writes are serialized through one lock, so a read never
/// observes a partially applied write and concurrent writers resolve to
/// whichever one ran last.
#[derive(Clone)]
pub struct PinnedThreadHandle {
    binding: Arc<Mutex<Binding>>,
}

impl fmt::Debug for PinnedThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.lock();
        f.debug_struct("PinnedThreadHandle")
            .field("name", &binding.name)
            .field("state", &binding.state)
            .field("native_id", &binding.native_id)
            .field("last_known", &binding.last_known)
            .finish()
    }
}

impl PinnedThreadHandle {
    fn new(name: String, native: Arc<dyn NativeAffinity>) -> Self {
        Self {
            binding: Arc::new(Mutex::new(Binding {
                state: PinnedThreadState::Created,
                name,
                native,
                native_id: None,
                last_known: None,
            })),
        }
    }

    /// Handle of the calling thread, if it was started as a pinned thread.
    pub fn current() -> Option<Self> {
        CURRENT
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten()
    }

    fn lock(&self) -> MutexGuard<'_, Binding> {
        // binding updates never leave the struct half written
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn state(&self) -> PinnedThreadState {
        self.lock().state
    }

    /// Native identity while the thread is bound.
    pub fn native_id(&self) -> Option<NativeThreadId> {
        self.lock().native_id
    }

    /// The descriptor most recently applied or observed. Survives termination.
    pub fn last_known_affinity(&self) -> Option<AffinityDescriptor> {
        self.lock().last_known.clone()
    }

    /// Cores the thread may currently run on, as reported by the OS.
    ///
    /// # Errors
    ///
    /// Fails immediately with [`PinningError::Uninitialized`] before the thread
    /// is bound and with [`PinningError::ThreadTerminated`] once its native
    /// identity is no longer valid.
    pub fn affinity(&self) -> Result<AffinityDescriptor, PinningError> {
        let mut binding = self.lock();
        let id = bound_id(&binding)?;
        match binding.native.affinity(id) {
            Ok(descriptor) => {
                binding.last_known = Some(descriptor.clone());
                Ok(descriptor)
            }
            Err(err) => Err(stale_or(&mut binding, err)),
        }
    }

    /// Restricts the thread to `descriptor`.
    ///
    /// # Errors
    ///
    /// Same access rules as [`Self::affinity`]; invalid descriptors and OS
    /// rejections are returned as [`PinningError::Affinity`].
    pub fn set_affinity(&self, descriptor: &AffinityDescriptor) -> Result<(), PinningError> {
        let mut binding = self.lock();
        let id = bound_id(&binding)?;
        match binding.native.set_affinity(id, descriptor) {
            Ok(()) => {
                debug!("Pinned thread {} ({id}) to cores {descriptor}", binding.name);
                binding.last_known = Some(descriptor.clone());
                Ok(())
            }
            Err(err) => Err(stale_or(&mut binding, err)),
        }
    }

    fn set_name(&self, name: String) {
        self.lock().name = name;
    }

    fn set_native(&self, native: Arc<dyn NativeAffinity>) {
        self.lock().native = native;
    }

    /// Captures the calling thread's identity and applies `initial`.
    ///
    /// Native calls run outside the lock so accessors keep failing fast while
    /// the thread initializes.
    fn bind(&self, initial: Option<&AffinityDescriptor>) -> Result<(), PinningError> {
        let (native, name) = {
            let mut binding = self.lock();
            binding.state = PinnedThreadState::Initializing;
            (binding.native.clone(), binding.name.clone())
        };

        let bound = native.current_native_id().and_then(|id| {
            let last_known = match initial {
                Some(descriptor) => {
                    native.set_affinity(id, descriptor)?;
                    Some(descriptor.clone())
                }
                None => native.affinity(id).ok(),
            };
            Ok((id, last_known))
        });

        let mut binding = self.lock();
        match bound {
            Ok((id, last_known)) => {
                debug!("Thread {name} bound as {id} with affinity {last_known:?}");
                binding.native_id = Some(id);
                binding.last_known = last_known;
                binding.state = PinnedThreadState::Bound;
                Ok(())
            }
            Err(err) => {
                error!("Thread {name} could not apply its initial affinity {initial:?}: {err}");
                binding.state = PinnedThreadState::Terminated;
                Err(err.into())
            }
        }
    }

    fn advance(&self, state: PinnedThreadState) {
        let mut binding = self.lock();
        if binding.state < state {
            binding.state = state;
        }
        if state == PinnedThreadState::Terminated {
            binding.native_id = None;
        }
    }
}

fn bound_id(binding: &Binding) -> Result<NativeThreadId, PinningError> {
    match (binding.state, binding.native_id) {
        (PinnedThreadState::Bound | PinnedThreadState::Running, Some(id)) => Ok(id),
        (PinnedThreadState::Terminated, _) => Err(PinningError::ThreadTerminated {
            last_known: binding.last_known.clone(),
        }),
        _ => Err(PinningError::Uninitialized),
    }
}

fn stale_or(binding: &mut Binding, err: pinning_cpu_utils::CpuAffinityError) -> PinningError {
    if !err.is_stale_thread() {
        return err.into();
    }
    debug!("Thread {} no longer exists, marking it terminated", binding.name);
    binding.state = PinnedThreadState::Terminated;
    binding.native_id = None;
    PinningError::ThreadTerminated {
        last_known: binding.last_known.clone(),
    }
}

/// Marks the handle terminated however the thread exits, including by unwinding.
struct TerminationGuard(PinnedThreadHandle);

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        self.0.advance(PinnedThreadState::Terminated);
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
    }
}

/// A task body plus the affinity it must run with.
///
/// ```no_run
/// use pinning_cpu_utils::AffinityDescriptor;
/// use pinning_thread_manager::PinnedThread;
///
/// let cores = AffinityDescriptor::from_text("11").unwrap();
/// let worker = PinnedThread::new(|| 2 + 2)
///     .name("solWorker")
///     .affinity(cores)
///     .start()
///     .unwrap();
/// assert_eq!(worker.join().unwrap(), 4);
/// ```
pub struct PinnedThread<T> {
    body: Box<dyn FnOnce() -> T + Send + 'static>,
    affinity: Option<AffinityDescriptor>,
    stack_size: Option<usize>,
    handle: PinnedThreadHandle,
}

impl<T> fmt::Debug for PinnedThread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedThread")
            .field("affinity", &self.affinity)
            .field("stack_size", &self.stack_size)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> PinnedThread<T> {
    /// Wraps `f` without touching the OS. The thread is named `pinned-<n>`
    /// until [`Self::name`] says otherwise.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let id = NEXT_UNNAMED_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            body: Box::new(f),
            affinity: None,
            stack_size: None,
            handle: PinnedThreadHandle::new(format!("pinned-{id}"), Arc::new(SystemAffinity)),
        }
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.handle.set_name(name.into());
        self
    }

    /// Cores to apply before the task body runs.
    pub fn affinity(mut self, descriptor: AffinityDescriptor) -> Self {
        self.affinity = Some(descriptor);
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Routes every native call of this thread through `native`.
    pub fn binding(self, native: Arc<dyn NativeAffinity>) -> Self {
        self.handle.set_native(native);
        self
    }

    /// Handle for affinity access; usable before start, where it fails fast.
    pub fn handle(&self) -> PinnedThreadHandle {
        self.handle.clone()
    }

    /// Spawns the OS thread and waits until it is bound.
    ///
    /// # Errors
    ///
    /// If the initial descriptor cannot be applied the task body never runs
    /// and the native failure is returned here.
    pub fn start(self) -> Result<PinnedJoinHandle<T>, PinningError> {
        let Self {
            body,
            affinity,
            stack_size,
            handle,
        } = self;

        let name = handle.name();
        // std panics on names it cannot hand to the OS
        if name.contains('\0') {
            handle.advance(PinnedThreadState::Terminated);
            return Err(PinningError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("thread name {name:?} contains a NUL byte"),
            )));
        }
        let mut builder = thread::Builder::new().name(name);
        if let Some(bytes) = stack_size {
            builder = builder.stack_size(bytes);
        }

        let (startup_sender, startup_receiver) = crossbeam_channel::bounded(1);
        let thread_handle = handle.clone();
        let spawned = builder
            .spawn(move || {
                hook::mark_affinity_aware();
                let _guard = TerminationGuard(thread_handle.clone());
                let bound = thread_handle.bind(affinity.as_ref());
                let proceed = bound.is_ok();
                if startup_sender.send(bound).is_err() || !proceed {
                    return None;
                }
                let _ = CURRENT.try_with(|current| {
                    *current.borrow_mut() = Some(thread_handle.clone());
                });
                thread_handle.advance(PinnedThreadState::Running);
                Some(body())
            });
        let std_handle = match spawned {
            Ok(std_handle) => std_handle,
            Err(err) => {
                handle.advance(PinnedThreadState::Terminated);
                return Err(PinningError::Spawn(err));
            }
        };

        let startup = startup_receiver.recv();
        match startup {
            Ok(Ok(())) => Ok(PinnedJoinHandle { std_handle, handle }),
            Ok(Err(err)) => {
                let _ = std_handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = std_handle.join();
                handle.advance(PinnedThreadState::Terminated);
                Err(PinningError::StartupAborted)
            }
        }
    }
}

/// Owned permission to join a started pinned thread.
pub struct PinnedJoinHandle<T> {
    std_handle: thread::JoinHandle<Option<T>>,
    handle: PinnedThreadHandle,
}

impl<T> fmt::Debug for PinnedJoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedJoinHandle")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<T> PinnedJoinHandle<T> {
    pub fn handle(&self) -> &PinnedThreadHandle {
        &self.handle
    }

    pub fn thread(&self) -> &thread::Thread {
        self.std_handle.thread()
    }

    pub fn is_finished(&self) -> bool {
        self.std_handle.is_finished()
    }

    /// Waits for the task body, propagating its panic like [`thread::JoinHandle::join`].
    ///
    /// A thread that exited without running its body reports
    /// [`PinningError::StartupAborted`] as the error payload.
    pub fn join(self) -> thread::Result<T> {
        self.std_handle
            .join()?
            .ok_or_else(|| Box::new(PinningError::StartupAborted) as Box<dyn Any + Send>)
    }
}
