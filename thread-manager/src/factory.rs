use {
    crate::{
        config::PolicyConfiguration,
        error::{ConfigError, PinningError},
        pinned_thread::{PinnedJoinHandle, PinnedThread},
        policy::CoreAllocation,
    },
    pinning_cpu_utils::{AffinityDescriptor, CpuAffinityError, NativeAffinity, SystemAffinity},
    std::{
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    },
};

/// Produces pinned threads that all share one fixed core set.
///
/// Produced threads are independent of each other and of the factory; the
/// only state kept here is the descriptor and a counter used for naming.
pub struct AffinityThreadFactory {
    descriptor: AffinityDescriptor,
    name_prefix: String,
    id_count: AtomicUsize,
    native: Arc<dyn NativeAffinity>,
}

impl fmt::Debug for AffinityThreadFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityThreadFactory")
            .field("descriptor", &self.descriptor)
            .field("name_prefix", &self.name_prefix)
            .finish_non_exhaustive()
    }
}

impl AffinityThreadFactory {
    pub fn new(descriptor: AffinityDescriptor) -> Self {
        Self {
            descriptor,
            name_prefix: "affinity".to_string(),
            id_count: AtomicUsize::new(0),
            native: Arc::new(SystemAffinity),
        }
    }

    pub fn from_mask(mask: u64) -> Result<Self, CpuAffinityError> {
        Ok(Self::new(AffinityDescriptor::from_mask(mask)?))
    }

    pub fn from_text(bits: &str) -> Result<Self, CpuAffinityError> {
        Ok(Self::new(AffinityDescriptor::from_text(bits)?))
    }

    /// Resolves `allocation` once, so group references are looked up in `config` now.
    pub fn from_allocation(
        allocation: &CoreAllocation,
        config: &PolicyConfiguration,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(allocation.resolve(config)?))
    }

    /// Threads are named `<prefix>-<n>`.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn with_binding(mut self, native: Arc<dyn NativeAffinity>) -> Self {
        self.native = native;
        self
    }

    pub fn descriptor(&self) -> &AffinityDescriptor {
        &self.descriptor
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Next thread name this factory would hand out.
    pub fn next_name(&self) -> String {
        let n = self.id_count.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.name_prefix, n)
    }

    /// A not yet started thread running `f` on the factory's cores.
    pub fn new_thread<F, T>(&self, f: F) -> PinnedThread<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.new_named_thread(self.next_name(), f)
    }

    pub fn new_named_thread<F, T>(&self, name: impl Into<String>, f: F) -> PinnedThread<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        PinnedThread::new(f)
            .name(name)
            .affinity(self.descriptor.clone())
            .binding(self.native.clone())
    }

    /// Creates and starts a thread in one step.
    pub fn spawn<F, T>(&self, f: F) -> Result<PinnedJoinHandle<T>, PinningError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.new_thread(f).start()
    }
}
