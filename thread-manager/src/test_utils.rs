//! In-memory [`NativeAffinity`] for exercising pinning logic without touching
//! the real scheduler.

use {
    pinning_cpu_utils::{AffinityDescriptor, CpuAffinityError, NativeAffinity, NativeThreadId},
    std::{
        cell::Cell,
        collections::{HashMap, HashSet},
        io,
        sync::{
            atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
            Mutex,
        },
    },
};

static NEXT_MOCK_ID: AtomicI64 = AtomicI64::new(1);

thread_local! {
    static MOCK_ID: Cell<Option<i64>> = const { Cell::new(None) };
}

/// Records affinity per thread in memory, counting `set_affinity` calls.
#[derive(Debug)]
pub struct MockAffinity {
    core_count: usize,
    affinities: Mutex<HashMap<NativeThreadId, AffinityDescriptor>>,
    stale: Mutex<HashSet<NativeThreadId>>,
    last_applied: Mutex<Option<AffinityDescriptor>>,
    set_calls: AtomicUsize,
    fail_set: AtomicBool,
}

impl MockAffinity {
    pub fn new(core_count: usize) -> Self {
        Self {
            core_count,
            affinities: Mutex::default(),
            stale: Mutex::default(),
            last_applied: Mutex::default(),
            set_calls: AtomicUsize::new(0),
            fail_set: AtomicBool::new(false),
        }
    }

    /// Every `set_affinity` fails with EPERM.
    pub fn failing_set(self) -> Self {
        self.fail_set.store(true, Ordering::Relaxed);
        self
    }

    pub fn set_fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::Relaxed);
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Descriptor of the most recent successful `set_affinity`.
    pub fn last_applied(&self) -> Option<AffinityDescriptor> {
        self.last_applied.lock().unwrap().clone()
    }

    /// Makes every further call addressing `thread` fail with ESRCH.
    pub fn mark_stale(&self, thread: NativeThreadId) {
        self.stale.lock().unwrap().insert(thread);
    }

    fn check_alive(&self, thread: NativeThreadId, op: &'static str) -> Result<(), CpuAffinityError> {
        if self.stale.lock().unwrap().contains(&thread) {
            return Err(CpuAffinityError::NativeCall {
                op,
                source: io::Error::from_raw_os_error(libc::ESRCH),
            });
        }
        Ok(())
    }
}

impl NativeAffinity for MockAffinity {
    fn current_native_id(&self) -> Result<NativeThreadId, CpuAffinityError> {
        let id = MOCK_ID.with(|id| match id.get() {
            Some(id) => id,
            None => {
                let next = NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed);
                id.set(Some(next));
                next
            }
        });
        Ok(NativeThreadId::from_raw(id))
    }

    fn affinity(&self, thread: NativeThreadId) -> Result<AffinityDescriptor, CpuAffinityError> {
        self.check_alive(thread, "sched_getaffinity")?;
        match self.affinities.lock().unwrap().get(&thread) {
            Some(descriptor) => Ok(descriptor.clone()),
            None => AffinityDescriptor::from_cores_within(0..self.core_count, self.core_count),
        }
    }

    fn set_affinity(
        &self,
        thread: NativeThreadId,
        descriptor: &AffinityDescriptor,
    ) -> Result<(), CpuAffinityError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check_alive(thread, "sched_setaffinity")?;
        descriptor.validate(self.core_count)?;
        if self.fail_set.load(Ordering::Relaxed) {
            return Err(CpuAffinityError::NativeCall {
                op: "sched_setaffinity",
                source: io::Error::from_raw_os_error(libc::EPERM),
            });
        }
        self.affinities
            .lock()
            .unwrap()
            .insert(thread, descriptor.clone());
        *self.last_applied.lock().unwrap() = Some(descriptor.clone());
        Ok(())
    }

    fn core_count(&self) -> Result<usize, CpuAffinityError> {
        Ok(self.core_count)
    }
}
