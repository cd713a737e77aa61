//! Round-robin preemptive kernel for a single Cortex-M core.
//!
//! A fixed set of threads is registered once, each with its own stack, and
//! linked into a ring. After [`launch`] the SysTick interrupt fires every
//! quantum; its handler saves the running thread's registers, moves on to the
//! next thread in the ring and restores that one. [`yield_now`] ends the
//! current quantum early through the same handler.
//!
//! ```ignore
//! fn t0() { loop { /* ... */ } }
//! fn t1() { loop { rr_kernel::yield_now() } }
//!
//! rr_kernel::register_threads(&[t0, t1]).unwrap();
//! let quantum = rr_kernel::Quantum::from_millis(10, rr_kernel::DEFAULT_CORE_HZ).unwrap();
//! rr_kernel::launch(rr_kernel::Config::new(quantum)).unwrap();
//! ```
//!
//! On anything but an Armv7-M target the `arch` module provides a simulated
//! core ([`arch::Cpu`]) that runs the same switch path against ordinary memory.
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod config;
pub mod error;
pub mod frame;
mod kernel_cell;
pub mod scheduler;
pub mod stack;
pub mod switch;
pub mod thread;

pub use config::{Config, Quantum, DEFAULT_CORE_HZ, STACK_SIZE, THREADS_NUMOF};
pub use error::{fault, Error, Fault};
pub use frame::SavedContext;
pub use scheduler::{RoundRobin, Scheduler};
pub use stack::{Stack, StackPool};
pub use switch::Phase;
pub use thread::{Ring, Thread, ThreadEntry, ThreadId, ThreadState};

#[cfg(all(target_arch = "arm", target_feature = "thumb2"))]
pub use arch::{launch, yield_now};

use kernel_cell::KernelCell;

pub(crate) static THREADS: KernelCell<Threads> = KernelCell::new(Threads::new());

static STACKS: StackPool = StackPool::new();

/// Kernel state: the thread ring, the running thread and the switch phase.
pub struct Threads<S: Scheduler = RoundRobin> {
    ring: Ring,
    current_thread: Option<ThreadId>,
    phase: Phase,
    launched: bool,
    quantum: Option<Quantum>,
    switches: u32,
    scheduler: S,
}

impl Threads {
    pub const fn new() -> Self {
        Self::with_scheduler(RoundRobin)
    }
}

impl Default for Threads {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Scheduler> Threads<S> {
    pub const fn with_scheduler(scheduler: S) -> Self {
        Self {
            ring: Ring::new(),
            current_thread: None,
            phase: Phase::Idle,
            launched: false,
            quantum: None,
            switches: 0,
            scheduler,
        }
    }

    /// Register all threads at once, as `(entry address, stack)` pairs.
    ///
    /// Returns the number of registered threads. Registration happens once;
    /// the ring cannot change afterwards.
    pub fn register<I>(&mut self, threads: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item = (usize, &'static mut [u8])>,
    {
        if self.launched {
            return Err(Error::AlreadyLaunched);
        }
        if !self.ring.is_empty() {
            return Err(Error::AlreadyRegistered);
        }
        self.ring = Ring::build(threads, thread_exit as usize)?;
        log::info!("registered {} threads", self.ring.len());
        Ok(self.ring.len())
    }

    /// Accept `config` and allow the first switch. The port arms the tick
    /// source and triggers that switch.
    pub fn launch(&mut self, config: &Config) -> Result<(), Error> {
        if self.launched {
            return Err(Error::AlreadyLaunched);
        }
        if self.ring.is_empty() {
            return Err(Error::NotRegistered);
        }
        self.launched = true;
        self.quantum = Some(config.quantum);
        log::info!(
            "launching {} threads, quantum {} cycles",
            self.ring.len(),
            config.quantum.cycles()
        );
        Ok(())
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn current_pid(&self) -> Option<ThreadId> {
        self.current_thread
    }

    pub fn current(&self) -> Option<&Thread> {
        self.current_thread.map(|pid| self.ring.get(pid))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_launched(&self) -> bool {
        self.launched
    }

    pub fn quantum(&self) -> Option<Quantum> {
        self.quantum
    }

    /// Completed switches, including the first one.
    pub fn switches(&self) -> u32 {
        self.switches
    }
}

/// Register threads running on the kernel's built-in stacks of
/// [`STACK_SIZE`] bytes each.
pub fn register_threads(entries: &[ThreadEntry]) -> Result<usize, Error> {
    if entries.is_empty() {
        return Err(Error::NoThreads);
    }
    if entries.len() > THREADS_NUMOF {
        return Err(Error::TooManyThreads {
            count: entries.len(),
            max: THREADS_NUMOF,
        });
    }
    let stacks = STACKS.take().ok_or(Error::AlreadyRegistered)?;
    register_threads_with_stacks(entries.iter().copied().zip(stacks))
}

/// Register threads with caller-provided stacks.
pub fn register_threads_with_stacks<I>(entries: I) -> Result<usize, Error>
where
    I: IntoIterator<Item = (ThreadEntry, &'static mut [u8])>,
{
    THREADS.with_mut(|mut threads| {
        threads.register(
            entries
                .into_iter()
                .map(|(entry, stack)| (entry as usize, stack)),
        )
    })
}

pub fn current_pid() -> Option<ThreadId> {
    THREADS.with(|threads| threads.current_pid())
}

/// Landing point for thread bodies that return.
///
/// Hooked into every initial frame as the return address.
fn thread_exit() -> ! {
    let pid = THREADS.with(|threads| threads.current_pid());
    fault(Fault::ThreadReturned { pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::leak_stack;

    fn idle() {}

    fn two_stacks() -> [(usize, &'static mut [u8]); 2] {
        [
            (idle as usize, leak_stack::<512>()),
            (idle as usize, leak_stack::<512>()),
        ]
    }

    #[test]
    fn registration_happens_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut threads = Threads::new();
        assert_eq!(threads.register(two_stacks()), Ok(2));
        assert_eq!(
            threads.register(two_stacks()),
            Err(Error::AlreadyRegistered)
        );
        assert_eq!(threads.ring().len(), 2);
    }

    #[test]
    fn failed_registration_leaves_kernel_empty() {
        let mut threads = Threads::new();
        let bad = [(idle as usize, leak_stack::<512>()), (0, leak_stack::<512>())];
        assert_eq!(threads.register(bad), Err(Error::NullEntry { index: 1 }));
        assert!(threads.ring().is_empty());
        assert_eq!(threads.register(two_stacks()), Ok(2));
    }

    #[test]
    fn frames_return_into_exit_trap() {
        let mut threads = Threads::new();
        threads.register(two_stacks()).unwrap();
        let frame = unsafe { threads.ring().get(1).saved_context().frame() };
        assert_eq!(frame.exception.lr, thread_exit as usize);
    }

    #[test]
    fn launch_requires_registered_threads() {
        let mut threads = Threads::new();
        assert_eq!(
            threads.launch(&Config::default()),
            Err(Error::NotRegistered)
        );
        threads.register(two_stacks()).unwrap();
        assert_eq!(threads.launch(&Config::default()), Ok(()));
        assert_eq!(threads.quantum(), Some(Config::default().quantum));
        assert_eq!(
            threads.launch(&Config::default()),
            Err(Error::AlreadyLaunched)
        );
        assert_eq!(threads.register(two_stacks()), Err(Error::AlreadyLaunched));
        assert_eq!(threads.current_pid(), None);
    }

    #[test]
    fn pool_registration_checks_count_before_taking_stacks() {
        assert_eq!(register_threads(&[]), Err(Error::NoThreads));
        assert_eq!(
            register_threads(&[idle as ThreadEntry; THREADS_NUMOF + 1]),
            Err(Error::TooManyThreads {
                count: THREADS_NUMOF + 1,
                max: THREADS_NUMOF
            })
        );
    }

    #[test]
    #[should_panic(expected = "returned outside the kernel")]
    fn returning_before_launch_faults() {
        thread_exit();
    }
}
