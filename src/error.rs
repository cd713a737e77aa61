//! Configuration errors and fatal kernel faults.
//!
//! Everything that can go wrong before `launch` hands the CPU to the threads is
//! an [`Error`] returned to the caller. Anything detected afterwards, on the
//! interrupt path, has no caller to return to and ends in [`fault`].

use core::fmt;

use crate::ThreadId;

/// Errors reported while registering threads or launching the kernel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// No entry points were supplied.
    NoThreads,
    /// More entry points than the kernel has TCB slots.
    TooManyThreads { count: usize, max: usize },
    /// Entry point at `index` is a null address.
    NullEntry { index: usize },
    /// Stack region at `index` cannot hold an initial frame and its guard word.
    StackTooSmall { index: usize, size: usize, min: usize },
    /// Tick period outside what the tick source can be programmed with.
    InvalidQuantum { cycles: u64 },
    /// Threads were already registered; the ring is immutable.
    AlreadyRegistered,
    /// `launch` called before any thread was registered.
    NotRegistered,
    /// `launch` called a second time.
    AlreadyLaunched,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoThreads => write!(f, "no threads supplied"),
            Error::TooManyThreads { count, max } => {
                write!(f, "{} threads supplied, at most {} supported", count, max)
            }
            Error::NullEntry { index } => write!(f, "thread {} has a null entry point", index),
            Error::StackTooSmall { index, size, min } => write!(
                f,
                "stack of thread {} is {} bytes, at least {} required",
                index, size, min
            ),
            Error::InvalidQuantum { cycles } => {
                write!(f, "quantum of {} cycles out of range", cycles)
            }
            Error::AlreadyRegistered => write!(f, "threads already registered"),
            Error::NotRegistered => write!(f, "no threads registered"),
            Error::AlreadyLaunched => write!(f, "kernel already launched"),
        }
    }
}

/// Fatal conditions detected on the switch path.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Fault {
    /// Saved stack pointer of `pid` left its region.
    StackOverflow { pid: ThreadId, sp: usize, limit: usize },
    /// Guard word at the bottom of the stack of `pid` was overwritten.
    StackCorrupted { pid: ThreadId },
    /// Successor of `pid` is not a registered thread.
    RingBroken { pid: ThreadId },
    /// Switch requested before the kernel was launched.
    NotLaunched,
    /// Switch entered while another one was in progress.
    Reentered,
    /// A thread body returned.
    ThreadReturned { pid: Option<ThreadId> },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::StackOverflow { pid, sp, limit } => write!(
                f,
                "thread {}: stack overflow (sp={:#x} limit={:#x})",
                pid, sp, limit
            ),
            Fault::StackCorrupted { pid } => write!(f, "thread {}: stack guard overwritten", pid),
            Fault::RingBroken { pid } => write!(f, "thread {}: invalid successor", pid),
            Fault::NotLaunched => write!(f, "switch before launch"),
            Fault::Reentered => write!(f, "nested context switch"),
            Fault::ThreadReturned { pid: Some(pid) } => write!(f, "thread {}: returned", pid),
            Fault::ThreadReturned { pid: None } => write!(f, "thread returned outside the kernel"),
        }
    }
}

/// Stop the system on a fatal kernel condition.
///
/// Never continues with a possibly corrupted context; the deployment's panic
/// handler decides how the halt is made visible.
#[cold]
#[inline(never)]
pub fn fault(fault: Fault) -> ! {
    log::error!("kernel fault: {}", fault);
    panic!("kernel fault: {}", fault);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let e = Error::StackTooSmall {
            index: 2,
            size: 32,
            min: 72,
        };
        assert_eq!(
            e.to_string(),
            "stack of thread 2 is 32 bytes, at least 72 required"
        );
        assert_eq!(
            Fault::ThreadReturned { pid: Some(3) }.to_string(),
            "thread 3: returned"
        );
    }

    #[test]
    #[should_panic(expected = "kernel fault: nested context switch")]
    fn fault_panics() {
        fault(Fault::Reentered);
    }
}
