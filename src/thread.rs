//! Thread control blocks and the round-robin ring they form.

use crate::config::THREADS_NUMOF;
use crate::frame::{build_initial_frame, SavedContext};
use crate::stack::StackRegion;
use crate::Error;

pub type ThreadId = u8;

/// Body of a thread. Thread bodies are expected to loop forever.
pub type ThreadEntry = fn();

/// Possible states of a thread
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ThreadState {
    Invalid,
    Ready,
    Running,
}

/// Thread control block
#[derive(Debug)]
pub struct Thread {
    pub(crate) sp: SavedContext,
    pub(crate) stack: StackRegion,
    pub(crate) state: ThreadState,
    pub(crate) runs: u32,
    pub next: ThreadId,
    pub pid: ThreadId,
}

impl Thread {
    /// create a default Thread object
    pub const fn default() -> Thread {
        Thread {
            sp: SavedContext::from_addr(0),
            stack: StackRegion { limit: 0, base: 0 },
            state: ThreadState::Invalid,
            runs: 0,
            next: 0,
            pid: 0,
        }
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Saved context; stale while the thread is running.
    pub fn saved_context(&self) -> SavedContext {
        self.sp
    }

    pub fn stack(&self) -> StackRegion {
        self.stack
    }

    /// Number of times this thread was switched in.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Stack bytes this thread has never touched so far.
    pub fn stack_unused(&self) -> usize {
        // Safety: registered stacks are painted and `'static`
        unsafe { self.stack.unused() }
    }
}

/// Fixed set of TCBs linked into a circle in registration order.
#[derive(Debug)]
pub struct Ring {
    threads: [Thread; THREADS_NUMOF],
    numof: usize,
}

impl Ring {
    pub const fn new() -> Self {
        Self {
            threads: [const { Thread::default() }; THREADS_NUMOF],
            numof: 0,
        }
    }

    /// Builds a ring from `(entry address, stack)` pairs.
    ///
    /// Either every thread gets its initial frame, or nothing is registered.
    pub(crate) fn build<I>(threads: I, exit: usize) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (usize, &'static mut [u8])>,
    {
        let mut pending: [Option<(usize, &'static mut [u8])>; THREADS_NUMOF] =
            [const { None }; THREADS_NUMOF];
        let mut count = 0;
        for (index, (entry, stack)) in threads.into_iter().enumerate() {
            count = index + 1;
            if index >= THREADS_NUMOF {
                continue;
            }
            if entry == 0 {
                return Err(Error::NullEntry { index });
            }
            pending[index] = Some((entry, stack));
        }
        match count {
            0 => return Err(Error::NoThreads),
            n if n > THREADS_NUMOF => {
                return Err(Error::TooManyThreads {
                    count: n,
                    max: THREADS_NUMOF,
                })
            }
            _ => {}
        }

        let mut ring = Ring::new();
        for (index, slot) in pending.iter_mut().take(count).enumerate() {
            let Some((entry, stack)) = slot.take() else {
                continue;
            };
            let (sp, region) =
                build_initial_frame(stack, entry, exit).map_err(|e| Error::StackTooSmall {
                    index,
                    size: e.size,
                    min: e.min,
                })?;
            ring.threads[index] = Thread {
                sp,
                stack: region,
                state: ThreadState::Ready,
                runs: 0,
                next: ((index + 1) % count) as ThreadId,
                pid: index as ThreadId,
            };
        }
        ring.numof = count;
        Ok(ring)
    }

    pub fn len(&self) -> usize {
        self.numof
    }

    pub fn is_empty(&self) -> bool {
        self.numof == 0
    }

    /// # Panics
    /// If `pid` is not a registered thread.
    pub fn get(&self, pid: ThreadId) -> &Thread {
        &self.threads[..self.numof][pid as usize]
    }

    pub fn try_get(&self, pid: ThreadId) -> Option<&Thread> {
        self.threads[..self.numof].get(pid as usize)
    }

    pub(crate) fn get_mut(&mut self, pid: ThreadId) -> Option<&mut Thread> {
        self.threads[..self.numof].get_mut(pid as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads[..self.numof].iter()
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}
