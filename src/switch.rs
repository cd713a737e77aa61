//! The save / select / restore protocol run on every scheduling event.
//!
//! The port's tick handler pushes the callee-saved registers of the running
//! thread (the core already stacked the rest), hands the resulting stack
//! pointer to [`Threads::switch`] and restores whatever context it gets back.
//! Everything here runs with interrupts masked, which the
//! [`CriticalSection`] token witnesses.

use critical_section::CriticalSection;

use crate::error::{fault, Fault};
use crate::frame::SavedContext;
use crate::scheduler::Scheduler;
use crate::thread::ThreadState;
use crate::{ThreadId, Threads};

/// Where a switch currently is. Only ever `Idle` between switches.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Phase {
    Idle,
    Saving,
    Selecting,
    Restoring,
}

impl<S: Scheduler> Threads<S> {
    /// Perform one scheduling event.
    ///
    /// `saved` is the stack pointer of the interrupted thread after its
    /// complete frame was pushed. Returns the context to restore. The first
    /// switch after launch has no interrupted thread; its `saved` points into
    /// the launch scratch area and is discarded.
    pub fn switch(&mut self, _cs: CriticalSection<'_>, saved: SavedContext) -> SavedContext {
        if self.phase != Phase::Idle {
            fault(Fault::Reentered);
        }
        if !self.launched {
            fault(Fault::NotLaunched);
        }

        let next = match self.current_thread {
            Some(current) => {
                self.phase = Phase::Saving;
                self.save(current, saved);
                self.phase = Phase::Selecting;
                self.select(current)
            }
            None => {
                // first switch: nothing to save, thread 0 goes first
                self.phase = Phase::Selecting;
                0
            }
        };

        self.phase = Phase::Restoring;
        let sp = self.restore(next);
        self.phase = Phase::Idle;
        self.switches = self.switches.wrapping_add(1);
        sp
    }

    fn save(&mut self, pid: ThreadId, saved: SavedContext) {
        let Some(thread) = self.ring.get_mut(pid) else {
            fault(Fault::RingBroken { pid });
        };
        if !thread.stack.holds_frame(saved.addr()) {
            fault(Fault::StackOverflow {
                pid,
                sp: saved.addr(),
                limit: thread.stack.limit,
            });
        }
        // Safety: the region belongs to a registered thread and stays valid
        if !unsafe { thread.stack.guard_intact() } {
            fault(Fault::StackCorrupted { pid });
        }
        thread.sp = saved;
        thread.state = ThreadState::Ready;
    }

    fn select(&self, current: ThreadId) -> ThreadId {
        let next = self.scheduler.next(&self.ring, current);
        if self.ring.try_get(next).is_none() {
            fault(Fault::RingBroken { pid: current });
        }
        next
    }

    fn restore(&mut self, pid: ThreadId) -> SavedContext {
        let Some(thread) = self.ring.get_mut(pid) else {
            fault(Fault::RingBroken { pid });
        };
        if !thread.stack.holds_frame(thread.sp.addr()) {
            fault(Fault::StackOverflow {
                pid,
                sp: thread.sp.addr(),
                limit: thread.stack.limit,
            });
        }
        thread.state = ThreadState::Running;
        thread.runs = thread.runs.wrapping_add(1);
        let sp = thread.sp;
        self.current_thread = Some(pid);
        log::trace!("switch -> {} sp={:#x}", pid, sp.addr());
        sp
    }
}
