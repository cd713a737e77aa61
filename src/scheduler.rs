//! Next-thread selection.

use crate::thread::Ring;
use crate::ThreadId;

/// Picks the thread to run after `current`.
///
/// Implementations only decide; committing the choice and touching saved
/// contexts is left to the switch path.
pub trait Scheduler {
    fn next(&self, ring: &Ring, current: ThreadId) -> ThreadId;
}

/// Strict rotation through the ring in registration order.
#[derive(Copy, Clone, Debug, Default)]
pub struct RoundRobin;

impl Scheduler for RoundRobin {
    fn next(&self, ring: &Ring, current: ThreadId) -> ThreadId {
        ring.get(current).next
    }
}
