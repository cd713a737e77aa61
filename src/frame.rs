//! Layout of a saved thread context and construction of initial frames.
//!
//! A suspended thread's stack pointer points at a [`Frame`]: the callee-saved
//! registers pushed by the switch handler, followed by the exception frame the
//! core stacks on interrupt entry. Threads that never ran get a synthetic
//! frame of exactly the same shape, so both are restored by the same path.
//!
//! ```text
//!  high   ┌──────────┐ <- stack base
//!         │ xPSR     │
//!         │ PC       │ entry point
//!         │ LR       │ thread exit trap
//!         │ R12      │
//!         │ R3..R0   │ exception frame (stacked by hardware)
//!         ├──────────┤
//!         │ R11..R4  │ callee-saved (stacked by the switch handler)
//!  low    └──────────┘ <- saved stack pointer
//! ```

use core::mem::size_of;
use core::ptr::{read_volatile, write_volatile};

use crate::stack::{StackRegion, MIN_STACK_SIZE};

/// Thumb state bit of xPSR; must be set or the core faults on exception return.
pub const XPSR_THUMB: usize = 0x0100_0000;

/// Registers the switch handler pushes itself, in `stmdb {r4-r11}` order.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct CalleeSaved {
    pub r4_r11: [usize; 8],
}

/// Registers the core stacks on exception entry and pops on exception return.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ExceptionFrame {
    pub r0: usize,
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
    pub r12: usize,
    pub lr: usize,
    pub pc: usize,
    pub xpsr: usize,
}

/// Complete saved context, lowest address first.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Frame {
    pub callee: CalleeSaved,
    pub exception: ExceptionFrame,
}

pub const FRAME_SIZE: usize = size_of::<Frame>();
pub const CALLEE_SAVED_SIZE: usize = size_of::<CalleeSaved>();

const _: () = assert!(FRAME_SIZE == 16 * size_of::<usize>());
const _: () = assert!(CALLEE_SAVED_SIZE == 8 * size_of::<usize>());

/// Handle to a thread's saved context: the stack pointer of a suspended thread.
///
/// Only the frame builder and the switch path interpret the memory behind it.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct SavedContext(usize);

impl SavedContext {
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    /// Reads the frame this context points at.
    ///
    /// # Safety
    /// `self` must point at a complete, readable frame.
    pub unsafe fn frame(self) -> Frame {
        unsafe { read_volatile(self.0 as *const Frame) }
    }

    /// # Safety
    /// `self` must point at `FRAME_SIZE` writable bytes not in use by a running thread.
    pub(crate) unsafe fn write(self, frame: &Frame) {
        unsafe { write_volatile(self.0 as *mut Frame, *frame) }
    }
}

/// Returned when a region cannot hold an initial frame.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StackTooSmall {
    pub size: usize,
    pub min: usize,
}

/// Sets up `stack` for a thread that has never run.
///
/// Afterwards the stack looks as if the thread was interrupted right before
/// its first instruction: on the next restore it starts executing `entry`
/// with all general purpose registers zeroed. Returning from `entry` lands in
/// `exit`. The rest of the region is painted for overflow detection.
pub fn build_initial_frame(
    stack: &mut [u8],
    entry: usize,
    exit: usize,
) -> Result<(SavedContext, StackRegion), StackTooSmall> {
    let region = StackRegion::of(stack);
    if region.size() < FRAME_SIZE + size_of::<usize>() {
        return Err(StackTooSmall {
            size: stack.len(),
            min: MIN_STACK_SIZE,
        });
    }

    let frame = Frame {
        callee: CalleeSaved::default(),
        exception: ExceptionFrame {
            lr: exit,
            // exception return needs a halfword-aligned PC; the Thumb bit
            // lives in xPSR
            pc: entry & !1,
            xpsr: XPSR_THUMB,
            ..ExceptionFrame::default()
        },
    };
    let sp = SavedContext::from_addr(region.base - FRAME_SIZE);

    // Safety: `region` lies within `stack`, which we borrow exclusively, and
    // holds at least a frame above the guard word
    unsafe {
        region.paint();
        sp.write(&frame);
    }

    Ok((sp, region))
}
