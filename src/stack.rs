//! Per-thread stack regions.

use core::cell::{Cell, UnsafeCell};
use core::mem::size_of;
use core::ptr::{read_volatile, write_bytes};

use critical_section::Mutex;

use crate::config::{STACK_SIZE, THREADS_NUMOF};
use crate::frame::FRAME_SIZE;

const WORD: usize = size_of::<usize>();

/// Byte pattern every stack is filled with at registration.
pub const STACK_PAINT: u8 = 0xa5;

const PAINT_WORD: usize = usize::from_ne_bytes([STACK_PAINT; WORD]);

/// Smallest 8-byte aligned region that holds an initial frame and the guard word.
pub const MIN_STACK_SIZE: usize = (FRAME_SIZE + WORD + 7) & !7;

/// A stack buffer with the alignment the exception frame needs.
#[repr(C, align(8))]
pub struct Stack<const N: usize>([u8; N]);

impl<const N: usize> Stack<N> {
    pub const fn new() -> Self {
        Self([0; N])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl<const N: usize> Default for Stack<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Statically allocated stacks for all threads, handed out once.
pub struct StackPool {
    stacks: UnsafeCell<[Stack<STACK_SIZE>; THREADS_NUMOF]>,
    taken: Mutex<Cell<bool>>,
}

// Safety: the stacks are only reachable through `take`, which succeeds once
unsafe impl Sync for StackPool {}

impl StackPool {
    pub const fn new() -> Self {
        Self {
            stacks: UnsafeCell::new([const { Stack::new() }; THREADS_NUMOF]),
            taken: Mutex::new(Cell::new(false)),
        }
    }

    /// Returns all stacks on the first call, `None` afterwards.
    pub fn take(&'static self) -> Option<[&'static mut [u8]; THREADS_NUMOF]> {
        if critical_section::with(|cs| self.taken.borrow(cs).replace(true)) {
            return None;
        }
        // Safety: `taken` was false, so no other reference to the stacks exists
        let stacks = unsafe { &mut *self.stacks.get() };
        Some(stacks.each_mut().map(|stack| stack.as_mut_slice()))
    }
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Address bounds of one thread's stack.
///
/// `limit` is the lowest usable address and holds the guard word, `base` is
/// the initial (highest) stack pointer. The stack grows from `base` towards
/// `limit`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct StackRegion {
    pub limit: usize,
    pub base: usize,
}

impl StackRegion {
    pub fn of(stack: &[u8]) -> Self {
        let start = stack.as_ptr() as usize;
        let end = start + stack.len();
        let limit = (start + WORD - 1) & !(WORD - 1);
        let base = end & !7;
        Self {
            limit,
            base: base.max(limit),
        }
    }

    pub fn size(&self) -> usize {
        self.base - self.limit
    }

    /// Whether a full frame saved at `sp` lies inside the region, above the guard.
    pub fn holds_frame(&self, sp: usize) -> bool {
        sp % WORD == 0 && sp >= self.limit + WORD && sp + FRAME_SIZE <= self.base
    }

    /// # Safety
    /// The region must be valid for writes and not in use.
    pub(crate) unsafe fn paint(&self) {
        unsafe { write_bytes(self.limit as *mut u8, STACK_PAINT, self.size()) };
    }

    /// # Safety
    /// The region must have been painted and still be valid for reads.
    pub unsafe fn guard_intact(&self) -> bool {
        unsafe { read_volatile(self.limit as *const usize) == PAINT_WORD }
    }

    /// Bytes above the guard that were never written since painting.
    ///
    /// # Safety
    /// The region must have been painted and still be valid for reads.
    pub unsafe fn unused(&self) -> usize {
        let mut addr = self.limit + WORD;
        while addr + WORD <= self.base {
            if unsafe { read_volatile(addr as *const usize) } != PAINT_WORD {
                break;
            }
            addr += WORD;
        }
        addr - (self.limit + WORD)
    }
}
