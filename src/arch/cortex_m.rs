//! Armv7-M port: SysTick drives preemption, threads run on PSP.
//!
//! On SysTick entry the core stacks R0-R3, R12, LR, PC and xPSR on the
//! interrupted thread's PSP. The handler pushes R4-R11 below that, passes the
//! resulting PSP to the kernel and unwinds the context it gets back in mirror
//! order. The handler keeps its own LR (EXC_RETURN) on MSP.

use core::arch::{asm, global_asm};
use core::cell::UnsafeCell;
use core::convert::Infallible;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use critical_section::CriticalSection;

use crate::frame::{SavedContext, FRAME_SIZE};
use crate::{Config, Error, THREADS};

global_asm!(
    ".section .text.SysTick,\"ax\",%progbits",
    ".global SysTick",
    ".type SysTick,%function",
    ".thumb_func",
    "SysTick:",
    "    cpsid i",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    // r4 only keeps MSP 8-byte aligned across the call
    "    push {{r4, lr}}",
    "    bl {switch}",
    "    pop {{r4, lr}}",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    cpsie i",
    "    bx lr",
    ".size SysTick, . - SysTick",
    switch = sym switch_from_tick,
);

/// Called by the SysTick handler with the interrupted thread's complete frame
/// at `saved`; returns the frame to restore.
unsafe extern "C" fn switch_from_tick(saved: usize) -> usize {
    // Safety: the handler runs with PRIMASK set
    let cs = unsafe { CriticalSection::new() };
    THREADS.with_mut_cs(cs, |mut threads| {
        threads.switch(cs, SavedContext::from_addr(saved)).addr()
    })
}

/// PSP during the first SysTick, before any thread owns the CPU.
///
/// The launch context gets stacked here and is never restored.
#[repr(C, align(8))]
struct LaunchScratch(UnsafeCell<[u8; 2 * FRAME_SIZE]>);

// Safety: only written by the core while stacking the launch context
unsafe impl Sync for LaunchScratch {}

static LAUNCH_SCRATCH: LaunchScratch = LaunchScratch(UnsafeCell::new([0; 2 * FRAME_SIZE]));

impl LaunchScratch {
    fn top(&self) -> usize {
        self.0.get() as usize + 2 * FRAME_SIZE
    }
}

/// start threading
///
/// Arms SysTick with `config.quantum` and hands the CPU to thread 0. Only
/// returns if the kernel cannot be launched.
pub fn launch(config: Config) -> Result<Infallible, Error> {
    // masked from before the kernel counts as launched until thread mode
    // runs on PSP; a tick in between would stack onto an unset PSP
    let was_active = cortex_m::register::primask::read().is_active();
    cortex_m::interrupt::disable();
    if let Err(err) = THREADS.with_mut(|mut threads| threads.launch(&config)) {
        if was_active {
            // Safety: restores the caller's interrupt state
            unsafe { cortex_m::interrupt::enable() };
        }
        return Err(err);
    }

    // Safety: from here on SysTick and its priority belong to the kernel
    let mut p = unsafe { cortex_m::Peripherals::steal() };
    // lowest priority, so a switch never preempts another handler
    unsafe { p.SCB.set_priority(SystemHandler::SysTick, 0xff) };
    p.SYST.disable_counter();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.set_reload(config.quantum.reload());
    p.SYST.clear_current();
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();

    // the first switch goes through the regular handler, which finds no
    // current thread and skips the save
    SCB::set_pendst();

    // Safety: called once, interrupts disabled, scratch area is unused
    unsafe { start_threading(LAUNCH_SCRATCH.top()) }
}

/// Move thread mode onto `psp` and unmask interrupts; the pending SysTick
/// is taken immediately.
///
/// # Safety
/// Interrupts must be disabled and SysTick pending.
unsafe fn start_threading(psp: usize) -> ! {
    unsafe {
        asm!(
            "msr psp, r0",
            // CONTROL.SPSEL = 1: thread mode uses PSP
            "movs r0, #2",
            "msr control, r0",
            "isb",
            "cpsie i",
            "2:",
            "wfi",
            "b 2b",
            in("r0") psp,
            options(noreturn),
        )
    }
}

/// Give up the rest of the current quantum.
///
/// Restarts the SysTick count and pends SysTick, so the thread is switched
/// out through the same handler as on preemption and the next thread starts
/// with a full quantum. Pending SysTick when it is already pending has no
/// further effect.
pub fn yield_now() {
    log::trace!("yield");
    // Safety: any write clears the current value, nothing else
    unsafe { (*SYST::PTR).cvr.write(0) };
    SCB::set_pendst();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}
