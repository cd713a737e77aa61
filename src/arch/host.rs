//! Simulated port for builds that are not Armv7-M.
//!
//! [`Cpu`] models what the kernel relies on from the real core: the register
//! file, PSP, PRIMASK, the SysTick down-counter and its pending bit, and the
//! stacking done on exception entry and return. The tick handler performs the
//! same pushes and pops as the Cortex-M one, against the threads' real stack
//! memory, so frames produced here are exactly what the kernel sees on target.

use core::mem::size_of;
use core::ptr::{read_volatile, write_volatile};

use critical_section::with;

use crate::frame::{CalleeSaved, ExceptionFrame, SavedContext, CALLEE_SAVED_SIZE, FRAME_SIZE};
use crate::stack::Stack;
use crate::{Config, Error, Scheduler, Threads};

const EXCEPTION_FRAME_SIZE: usize = size_of::<ExceptionFrame>();

/// Register file as seen by the running thread.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Registers {
    /// R0-R12
    pub r: [usize; 13],
    pub lr: usize,
    pub pc: usize,
    pub xpsr: usize,
}

pub struct Cpu {
    pub regs: Registers,
    psp: usize,
    primask: bool,
    pendst: bool,
    quantum: u32,
    countdown: u32,
    scratch: Stack<{ 2 * FRAME_SIZE }>,
}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            regs: Registers {
                r: [0; 13],
                lr: 0,
                pc: 0,
                xpsr: 0,
            },
            psp: 0,
            primask: false,
            pendst: false,
            quantum: 0,
            countdown: 0,
            scratch: Stack::new(),
        }
    }

    /// Counterpart of `arch::launch` on target: mask, arm the counter, pend
    /// the tick and take it on scratch PSP once unmasked.
    pub fn launch<S: Scheduler>(
        &mut self,
        threads: &mut Threads<S>,
        config: &Config,
    ) -> Result<(), Error> {
        let primask = self.primask;
        self.primask = true;
        if let Err(err) = threads.launch(config) {
            self.primask = primask;
            return Err(err);
        }
        self.quantum = config.quantum.cycles();
        self.countdown = self.quantum;
        let scratch = self.scratch.as_mut_slice();
        self.psp = scratch.as_ptr() as usize + scratch.len();
        self.pendst = true;
        // cpsie i
        self.enable_interrupts(threads);
        Ok(())
    }

    pub fn psp(&self) -> usize {
        self.psp
    }

    /// Move PSP, as the running thread does when it pushes or pops.
    pub fn set_psp(&mut self, psp: usize) {
        self.psp = psp;
    }

    pub fn tick_pending(&self) -> bool {
        self.pendst
    }

    /// Cycles left until the tick fires.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn disable_interrupts(&mut self) {
        self.primask = true;
    }

    /// Unmasking takes a pending tick right away.
    pub fn enable_interrupts<S: Scheduler>(&mut self, threads: &mut Threads<S>) {
        self.primask = false;
        self.service(threads);
    }

    /// Let the running thread execute for `cycles` core cycles.
    pub fn advance<S: Scheduler>(&mut self, threads: &mut Threads<S>, mut cycles: u32) {
        // counter not armed yet
        if self.quantum == 0 {
            return;
        }
        while cycles >= self.countdown {
            cycles -= self.countdown;
            self.countdown = self.quantum;
            self.pendst = true;
            self.service(threads);
        }
        self.countdown -= cycles;
    }

    /// Same effect as `arch::yield_now` on target: restart the count, pend
    /// the tick.
    pub fn yield_now<S: Scheduler>(&mut self, threads: &mut Threads<S>) {
        self.countdown = self.quantum;
        self.pendst = true;
        self.service(threads);
    }

    /// Take the tick if it is pending and not masked.
    pub fn service<S: Scheduler>(&mut self, threads: &mut Threads<S>) {
        if self.pendst && !self.primask {
            self.pendst = false;
            self.exception_entry();
            self.tick_handler(threads);
            self.exception_return();
        }
    }

    /// Mirrors the SysTick handler of the Cortex-M port instruction by
    /// instruction.
    fn tick_handler<S: Scheduler>(&mut self, threads: &mut Threads<S>) {
        self.primask = true;

        // stmdb r0!, {r4-r11}
        let mut r0 = self.psp - CALLEE_SAVED_SIZE;
        let mut callee = CalleeSaved::default();
        callee.r4_r11.copy_from_slice(&self.regs.r[4..12]);
        // Safety: the thread's stack holds its complete frame below PSP
        unsafe { write_volatile(r0 as *mut CalleeSaved, callee) };

        r0 = with(|cs| threads.switch(cs, SavedContext::from_addr(r0))).addr();

        // ldmia r0!, {r4-r11}
        // Safety: the kernel returned a frame it validated
        let callee = unsafe { read_volatile(r0 as *const CalleeSaved) };
        self.regs.r[4..12].copy_from_slice(&callee.r4_r11);
        r0 += CALLEE_SAVED_SIZE;
        self.psp = r0;

        self.primask = false;
    }

    fn exception_entry(&mut self) {
        self.psp -= EXCEPTION_FRAME_SIZE;
        let r = &self.regs;
        let frame = ExceptionFrame {
            r0: r.r[0],
            r1: r.r[1],
            r2: r.r[2],
            r3: r.r[3],
            r12: r.r[12],
            lr: r.lr,
            pc: r.pc,
            xpsr: r.xpsr,
        };
        // Safety: PSP points into the running thread's stack or the scratch area
        unsafe { write_volatile(self.psp as *mut ExceptionFrame, frame) };
    }

    fn exception_return(&mut self) {
        // Safety: the handler left PSP at the exception frame it restored
        let frame = unsafe { read_volatile(self.psp as *const ExceptionFrame) };
        self.psp += EXCEPTION_FRAME_SIZE;
        let r = &mut self.regs;
        r.r[0] = frame.r0;
        r.r[1] = frame.r1;
        r.r[2] = frame.r2;
        r.r[3] = frame.r3;
        r.r[12] = frame.r12;
        r.lr = frame.lr;
        r.pc = frame.pc;
        r.xpsr = frame.xpsr;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quantum;
    use crate::frame::XPSR_THUMB;
    use crate::thread::tests::leak_stack;
    use crate::{ThreadId, ThreadState, STACK_SIZE};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    const Q: u32 = 1000;

    fn entry_of(pid: usize) -> usize {
        0x0800_0000 + 0x100 * pid + 1
    }

    fn boot(k: usize) -> (Cpu, Threads) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut threads = Threads::new();
        threads
            .register((0..k).map(|pid| (entry_of(pid), leak_stack::<STACK_SIZE>())))
            .unwrap();
        let mut cpu = Cpu::new();
        let config = Config::new(Quantum::from_cycles(Q).unwrap());
        cpu.launch(&mut threads, &config).unwrap();
        (cpu, threads)
    }

    fn running(threads: &Threads) -> ThreadId {
        threads.current_pid().unwrap()
    }

    impl Arbitrary for Registers {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut r = [0; 13];
            r.iter_mut().for_each(|v| *v = usize::arbitrary(g));
            Registers {
                r,
                lr: usize::arbitrary(g),
                pc: usize::arbitrary(g),
                xpsr: usize::arbitrary(g),
            }
        }
    }

    #[test]
    fn launch_starts_thread_zero_at_its_entry() {
        let (cpu, threads) = boot(4);
        assert_eq!(running(&threads), 0);
        assert_eq!(cpu.regs.pc, entry_of(0) & !1);
        assert_eq!(cpu.regs.xpsr, XPSR_THUMB);
        assert_eq!(cpu.regs.r, [0; 13]);
        assert_eq!(cpu.psp(), threads.ring().get(0).stack().base);
        assert_eq!(cpu.countdown(), Q);
    }

    #[test]
    fn four_threads_rotate_once_per_tick() {
        let (mut cpu, mut threads) = boot(4);

        cpu.advance(&mut threads, Q);
        assert_eq!(running(&threads), 1);
        assert_eq!(cpu.regs.pc, entry_of(1) & !1);

        cpu.advance(&mut threads, 3 * Q);
        assert_eq!(running(&threads), 0);
        assert_eq!(cpu.regs.pc, entry_of(0) & !1);
        assert_eq!(threads.switches(), 5);
    }

    #[test]
    fn yield_moves_on_without_revisiting() {
        let (mut cpu, mut threads) = boot(4);
        cpu.advance(&mut threads, Q);
        assert_eq!(running(&threads), 1);

        cpu.advance(&mut threads, Q / 2);
        cpu.yield_now(&mut threads);
        assert_eq!(running(&threads), 2);
        assert_eq!(cpu.countdown(), Q);

        let mut order = Vec::new();
        for _ in 0..3 {
            cpu.advance(&mut threads, Q);
            order.push(running(&threads));
        }
        assert_eq!(order, [3, 0, 1]);
    }

    #[test]
    fn yield_and_tick_together_advance_once() {
        let (mut cpu, mut threads) = boot(3);
        cpu.disable_interrupts();
        cpu.advance(&mut threads, Q);
        cpu.yield_now(&mut threads);
        assert!(cpu.tick_pending());
        assert_eq!(running(&threads), 0);

        cpu.enable_interrupts(&mut threads);
        assert_eq!(running(&threads), 1);
        assert!(!cpu.tick_pending());
        assert_eq!(threads.switches(), 2);
    }

    #[test]
    fn only_the_switched_in_thread_runs() {
        let (mut cpu, mut threads) = boot(4);
        for _ in 0..17 {
            cpu.advance(&mut threads, Q);
            let states: Vec<_> = threads.ring().iter().map(|t| t.state()).collect();
            let n = states.iter().filter(|&&s| s == ThreadState::Running).count();
            assert_eq!(n, 1);
            assert_eq!(states[running(&threads) as usize], ThreadState::Running);
        }
    }

    #[test]
    fn preempted_frame_has_initial_frame_shape() {
        let (mut cpu, mut threads) = boot(2);
        cpu.regs.pc = (entry_of(0) & !1) + 0x40;
        cpu.advance(&mut threads, Q);

        let t0 = threads.ring().get(0);
        assert_eq!(t0.saved_context().addr() + FRAME_SIZE, t0.stack().base);
        let frame = unsafe { t0.saved_context().frame() };
        assert_eq!(frame.exception.pc, (entry_of(0) & !1) + 0x40);
        assert_eq!(frame.exception.xpsr, XPSR_THUMB);
    }

    #[quickcheck]
    fn registers_survive_a_full_rotation(regs: Registers, depth: u8) -> bool {
        let (mut cpu, mut threads) = boot(4);
        cpu.advance(&mut threads, Q);

        // thread 1 is somewhere in its call stack when preempted
        cpu.regs = regs;
        let psp = cpu.psp() - 8 * (depth % 64) as usize;
        cpu.set_psp(psp);

        cpu.advance(&mut threads, 4 * Q);
        running(&threads) == 1 && cpu.regs == regs && cpu.psp() == psp
    }

    #[quickcheck]
    fn yield_matches_natural_expiry(regs: Registers, elapsed: u16) -> bool {
        let elapsed = elapsed as u32 % Q;
        let (mut a, mut ta) = boot(3);
        let (mut b, mut tb) = boot(3);
        a.regs = regs;
        b.regs = regs;

        a.advance(&mut ta, elapsed);
        a.yield_now(&mut ta);
        b.advance(&mut tb, Q);

        let next_a = running(&ta);
        let next_b = running(&tb);
        a.advance(&mut ta, 2 * Q);
        b.advance(&mut tb, 2 * Q);

        next_a == next_b && next_a == 1 && a.regs == regs && b.regs == regs
    }

    #[test]
    #[should_panic(expected = "thread 0: stack overflow")]
    fn overflowing_thread_is_stopped_at_next_tick() {
        // the thread's stack is the upper half of a bigger buffer, so the
        // overflowing frame still lands in valid memory
        let (below, stack) = leak_stack::<{ 2 * STACK_SIZE }>().split_at_mut(STACK_SIZE);
        let below_end = below.as_ptr() as usize + STACK_SIZE;
        let mut threads = Threads::new();
        threads
            .register([(entry_of(0), stack), (entry_of(1), leak_stack::<STACK_SIZE>())])
            .unwrap();
        let mut cpu = Cpu::new();
        cpu.launch(&mut threads, &Config::new(Quantum::from_cycles(Q).unwrap()))
            .unwrap();

        let limit = threads.ring().get(0).stack().limit;
        assert_eq!(limit, below_end);
        cpu.set_psp(limit + 16);
        cpu.advance(&mut threads, Q);
    }

    #[test]
    fn tick_pending_before_launch_lands_on_scratch_stack() {
        let mut threads = Threads::new();
        threads
            .register([(entry_of(0), leak_stack::<STACK_SIZE>())])
            .unwrap();
        let mut cpu = Cpu::new();
        // the application left a tick pending behind masked interrupts
        cpu.disable_interrupts();
        cpu.yield_now(&mut threads);
        assert!(cpu.tick_pending());

        cpu.launch(&mut threads, &Config::new(Quantum::from_cycles(Q).unwrap()))
            .unwrap();
        assert_eq!(running(&threads), 0);
        assert_eq!(threads.switches(), 1);
        assert_eq!(cpu.regs.pc, entry_of(0) & !1);
        assert_eq!(cpu.psp(), threads.ring().get(0).stack().base);
    }

    #[test]
    fn launch_without_threads_is_refused() {
        let mut threads = Threads::new();
        let mut cpu = Cpu::new();
        assert_eq!(
            cpu.launch(&mut threads, &Config::default()),
            Err(Error::NotRegistered)
        );
        assert!(!cpu.tick_pending());
        assert!(!cpu.primask);
    }
}
