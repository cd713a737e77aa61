//! Reference deployment: four threads, 1024-byte stacks, SysTick preemption.
//!
//! Every thread records its id whenever it finds itself newly scheduled.
//! Thread 1 yields on its first run. Once the trace is full, it must read as
//! registration order repeated, and the run exits through semihosting.
#![no_std]
#![no_main]

use core::cell::RefCell;

use cortex_m::interrupt::{self, Mutex};
use cortex_m_rt::{entry, exception, ExceptionFrame};
use cortex_m_semihosting::{
    debug::{self, EXIT_FAILURE, EXIT_SUCCESS},
    hprintln as println,
};

use panic_semihosting as _;

use rr_kernel::{Config, Quantum, ThreadId};

mod logger;

const THREADS: usize = 4;
const TRACE_LEN: usize = 3 * THREADS;

struct Trace {
    pids: [ThreadId; TRACE_LEN],
    len: usize,
    last: Option<ThreadId>,
}

static TRACE: Mutex<RefCell<Trace>> = Mutex::new(RefCell::new(Trace {
    pids: [0; TRACE_LEN],
    len: 0,
    last: None,
}));

/// Note that `pid` is running. Returns `false` once the trace is full.
fn record(pid: ThreadId) -> bool {
    interrupt::free(|cs| {
        let mut trace = TRACE.borrow(cs).borrow_mut();
        if trace.last != Some(pid) {
            if trace.len == TRACE_LEN {
                return false;
            }
            let len = trace.len;
            trace.pids[len] = pid;
            trace.len += 1;
            trace.last = Some(pid);
        }
        true
    })
}

fn finish() -> ! {
    let pids = interrupt::free(|cs| TRACE.borrow(cs).borrow().pids);
    println!("schedule: {:?}", pids);

    let in_order = pids
        .iter()
        .enumerate()
        .all(|(i, &pid)| pid as usize == i % THREADS);
    debug::exit(if in_order { EXIT_SUCCESS } else { EXIT_FAILURE });

    loop {}
}

fn worker(pid: ThreadId) -> ! {
    let mut yielded = false;
    loop {
        assert_eq!(rr_kernel::current_pid(), Some(pid));
        if !record(pid) {
            finish();
        }
        if pid == 1 && !yielded {
            yielded = true;
            rr_kernel::yield_now();
        }
    }
}

fn t0() {
    worker(0)
}

fn t1() {
    worker(1)
}

fn t2() {
    worker(2)
}

fn t3() {
    worker(3)
}

#[exception]
unsafe fn HardFault(ef: &ExceptionFrame) -> ! {
    // prints the exception frame as a panic message
    panic!("{:#?}", ef);
}

#[entry]
fn main() -> ! {
    logger::init();

    println!("main() registering threads");
    rr_kernel::register_threads(&[t0, t1, t2, t3]).unwrap();

    let config = Config::new(Quantum::from_cycles(120_000).unwrap());
    let err = match rr_kernel::launch(config) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    panic!("launch failed: {}", err);
}
