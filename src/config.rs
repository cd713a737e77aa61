//! Deployment bounds and the launch configuration.

use crate::Error;

/// global defining the number of threads that can be registered
pub const THREADS_NUMOF: usize = 4;

/// size in bytes of each stack handed out by [`StackPool`](crate::StackPool)
pub const STACK_SIZE: usize = 1024;

/// core clock of the reference board (16 MHz internal oscillator)
pub const DEFAULT_CORE_HZ: u32 = 16_000_000;

/// SysTick counts down from a 24-bit reload value.
const SYST_MAX_PERIOD: u32 = 0x0100_0000;

/// Interrupt period of the tick source, in core clock cycles.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Quantum {
    cycles: u32,
}

impl Quantum {
    pub const fn from_cycles(cycles: u32) -> Result<Self, Error> {
        if cycles == 0 || cycles > SYST_MAX_PERIOD {
            return Err(Error::InvalidQuantum {
                cycles: cycles as u64,
            });
        }
        Ok(Self { cycles })
    }

    /// Quantum of `ms` milliseconds on a core running at `core_hz`.
    pub const fn from_millis(ms: u32, core_hz: u32) -> Result<Self, Error> {
        let cycles = ms as u64 * core_hz as u64 / 1000;
        if cycles == 0 || cycles > SYST_MAX_PERIOD as u64 {
            return Err(Error::InvalidQuantum { cycles });
        }
        Ok(Self {
            cycles: cycles as u32,
        })
    }

    pub const fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Value for the SysTick reload register.
    pub const fn reload(&self) -> u32 {
        self.cycles - 1
    }
}

/// Options consumed by `launch`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Config {
    pub quantum: Quantum,
}

impl Config {
    pub const fn new(quantum: Quantum) -> Self {
        Self { quantum }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // 10 ms * 16_000 cycles/ms, always within the SysTick range
            quantum: Quantum { cycles: 160_000 },
        }
    }
}
