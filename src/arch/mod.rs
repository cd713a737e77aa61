//! Port layer: the only code that touches the live register file.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_feature = "thumb2"))] {
        mod cortex_m;
        pub use self::cortex_m::{launch, yield_now};
    } else {
        mod host;
        pub use self::host::{Cpu, Registers};
    }
}
