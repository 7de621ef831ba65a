//! Architecture-specific context switching
//!
//! Provides the single low-level primitive the rest of the crate builds on:
//! save the callee-saved register file of the current execution point and
//! load another one. Everything above this module deals in safe `Fiber`
//! values only.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use x86_64::{SavedRegs, init_context, switch_context};
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use aarch64::{SavedRegs, init_context, switch_context};
    } else {
        compile_error!("filament supports x86_64 and aarch64 only");
    }
}
