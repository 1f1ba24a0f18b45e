pub mod constants;
pub mod handoff;
pub mod layout;
pub mod options;
pub mod types;

mod core;
mod guard;

pub use core::EmuportRuntime;
pub use guard::AllocationGuard;
