//! Emulator process control.
//!
//! The `InstanceSupervisor` launches or adopts the emulator of an allocated
//! instance, records its pid and releases the instance's ports as soon as
//! the emulator stops or a termination signal arrives.

mod spawn;
mod supervisor;

pub use supervisor::{InstanceSupervisor, SupervisionOutcome, termination_signal};
