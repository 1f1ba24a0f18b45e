//! emuport shared - types shared by the allocation library and its front ends
//!
//! This crate contains the error taxonomy and the constants that every
//! cooperating process (allocator, launcher, menu) must agree on.

pub mod constants;
pub mod errors;

pub use errors::{EmuportError, EmuportResult};
