//! Instance lifecycle management.
//!
//! - **InstanceRegistry**: durable descriptors keyed by instance id, with
//!   status derived from process liveness
//! - **GarbageCollector**: reclaims descriptors and port locks whose owners
//!   are gone
//!
//! # Example
//!
//! ```rust,no_run
//! use emuport::{EmuportOptions, EmuportRuntime};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = EmuportRuntime::new(EmuportOptions::default())?;
//!
//! let report = runtime.sweep()?;
//! println!("reclaimed {}", report.count());
//!
//! for info in runtime.list_instances()? {
//!     println!("{}: {} (ssh {})", info.instance_id, info.status, info.ssh_port);
//! }
//! # Ok(())
//! # }
//! ```

mod gc;
mod registry;

pub use crate::runtime::types::{InstanceInfo, InstanceStatus};
pub use gc::{GarbageCollector, SweepReport};
pub(crate) use gc::teardown;
pub use registry::InstanceRegistry;
