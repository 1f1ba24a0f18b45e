//! Port and instance allocation for concurrently launched emulator VMs.
//!
//! Every launcher on a host shares one home directory (`~/.emuport` by
//! default). Ports are reserved with per-port locks, instances are recorded
//! as durable descriptors, and a sweep reclaims whatever dead processes
//! left behind.
//!
//! ```rust,no_run
//! use emuport::{AllocationRequest, EmuportOptions, EmuportRuntime, InstanceId, PortRequest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = EmuportRuntime::new(EmuportOptions::default())?;
//! runtime.sweep()?;
//!
//! let request = AllocationRequest::new(InstanceId::generate("jessie"))
//!     .with_vnc(PortRequest::Auto);
//! let allocation = runtime.allocate(&request)?;
//! println!("ssh on {}", allocation.descriptor().ssh_port);
//!
//! let supervisor = allocation.commit();
//! let args = vec!["-netdev".to_string(), "user,hostfwd=tcp::{ssh}-:22".to_string()];
//! supervisor
//!     .launch("qemu-system-arm", &args, emuport::termination_signal())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod controller;
pub mod lock;
pub mod management;
pub mod probe;
pub mod runtime;
pub mod store;
pub mod util;

pub use allocator::{AllocationRequest, Allocator};
pub use controller::{InstanceSupervisor, SupervisionOutcome, termination_signal};
pub use emuport_shared::errors::{EmuportError, EmuportResult};
pub use lock::{PortLockManager, ReleaseOutcome};
pub use management::{GarbageCollector, InstanceRegistry, SweepReport};
pub use probe::{PortProbe, SystemPortProbe};
pub use runtime::handoff::AllocationResult;
pub use runtime::options::{EmuportOptions, PortBases};
pub use runtime::types::{
    EmulatorPid, InstanceDescriptor, InstanceId, InstanceInfo, InstanceRelease, InstanceStatus,
    PortLockRecord, PortRequest, PortUsageSummary, ServiceKind, ServiceUsage,
};
pub use runtime::{AllocationGuard, EmuportRuntime};
pub use store::{FsStore, MemoryStore, Store};
pub use util::{ProcessLiveness, SystemLiveness, WorkerGuard, init_logging, parent_pid};
