//! High-level allocation runtime.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use emuport_shared::errors::{EmuportError, EmuportResult};

use crate::allocator::{AllocationRequest, Allocator};
use crate::controller::InstanceSupervisor;
use crate::lock::PortLockManager;
use crate::management::{GarbageCollector, InstanceRegistry, SweepReport, teardown};
use crate::probe::{PortProbe, SystemPortProbe};
use crate::runtime::constants::keys;
use crate::runtime::guard::AllocationGuard;
use crate::runtime::handoff::AllocationResult;
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::options::EmuportOptions;
use crate::runtime::types::{
    InstanceDescriptor, InstanceId, InstanceInfo, InstanceRelease, PortUsageSummary, ServiceKind,
    ServiceUsage,
};
use crate::store::{FsStore, Store};
use crate::util::{ProcessLiveness, SystemLiveness};

// ============================================================================
// PUBLIC API
// ============================================================================

/// EmuportRuntime is the entry point for allocating, releasing and
/// inspecting emulator instances.
///
/// **State**: nothing is cached in memory. Every operation reads the shared
/// store, so any number of runtimes in any number of processes can operate
/// on the same home directory concurrently.
///
/// **Cloning**: cheaply cloneable via `Arc`; all clones share components.
#[derive(Clone, Debug)]
pub struct EmuportRuntime {
    inner: RuntimeInner,
}

pub type RuntimeInner = Arc<RuntimeInnerImpl>;

/// Immutable components wired together at construction.
#[derive(Debug)]
pub struct RuntimeInnerImpl {
    pub(crate) options: EmuportOptions,
    pub(crate) layout: FilesystemLayout,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) liveness: Arc<dyn ProcessLiveness>,
    pub(crate) locks: PortLockManager,
    pub(crate) registry: InstanceRegistry,
    pub(crate) allocator: Allocator,
    pub(crate) gc: GarbageCollector,
}

// ============================================================================
// RUNTIME IMPLEMENTATION
// ============================================================================

impl EmuportRuntime {
    /// Create a runtime backed by the filesystem store under
    /// `options.home_dir`, real process liveness and the host port probe.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `home_dir` is not absolute
    /// - the options are invalid
    /// - the home directory cannot be initialized
    pub fn new(options: EmuportOptions) -> EmuportResult<Self> {
        Self::with_owner(options, std::process::id())
    }

    /// Like [`new`](Self::new), but records `pid` instead of this process as
    /// the owner of new allocations.
    ///
    /// Used by short-lived commands acting on behalf of a longer-lived
    /// caller such as a launcher shell.
    pub fn with_owner(options: EmuportOptions, pid: u32) -> EmuportResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(EmuportError::Config(format!(
                "home_dir must be absolute path, got: {}",
                options.home_dir.display()
            )));
        }
        if pid == 0 {
            return Err(EmuportError::InvalidArgument(
                "owner pid must not be 0".into(),
            ));
        }
        options.validate()?;

        let store = FsStore::open(options.layout()).map_err(|e| {
            EmuportError::Storage(format!(
                "Failed to initialize store at {}: {}",
                options.home_dir.display(),
                e
            ))
        })?;
        let probe = SystemPortProbe::new(
            options.probe_timeout(),
            options.emulator_patterns.clone(),
        );

        Self::with_components(
            options,
            Arc::new(store),
            Arc::new(SystemLiveness),
            Arc::new(probe),
            pid,
        )
    }

    /// Create a runtime for the default home and its `config.json`.
    pub fn with_defaults() -> EmuportResult<Self> {
        Self::new(EmuportOptions::load(None)?)
    }

    /// Assemble a runtime from explicit components.
    ///
    /// `pid` is the identity recorded as owner of every lock and descriptor
    /// this runtime creates.
    pub fn with_components(
        options: EmuportOptions,
        store: Arc<dyn Store>,
        liveness: Arc<dyn ProcessLiveness>,
        probe: Arc<dyn PortProbe>,
        pid: u32,
    ) -> EmuportResult<Self> {
        options.validate()?;
        let layout = options.layout();
        layout.prepare()?;

        let locks = PortLockManager::new(store.clone(), liveness.clone(), pid);
        let registry = InstanceRegistry::new(store.clone(), liveness.clone());
        let allocator = Allocator::new(
            store.clone(),
            locks.clone(),
            registry.clone(),
            probe,
            options.ports,
            options.max_instances,
        );
        let gc = GarbageCollector::new(
            store.clone(),
            liveness.clone(),
            locks.clone(),
            layout.clone(),
            options.retention(),
        );

        tracing::debug!(
            home = %layout.home_dir().display(),
            pid,
            max_instances = options.max_instances,
            "Initialized runtime"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInnerImpl {
                options,
                layout,
                store,
                liveness,
                locks,
                registry,
                allocator,
                gc,
            }),
        })
    }

    pub fn options(&self) -> &EmuportOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    /// Process identity recorded on locks and descriptors.
    pub fn pid(&self) -> u32 {
        self.inner.locks.pid()
    }

    /// Allocate ports for an instance.
    ///
    /// The returned guard releases the allocation when dropped unless it is
    /// committed to a supervisor or detached with `into_inner`.
    pub fn allocate(&self, request: &AllocationRequest) -> EmuportResult<AllocationGuard> {
        let descriptor = self.inner.allocator.allocate(request)?;
        Ok(AllocationGuard::new(self.clone(), descriptor))
    }

    /// Release every lock of an instance and delete its descriptor.
    ///
    /// Permitted for the owning process, the supervising process, or anyone
    /// once all of those are dead. Otherwise nothing is touched and
    /// [`InstanceRelease::HeldByOther`] is returned.
    pub fn release_instance(&self, id: &InstanceId) -> EmuportResult<InstanceRelease> {
        let _guard = self.inner.store.lock_key(&keys::instance(id))?;

        let Some(descriptor) = self.inner.registry.get(id)? else {
            tracing::debug!(instance_id = %id, "Nothing to release");
            return Ok(InstanceRelease::NotFound);
        };

        if !self.may_release(&descriptor) {
            tracing::warn!(
                instance_id = %id,
                owner_pid = descriptor.owner_pid,
                supervisor_pid = ?descriptor.supervisor_pid,
                caller_pid = self.pid(),
                "Refusing to release instance owned by a live process"
            );
            return Ok(InstanceRelease::HeldByOther {
                owner_pid: descriptor.owner_pid,
            });
        }

        let ports = teardown(
            &self.inner.locks,
            &self.inner.registry,
            &self.inner.layout,
            &descriptor,
        )?;
        tracing::info!(instance_id = %id, ports = ?ports, "Released instance");
        Ok(InstanceRelease::Released { ports })
    }

    /// Reclaim stale descriptors and orphan locks.
    pub fn sweep(&self) -> EmuportResult<SweepReport> {
        self.inner.gc.sweep()
    }

    /// Every instance with its derived status, oldest first.
    pub fn list_instances(&self) -> EmuportResult<Vec<InstanceInfo>> {
        self.inner.registry.infos()
    }

    pub fn get(&self, id: &InstanceId) -> EmuportResult<Option<InstanceInfo>> {
        Ok(self
            .inner
            .registry
            .get(id)?
            .map(|d| InstanceInfo::from_descriptor(&d, self.inner.registry.status(&d))))
    }

    /// Live allocations per service class with the configured ranges.
    pub fn port_usage_summary(&self) -> EmuportResult<PortUsageSummary> {
        let descriptors = self.inner.registry.list()?;
        let live: Vec<&InstanceDescriptor> = descriptors
            .iter()
            .filter(|d| self.inner.registry.status(d).is_live())
            .collect();

        let options = &self.inner.options;
        let services = ServiceKind::ALL
            .iter()
            .map(|kind| {
                let base = kind.base_port(&options.ports);
                ServiceUsage {
                    service: *kind,
                    active: live.iter().filter(|d| d.port(*kind).is_some()).count(),
                    range_start: base,
                    range_end: base.saturating_add(options.max_instances.saturating_sub(1)),
                }
            })
            .collect();

        Ok(PortUsageSummary {
            instances: descriptors.len(),
            locks_held: self.inner.store.list_port_locks()?.len(),
            services,
        })
    }

    /// Supervisor for an already allocated instance, e.g. one allocated by
    /// another process that this process will launch.
    pub fn supervisor(&self, id: &InstanceId) -> EmuportResult<InstanceSupervisor> {
        if self.inner.registry.get(id)?.is_none() {
            return Err(EmuportError::NotFound(format!("instance {}", id)));
        }
        Ok(InstanceSupervisor::new(self.clone(), id.clone()))
    }

    /// Write the handoff file for an allocated instance.
    pub fn write_handoff(&self, result: &AllocationResult) -> EmuportResult<PathBuf> {
        result.write(&self.inner.layout)
    }

    pub(crate) fn inner(&self) -> &RuntimeInnerImpl {
        &self.inner
    }

    fn may_release(&self, descriptor: &InstanceDescriptor) -> bool {
        let pid = self.pid();
        descriptor.owner_pid == pid
            || descriptor.supervisor_pid == Some(pid)
            || self.inner.gc.is_stale(descriptor, Utc::now())
    }
}
