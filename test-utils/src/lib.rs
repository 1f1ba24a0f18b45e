//! Shared fixtures for emuport tests.
//!
//! Process liveness and port occupancy are faked so tests can kill
//! "processes" and bind "ports" deterministically; the store is either the
//! in-memory backend or a real filesystem store in a temp home.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use emuport::{
    EmuportOptions, EmuportRuntime, FsStore, MemoryStore, PortProbe, ProcessLiveness, Store,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Liveness table keyed by pid. Unknown pids are dead.
#[derive(Debug, Default)]
pub struct FakeLiveness {
    alive: Mutex<HashSet<u32>>,
}

impl FakeLiveness {
    pub fn with_alive(pids: &[u32]) -> Arc<Self> {
        Arc::new(Self {
            alive: Mutex::new(pids.iter().copied().collect()),
        })
    }

    pub fn start(&self, pid: u32) {
        self.alive.lock().insert(pid);
    }

    pub fn kill(&self, pid: u32) {
        self.alive.lock().remove(&pid);
    }
}

impl ProcessLiveness for FakeLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().contains(&pid)
    }
}

/// Ports reported as bound by some foreign process.
#[derive(Debug, Default)]
pub struct FakeProbe {
    busy: Mutex<HashSet<u16>>,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn occupy(&self, ports: impl IntoIterator<Item = u16>) {
        self.busy.lock().extend(ports);
    }

    pub fn free(&self, port: u16) {
        self.busy.lock().remove(&port);
    }
}

impl PortProbe for FakeProbe {
    fn is_port_in_use(&self, port: u16) -> bool {
        self.busy.lock().contains(&port)
    }
}

/// Temp home plus the shared fakes. Every runtime created from one harness
/// sees the same store, so runtimes with different pids behave like
/// separate processes on one host.
pub struct Harness {
    home: TempDir,
    store: Arc<dyn Store>,
    pub liveness: Arc<FakeLiveness>,
    pub probe: Arc<FakeProbe>,
}

impl Harness {
    /// In-memory store.
    pub fn memory() -> Self {
        Self::with_store(|_| Arc::new(MemoryStore::new()))
    }

    /// Filesystem store in the temp home, with real flock arbitration.
    pub fn filesystem() -> Self {
        Self::with_store(|home| {
            let options = EmuportOptions::with_home(home);
            Arc::new(FsStore::open(options.layout()).expect("open store"))
        })
    }

    fn with_store(make: impl FnOnce(&Path) -> Arc<dyn Store>) -> Self {
        let home = TempDir::new().expect("create temp home");
        let store = make(home.path());
        Self {
            home,
            store,
            liveness: Arc::new(FakeLiveness::default()),
            probe: FakeProbe::new(),
        }
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn options(&self) -> EmuportOptions {
        EmuportOptions::with_home(self.home.path())
    }

    /// Runtime acting as process `pid`, which is marked alive.
    pub fn runtime(&self, pid: u32) -> EmuportRuntime {
        self.runtime_with(pid, self.options())
    }

    pub fn runtime_with(&self, pid: u32, options: EmuportOptions) -> EmuportRuntime {
        self.liveness.start(pid);
        EmuportRuntime::with_components(
            options,
            self.store.clone(),
            self.liveness.clone(),
            self.probe.clone(),
            pid,
        )
        .expect("create runtime")
    }

    /// Ports currently carrying a lock record.
    pub fn locked_ports(&self) -> Vec<u16> {
        self.store
            .list_port_locks()
            .expect("list locks")
            .into_iter()
            .map(|record| record.port)
            .collect()
    }
}
