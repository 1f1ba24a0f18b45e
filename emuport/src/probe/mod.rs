//! Host-wide port occupancy checks.
//!
//! No single check is authoritative everywhere, so [`SystemPortProbe`]
//! reports a port in use if any of these does:
//!
//! 1. the listening-socket table has it
//! 2. a connect to `localhost:port` succeeds within the probe timeout
//! 3. a running emulator names it in its arguments
//!
//! The process table is read at most once per [`EMULATOR_SNAPSHOT_TTL`],
//! so scanning a whole candidate range costs one read, not one per port.
//!
//! A false negative is caught by the lock acquisition that follows; a false
//! positive only makes the allocator move on to the next candidate.

mod cmdline;
mod socket_table;

pub use cmdline::claimed_ports;
pub use socket_table::parse_listening_ports;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How long one read of the emulator command lines is reused.
pub const EMULATOR_SNAPSHOT_TTL: Duration = Duration::from_secs(1);

pub trait PortProbe: Send + Sync + Debug {
    fn is_port_in_use(&self, port: u16) -> bool;
}

#[derive(Debug)]
struct EmulatorSnapshot {
    taken: Instant,
    ports: BTreeSet<u16>,
}

#[derive(Debug, Clone)]
pub struct SystemPortProbe {
    timeout: Duration,
    emulator_patterns: Vec<String>,
    snapshot: Arc<Mutex<Option<EmulatorSnapshot>>>,
}

impl SystemPortProbe {
    pub fn new(timeout: Duration, emulator_patterns: Vec<String>) -> Self {
        Self {
            timeout,
            emulator_patterns,
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a running emulator claims `port`, reading the process table
    /// only when the last snapshot has expired.
    fn emulator_claims(&self, port: u16) -> bool {
        if self.emulator_patterns.is_empty() {
            return false;
        }

        let mut snapshot = self.snapshot.lock();
        let expired = snapshot
            .as_ref()
            .is_none_or(|s| s.taken.elapsed() >= EMULATOR_SNAPSHOT_TTL);
        if expired {
            let ports = cmdline::emulator_ports(&self.emulator_patterns);
            tracing::trace!(claimed = ports.len(), "Read emulator command lines");
            *snapshot = Some(EmulatorSnapshot {
                taken: Instant::now(),
                ports,
            });
        }

        snapshot.as_ref().is_some_and(|s| s.ports.contains(&port))
    }

    fn accepts_connections(&self, port: u16) -> bool {
        let addrs = match ("localhost", port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::debug!(port, error = %e, "Cannot resolve localhost");
                return false;
            }
        };

        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok())
    }
}

impl PortProbe for SystemPortProbe {
    fn is_port_in_use(&self, port: u16) -> bool {
        if socket_table::is_listening(port) {
            tracing::trace!(port, "Port found in socket table");
            return true;
        }
        if self.accepts_connections(port) {
            tracing::trace!(port, "Port accepted a connection");
            return true;
        }
        if self.emulator_claims(port) {
            tracing::trace!(port, "Port named by a running emulator");
            return true;
        }
        false
    }
}
