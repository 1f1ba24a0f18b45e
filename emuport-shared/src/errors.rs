//! Error types shared across emuport crates.

use thiserror::Error;

/// Result alias used throughout emuport.
pub type EmuportResult<T> = Result<T, EmuportError>;

/// Every failure a caller of the allocation subsystem can observe.
///
/// Stale locks and colliding registry writes are healed internally and
/// never surface as variants here.
#[derive(Debug, Error)]
pub enum EmuportError {
    /// An explicitly requested port is bound or its lock is held.
    #[error("port {port} is unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },

    /// Auto-allocation scanned the whole candidate range without success.
    #[error("no free {service} port in range {base}-{last}", last = last_port(.base, .span))]
    ExhaustedRange {
        service: String,
        base: u16,
        span: u16,
    },

    /// The request itself is self-contradictory (e.g. ssh and vnc asking
    /// for the same explicit port).
    #[error("conflicting request: {0}")]
    ConflictingRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn last_port(base: &u16, span: &u16) -> u32 {
    (*base as u32 + (*span).max(1) as u32 - 1).min(u16::MAX as u32)
}

impl EmuportError {
    /// Whether this error came out of the allocator's port selection.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            EmuportError::PortUnavailable { .. }
                | EmuportError::ExhaustedRange { .. }
                | EmuportError::ConflictingRequest(_)
        )
    }

    /// Operator-facing guidance for allocation failures.
    ///
    /// Returns `None` for errors that have no actionable remedy.
    pub fn remediation(&self) -> Option<String> {
        match self {
            EmuportError::PortUnavailable { port, .. } => Some(format!(
                "Port {port} is taken. Either:\n  \
                 - request 'auto' to let emuport pick the next free port\n  \
                 - stop whatever is listening on {port}\n  \
                 - run 'emuport cleanup' to reclaim ports left by dead instances"
            )),
            EmuportError::ExhaustedRange { service, .. } => Some(format!(
                "All {service} candidate ports are in use. Either:\n  \
                 - stop some running instances\n  \
                 - run 'emuport cleanup' to reclaim ports left by dead instances\n  \
                 - raise EMUPORT_MAX_INSTANCES to widen the scan"
            )),
            EmuportError::ConflictingRequest(_) => Some(
                "Each service needs its own port. Request distinct ports or use 'auto'."
                    .to_string(),
            ),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EmuportError {
    fn from(err: std::io::Error) -> Self {
        EmuportError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EmuportError {
    fn from(err: serde_json::Error) -> Self {
        EmuportError::Storage(format!("serialization failed: {err}"))
    }
}
