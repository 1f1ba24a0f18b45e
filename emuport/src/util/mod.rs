use std::path::Path;

use emuport_shared::errors::{EmuportError, EmuportResult};
use tracing_appender::non_blocking::NonBlocking;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::runtime::layout::filenames;

pub mod process;

pub use process::{
    ProcessLiveness, SystemLiveness, is_process_alive, kill_process, parent_pid, signal_process,
};

/// Install the global subscriber: `console_filter` to stderr, `file_filter`
/// to the non-blocking file writer.
pub fn register_to_tracing(
    non_blocking: NonBlocking,
    file_filter: EnvFilter,
    console_filter: EnvFilter,
) {
    use tracing_subscriber::Layer;

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .with_filter(console_filter),
        )
        .try_init();
}

/// Initialize tracing with file logging.
///
/// Logs are written to `{logs_dir}/emuport.log` with daily rotation; the file
/// filter honours `RUST_LOG` and defaults to `info`. `console_level` is the
/// default stderr level when `RUST_LOG` is unset.
///
/// Returns the WorkerGuard that must be kept alive to maintain the
/// background writer thread.
pub fn init_logging(logs_dir: &Path, console_level: &str) -> EmuportResult<WorkerGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        EmuportError::Storage(format!(
            "failed to create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, filenames::LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| EmuportError::Config(format!("invalid log filter: {}", e)))?;
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(console_level))
        .map_err(|e| EmuportError::Config(format!("invalid log filter: {}", e)))?;

    register_to_tracing(non_blocking, file_filter, console_filter);
    Ok(guard)
}
