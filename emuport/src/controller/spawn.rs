//! Emulator process spawning.

use std::path::Path;
use std::process::Stdio;

use emuport_shared::errors::{EmuportError, EmuportResult};
use tokio::process::{Child, Command};

use crate::runtime::constants::envs;
use crate::runtime::handoff::AllocationResult;
use crate::runtime::types::ServiceKind;

/// Spawns the emulator with its allocation handed over.
///
/// # Arguments
/// * `program` - Emulator binary or launcher script
/// * `args` - Arguments; `{ssh}`, `{vnc}`, `{rdp}`, `{wayvnc}` and
///   `{instance}` placeholders are substituted
/// * `result` - Ports exported as `ALLOCATED_*_PORT` and `INSTANCE_ID`
/// * `handoff` - Path exported as `EMUPORT_HANDOFF`, if written
///
/// Stdio is inherited so the emulator console stays attached to the
/// launcher's terminal.
pub(crate) fn spawn_emulator(
    program: &str,
    args: &[String],
    result: &AllocationResult,
    handoff: Option<&Path>,
) -> EmuportResult<Child> {
    let program = result.substitute(program);
    let mut cmd = Command::new(&program);
    cmd.args(args.iter().map(|arg| result.substitute(arg)));

    // A launcher may itself run under an allocation; never leak its ports
    for kind in ServiceKind::ALL {
        cmd.env_remove(kind.env_var());
    }
    cmd.envs(result.env_vars());
    match handoff {
        Some(path) => cmd.env(envs::EMUPORT_HANDOFF, path),
        None => cmd.env_remove(envs::EMUPORT_HANDOFF),
    };

    cmd.stdin(Stdio::inherit());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());
    cmd.kill_on_drop(false);

    tracing::debug!(
        instance_id = %result.instance_id,
        program = %program,
        "Spawning emulator"
    );

    cmd.spawn().map_err(|e| {
        EmuportError::Process(format!("Failed to spawn emulator {}: {}", program, e))
    })
}
