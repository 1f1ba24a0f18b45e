use clap::Args;
use emuport::SupervisionOutcome;

use crate::cli::PortFlags;

#[derive(Args, Debug)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub ports: PortFlags,

    /// Emulator command. `{instance}`, `{ssh}`, `{vnc}`, `{rdp}` and
    /// `{wayvnc}` in arguments are replaced with the allocation.
    #[arg(required = true, last = true, num_args = 1..)]
    pub command: Vec<String>,
}

pub async fn execute(args: LaunchArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let request = args.ports.to_request()?;

    let report = runtime.sweep()?;
    if !report.is_empty() {
        tracing::info!(reclaimed = report.count(), "Startup sweep reclaimed stale allocations");
    }

    let allocation = runtime
        .allocate(&request)
        .map_err(super::allocation_failed)?;
    let result = allocation.result();
    eprintln!(
        "{}: ssh {}{}",
        result.instance_id,
        result.ssh_port,
        describe_optional(&result)
    );

    let (program, program_args) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("no emulator command given"))?;

    let supervisor = allocation.commit();
    let outcome = supervisor
        .launch(program, program_args, emuport::termination_signal())
        .await?;

    match outcome {
        SupervisionOutcome::Exited { code: Some(0) } | SupervisionOutcome::Terminated { .. } => {
            Ok(())
        }
        SupervisionOutcome::Exited { code: Some(code) } => {
            anyhow::bail!("emulator exited with status {}", code)
        }
        SupervisionOutcome::Exited { code: None } => {
            anyhow::bail!("emulator was killed by a signal")
        }
    }
}

fn describe_optional(result: &emuport::AllocationResult) -> String {
    let mut out = String::new();
    for (name, port) in [
        ("vnc", result.vnc_port),
        ("rdp", result.rdp_port),
        ("wayvnc", result.wayvnc_port),
    ] {
        if let Some(port) = port {
            out.push_str(&format!(", {} {}", name, port));
        }
    }
    out
}
