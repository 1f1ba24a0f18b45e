use clap::Args;
use emuport::{InstanceId, SupervisionOutcome};

#[derive(Args, Debug)]
pub struct SuperviseArgs {
    /// Allocated instance id
    pub instance: String,

    /// Pid of the running emulator
    #[arg(long)]
    pub pid: u32,
}

/// Record `pid` as the instance's emulator and block until it exits or
/// this process is signalled, then release the instance.
pub async fn execute(args: SuperviseArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let id = InstanceId::parse(&args.instance)?;

    let outcome = runtime
        .supervisor(&id)?
        .supervise_pid(args.pid, emuport::termination_signal())
        .await?;

    if let SupervisionOutcome::Terminated { forced: true } = outcome {
        eprintln!("Emulator {} did not stop in time and was killed", args.pid);
    }
    println!("{}", id);
    Ok(())
}
