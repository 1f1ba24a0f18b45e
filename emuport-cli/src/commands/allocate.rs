use clap::{Args, ValueEnum};

use crate::cli::PortFlags;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocateFormat {
    /// `export NAME=value` lines for `eval`
    #[default]
    Env,
    Json,
}

#[derive(Args, Debug)]
pub struct AllocateArgs {
    #[command(flatten)]
    pub ports: PortFlags,

    /// Process owning the allocation (defaults to the calling shell)
    #[arg(long)]
    pub owner_pid: Option<u32>,

    /// Output format
    #[arg(long, value_enum, default_value_t = AllocateFormat::Env)]
    pub format: AllocateFormat,
}

pub async fn execute(args: AllocateArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let owner = args.owner_pid.unwrap_or_else(emuport::parent_pid);
    let runtime = global.create_runtime_for(owner)?;
    let request = args.ports.to_request()?;

    let guard = runtime
        .allocate(&request)
        .map_err(super::allocation_failed)?;
    let result = guard.result();
    // Ownership passes to the owner process; release or sweep frees it
    guard.into_inner();

    match args.format {
        AllocateFormat::Env => {
            for (name, value) in result.env_vars() {
                println!("export {}={}", name, value);
            }
        }
        AllocateFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}
