use clap::Args;

use crate::cli::OutputFormat;

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

pub async fn execute(args: SweepArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let report = runtime.sweep()?;

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Reclaimed {} stale allocation(s)", report.count());
    for id in &report.reclaimed_instances {
        println!("  instance {}", id);
    }
    for port in &report.orphan_locks {
        println!("  orphan lock on port {}", port);
    }
    if !report.released_ports.is_empty() {
        let ports: Vec<String> = report.released_ports.iter().map(u16::to_string).collect();
        println!("Freed ports: {}", ports.join(", "));
    }
    Ok(())
}
