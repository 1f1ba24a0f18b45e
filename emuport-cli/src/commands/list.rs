use clap::Args;
use comfy_table::{Table, presets};
use emuport::InstanceInfo;

use crate::cli::OutputFormat;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Show stopped instances too (only visible until the next sweep)
    #[arg(short, long)]
    pub all: bool,

    /// Skip the sweep that normally runs before listing
    #[arg(long)]
    pub no_sweep: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

pub async fn execute(args: ListArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    if !args.no_sweep {
        runtime.sweep()?;
    }

    let instances: Vec<InstanceInfo> = runtime
        .list_instances()?
        .into_iter()
        .filter(|info| args.all || info.status.is_live())
        .collect();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&instances)?),
        OutputFormat::Table => print_table(&instances),
    }
    Ok(())
}

fn print_table(instances: &[InstanceInfo]) {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(vec![
        "ID", "STATUS", "OWNER", "EMULATOR", "SSH", "VNC", "RDP", "WAYVNC", "CREATED",
    ]);

    for info in instances {
        table.add_row(vec![
            info.instance_id.to_string(),
            info.status.to_string(),
            info.owner_pid.to_string(),
            info.emulator_pid.to_string(),
            info.ssh_port.to_string(),
            optional_port(info.vnc_port),
            optional_port(info.rdp_port),
            optional_port(info.wayvnc_port),
            info.created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ]);
    }

    println!("{table}");
}

fn optional_port(port: Option<u16>) -> String {
    port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}
