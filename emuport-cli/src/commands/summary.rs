use clap::Args;
use comfy_table::{Table, presets};

use crate::cli::OutputFormat;

#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

pub async fn execute(args: SummaryArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    runtime.sweep()?;
    let summary = runtime.port_usage_summary()?;

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(vec!["SERVICE", "ACTIVE", "RANGE"]);
    for usage in &summary.services {
        table.add_row(vec![
            usage.service.as_str().to_string(),
            usage.active.to_string(),
            format!("{}-{}", usage.range_start, usage.range_end),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "{} instance(s), {} port lock(s) held",
        summary.instances, summary.locks_held
    );
    Ok(())
}
