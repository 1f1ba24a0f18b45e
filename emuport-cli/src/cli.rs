use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use emuport::{EmuportOptions, EmuportRuntime, PortRequest};

use crate::commands;

#[derive(Parser, Debug)]
#[command(
    name = "emuport",
    version,
    about = "Allocate ports for concurrently launched emulator VMs"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Shared state directory (locks, instances, logs)
    #[arg(long, global = true, env = "EMUPORT_HOME")]
    pub home: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalFlags {
    pub fn load_options(&self) -> anyhow::Result<EmuportOptions> {
        let home = match &self.home {
            Some(home) if home.is_relative() => Some(std::env::current_dir()?.join(home)),
            other => other.clone(),
        };
        Ok(EmuportOptions::load(home)?)
    }

    /// Runtime owning its allocations as this process.
    pub fn create_runtime(&self) -> anyhow::Result<EmuportRuntime> {
        Ok(EmuportRuntime::new(self.load_options()?)?)
    }

    /// Runtime owning its allocations as `pid`.
    pub fn create_runtime_for(&self, pid: u32) -> anyhow::Result<EmuportRuntime> {
        Ok(EmuportRuntime::with_owner(self.load_options()?, pid)?)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reserve ports for an instance and print them
    Allocate(commands::allocate::AllocateArgs),

    /// Release an instance's ports and descriptor
    Release(commands::release::ReleaseArgs),

    /// Allocate ports, run an emulator and release the ports when it stops
    Launch(commands::launch::LaunchArgs),

    /// Record and watch an already running emulator for an allocated instance
    Supervise(commands::supervise::SuperviseArgs),

    /// List instances
    #[command(visible_alias = "ls")]
    List(commands::list::ListArgs),

    /// Reclaim ports and instances left behind by dead processes
    #[command(visible_alias = "cleanup")]
    Sweep(commands::sweep::SweepArgs),

    /// Show port usage per service
    Summary(commands::summary::SummaryArgs),

    /// Generate shell completion scripts
    Completion(commands::completion::CompletionArgs),
}

/// Port selection flags shared by `allocate` and `launch`.
///
/// SSH is always allocated; the other services only when their flag is
/// given. Each takes `auto` or a port number.
#[derive(Args, Debug, Clone)]
pub struct PortFlags {
    /// Instance id (generated from --distro when omitted)
    #[arg(long)]
    pub instance: Option<String>,

    /// Distribution name used to generate the instance id
    #[arg(long, default_value = "emulator")]
    pub distro: String,

    /// SSH port
    #[arg(long, default_value = "auto", value_parser = parse_port_request)]
    pub ssh: PortRequest,

    /// Enable VNC (auto or a port)
    #[arg(long, num_args = 0..=1, default_missing_value = "auto", value_parser = parse_port_request)]
    pub vnc: Option<PortRequest>,

    /// Enable RDP (auto or a port)
    #[arg(long, num_args = 0..=1, default_missing_value = "auto", value_parser = parse_port_request)]
    pub rdp: Option<PortRequest>,

    /// Enable WayVNC (auto or a port)
    #[arg(long, num_args = 0..=1, default_missing_value = "auto", value_parser = parse_port_request)]
    pub wayvnc: Option<PortRequest>,
}

impl PortFlags {
    pub fn to_request(&self) -> anyhow::Result<emuport::AllocationRequest> {
        let instance_id = match &self.instance {
            Some(id) => emuport::InstanceId::parse(id)?,
            None => emuport::InstanceId::generate(&self.distro),
        };
        Ok(emuport::AllocationRequest {
            instance_id,
            ssh: self.ssh,
            vnc: self.vnc,
            rdp: self.rdp,
            wayvnc: self.wayvnc,
        })
    }
}

fn parse_port_request(s: &str) -> Result<PortRequest, String> {
    s.parse::<PortRequest>().map_err(|e| e.to_string())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}
