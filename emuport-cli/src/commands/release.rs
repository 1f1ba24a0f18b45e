use clap::Args;
use emuport::{InstanceId, InstanceRelease};

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Instance id(s) to release
    #[arg(required = true, num_args = 1..)]
    pub instances: Vec<String>,

    /// Process releasing the instances (defaults to the calling shell)
    #[arg(long)]
    pub owner_pid: Option<u32>,
}

pub async fn execute(args: ReleaseArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let owner = args.owner_pid.unwrap_or_else(emuport::parent_pid);
    let runtime = global.create_runtime_for(owner)?;

    let mut errors = Vec::new();
    let mut success_count = 0;

    for target in args.instances {
        let id = match InstanceId::parse(&target) {
            Ok(id) => id,
            Err(e) => {
                errors.push(format!("{}: {}", target, e));
                continue;
            }
        };

        match runtime.release_instance(&id) {
            Ok(InstanceRelease::Released { .. }) => {
                println!("{}", target);
                success_count += 1;
            }
            Ok(InstanceRelease::NotFound) => {
                eprintln!("Warning: No such instance: {}", target);
                success_count += 1;
            }
            Ok(InstanceRelease::HeldByOther { owner_pid }) => {
                errors.push(format!("{}: owned by live process {}", target, owner_pid));
            }
            Err(e) => {
                errors.push(format!("{}: {}", target, e));
            }
        }
    }

    if !errors.is_empty() {
        let error_summary = if success_count > 0 {
            format!(
                "Failed to release {} of {} instance(s)",
                errors.len(),
                errors.len() + success_count
            )
        } else {
            format!("Failed to release all {} instance(s)", errors.len())
        };

        anyhow::bail!("{}\nErrors:\n  {}", error_summary, errors.join("\n  "));
    }
    Ok(())
}
