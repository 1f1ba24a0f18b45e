mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging(&cli.global);

    let result = match cli.command {
        Command::Allocate(args) => commands::allocate::execute(args, &cli.global).await,
        Command::Release(args) => commands::release::execute(args, &cli.global).await,
        Command::Launch(args) => commands::launch::execute(args, &cli.global).await,
        Command::Supervise(args) => commands::supervise::execute(args, &cli.global).await,
        Command::List(args) => commands::list::execute(args, &cli.global).await,
        Command::Sweep(args) => commands::sweep::execute(args, &cli.global).await,
        Command::Summary(args) => commands::summary::execute(args, &cli.global).await,
        Command::Completion(args) => commands::completion::execute(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(global: &cli::GlobalFlags) -> Option<emuport::WorkerGuard> {
    let console_level = if global.debug { "debug" } else { "warn" };
    let logs_dir = match global.load_options() {
        Ok(options) => options.layout().logs_dir(),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            return None;
        }
    };

    match emuport::init_logging(&logs_dir, console_level) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    }
}
