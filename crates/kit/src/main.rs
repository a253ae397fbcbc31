//! lkrun - boot linuxkit VM images with QEMU, natively or from a container

use clap::{CommandFactory, Parser, Subcommand};
use color_eyre::{Report, Result};

mod command_run;
mod common_opts;
mod error;
mod portspec;
mod run_qemu;

/// Boot linuxkit-built VM images.
///
/// The images are booted with the host's QEMU when `qemu-system-<arch>` and
/// `qemu-img` are installed, and with a QEMU container image otherwise.
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a VM image set with a hypervisor
    #[clap(subcommand)]
    Run(run_qemu::RunCommands),
}

/// Install and configure the tracing/logging system.
///
/// Logs are filtered by RUST_LOG environment variable, defaulting to 'info'.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

/// Help text of `run qemu`, shown when no prefix is given.
fn qemu_usage() -> Option<String> {
    let mut cmd = Cli::command();
    cmd.build();
    cmd.find_subcommand_mut("run")
        .and_then(|run| run.find_subcommand_mut("qemu"))
        .map(|qemu| qemu.render_help().to_string())
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_qemu::RunCommands::Qemu(mut opts)) => {
            let Some(prefix) = opts.prefix.take() else {
                println!("Please specify the prefix to the image to boot");
                if let Some(usage) = qemu_usage() {
                    print!("{usage}");
                }
                std::process::exit(1);
            };
            let dry_run = opts.dry_run;
            let config = opts.into_config(prefix)?;
            run_qemu::run(config, dry_run)?;
        }
    }
    tracing::debug!("exiting");
    Ok(())
}
