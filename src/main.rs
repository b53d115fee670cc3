// src/main.rs
use clap::{Parser, Subcommand};

mod app;
mod catalog;
mod channel;
mod config;
mod controller;
mod error;
mod helper;
mod logbook;
mod notify;
mod reconciler;
mod runner;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "ipsec-gui",
    version,
    about = "Front-end for toggling IPsec VPN connections (strongSwan/Libreswan)"
)]
struct Cli {
    /// Internal: run as the privilege-elevated helper process. Spawned by
    /// the front-end through pkexec; not meant to be used directly.
    #[arg(long = "run-as-helper", hide = true)]
    run_as_helper: bool,

    /// Connection managed by the helper session.
    #[arg(long, hide = true, requires = "run_as_helper")]
    connection: Option<String>,

    /// Delegate privileged operations to a pkexec helper process instead of
    /// invoking sudo directly.
    #[arg(long)]
    use_helper: bool,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List configured IPsec connections.
    List,
    /// Print the status of a connection (defaults to the last used one).
    Status { name: Option<String> },
    /// Show the parsed definition of a connection.
    Details { name: String },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.run_as_helper {
        let connection = cli
            .connection
            .ok_or_else(|| anyhow::anyhow!("--run-as-helper requires --connection"))?;
        return helper::run_helper_loop(&connection);
    }

    let mut config = AppConfig::load().unwrap_or_default();
    if cli.use_helper {
        config.use_helper = true;
    }

    match cli.command {
        Some(CliCommand::List) => app::run_list(&config),
        Some(CliCommand::Status { name }) => app::run_status(&config, name),
        Some(CliCommand::Details { name }) => app::run_details(&config, &name),
        None => app::run_monitor(config),
    }
}
