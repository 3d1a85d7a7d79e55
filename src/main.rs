// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ElevationMode};
use commands::Answering;
use shelly::ClientConfig;

fn main() -> Result<()> {
    // Logs go to stderr: stdout carries the worker protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load_or_default(cli.config.as_deref())?;

    match (&cli.command, cli.elevate) {
        (Commands::Worker, _) => commands::cmd_worker(config),
        (command, Some(mode)) if command.needs_privileges() && !cli.sideband => match mode {
            ElevationMode::Rpc => commands::run_rpc(&cli, command),
            ElevationMode::Sideband => commands::run_sideband(&cli, command),
        },
        (command, _) => {
            let answering = if cli.sideband {
                Answering::Sideband
            } else if cli.noconfirm {
                Answering::Automatic
            } else {
                Answering::Interactive
            };
            commands::run_direct(config, command, answering)
        }
    }
}
