// src/cli.rs
//! CLI definitions for the Shelly package client
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shelly")]
#[command(author = "Shelly Project")]
#[command(version)]
#[command(about = "Package client for libalpm with a privileged process relay", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "SHELLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Answer every question with its default
    #[arg(long, global = true)]
    pub noconfirm: bool,

    /// Run as a sideband child: questions go to stderr as tagged lines
    #[arg(long, hide = true)]
    pub sideband: bool,

    /// Run the operation in an elevated child process
    #[arg(long, value_enum)]
    pub elevate: Option<ElevationMode>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Relay mechanism for elevated operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ElevationMode {
    /// Long-lived worker speaking JSON over stdin/stdout
    Rpc,
    /// One-shot child asking questions over tagged stderr lines
    Sideband,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Refresh the sync databases
    Sync {
        /// Download databases even if they are up to date
        #[arg(short, long)]
        force: bool,
    },

    /// Install a package from the sync repositories
    Install {
        /// Package name
        package: String,
    },

    /// Remove an installed package
    Remove {
        /// Package name
        package: String,
    },

    /// Upgrade every installed package with a newer sync version
    Upgrade,

    /// List installed packages with a newer sync version
    Updates,

    /// List installed packages
    List,

    /// Show a package from the sync repositories
    Info {
        /// Package name
        package: String,
    },

    /// Serve the structured relay protocol on stdin/stdout
    #[command(hide = true)]
    Worker,
}

impl Cli {
    /// Arguments that re-run `command` in a child with `mode_flag`
    pub fn child_args(&self, mode_flag: Option<&str>, command: &Commands) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.clone().into_os_string());
        }
        if self.noconfirm {
            args.push("--noconfirm".into());
        }
        if let Some(flag) = mode_flag {
            args.push(flag.into());
        }
        args.extend(command.to_args());
        args
    }
}

impl Commands {
    /// Command line form of this subcommand
    pub fn to_args(&self) -> Vec<OsString> {
        let words: Vec<&str> = match self {
            Self::Sync { force: true } => vec!["sync", "--force"],
            Self::Sync { force: false } => vec!["sync"],
            Self::Install { package } => vec!["install", package],
            Self::Remove { package } => vec!["remove", package],
            Self::Upgrade => vec!["upgrade"],
            Self::Updates => vec!["updates"],
            Self::List => vec!["list"],
            Self::Info { package } => vec!["info", package],
            Self::Worker => vec!["worker"],
        };
        words.into_iter().map(OsString::from).collect()
    }

    /// True if the command changes system state
    pub fn needs_privileges(&self) -> bool {
        matches!(
            self,
            Self::Sync { .. } | Self::Install { .. } | Self::Remove { .. } | Self::Upgrade
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_args_round_trip() {
        let cli = Cli::parse_from([
            "shelly",
            "--config",
            "/tmp/shelly.toml",
            "--elevate",
            "sideband",
            "install",
            "htop",
        ]);
        assert_eq!(cli.elevate, Some(ElevationMode::Sideband));
        let args = cli.child_args(Some("--sideband"), &cli.command);

        let mut argv = vec![OsString::from("shelly")];
        argv.extend(args);
        let child = Cli::parse_from(argv);
        assert!(child.sideband);
        assert_eq!(child.elevate, None);
        assert_eq!(child.config, Some(PathBuf::from("/tmp/shelly.toml")));
        assert_eq!(
            child.command,
            Commands::Install {
                package: "htop".into()
            }
        );
    }

    #[test]
    fn test_read_only_commands() {
        assert!(!Commands::Updates.needs_privileges());
        assert!(!Commands::List.needs_privileges());
        assert!(Commands::Upgrade.needs_privileges());
    }
}
