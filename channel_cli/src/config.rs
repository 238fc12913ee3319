use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Two-party state channels.
///
/// Identity management and an in-process simulator for the channel update protocol.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the identity file. The default is `$HOME/.channel/identities.yml`.
    #[arg(long = "identity-file", short = 'i', env = "CHANNEL_IDENTITY_FILE")]
    pub identity_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add, list or delete local signing identities.
    #[command(subcommand, name = "id")]
    Id(IdCommand),
    /// Run a scenario between two engines over the in-memory network.
    #[command(name = "simulate", alias = "sim")]
    Simulate(SimulateCommand),
}

#[derive(Debug, Subcommand)]
pub enum IdCommand {
    /// Create a new signing identity.
    #[command(name = "new", alias = "create")]
    Create {
        /// The name of the new identity. If omitted, the first characters of its public identifier are used.
        name: Option<String>,
    },
    /// List all identities.
    #[command(name = "list", alias = "ls")]
    List,
    /// Delete an identity.
    #[command(name = "delete", alias = "del", alias = "rm")]
    Delete {
        /// The name of the identity to delete.
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct SimulateCommand {
    /// The YAML scenario to run.
    #[arg(long = "scenario", short = 's')]
    pub scenario: PathBuf,
    /// Identity to play alice. A fresh key is used if omitted.
    #[arg(long = "alice")]
    pub alice: Option<String>,
    /// Identity to play bob. A fresh key is used if omitted.
    #[arg(long = "bob")]
    pub bob: Option<String>,
    /// Persist both parties' channels under this directory instead of in memory.
    #[arg(long = "store-dir")]
    pub store_dir: Option<PathBuf>,
}

pub struct GlobalOptions {
    pub identity_file: Option<PathBuf>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions { identity_file: self.identity_file };
        (global, self.command)
    }
}
