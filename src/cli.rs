//! Command line interface for the `reportwire` binary.
//!
//! The binary works on runs recorded in a shared slot file, typically by
//! test workers that exited before they could close the run themselves.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command line arguments for the `reportwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "reportwire",
    version,
    about = "Inspect and close test runs on a reporting backend"
)]
pub struct Cli {
    /// Operation to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported operations.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Close the run recorded in a shared slot, bypassing any queue.
    Finalize(Target),
    /// Print the identifier and link of the run recorded in a shared slot.
    Url(Target),
}

/// Backend connection and slot location.
#[derive(Debug, Args)]
pub struct Target {
    /// Shared slot file written by the process that started the run.
    #[arg(long)]
    pub slot: PathBuf,
    /// Backend base URL.
    #[arg(long, env = "REPORTWIRE_ENDPOINT")]
    pub endpoint: String,
    /// Backend project.
    #[arg(long, env = "REPORTWIRE_PROJECT")]
    pub project: String,
    /// API key sent as a bearer token.
    #[arg(long, env = "REPORTWIRE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Skip TLS certificate verification.
    #[arg(long)]
    pub insecure: bool,
    /// Status to finish the run with.
    #[arg(long)]
    pub status: Option<String>,
}
