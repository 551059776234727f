//! CLI struct definitions for the Calypso command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs::run`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "calypso",
    version = env!("CARGO_PKG_VERSION"),
    about = "Calypso drives a manifest-defined workflow DAG through a single command_execute entry point, binding every stage to a content-addressed, topology-mirroring session tree.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Render responses as JSON instead of a one-line text summary.
    #[clap(long, global = true)]
    pub json: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Parse and validate a workflow manifest.
    Manifest(ManifestCli),
    /// Session lifecycle: init/status/reset against a project root.
    Session(SessionCli),
    /// Submit a single command to a session and exit.
    Run(RunCli),
    /// Read commands from stdin, one per line, until EOF.
    Repl(SessionTarget),
    /// Chain validation: report which completed stages have gone stale.
    Chain(ChainCli),
    /// Run the boot telemetry sequence against the bundled default manifest
    /// (or the project's own manifest, if `--project` is given).
    Boot(BootCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct ManifestCli {
    #[clap(subcommand)]
    pub command: ManifestCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ManifestCommand {
    /// Parse `path` as a workflow manifest and report any ManifestError.
    Validate { path: PathBuf },
}

/// Coordinates shared by every subcommand that drives a live session.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct SessionTarget {
    /// Project root holding `.calypso/` (manifest + config). Defaults to the
    /// current directory.
    #[clap(long, default_value = ".")]
    pub project: PathBuf,
    /// Operator whose home directory anchors the session tree.
    #[clap(long, default_value = "operator")]
    pub user: String,
    /// Session identifier; stable across `init`/`status`/`reset`/`run`/`repl`.
    #[clap(long)]
    pub session_id: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SessionCli {
    #[clap(subcommand)]
    pub command: SessionCommand,
    #[clap(flatten)]
    pub target: SessionTarget,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SessionCommand {
    /// Create the session root, seeding the project's manifest from the
    /// bundled default when none exists yet.
    Init,
    /// Sync against disk and report the session's current workflow position.
    Status,
    /// Delete a session's on-disk tree entirely.
    Reset,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    #[clap(flatten)]
    pub target: SessionTarget,
    /// Command tokens to submit, e.g. `calypso run --session-id s1 -- search histology`.
    #[clap(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ChainCli {
    #[clap(subcommand)]
    pub command: ChainCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ChainCommand {
    /// Run the chain validator against a session and print stale stages.
    Validate(SessionTarget),
}

#[derive(clap::Args, Debug)]
pub(crate) struct BootCli {
    /// Manifest-bearing project root to boot. Defaults to the crate's own
    /// bundled default manifest when omitted.
    #[clap(long)]
    pub project: Option<PathBuf>,
}
