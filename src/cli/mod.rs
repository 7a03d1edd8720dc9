//! Command-line interface definitions for the `stratus` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `stratus` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stratus",
    about = "Provision, deploy, inspect, and tear down a Compute Engine web host",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision (or reuse) the instance and deploy the application.
    #[command(name = "deploy", about = "Provision the instance and deploy the application")]
    Deploy(DeployCommand),
    /// Refresh the application on an existing instance.
    #[command(name = "update", about = "Pull, rebuild, and restart the application")]
    Update,
    /// Show the instance status and site URL.
    #[command(name = "status", about = "Show the instance status and site URL")]
    Status,
    /// Delete the instance after confirmation.
    #[command(name = "destroy", about = "Delete the instance after confirmation")]
    Destroy(DestroyCommand),
    /// Check that the credentials can reach the compute API.
    #[command(name = "verify", about = "Check API access for the configured project")]
    Verify,
    /// Print the generated payload without touching any remote resource.
    #[command(name = "script", about = "Print the generated deployment script")]
    Script(ScriptCommand),
}

/// How `deploy` treats an instance that already exists.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum ModeArg {
    /// Create when absent, update in place when present.
    #[default]
    Auto,
    /// Fail if the instance already exists.
    Fresh,
    /// Fail unless the instance already exists.
    Existing,
}

/// Arguments for `stratus deploy`.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Instance handling mode.
    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    pub(crate) mode: ModeArg,
}

/// Arguments for `stratus destroy`.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Confirmation literal; must be exactly DELETE. Prompts when omitted.
    #[arg(long, value_name = "TOKEN")]
    pub(crate) confirm: Option<String>,
}

/// Arguments for `stratus script`.
#[derive(Debug, Parser)]
pub(crate) struct ScriptCommand {
    /// Print the update payload instead of the full bootstrap.
    #[arg(long)]
    pub(crate) update: bool,
}
