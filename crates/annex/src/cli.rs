//! CLI argument parsing with clap

use annex_core::RuntimeMode;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Annex - extension runtime for the desktop assistant
#[derive(Parser, Debug)]
#[command(name = "annex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding runtime.yaml (defaults to ANNEX_HOME)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<Utf8PathBuf>,

    /// Runtime mode, overriding configuration
    #[arg(long, global = true, value_parser = parse_mode)]
    pub mode: Option<RuntimeMode>,

    /// Additional development extension directory (repeatable)
    #[arg(long = "dev-dir", global = true, value_name = "DIR")]
    pub dev_dirs: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_mode(value: &str) -> Result<RuntimeMode, String> {
    value.parse::<RuntimeMode>().map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List discovered extensions
    List(ListArgs),

    /// Install an extension package for the current user
    Install(InstallArgs),

    /// Remove a user-installed extension
    Uninstall(UninstallArgs),

    /// Diagnose extension health
    Diagnose(DiagnoseArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Include candidates shadowed by a higher-priority copy
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Path to the extension package
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Extension identifier
    pub id: String,
}

#[derive(Args, Debug)]
pub struct DiagnoseArgs {
    /// Extension to diagnose (all when omitted)
    pub id: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
