//! Annex CLI - operate the extension runtime from a terminal
//!
//! Exit codes: 0 success, 1 runtime failure, 2 invalid argument,
//! 3 extension not found.

mod cli;
mod commands;
mod output;

use annex_extensions::{InstallError, RegistryError};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let env = match commands::RuntimeEnv::load(&cli) {
        Ok(env) => env,
        Err(e) => return report(&e),
    };

    let result = match cli.command {
        Commands::List(args) => commands::list::run(args, &env),
        Commands::Install(args) => commands::install::run(args, &env),
        Commands::Uninstall(args) => commands::uninstall::run(args, &env),
        Commands::Diagnose(args) => commands::diagnose::run(args, &env).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn report(err: &anyhow::Error) -> ExitCode {
    output::error(&format!("{err:#}"));
    ExitCode::from(exit_code(err))
}

/// Map an error chain onto the CLI exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(install) = cause.downcast_ref::<InstallError>() {
            return match install {
                InstallError::InvalidArgument(_) => 2,
                InstallError::NotFound(_) => 3,
                _ => 1,
            };
        }
        if let Some(RegistryError::NotFound { .. }) = cause.downcast_ref::<RegistryError>() {
            return 3;
        }
        if cause.downcast_ref::<commands::UsageError>().is_some() {
            return 2;
        }
    }
    1
}

/// Initialize tracing on stderr so stdout stays machine-readable
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
