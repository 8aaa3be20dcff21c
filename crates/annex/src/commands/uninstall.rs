//! Remove a user-installed extension

use anyhow::Result;

use super::RuntimeEnv;
use crate::cli::UninstallArgs;
use crate::output;

pub fn run(args: UninstallArgs, env: &RuntimeEnv) -> Result<()> {
    env.installer().uninstall(&args.id)?;
    output::success(&format!("Uninstalled {}", args.id));
    Ok(())
}
