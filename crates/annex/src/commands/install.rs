//! Install an extension package for the current user

use anyhow::Result;

use super::RuntimeEnv;
use crate::cli::InstallArgs;
use crate::output;

pub fn run(args: InstallArgs, env: &RuntimeEnv) -> Result<()> {
    let installer = env.installer();
    let spinner = output::spinner(&format!("Installing {}", args.path.display()));
    let result = installer.install(&args.path);
    spinner.finish_and_clear();

    let outcome = result?;
    let manifest = &outcome.manifest;
    match &outcome.replaced {
        Some(previous) if previous != &manifest.version => output::success(&format!(
            "Upgraded {} {} -> {}",
            manifest.id, previous, manifest.version
        )),
        Some(_) => output::success(&format!("Reinstalled {} {}", manifest.id, manifest.version)),
        None => output::success(&format!("Installed {} {}", manifest.id, manifest.version)),
    }
    output::kv("package", &outcome.installed_path.display().to_string());
    if !manifest.permissions.is_empty() {
        output::kv("permissions", &manifest.permissions.join(", "));
    }
    output::info("Restart the host to activate the extension");
    Ok(())
}
