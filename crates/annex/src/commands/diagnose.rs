//! Diagnose extension health
//!
//! Runs a full host startup with manifest-only definitions so structural
//! problems, dependency failures and load errors all surface, then reports
//! one line per extension.

use anyhow::{Context, Result};
use annex_extensions::diagnose::{ExtensionReport, HealthStatus};
use annex_extensions::manifest::is_valid_id;
use annex_extensions::{ExtensionHost, Services, StaticLoader};
use annex_secrets::KeyFileStore;
use owo_colors::OwoColorize;
use std::sync::Arc;
use tracing::warn;

use super::{RuntimeEnv, UsageError};
use crate::cli::DiagnoseArgs;
use crate::output;

/// Key file for secure storage, relative to the data directory
const SECURE_KEY_FILE: &str = "secure-storage.key";

pub async fn run(args: DiagnoseArgs, env: &RuntimeEnv) -> Result<()> {
    if let Some(id) = &args.id {
        if !is_valid_id(id) {
            return Err(UsageError(format!("'{id}' is not a valid extension identifier")).into());
        }
    }

    let host = ExtensionHost::new(
        env.config.clone(),
        env.home.clone(),
        services(env),
        Arc::new(StaticLoader::new()),
    );

    let spinner = if args.json {
        None
    } else {
        Some(output::spinner("Starting extensions"))
    };
    host.start().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let reports = match &args.id {
        Some(id) => host.diagnose(id).await.map(|r| vec![r]),
        None => Ok(host.diagnose_all().await),
    };
    host.shutdown().await;
    let reports = reports?;

    if args.json {
        let json = match args.id {
            Some(_) => serde_json::to_string_pretty(&reports[0]),
            None => serde_json::to_string_pretty(&reports),
        }
        .context("Failed to serialize diagnostics to JSON")?;
        println!("{}", json);
    } else if reports.is_empty() {
        output::warning("No extensions found");
    } else {
        print!("{}", format_human(&reports));
    }
    Ok(())
}

/// Services backed by the local key file, or without secure storage
fn services(env: &RuntimeEnv) -> Services {
    let key_path = env.config.paths.data_dir(&env.home).join(SECURE_KEY_FILE);
    match KeyFileStore::open_or_create(&key_path) {
        Ok(store) => Services::default().with_secrets(Arc::new(store)),
        Err(e) => {
            warn!("Secure storage unavailable: {}", e);
            Services::default()
        }
    }
}

fn status_icon(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "✓".green().to_string(),
        HealthStatus::Degraded => "⚠".yellow().to_string(),
        HealthStatus::Unhealthy => "✗".red().to_string(),
    }
}

fn status_label(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => status.as_str().green().to_string(),
        HealthStatus::Degraded => status.as_str().yellow().to_string(),
        HealthStatus::Unhealthy => status.as_str().red().to_string(),
    }
}

fn format_human(reports: &[ExtensionReport]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", "Extension Diagnostics".bold()));

    for report in reports {
        let version = report.version.as_deref().unwrap_or("-");
        let tier = report.tier.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{} {} {} ({}, {}) {}\n",
            status_icon(report.diagnosis.status),
            report.id.bold(),
            version,
            tier,
            if report.active { "active" } else { "inactive" },
            status_label(report.diagnosis.status),
        ));
        out.push_str(&format!("    {}\n", report.diagnosis.message.dimmed()));
        for check in report.diagnosis.checks.iter().filter(|c| !c.passed) {
            out.push_str(&format!("    {} {}: {}\n", "-".red(), check.name, check.message));
        }
    }

    let count = |status| reports.iter().filter(|r| r.diagnosis.status == status).count();
    out.push_str(&format!(
        "\n{} healthy, {} degraded, {} unhealthy\n",
        count(HealthStatus::Healthy),
        count(HealthStatus::Degraded),
        count(HealthStatus::Unhealthy),
    ));
    out
}
