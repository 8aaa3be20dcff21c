//! List discovered extensions

use anyhow::{Context, Result};
use annex_extensions::discovery::{Candidate, DiscoveryReport};
use annex_extensions::{Discovery, DiscoveryPaths, InstalledRecord};
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Modify, Style, Width},
    Table, Tabled,
};

use super::RuntimeEnv;
use crate::cli::ListArgs;
use crate::output;

#[derive(Debug, Tabled, Serialize)]
struct ExtensionRow {
    id: String,
    version: String,
    tier: String,
    status: String,
    #[tabled(rename = "installed")]
    installed_at: String,
    source: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct FailureRow {
    source: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct ListOutput {
    extensions: Vec<ExtensionRow>,
    failures: Vec<FailureRow>,
}

pub fn run(args: ListArgs, env: &RuntimeEnv) -> Result<()> {
    let report = Discovery::new(DiscoveryPaths::from_config(&env.config, &env.home)).scan();
    let record = InstalledRecord::load_from_dir(&env.config.paths.data_dir(&env.home))?;

    let rows = build_rows(&report, &record, args.all);
    let failures: Vec<FailureRow> = report
        .failures
        .iter()
        .map(|f| FailureRow {
            source: f.source.display().to_string(),
            error: f.error.clone(),
        })
        .collect();

    if args.json {
        let json = serde_json::to_string_pretty(&ListOutput {
            extensions: rows,
            failures,
        })
        .context("Failed to serialize extensions to JSON")?;
        println!("{}", json);
        return Ok(());
    }

    if rows.is_empty() {
        output::warning("No extensions found");
    } else {
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        table.with(Modify::new(Columns::new(6..7)).with(Width::wrap(50).keep_words(true)));
        println!("{}", table);
    }

    for failure in &failures {
        output::warning(&format!("{}: {}", failure.source, failure.error));
    }
    Ok(())
}

fn build_rows(report: &DiscoveryReport, record: &InstalledRecord, all: bool) -> Vec<ExtensionRow> {
    let mut rows: Vec<ExtensionRow> = report
        .selected
        .iter()
        .map(|c| {
            let status = if record.is_enabled(&c.manifest.id) {
                "enabled"
            } else {
                "disabled"
            };
            row(c, record, status)
        })
        .collect();

    if all {
        rows.extend(report.superseded.iter().map(|c| row(c, record, "shadowed")));
    }

    rows.sort_by(|a, b| a.id.cmp(&b.id).then(a.status.cmp(&b.status)));
    rows
}

fn row(candidate: &Candidate, record: &InstalledRecord, status: &str) -> ExtensionRow {
    let manifest = &candidate.manifest;
    let installed_at = record
        .get(&manifest.id)
        .filter(|entry| entry.version == manifest.version && entry.tier == candidate.tier)
        .map(|entry| entry.installed_at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    ExtensionRow {
        id: manifest.id.clone(),
        version: manifest.version.clone(),
        tier: candidate.tier.to_string(),
        status: status.to_string(),
        installed_at,
        source: candidate.source.path().display().to_string(),
        description: if manifest.description.is_empty() {
            "-".to_string()
        } else {
            manifest.description.clone()
        },
    }
}
