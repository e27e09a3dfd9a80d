//! `fabricsync status`: drift, conflict and draft visibility.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use fabricsync_core::types::{ConflictStatus, FabricName};
use fabricsync_sync::drift::DriftStatus;
use fabricsync_sync::status::{all_status, fabric_status, FabricStatus};

use super::{format_age, home_dir};

/// Arguments for `fabricsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only this fabric.
    #[arg(long)]
    pub fabric: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "resource")]
    resource: String,
    #[tabled(rename = "drift")]
    drift: &'static str,
    #[tabled(rename = "conflict")]
    conflict: &'static str,
    #[tabled(rename = "draft")]
    draft: &'static str,
    #[tabled(rename = "last file sync")]
    last_file_sync: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let statuses = match &self.fabric {
            Some(name) => vec![fabric_status(&home, &FabricName::from(name.as_str()))
                .with_context(|| format!("status failed for '{name}'"))?],
            None => all_status(&home).context("failed to load fabrics")?,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&statuses)
                    .context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_tables(&statuses);
        Ok(())
    }
}

fn print_tables(statuses: &[FabricStatus]) {
    let resources: usize = statuses.iter().map(|s| s.counts.total).sum();
    let drifted: usize = statuses.iter().map(|s| s.counts.drifted).sum();
    let conflicts: usize = statuses.iter().map(|s| s.counts.conflicts).sum();
    println!(
        "fabricsync v{} | {} fabrics | {} resources | {} drifted | {} conflicts",
        env!("CARGO_PKG_VERSION"),
        statuses.len(),
        resources,
        drifted,
        conflicts,
    );

    if statuses.is_empty() {
        println!("No fabrics registered.");
        return;
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    for status in statuses {
        println!(
            "{} {}",
            status.fabric.0.to_uppercase().bold(),
            status.repository.bright_black()
        );
        let counts = status.counts;
        println!(
            "  {} in sync  {} drifted  {} unknown  {} conflicts  {} pending drafts",
            counts.in_sync.to_string().green().bold(),
            counts.drifted.to_string().red().bold(),
            counts.unknown.to_string().bright_black().bold(),
            counts.conflicts.to_string().yellow().bold(),
            counts.pending_drafts.to_string().cyan().bold(),
        );
        if let Some(holder) = &status.lock_holder {
            println!("  {} sync running: {holder}", "●".yellow());
        }
        match &status.last_operation {
            Some(op) => println!(
                "  last operation: {} {} ({})",
                op.direction,
                op.state,
                format_age(op.finished_at.or(op.started_at))
            ),
            None => println!("  last operation: never"),
        }

        if !status.resources.is_empty() {
            let rows: Vec<ResourceRow> = status
                .resources
                .iter()
                .map(|r| ResourceRow {
                    resource: r.key.to_string(),
                    drift: drift_label(r.drift),
                    conflict: conflict_label(r.conflict),
                    draft: if r.pending_draft { "pending" } else { "" },
                    last_file_sync: format_age(r.last_file_sync),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        println!("{separator}");
    }

    if conflicts > 0 {
        println!("Run 'fabricsync resolve <fabric> <resource> --prefer git|gui' to clear conflicts.");
    }
}

fn drift_label(status: DriftStatus) -> &'static str {
    match status {
        DriftStatus::Unknown => "UNKNOWN",
        DriftStatus::InSync => "IN SYNC",
        DriftStatus::Drifted => "DRIFTED",
    }
}

fn conflict_label(status: ConflictStatus) -> &'static str {
    match status {
        ConflictStatus::None => "",
        ConflictStatus::Detected => "DETECTED",
        ConflictStatus::Resolved => "resolved",
    }
}
