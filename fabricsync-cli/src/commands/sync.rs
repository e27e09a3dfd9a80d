//! `fabricsync sync`: run a sync for one fabric or all of them.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use fabricsync_core::types::{FabricName, SyncDirection};
use fabricsync_sync::pipeline::{self, SyncScope};
use fabricsync_sync::report::SkipReason;
use fabricsync_sync::{CancellationFlag, SyncReport};

use super::{block_on, home_dir};

/// Arguments for `fabricsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Fabric to sync (omit when using `--all`).
    pub fabric: Option<String>,

    /// Sync every registered fabric concurrently.
    #[arg(long, conflicts_with = "fabric")]
    pub all: bool,

    /// Override the fabric's default direction.
    #[arg(long)]
    pub direction: Option<SyncDirection>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let scope = if self.all {
            SyncScope::All
        } else {
            let name = self
                .fabric
                .clone()
                .context("provide a fabric name or use --all")?;
            SyncScope::Fabric(FabricName::from(name))
        };
        let single = matches!(scope, SyncScope::Fabric(_));

        let cancel = CancellationFlag::new();
        let runs = block_on(async {
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    flag.cancel();
                }
            });
            pipeline::run(&home, scope, self.direction, "cli", &cancel).await
        })?
        .context("sync failed")?;

        if runs.is_empty() {
            println!("No fabrics registered. Run `fabricsync init` first.");
            return Ok(());
        }

        let mut failures = Vec::new();
        for run in runs {
            match run.outcome {
                Ok(report) => print_report(&report),
                Err(err) => {
                    if let Some(partial) = err.partial_report() {
                        print_report(partial);
                    }
                    failures.push((run.fabric, err));
                }
            }
        }

        if single {
            if let Some((fabric, err)) = failures.pop() {
                return Err(anyhow::Error::new(err).context(format!("sync failed for '{fabric}'")));
            }
        } else if !failures.is_empty() {
            for (fabric, err) in &failures {
                eprintln!("{} '{fabric}': {err}", "✗".red().bold());
            }
            bail!("{} of the fabric syncs did not complete", failures.len());
        }
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    let summary = report.summary();
    let mark = if report.cancelled {
        "⊘".yellow().bold()
    } else if summary.skipped_conflict > 0 {
        "⚠".yellow().bold()
    } else {
        "✓".green().bold()
    };
    println!(
        "{mark} '{}' {}: {} synced, {} unchanged, {} conflicts, {} failed{}",
        report.fabric,
        report.direction,
        summary.synced,
        summary.unchanged,
        report.conflicts.len(),
        summary.failed,
        if report.cancelled { " (cancelled)" } else { "" },
    );

    for ingested in &report.ingested {
        println!(
            "  ⇢  {} → {}",
            ingested.raw_path,
            ingested.managed_paths.join(", ")
        );
    }
    for item in &report.synced {
        println!("  ✎  {} ({})", item.key, item.path);
    }
    for item in &report.conflicts {
        match &item.path {
            Some(path) => println!("  ⚠  conflict {} ({path})", item.key),
            None => println!("  ⚠  conflict {}", item.key),
        }
    }
    for item in &report.skipped {
        let reason = match item.reason {
            SkipReason::DirectionDisabled => "direction disabled",
            SkipReason::ConflictPending => "conflict pending resolution",
        };
        println!("  ↷  {} ({reason})", item.key);
    }
    for path in &report.missing_in_git {
        println!("  ?  missing in git: {path}");
    }
    for failure in &report.failed {
        println!("  ✗  {}: {}", failure.item, failure.error);
    }
}
