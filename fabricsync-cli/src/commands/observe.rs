use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use fabricsync_core::store;
use fabricsync_core::types::FabricName;
use fabricsync_daemon::observe_fabric;
use fabricsync_sync::{CancellationFlag, DriftStatus, FieldChange};

use super::{block_on, home_dir};

/// Arguments for `fabricsync observe`.
#[derive(Args, Debug)]
pub struct ObserveArgs {
    pub fabric: String,
}

impl ObserveArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let fabric = store::load_fabric_at(&home, &FabricName::from(self.fabric.as_str()))
            .with_context(|| format!("cannot load fabric '{}'", self.fabric))?;

        let cancel = CancellationFlag::new();
        let report = block_on(observe_fabric(&home, &fabric, &cancel))?
            .with_context(|| format!("observation failed for '{}'", self.fabric))?;
        let Some(report) = report else {
            bail!(
                "fabric '{}' has no cluster configured; re-run `fabricsync init` with --snapshot or --kube",
                self.fabric
            );
        };

        println!(
            "✓ Observed {} resources in '{}' ({} changed)",
            report.observed,
            report.fabric,
            report.changed.len()
        );
        for entry in &report.drift {
            match entry.status {
                DriftStatus::InSync => {}
                DriftStatus::Unknown => {
                    println!("  {} {}", "?".bright_black(), entry.key);
                }
                DriftStatus::Drifted => {
                    println!("  {} {}", "≠".red(), entry.key.to_string().bold());
                    for diff in &entry.diffs {
                        let label = match &diff.change {
                            FieldChange::Added { .. } => "added".green(),
                            FieldChange::Removed { .. } => "removed".red(),
                            FieldChange::Changed { .. } => "changed".yellow(),
                        };
                        println!("      {label} {}", diff.path);
                    }
                }
            }
        }
        for failure in &report.failed {
            eprintln!("  ✗ {}: {}", failure.item, failure.error);
        }
        if report.cancelled {
            println!("Observation cancelled before every resource was read.");
        }
        Ok(())
    }
}
