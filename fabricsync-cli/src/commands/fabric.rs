//! `fabricsync fabric list|delete|unlock`

use anyhow::{Context, Result};
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use fabricsync_core::store;
use fabricsync_core::types::{ClusterConfig, FabricName};
use fabricsync_sync::Orchestrator;

use super::{block_on, home_dir};

#[derive(Subcommand, Debug)]
pub enum FabricCommand {
    /// List registered fabrics.
    List,
    /// Delete a fabric and every resource row.
    Delete {
        fabric: String,
        /// Also delete each backing managed file from the repository.
        #[arg(long)]
        remove_files: bool,
    },
    /// Break a sync lock left behind by a process that died mid-sync.
    ///
    /// The interrupted operation is marked failed.
    Unlock { fabric: String },
}

#[derive(Tabled)]
struct FabricRow {
    #[tabled(rename = "fabric")]
    name: String,
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "cluster")]
    cluster: String,
    #[tabled(rename = "direction")]
    direction: String,
}

pub fn run(command: FabricCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        FabricCommand::List => {
            let fabrics = store::list_fabrics_at(&home).context("failed to load fabrics")?;
            if fabrics.is_empty() {
                println!("No fabrics registered. Run `fabricsync init` first.");
                return Ok(());
            }
            let rows: Vec<FabricRow> = fabrics
                .into_iter()
                .map(|fabric| FabricRow {
                    name: fabric.name.0,
                    repository: fabric.repository.source.to_string(),
                    cluster: match fabric.cluster {
                        None => "-".to_string(),
                        Some(ClusterConfig::Snapshot { path }) => {
                            format!("snapshot:{}", path.display())
                        }
                        Some(ClusterConfig::Kube { context }) => {
                            format!("kube:{}", context.as_deref().unwrap_or("current"))
                        }
                    },
                    direction: fabric.default_direction.to_string(),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        FabricCommand::Delete {
            fabric,
            remove_files,
        } => {
            let name = FabricName::from(fabric.as_str());
            let orchestrator = Orchestrator::open(&home, &name)
                .with_context(|| format!("cannot open fabric '{fabric}'"))?;
            let report = block_on(orchestrator.delete_fabric(remove_files))?
                .with_context(|| format!("failed to delete fabric '{fabric}'"))?;

            println!(
                "✓ Deleted fabric '{}' ({} resources)",
                report.fabric, report.resources
            );
            for path in &report.removed_files {
                println!("  ✗  {path}");
            }
            for failure in &report.failed {
                eprintln!("  !  {}: {}", failure.item, failure.error);
            }
        }

        FabricCommand::Unlock { fabric } => {
            let name = FabricName::from(fabric.as_str());
            store::load_fabric_at(&home, &name)
                .with_context(|| format!("cannot open fabric '{fabric}'"))?;
            let broken = store::break_lock_at(&home, &name, "sync lock broken by operator")
                .with_context(|| format!("failed to unlock fabric '{fabric}'"))?;
            match broken {
                Some(lock) => println!(
                    "✓ Unlocked fabric '{fabric}' (operation {} by {}, held since {})",
                    lock.operation_id,
                    lock.holder,
                    lock.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => println!("Fabric '{fabric}' is not locked."),
            }
        }
    }

    Ok(())
}
