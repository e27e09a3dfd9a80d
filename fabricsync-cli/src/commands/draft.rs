//! `fabricsync draft`: stage a GUI edit from a YAML file.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use fabricsync_core::store;
use fabricsync_core::types::FabricName;
use fabricsync_sync::Orchestrator;

use super::{home_dir, parse_key, read_spec};

#[derive(Args, Debug)]
pub struct DraftArgs {
    pub fabric: String,

    /// `kind/name` or `kind/namespace/name`.
    pub resource: String,

    /// YAML file holding the new spec mapping.
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// `group/version` for a resource that does not exist yet.
    #[arg(long)]
    pub api_version: Option<String>,

    /// Reject the edit if the resource changed since this version was read.
    #[arg(long)]
    pub expected_version: Option<u64>,
}

impl DraftArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let name = FabricName::from(self.fabric.as_str());
        let key = parse_key(&self.resource)?;
        let spec = read_spec(&self.file)?;

        let orchestrator = Orchestrator::open(&home, &name)
            .with_context(|| format!("cannot open fabric '{}'", self.fabric))?;

        let existing = store::find_resource_at(&home, &name, &key)
            .with_context(|| format!("cannot read '{key}'"))?;
        let row = match existing {
            Some(_) => orchestrator
                .stage_draft(&key, spec, self.expected_version)
                .with_context(|| format!("cannot stage draft for '{key}'"))?,
            None => {
                let Some(api_version) = self.api_version.as_deref() else {
                    bail!("'{key}' does not exist; pass --api-version to create it");
                };
                let row = orchestrator
                    .create_resource(key.clone(), api_version, spec)
                    .with_context(|| format!("cannot create '{key}'"))?;
                println!("✓ Created '{key}'");
                row
            }
        };

        if row.draft_spec().is_none() {
            println!(
                "✓ '{key}' already matches the repository; no draft staged (version {}).",
                row.version()
            );
            return Ok(());
        }
        println!(
            "✎ Draft staged for '{key}' (version {}). Run `fabricsync sync {}` to push it.",
            row.version(),
            self.fabric
        );
        Ok(())
    }
}
