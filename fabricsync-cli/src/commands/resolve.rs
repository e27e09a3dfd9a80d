//! `fabricsync resolve`: the only way a detected conflict is cleared.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use fabricsync_core::types::FabricName;
use fabricsync_sync::{Orchestrator, ResolutionPolicy};

use super::{block_on, home_dir, parse_key, read_spec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Prefer {
    /// Keep the repository's version and discard the draft.
    Git,
    /// Keep the GUI draft; it is pushed on the next sync.
    Gui,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    pub fabric: String,

    /// `kind/name` or `kind/namespace/name`.
    pub resource: String,

    #[arg(long, value_enum, required_unless_present = "merge", conflicts_with = "merge")]
    pub prefer: Option<Prefer>,

    /// YAML file holding a hand-merged spec.
    #[arg(long, value_name = "FILE")]
    pub merge: Option<PathBuf>,
}

impl ResolveArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let key = parse_key(&self.resource)?;
        let policy = match (self.prefer, &self.merge) {
            (_, Some(path)) => ResolutionPolicy::Merge(read_spec(path)?),
            (Some(Prefer::Git), None) => ResolutionPolicy::PreferGit,
            (Some(Prefer::Gui), None) => ResolutionPolicy::PreferGui,
            (None, None) => bail!("pass --prefer git|gui or --merge FILE"),
        };
        let outcome = match &policy {
            ResolutionPolicy::PreferGit => "kept the repository version",
            ResolutionPolicy::PreferGui => "kept the GUI draft",
            ResolutionPolicy::Merge(_) => "staged the merged spec",
        };

        let orchestrator = Orchestrator::open(&home, &FabricName::from(self.fabric.as_str()))
            .with_context(|| format!("cannot open fabric '{}'", self.fabric))?;
        let row = block_on(orchestrator.resolve_conflict(&key, policy))?
            .with_context(|| format!("cannot resolve '{key}'"))?;

        println!("✓ Resolved '{key}': {outcome}");
        if row.has_pending_draft() {
            println!("  Run `fabricsync sync {}` to push it.", self.fabric);
        }
        Ok(())
    }
}
