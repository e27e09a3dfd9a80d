use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use fabricsync_core::types::FabricName;
use fabricsync_sync::diff::{resource_diff, DiffTarget};

use super::{home_dir, parse_key};

/// Arguments for `fabricsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    pub fabric: String,

    /// `kind/name` or `kind/namespace/name`.
    pub resource: String,

    /// Compare against the staged GUI draft instead of the live cluster.
    #[arg(long)]
    pub draft: bool,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let key = parse_key(&self.resource)?;
        let target = if self.draft {
            DiffTarget::Draft
        } else {
            DiffTarget::Actual
        };

        let diff = resource_diff(&home, &FabricName::from(self.fabric.as_str()), &key, target)
            .with_context(|| format!("diff failed for '{key}'"))?;
        match diff {
            None => println!("No differences for '{key}'."),
            Some(text) => {
                for line in text.lines() {
                    if line.starts_with("+++") || line.starts_with("---") {
                        println!("{}", line.bold());
                    } else if line.starts_with('+') {
                        println!("{}", line.green());
                    } else if line.starts_with('-') {
                        println!("{}", line.red());
                    } else if line.starts_with("@@") {
                        println!("{}", line.cyan());
                    } else {
                        println!("{line}");
                    }
                }
            }
        }
        Ok(())
    }
}
