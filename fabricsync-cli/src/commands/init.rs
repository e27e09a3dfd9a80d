//! `fabricsync init <fabric> (--repo <dir> | --github owner/repo) [--snapshot <dir> | --kube]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use fabricsync_core::store;
use fabricsync_core::types::{
    ClusterConfig, FabricName, RepositoryConfig, RepositorySource, SyncDirection,
};

use super::home_dir;

/// Register a fabric in the local store.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Fabric name (letters, digits, `-`, `_`).
    pub fabric: String,

    /// Local working tree holding the fabric's manifests.
    #[arg(long, value_name = "DIR", required_unless_present = "github", conflicts_with = "github")]
    pub repo: Option<PathBuf>,

    /// GitHub repository accessed through the REST API.
    #[arg(long, value_name = "OWNER/REPO")]
    pub github: Option<String>,

    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Environment variable holding the GitHub token.
    #[arg(long, default_value = "GITHUB_TOKEN")]
    pub token_env: String,

    /// Directory of exported cluster manifests used as actual state.
    #[arg(long, value_name = "DIR", conflicts_with = "kube")]
    pub snapshot: Option<PathBuf>,

    /// Observe the live cluster through the local kubeconfig.
    #[arg(long)]
    pub kube: bool,

    /// kubeconfig context (with --kube).
    #[arg(long, requires = "kube")]
    pub context: Option<String>,

    /// Default sync direction for new resources.
    #[arg(long, default_value_t = SyncDirection::Bidirectional)]
    pub direction: SyncDirection,

    #[arg(long, default_value = "managed")]
    pub managed_dir: String,

    #[arg(long, default_value = "raw")]
    pub raw_dir: String,

    /// Leave files under the raw directory alone.
    #[arg(long)]
    pub no_ingest: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let source = match (&self.repo, &self.github) {
            (Some(repo), _) => RepositorySource::Local {
                path: repo
                    .canonicalize()
                    .with_context(|| format!("cannot resolve path '{}'", repo.display()))?,
            },
            (None, Some(github)) => {
                let Some((owner, repo)) = github.split_once('/') else {
                    bail!("--github expects OWNER/REPO, got '{github}'");
                };
                RepositorySource::GitHub {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    branch: self.branch.clone(),
                    token_env: self.token_env.clone(),
                }
            }
            (None, None) => bail!("provide --repo or --github"),
        };

        let cluster = if let Some(snapshot) = &self.snapshot {
            Some(ClusterConfig::Snapshot {
                path: snapshot
                    .canonicalize()
                    .with_context(|| format!("cannot resolve path '{}'", snapshot.display()))?,
            })
        } else if self.kube {
            Some(ClusterConfig::Kube {
                context: self.context.clone(),
            })
        } else {
            None
        };

        let repository = RepositoryConfig {
            managed_dir: self.managed_dir,
            raw_dir: self.raw_dir,
            ingest_raw: !self.no_ingest,
            ..RepositoryConfig::new(source)
        };

        let fabric = store::init_fabric_at(
            &home,
            FabricName::from(self.fabric.as_str()),
            repository,
            cluster,
            self.direction,
        )
        .with_context(|| format!("failed to register fabric '{}'", self.fabric))?;

        println!(
            "✓ Registered fabric '{}' ({})",
            fabric.name, fabric.repository.source
        );
        println!("  Saved to: ~/.fabricsync/fabrics/{}/fabric.yaml", fabric.name);
        Ok(())
    }
}
