pub mod daemon;
pub mod diff;
pub mod draft;
pub mod fabric;
pub mod init;
pub mod observe;
pub mod resolve;
pub mod status;
pub mod sync;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use fabricsync_core::types::{ResourceKey, SpecDocument};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Run an async command body on a fresh runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

pub(crate) fn parse_key(reference: &str) -> Result<ResourceKey> {
    reference.parse().map_err(anyhow::Error::msg)
}

/// A YAML file holding one spec mapping.
pub(crate) fn read_spec(path: &Path) -> Result<SpecDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("{} does not hold a YAML mapping", path.display()))
}

/// `5m ago`, `2h ago`, `never`.
pub(crate) fn format_age(at: Option<DateTime<Utc>>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ages_are_humanised() {
        assert_eq!(format_age(None), "never");
        assert_eq!(format_age(Some(Utc::now() - Duration::minutes(5))), "5m ago");
        assert_eq!(format_age(Some(Utc::now() - Duration::hours(3))), "3h ago");
        assert_eq!(format_age(Some(Utc::now() - Duration::days(2))), "2d ago");
    }
}
