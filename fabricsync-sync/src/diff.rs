//! Unified diffs between spec documents, rendered as YAML.

use std::path::Path;

use similar::TextDiff;

use fabricsync_core::store;
use fabricsync_core::types::{FabricName, ResourceKey, SpecDocument};

use crate::SyncError;

/// What to compare `desired_spec` against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTarget {
    /// Live cluster state.
    Actual,
    /// The staged GUI edit.
    Draft,
}

/// Unified diff of `old` → `new`, or `None` when they render identically.
///
/// An absent document renders as an empty file.
pub fn spec_diff(
    old: Option<&SpecDocument>,
    new: Option<&SpecDocument>,
    old_label: &str,
    new_label: &str,
) -> Result<Option<String>, SyncError> {
    let old = render(old)?;
    let new = render(new)?;
    if old == new {
        return Ok(None);
    }
    let unified = TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(old_label, new_label)
        .context_radius(3)
        .to_string();
    Ok(Some(unified))
}

/// Diff a stored resource's desired state against `target`.
pub fn resource_diff(
    home: &Path,
    fabric: &FabricName,
    key: &ResourceKey,
    target: DiffTarget,
) -> Result<Option<String>, SyncError> {
    let row = store::load_resource_at(home, fabric, key)?;
    let (other, label) = match target {
        DiffTarget::Actual => (row.actual_spec(), "actual"),
        DiffTarget::Draft => (row.draft_spec(), "draft"),
    };
    spec_diff(
        row.desired_spec(),
        other,
        &format!("desired/{key}"),
        &format!("{label}/{key}"),
    )
}

fn render(doc: Option<&SpecDocument>) -> Result<String, SyncError> {
    match doc {
        Some(doc) => Ok(serde_yaml::to_string(doc)?.replace("\r\n", "\n")),
        None => Ok(String::new()),
    }
}
