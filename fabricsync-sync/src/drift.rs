//! Drift Detector: structural comparison of `desired_spec` and `actual_spec`.
//!
//! Objects are compared key by key and arrays index by index, so appending
//! one subnet to a list yields a single `Added` entry at `subnets[1]`.
//! Paths use `.` between keys and `[i]` for array positions.

use serde::Serialize;
use serde_json::Value;

use fabricsync_core::types::{Resource, SpecDocument};

/// Drift classification. `Unknown` is distinct from `InSync`: it means one
/// side has not been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Unknown,
    InSync,
    Drifted,
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftStatus::Unknown => "unknown",
            DriftStatus::InSync => "in_sync",
            DriftStatus::Drifted => "drifted",
        };
        f.write_str(s)
    }
}

/// How a single field differs. "Added" means present in the cluster only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum FieldChange {
    Added { value: Value },
    Removed { value: Value },
    Changed { old: Value, new: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub path: String,
    #[serde(flatten)]
    pub change: FieldChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub status: DriftStatus,
    pub diffs: Vec<FieldDiff>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        self.status == DriftStatus::Drifted
    }

    fn unknown() -> Self {
        Self {
            status: DriftStatus::Unknown,
            diffs: vec![],
        }
    }
}

/// Compare desired (Git) against actual (cluster) state.
pub fn detect_drift(desired: Option<&SpecDocument>, actual: Option<&SpecDocument>) -> DriftReport {
    let (Some(desired), Some(actual)) = (desired, actual) else {
        return DriftReport::unknown();
    };
    let mut diffs = Vec::new();
    diff_maps("", desired, actual, &mut diffs);
    DriftReport {
        status: if diffs.is_empty() {
            DriftStatus::InSync
        } else {
            DriftStatus::Drifted
        },
        diffs,
    }
}

/// [`detect_drift`] over a resource's own documents.
pub fn resource_drift(resource: &Resource) -> DriftReport {
    detect_drift(resource.desired_spec(), resource.actual_spec())
}

fn diff_maps(
    prefix: &str,
    old: &serde_json::Map<String, Value>,
    new: &serde_json::Map<String, Value>,
    out: &mut Vec<FieldDiff>,
) {
    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match (old.get(key), new.get(key)) {
            (Some(a), Some(b)) => diff_values(&path, a, b, out),
            (Some(a), None) => out.push(FieldDiff {
                path,
                change: FieldChange::Removed { value: a.clone() },
            }),
            (None, Some(b)) => out.push(FieldDiff {
                path,
                change: FieldChange::Added { value: b.clone() },
            }),
            (None, None) => {}
        }
    }
}

fn diff_values(path: &str, old: &Value, new: &Value, out: &mut Vec<FieldDiff>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_maps(path, a, b, out),
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                let item = format!("{path}[{i}]");
                match (a.get(i), b.get(i)) {
                    (Some(x), Some(y)) => diff_values(&item, x, y, out),
                    (Some(x), None) => out.push(FieldDiff {
                        path: item,
                        change: FieldChange::Removed { value: x.clone() },
                    }),
                    (None, Some(y)) => out.push(FieldDiff {
                        path: item,
                        change: FieldChange::Added { value: y.clone() },
                    }),
                    (None, None) => {}
                }
            }
        }
        (a, b) if a != b => out.push(FieldDiff {
            path: path.to_string(),
            change: FieldChange::Changed {
                old: a.clone(),
                new: b.clone(),
            },
        }),
        _ => {}
    }
}
