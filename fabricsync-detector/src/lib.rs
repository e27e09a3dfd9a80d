//! Manifest parsing and kind classification for `fabricsync-detector`.
//!
//! `parse_documents(path, content)` turns a (possibly multi-document) YAML file
//! into [`Manifest`]s, validating shape at the boundary so the sync core only
//! ever sees well-formed resource identities. `detect_kind` classifies a kind
//! and yields the per-kind directory name used under the managed tree.

use std::path::{Path, PathBuf};

use fabricsync_core::types::Manifest;
use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Confidence level of a kind classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Kind and API group both match a known resource.
    High,
    /// API group matches a known family but the kind is not catalogued.
    Medium,
    /// Nothing known; the kind is treated as an opaque custom resource.
    Low,
}

/// Resource family a manifest belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindCategory {
    /// `vpc.githedgehog.com`: VPCs, attachments, peerings, externals.
    Vpc,
    /// `wiring.githedgehog.com`: switches, servers, connections.
    Wiring,
    /// Anything else.
    Custom,
}

/// Classification of a manifest kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedKind {
    pub category: KindCategory,
    /// Lower-case plural used as the managed directory name (`vpcs`, `switches`).
    pub plural: String,
    pub confidence: Confidence,
}

/// Errors from manifest parsing.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("{path}: document {index} is missing required field '{field}'")]
    MissingField {
        path: PathBuf,
        index: usize,
        field: &'static str,
    },

    #[error("{path} contains no manifests")]
    Empty { path: PathBuf },
}

const VPC_GROUP: &str = "vpc.githedgehog.com";
const WIRING_GROUP: &str = "wiring.githedgehog.com";

const VPC_KINDS: &[&str] = &[
    "VPC",
    "VPCAttachment",
    "VPCPeering",
    "External",
    "ExternalAttachment",
    "ExternalPeering",
    "IPv4Namespace",
];

const WIRING_KINDS: &[&str] = &[
    "Connection",
    "Server",
    "Switch",
    "SwitchGroup",
    "SwitchProfile",
    "ServerProfile",
    "VLANNamespace",
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read and parse a manifest file from disk.
pub fn parse_file(path: &Path) -> Result<Vec<Manifest>, DetectError> {
    let content = std::fs::read_to_string(path).map_err(|source| DetectError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_documents(path, &content)
}

/// Parse every YAML document in `content`.
///
/// Empty documents (`---` separators with nothing between them) are skipped.
/// A file whose documents are all empty is [`DetectError::Empty`]. Any
/// malformed document fails the whole file; callers record that per file.
pub fn parse_documents(path: &Path, content: &str) -> Result<Vec<Manifest>, DetectError> {
    let mut manifests = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| parse_err(path, e))?;
        if value.is_null() {
            continue;
        }
        require_fields(path, index, &value)?;
        let manifest: Manifest = serde_yaml::from_value(value).map_err(|e| parse_err(path, e))?;
        if manifest.metadata.name.trim().is_empty() {
            return Err(DetectError::MissingField {
                path: path.to_path_buf(),
                index,
                field: "metadata.name",
            });
        }
        manifests.push(manifest);
    }
    if manifests.is_empty() {
        return Err(DetectError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(manifests)
}

/// `true` for `.yaml` / `.yml` files.
pub fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Classify a kind by its API group and name.
pub fn detect_kind(api_version: &str, kind: &str) -> DetectedKind {
    let group = api_version.split('/').next().unwrap_or_default();
    let (category, confidence) = match group {
        VPC_GROUP if VPC_KINDS.contains(&kind) => (KindCategory::Vpc, Confidence::High),
        VPC_GROUP => (KindCategory::Vpc, Confidence::Medium),
        WIRING_GROUP if WIRING_KINDS.contains(&kind) => (KindCategory::Wiring, Confidence::High),
        WIRING_GROUP => (KindCategory::Wiring, Confidence::Medium),
        _ => (KindCategory::Custom, Confidence::Low),
    };
    DetectedKind {
        category,
        plural: plural_for_kind(kind),
        confidence,
    }
}

/// Lower-case English plural of a kind: `VPC` → `vpcs`, `Switch` →
/// `switches`, `Policy` → `policies`.
pub fn plural_for_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.is_empty() {
        return lower;
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{lower}es");
    }
    if let Some(stem) = lower.strip_suffix('y') {
        let before = stem.chars().last();
        if matches!(before, Some(c) if !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }
    format!("{lower}s")
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn require_fields(path: &Path, index: usize, value: &serde_yaml::Value) -> Result<(), DetectError> {
    let missing = |field| DetectError::MissingField {
        path: path.to_path_buf(),
        index,
        field,
    };
    let Some(map) = value.as_mapping() else {
        return Err(DetectError::ParseError {
            path: path.to_path_buf(),
            message: format!("document {index} is not a mapping"),
        });
    };
    if !map.contains_key("apiVersion") {
        return Err(missing("apiVersion"));
    }
    if !map.contains_key("kind") {
        return Err(missing("kind"));
    }
    let has_name = map
        .get("metadata")
        .and_then(|m| m.as_mapping())
        .map(|m| m.contains_key("name"))
        .unwrap_or(false);
    if !has_name {
        return Err(missing("metadata.name"));
    }
    Ok(())
}

fn parse_err(path: &Path, err: serde_yaml::Error) -> DetectError {
    DetectError::ParseError {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
