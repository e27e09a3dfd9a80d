//! Tera rendering engine: [`TemplateEngine`] and [`Renderer`].
//!
//! # Templates
//!
//! | Name                    | Output                                         |
//! |-------------------------|------------------------------------------------|
//! | `managed_path.tera`     | repository path of a managed manifest          |
//! | `commit_message.tera`   | commit message for a managed-file write        |
//! | `manifest_header.tera`  | comment block prepended to managed manifests   |
//!
//! Each can be overridden by a same-named file in `~/.fabricsync/templates/`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use tera::Tera;

use fabricsync_core::types::{FabricName, Manifest};

use crate::context::TemplateContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

pub const MANAGED_PATH: &str = "managed_path.tera";
pub const COMMIT_MESSAGE: &str = "commit_message.tera";
pub const MANIFEST_HEADER: &str = "manifest_header.tera";

const TPLS: &[(&str, &str)] = &[
    (MANAGED_PATH, include_str!("templates/managed_path.tera")),
    (COMMIT_MESSAGE, include_str!("templates/commit_message.tera")),
    (MANIFEST_HEADER, include_str!("templates/manifest_header.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    let mut templates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("tera") || !path.is_file() {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((normalize_template_name(rel), contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n")
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Load embedded templates plus any overrides found in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    /// Render one named template.
    pub fn render(&self, name: &str, ctx: &TemplateContext) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let out = self.tera.render(name, &tera_ctx)?;
        Ok(normalize_line_endings(&out))
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders managed paths, commit messages and manifest files.
///
/// Create once and reuse; construction compiles every template.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Construct a [`Renderer`] with embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(None)? })
    }

    /// Construct a [`Renderer`] honouring `<home>/.fabricsync/templates/` overrides.
    pub fn for_home(home: &Path) -> Result<Self, RenderError> {
        let dir = home.join(".fabricsync").join("templates");
        Ok(Renderer { engine: TemplateEngine::new(Some(&dir))? })
    }

    /// Repository-relative path of the managed file for a resource.
    pub fn managed_path(&self, ctx: &TemplateContext) -> Result<String, RenderError> {
        let rendered = self.engine.render(MANAGED_PATH, ctx)?;
        let path = rendered.trim().to_string();
        let valid = !path.is_empty()
            && Path::new(&path)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(RenderError::InvalidPath(path));
        }
        Ok(path)
    }

    /// Commit message for a managed-file write. Trailing whitespace is trimmed.
    pub fn commit_message(&self, ctx: &TemplateContext) -> Result<String, RenderError> {
        let rendered = self.engine.render(COMMIT_MESSAGE, ctx)?;
        Ok(format!("{}\n", rendered.trim_end()))
    }

    /// Full managed file content: header comment followed by the manifest YAML.
    pub fn render_manifest(
        &self,
        fabric: &FabricName,
        manifest: &Manifest,
        managed_dir: &str,
    ) -> Result<String, RenderError> {
        let ctx = TemplateContext::for_manifest(fabric, manifest, managed_dir);
        let header = self.engine.render(MANIFEST_HEADER, &ctx)?;
        let body = serde_yaml::to_string(manifest)?;

        let mut out = String::with_capacity(header.len() + body.len() + 1);
        let header = header.trim_end();
        if !header.is_empty() {
            out.push_str(header);
            out.push('\n');
        }
        out.push_str(&normalize_line_endings(&body));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
