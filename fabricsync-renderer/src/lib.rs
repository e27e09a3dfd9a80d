//! # fabricsync-renderer
//!
//! Tera-based rendering of managed manifest paths, commit messages and
//! managed manifest files.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fabricsync_core::types::{FabricName, Manifest};
//! use fabricsync_renderer::{Renderer, TemplateContext};
//!
//! fn place(manifest: &Manifest) {
//!     if let Ok(renderer) = Renderer::new() {
//!         let fabric = FabricName::from("lab");
//!         let ctx = TemplateContext::for_manifest(&fabric, manifest, "managed");
//!         if let Ok(path) = renderer.managed_path(&ctx) {
//!             println!("{path}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{CommitAction, TemplateContext};
pub use engine::{Renderer, TemplateEngine};
pub use error::RenderError;
