//! The rendering seam: the [`PageRenderer`] trait and its production
//! implementation.
//!
//! The export pipeline never produces markup itself — the rendering engine is
//! an external collaborator reached through [`PageRenderer`], called exactly
//! once per attempt of each render task. Production runs use
//! [`BundleRenderer`], which reads the per-page render bundle the build phase
//! wrote at the page's module locator. Tests substitute mocks at the same
//! seam (see the [`tests`] module).

use crate::dispatch::RenderTask;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed render bundle: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no render module registered for page {0}")]
    UnknownPage(String),
}

/// Validation findings for the alternate markup variant of one page.
///
/// Accumulated into the run-wide validation ledger; any entry with errors
/// fails the whole run at finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AlternateValidation {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl AlternateValidation {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// What one successful render call produced.
#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    pub html: String,
    pub page_data: serde_json::Value,
    pub alternate_html: Option<String>,
    pub validation: Option<AlternateValidation>,
    /// Revalidation hint in seconds, persisted for external tooling.
    pub revalidate: Option<u64>,
    /// The page resolved to "not found"; nothing is placed for it.
    pub not_found: bool,
}

/// The rendering engine boundary. Implementations must be callable from any
/// worker thread; a single instance is shared across the whole pool.
pub trait PageRenderer: Send + Sync {
    fn render(&self, task: &RenderTask) -> Result<RenderOutcome, RenderError>;
}

/// On-disk schema of a render bundle, one JSON file per page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bundle {
    html: String,
    #[serde(default)]
    page_data: serde_json::Value,
    #[serde(default)]
    amp_html: Option<String>,
    #[serde(default)]
    validation: Option<AlternateValidation>,
    #[serde(default)]
    revalidate: Option<u64>,
    #[serde(default)]
    not_found: bool,
}

/// Production renderer: resolves a task's page to its render bundle under
/// the build directory and deserializes it.
pub struct BundleRenderer {
    build_dir: PathBuf,
    modules: BTreeMap<String, String>,
}

impl BundleRenderer {
    pub fn new(build_dir: &Path, modules: BTreeMap<String, String>) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
            modules,
        }
    }
}

impl PageRenderer for BundleRenderer {
    fn render(&self, task: &RenderTask) -> Result<RenderOutcome, RenderError> {
        let locator = self
            .modules
            .get(&task.path.page)
            .ok_or_else(|| RenderError::UnknownPage(task.path.page.clone()))?;
        let content = std::fs::read_to_string(self.build_dir.join(locator))?;
        let bundle: Bundle = serde_json::from_str(&content)?;

        Ok(RenderOutcome {
            html: bundle.html,
            page_data: bundle.page_data,
            alternate_html: bundle.amp_html,
            validation: bundle.validation,
            revalidate: bundle.revalidate,
            not_found: bundle.not_found,
        })
    }
}
