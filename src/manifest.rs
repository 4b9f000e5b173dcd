//! Build-phase input schemas and the export detail record.
//!
//! Everything the exporter consumes is a JSON file with a known schema at a
//! known path inside the build directory, produced by an earlier build phase:
//!
//! ```text
//! .next-build/
//! ├── BUILD_ID                   # one-line build identifier
//! ├── pages-manifest.json        # page name → render-module locator
//! ├── prerender-manifest.json    # dynamic routes + already-rendered routes (optional)
//! ├── routes-manifest.json       # locale routing marker (optional)
//! ├── export-marker.json         # build feature flags (optional)
//! └── server/pages/              # prerendered markup/data pairs
//! ```
//!
//! Manifests are parsed eagerly with serde. A missing optional manifest is
//! legal and loads as its empty form; a malformed one is a fatal parse error
//! that names the offending file.
//!
//! ## The Detail Record
//!
//! [`DetailRecord`] is the small persisted marker for the whole run. It is
//! written twice: pessimistically at the start (`success: false`) and again at
//! the end (`success: true` only if no fatal condition occurred). An external
//! tool that finds a stale `success: false` record knows the previous export
//! was interrupted or failed; the next run overwrites it at start.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version of the detail record format. Bump to invalidate external readers
/// when the schema changes.
pub const DETAIL_RECORD_VERSION: u32 = 1;

pub const PAGES_MANIFEST: &str = "pages-manifest.json";
pub const PRERENDER_MANIFEST: &str = "prerender-manifest.json";
pub const ROUTES_MANIFEST: &str = "routes-manifest.json";
pub const EXPORT_MARKER: &str = "export-marker.json";
pub const DETAIL_RECORD: &str = "export-detail.json";
pub const BUILD_ID_FILE: &str = "BUILD_ID";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("required build input missing: {0}")]
    Missing(PathBuf),
}

/// Mapping from logical page name to its on-disk render-module locator,
/// relative to the build directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PagesManifest(pub BTreeMap<String, String>);

impl PagesManifest {
    /// Load from the build directory. The pages manifest is the witness that
    /// a build ran at all, so a missing file is an error here (the coordinator
    /// turns it into its "no prior build output" precondition failure).
    pub fn load(build_dir: &Path) -> Result<Self, ManifestError> {
        let path = build_dir.join(PAGES_MANIFEST);
        if !path.exists() {
            return Err(ManifestError::Missing(path));
        }
        parse_json(&path)
    }

    pub fn module_for(&self, page: &str) -> Option<&str> {
        self.0.get(page).map(String::as_str)
    }
}

/// Fallback policy of a dynamic route, as stored in the prerender manifest.
///
/// Serialized forms: `false` (fully prerendered), a string (a fallback page
/// exists and may render at serve time), or `null` (render-on-demand,
/// blocking). Only `false` is compatible with a static export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Fallback {
    Flag(bool),
    Page(String),
}

/// One dynamic-route entry in the prerender manifest.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRoute {
    /// `false`, a fallback page path, or `null` for blocking fallback.
    #[serde(default)]
    pub fallback: Option<Fallback>,
    /// Routes of this page rendered at build time.
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub data_route: Option<String>,
}

impl DynamicRoute {
    /// True when serving this page can require a render at request time.
    /// `fallback: false` is the only form a static export can satisfy.
    pub fn allows_runtime_render(&self) -> bool {
        !matches!(self.fallback, Some(Fallback::Flag(false)))
    }
}

/// One already-prerendered route in the prerender manifest.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerenderedRoute {
    /// The dynamic source page this route was rendered from, if any.
    #[serde(default)]
    pub src_route: Option<String>,
    #[serde(default)]
    pub data_route: Option<String>,
}

/// Mapping from logical page to dynamic-route metadata plus the list of
/// routes a previous build pass already rendered.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerenderManifest {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub dynamic_routes: BTreeMap<String, DynamicRoute>,
    #[serde(default)]
    pub routes: BTreeMap<String, PrerenderedRoute>,
    #[serde(default)]
    pub not_found_routes: BTreeSet<String>,
}

impl PrerenderManifest {
    /// Load from the build directory. Absence is legal — the build simply had
    /// no prerendered routes — and loads as the empty manifest.
    pub fn load(build_dir: &Path) -> Result<Self, ManifestError> {
        let path = build_dir.join(PRERENDER_MANIFEST);
        if !path.exists() {
            return Ok(Self::default());
        }
        parse_json(&path)
    }

    pub fn is_dynamic(&self, page: &str) -> bool {
        self.dynamic_routes.contains_key(page)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleRouting {
    pub locales: Vec<String>,
    #[serde(default)]
    pub default_locale: Option<String>,
}

/// Subset of the routes manifest the exporter cares about: the locale
/// routing marker, which is incompatible with a purely static export.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutesManifest {
    #[serde(default)]
    pub i18n: Option<LocaleRouting>,
}

impl RoutesManifest {
    pub fn load(build_dir: &Path) -> Result<Self, ManifestError> {
        let path = build_dir.join(ROUTES_MANIFEST);
        if !path.exists() {
            return Ok(Self::default());
        }
        parse_json(&path)
    }
}

/// Feature marker written by the build phase.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMarker {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub has_export_path_map: bool,
    #[serde(default)]
    pub export_trailing_slash: bool,
    #[serde(default)]
    pub is_next_image_imported: bool,
}

impl ExportMarker {
    pub fn load(build_dir: &Path) -> Result<Self, ManifestError> {
        let path = build_dir.join(EXPORT_MARKER);
        if !path.exists() {
            return Ok(Self::default());
        }
        parse_json(&path)
    }
}

/// Read the one-line build identifier.
pub fn read_build_id(build_dir: &Path) -> Result<String, ManifestError> {
    let path = build_dir.join(BUILD_ID_FILE);
    if !path.exists() {
        return Err(ManifestError::Missing(path));
    }
    Ok(fs::read_to_string(&path)?.trim().to_string())
}

/// Persisted success/failure marker for the whole export run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    pub version: u32,
    pub out_directory: String,
    pub success: bool,
}

impl DetailRecord {
    pub fn new(out_directory: &Path, success: bool) -> Self {
        Self {
            version: DETAIL_RECORD_VERSION,
            out_directory: out_directory.display().to_string(),
            success,
        }
    }

    /// Write to the build directory, replacing any record from a prior run.
    pub fn write(&self, build_dir: &Path) -> Result<(), ManifestError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Parse {
            path: build_dir.join(DETAIL_RECORD),
            source,
        })?;
        fs::write(build_dir.join(DETAIL_RECORD), json)?;
        Ok(())
    }

    pub fn load(build_dir: &Path) -> Result<Self, ManifestError> {
        let path = build_dir.join(DETAIL_RECORD);
        if !path.exists() {
            return Err(ManifestError::Missing(path));
        }
        parse_json(&path)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let parse_error = |source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let content = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(parse_error)?;
    // Every manifest schema is a JSON object. The derived struct impls would
    // also accept the positional sequence form, which together with the
    // field defaults lets `[]` slip through as an empty manifest.
    if !value.is_object() {
        return Err(parse_error(<serde_json::Error as serde::de::Error>::custom(
            "expected a JSON object at the top level",
        )));
    }
    serde_json::from_value(value).map_err(parse_error)
}
