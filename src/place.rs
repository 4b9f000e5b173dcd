//! Artifact placement: the output-tree layout rules.
//!
//! ## Placement Rules (Contract A)
//!
//! Primary markup follows the trailing-slash convention:
//!
//! ```text
//! route "/"        →  index.html                      (always)
//! route "/about"   →  about.html                      (trailing_slash = false)
//! route "/about"   →  about/index.html                (trailing_slash = true)
//! ```
//!
//! The data payload always lands in a parallel tree, regardless of the
//! trailing-slash convention — data paths are never slash-normalized:
//!
//! ```text
//! _next/data/<buildId>/about.json
//! _next/data/<buildId>/index.json                     (for the root route)
//! ```
//!
//! An alternate markup variant, when present, sits alongside the primary:
//!
//! ```text
//! about.amp.html            or        about.amp/index.html
//! ```
//!
//! ## Prerendered Copies (Contract B)
//!
//! Routes a previous build pass already rendered are not re-rendered; their
//! markup/data pairs are copied byte-for-byte from
//! `<build_dir>/server/pages/` into the same destination layout. A missing
//! alternate variant is normal; missing primary markup or data means the
//! build output is incomplete and aborts the run.

use crate::manifest::PrerenderManifest;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Prerendered artifacts live here inside the build directory.
pub const SERVER_PAGES: &str = "server/pages";

#[derive(Error, Debug)]
pub enum PlaceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("prerendered route {route} is missing its built artifact at {path}")]
    MissingPrerendered { route: String, path: PathBuf },
}

/// Relative file stem for a route: `/` → `index`, `/blog/a` → `blog/a`.
fn route_stem(route: &str) -> &str {
    let stripped = route.trim_start_matches('/');
    if stripped.is_empty() { "index" } else { stripped }
}

/// Relative path of the primary markup file for a route.
pub fn html_path(route: &str, trailing_slash: bool) -> PathBuf {
    let stem = route_stem(route);
    if route == "/" || !trailing_slash {
        PathBuf::from(format!("{stem}.html"))
    } else {
        PathBuf::from(stem).join("index.html")
    }
}

/// Relative path of the data payload for a route. Independent of the
/// trailing-slash convention by design of the data tree contract.
pub fn data_path(build_id: &str, route: &str) -> PathBuf {
    PathBuf::from("_next/data")
        .join(build_id)
        .join(format!("{}.json", route_stem(route)))
}

/// Relative path of the alternate markup variant for a route.
pub fn variant_path(route: &str, variant_tag: &str, trailing_slash: bool) -> PathBuf {
    let stem = format!("{}.{variant_tag}", route_stem(route));
    if route == "/" || !trailing_slash {
        PathBuf::from(format!("{stem}.html"))
    } else {
        PathBuf::from(stem).join("index.html")
    }
}

/// Writes render results and prerendered copies into the output tree.
///
/// Every destination path is derived deterministically from a deduplicated
/// route, so no two tasks ever target the same file and no locking is
/// needed around placement.
pub struct ArtifactPlacer {
    out_dir: PathBuf,
    build_id: String,
    trailing_slash: bool,
    variant_tag: String,
}

impl ArtifactPlacer {
    pub fn new(out_dir: &Path, build_id: &str, trailing_slash: bool, variant_tag: &str) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            build_id: build_id.to_string(),
            trailing_slash,
            variant_tag: variant_tag.to_string(),
        }
    }

    /// Contract A: place the artifacts of one successful render.
    pub fn place_rendered(
        &self,
        route: &str,
        html: &str,
        page_data: &serde_json::Value,
        alternate_html: Option<&str>,
    ) -> Result<(), PlaceError> {
        self.write(&html_path(route, self.trailing_slash), html.as_bytes())?;
        self.write(
            &data_path(&self.build_id, route),
            serde_json::to_string(page_data)?.as_bytes(),
        )?;
        if let Some(alternate) = alternate_html {
            self.write(
                &variant_path(route, &self.variant_tag, self.trailing_slash),
                alternate.as_bytes(),
            )?;
        }
        Ok(())
    }

    /// Contract B: copy every already-prerendered route (markup, data, and
    /// alternate variant if built) into the output tree. Returns the number
    /// of routes copied.
    pub fn copy_prerendered(
        &self,
        prerender: &PrerenderManifest,
        build_dir: &Path,
    ) -> Result<usize, PlaceError> {
        let pages_root = build_dir.join(SERVER_PAGES);
        let mut copied = 0;

        for route in prerender.routes.keys() {
            if prerender.not_found_routes.contains(route) {
                continue;
            }
            let stem = route_stem(route);

            let src_html = pages_root.join(format!("{stem}.html"));
            let src_data = pages_root.join(format!("{stem}.json"));
            for src in [&src_html, &src_data] {
                if !src.exists() {
                    return Err(PlaceError::MissingPrerendered {
                        route: route.clone(),
                        path: src.clone(),
                    });
                }
            }

            self.copy(&src_html, &html_path(route, self.trailing_slash))?;
            self.copy(&src_data, &data_path(&self.build_id, route))?;

            let src_variant = pages_root.join(format!("{stem}.{}.html", self.variant_tag));
            if src_variant.exists() {
                self.copy(
                    &src_variant,
                    &variant_path(route, &self.variant_tag, self.trailing_slash),
                )?;
            }
            copied += 1;
        }
        Ok(copied)
    }

    fn write(&self, relative: &Path, content: &[u8]) -> Result<(), PlaceError> {
        let dest = self.out_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, content)?;
        Ok(())
    }

    fn copy(&self, src: &Path, relative: &Path) -> Result<(), PlaceError> {
        let dest = self.out_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        Ok(())
    }
}

/// Recursively copy a directory tree. Used for the static passthrough
/// directories; destination directories are created as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
