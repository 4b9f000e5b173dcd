//! Shared test utilities for the static-export test suite.
//!
//! [`BuildFixture`] builds a minimal build directory on a temp dir: a build
//! id, a pages manifest, per-page render bundles, and optionally prerendered
//! server output, a prerender manifest, and passthrough asset trees.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::BuildFixture;
//!
//! let mut fixture = BuildFixture::new();
//! fixture.add_page("/");
//! fixture.add_page("/about");
//!
//! let coordinator = ExportCoordinator::new(
//!     fixture.options(),
//!     Arc::new(fixture.bundle_renderer()),
//!     ProgressReporter::new(None),
//! );
//! let report = coordinator.run(None).unwrap();
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use crate::export::ExportOptions;
use crate::manifest::{BUILD_ID_FILE, PAGES_MANIFEST};
use crate::place::SERVER_PAGES;
use crate::render::BundleRenderer;

pub const TEST_BUILD_ID: &str = "test-build-id";

// =========================================================================
// Fixture
// =========================================================================

pub struct BuildFixture {
    pub tmp: TempDir,
    pub build_dir: PathBuf,
    pub out_dir: PathBuf,
    pub public_dir: PathBuf,
    pages: BTreeMap<String, String>,
}

impl BuildFixture {
    /// A build directory with a build id and an (initially empty) pages
    /// manifest. Add pages before running an export.
    pub fn new() -> Self {
        let fixture = Self::empty();
        fs::create_dir_all(&fixture.build_dir).unwrap();
        fs::write(fixture.build_dir.join(BUILD_ID_FILE), TEST_BUILD_ID).unwrap();
        fixture.write_pages_manifest();
        fixture
    }

    /// A temp layout with no build directory at all, for precondition tests.
    pub fn empty() -> Self {
        let tmp = TempDir::new().unwrap();
        let build_dir = tmp.path().join("build");
        let out_dir = tmp.path().join("out");
        let public_dir = tmp.path().join("public");
        Self {
            tmp,
            build_dir,
            out_dir,
            public_dir,
            pages: BTreeMap::new(),
        }
    }

    /// Register a page with a stock render bundle (html wrapping the page
    /// path, empty page data).
    pub fn add_page(&mut self, page: &str) {
        let bundle = format!(
            r#"{{"html": "<html><body>{page}</body></html>", "pageData": {{}}}}"#
        );
        self.add_page_bundle(page, &bundle);
    }

    /// Register a page with an explicit bundle body.
    pub fn add_page_bundle(&mut self, page: &str, bundle_json: &str) {
        let locator = format!("bundles/{}.json", page_slug(page));
        let path = self.build_dir.join(&locator);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bundle_json).unwrap();

        self.pages.insert(page.to_string(), locator);
        self.write_pages_manifest();
    }

    pub fn write_prerender_manifest(&self, json: &str) {
        fs::write(self.build_dir.join("prerender-manifest.json"), json).unwrap();
    }

    pub fn write_routes_manifest(&self, json: &str) {
        fs::write(self.build_dir.join("routes-manifest.json"), json).unwrap();
    }

    pub fn write_export_marker(&self, json: &str) {
        fs::write(self.build_dir.join("export-marker.json"), json).unwrap();
    }

    /// Place prerendered server output for a route stem, e.g. `"blog/a"`
    /// writes `server/pages/blog/a.html` and `server/pages/blog/a.json`.
    pub fn add_prerendered(&self, stem: &str, html: &str, data_json: &str) {
        let dir = self.build_dir.join(SERVER_PAGES);
        let html_path = dir.join(format!("{stem}.html"));
        fs::create_dir_all(html_path.parent().unwrap()).unwrap();
        fs::write(&html_path, html).unwrap();
        fs::write(dir.join(format!("{stem}.json")), data_json).unwrap();
    }

    pub fn write_public(&self, rel: &str, content: &str) {
        write_under(&self.public_dir, rel, content);
    }

    pub fn write_build_static(&self, rel: &str, content: &str) {
        write_under(&self.build_dir.join("static"), rel, content);
    }

    /// Export options pointing at this fixture, tuned for fast tests.
    pub fn options(&self) -> ExportOptions {
        ExportOptions {
            build_dir: self.build_dir.clone(),
            out_dir: self.out_dir.clone(),
            public_dir: self.public_dir.clone(),
            trailing_slash: false,
            variant_tag: "amp".to_string(),
            pool_size: 2,
            timeout: Duration::from_secs(5),
            max_restarts: 3,
            exclude_api_pages: true,
        }
    }

    /// A production renderer wired to this fixture's pages manifest.
    pub fn bundle_renderer(&self) -> BundleRenderer {
        BundleRenderer::new(&self.build_dir, self.pages.clone())
    }

    fn write_pages_manifest(&self) {
        let json = serde_json::to_string_pretty(&self.pages).unwrap();
        fs::write(self.build_dir.join(PAGES_MANIFEST), json).unwrap();
    }
}

// =========================================================================
// Helpers
// =========================================================================

/// Flat filename-safe slug for a page path: `/blog/[slug]` -> `blog_[slug]`,
/// `/` -> `index`.
fn page_slug(page: &str) -> String {
    let trimmed = page.trim_matches('/');
    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed.replace('/', "_")
    }
}

fn write_under(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}
