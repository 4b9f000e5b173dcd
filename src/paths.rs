//! Route canonicalization and export path resolution.
//!
//! The path map is the single source of truth for what gets exported. It is
//! fully resolved and deduplicated before any worker starts, which is what
//! guarantees that no two render tasks can ever write the same output file.
//!
//! ## Resolution Rules
//!
//! Applied in order over the pages manifest:
//!
//! 1. Framework-internal pseudo-pages (`/_app`, `/_document`, `/_error`) are
//!    dropped. `/_error` is re-registered as the canonical not-found path
//!    `/404.html` unless the override map already defines one.
//! 2. API routes (`/api` and anything under `/api/`) are dropped; the fact
//!    that at least one existed is recorded and surfaced later as a warning.
//! 3. Dynamic pages from the prerender manifest are dropped unless the
//!    override map explicitly re-introduces them — without a server there is
//!    no generic way to render `/blog/[slug]`.
//! 4. The caller's override map is applied to the default map; its entries
//!    take precedence and may re-introduce an excluded dynamic page with
//!    concrete query parameters.
//! 5. Entries are deduplicated by canonical route form (first entry wins).
//!
//! Before any of this, every dynamic-route entry that allows a runtime
//! fallback is a fatal condition: fallback rendering has no server to satisfy
//! it at export time, whether or not an override re-introduces the page.

use crate::manifest::{PagesManifest, PrerenderManifest};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Framework pseudo-pages that never export as themselves.
const INTERNAL_PAGES: [&str; 3] = ["/_app", "/_document", "/_error"];

/// Route the generic error shell re-registers as.
const NOT_FOUND_ROUTE: &str = "/404.html";
const NOT_FOUND_ALIAS: &str = "/404";
const ERROR_PAGE: &str = "/_error";

#[derive(Error, Debug)]
pub enum PathError {
    #[error(
        "found pages with a runtime fallback, which cannot be statically exported: {}",
        .pages.join(", ")
    )]
    FallbackPages { pages: Vec<String> },
}

/// A canonical route plus the logical page it maps to and an optional query
/// parameter mapping. Immutable once resolution completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPath {
    pub route: String,
    pub page: String,
    pub query: BTreeMap<String, String>,
}

impl ExportPath {
    pub fn new(route: &str, page: &str) -> Self {
        Self {
            route: canon(route),
            page: page.to_string(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_query(route: &str, page: &str, query: BTreeMap<String, String>) -> Self {
        Self {
            route: canon(route),
            page: page.to_string(),
            query,
        }
    }
}

/// Canonicalize a route string. Idempotent: `canon(canon(x)) == canon(x)`.
///
/// - guarantees a single leading `/` and no trailing slash (except root)
/// - collapses duplicate slashes
/// - normalizes the index form: `/index` → `/`, `/foo/index` → `/foo`
/// - empty or whitespace input becomes the root `/`
pub fn canon(route: &str) -> String {
    let mut segments: Vec<&str> = route
        .trim()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    while segments.last() == Some(&"index") {
        segments.pop();
    }

    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

/// The ordered route → entry mapping handed to the override map.
///
/// Insertion replaces an existing entry with the same canonical route
/// (override entries take precedence over defaults) and otherwise appends,
/// preserving order for deterministic output.
#[derive(Debug, Clone, Default)]
pub struct PathMap {
    entries: Vec<ExportPath>,
}

impl PathMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any existing entry for the same canonical
    /// route.
    pub fn insert(&mut self, path: ExportPath) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.route == path.route) {
            *existing = path;
        } else {
            self.entries.push(path);
        }
    }

    pub fn remove(&mut self, route: &str) -> Option<ExportPath> {
        let target = canon(route);
        let idx = self.entries.iter().position(|e| e.route == target)?;
        Some(self.entries.remove(idx))
    }

    pub fn contains_route(&self, route: &str) -> bool {
        let target = canon(route);
        self.entries.iter().any(|e| e.route == target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExportPath> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of path resolution.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Final, deduplicated export paths in deterministic order.
    pub paths: Vec<ExportPath>,
    /// Dynamic pages dropped because no override re-introduced them.
    pub excluded_dynamic: BTreeSet<String>,
    /// Whether any API route was dropped (surfaced as a warning, not an error).
    pub has_api_pages: bool,
}

/// Derive the final set of export paths from the build manifests and an
/// optional caller-supplied override map.
pub fn resolve(
    pages: &PagesManifest,
    prerender: &PrerenderManifest,
    override_map: Option<&dyn Fn(PathMap) -> PathMap>,
    exclude_api: bool,
) -> Result<Resolution, PathError> {
    let fallback_pages: Vec<String> = pages
        .0
        .keys()
        .filter_map(|page| prerender.dynamic_routes.get(page).map(|d| (page, d)))
        .filter(|(_, d)| d.allows_runtime_render())
        .map(|(page, _)| page.clone())
        .collect();
    if !fallback_pages.is_empty() {
        return Err(PathError::FallbackPages {
            pages: fallback_pages,
        });
    }

    let mut map = PathMap::new();
    let mut excluded_dynamic = BTreeSet::new();
    let mut has_api_pages = false;
    let mut saw_error_page = false;

    for page in pages.0.keys() {
        if INTERNAL_PAGES.contains(&page.as_str()) {
            if page == ERROR_PAGE {
                saw_error_page = true;
            }
            continue;
        }
        if exclude_api && (page == "/api" || page.starts_with("/api/")) {
            has_api_pages = true;
            continue;
        }
        if prerender.is_dynamic(page) {
            excluded_dynamic.insert(page.clone());
            continue;
        }
        map.insert(ExportPath::new(page, page));
    }

    if let Some(extend) = override_map {
        map = extend(map);
    }

    // An override entry that re-introduces a dynamic page is no longer excluded.
    for path in map.iter() {
        excluded_dynamic.remove(&path.page);
    }

    // The error shell becomes the canonical not-found path unless the
    // override map already claimed it.
    if saw_error_page && !map.contains_route(NOT_FOUND_ROUTE) && !map.contains_route(NOT_FOUND_ALIAS)
    {
        map.insert(ExportPath::new(NOT_FOUND_ROUTE, ERROR_PAGE));
    }

    // Dedup by canonical route, first entry wins.
    let mut seen = BTreeSet::new();
    let mut paths = Vec::with_capacity(map.len());
    for path in map.entries {
        if seen.insert(path.route.clone()) {
            paths.push(path);
        }
    }

    Ok(Resolution {
        paths,
        excluded_dynamic,
        has_api_pages,
    })
}
