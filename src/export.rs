//! The export coordinator: one run from validation to the detail record.
//!
//! Phases run strictly in sequence; only Dispatching has internal
//! concurrency:
//!
//! ```text
//! Validating          load manifests, check preconditions
//! CopyingStatic       detail record (success=false), clean output dir,
//!                     passthrough asset copies
//! Dispatching         resolve the path map, render every path on the pool
//! PlacingPrerendered  copy routes a previous build pass already rendered
//! Finalizing          aggregate failures; detail record (success=true)
//! ```
//!
//! Terminal states are final and there is no rollback: a failed run reports
//! every contributing failing path (sorted) and leaves already-written files
//! in place, with the detail record still at `success: false`.

use crate::dispatch::{self, DispatchError, DispatchOptions, RenderSettings, RenderTask};
use crate::manifest::{
    DetailRecord, ExportMarker, ManifestError, PagesManifest, PrerenderManifest, RoutesManifest,
    read_build_id,
};
use crate::paths::{self, PathError, PathMap, Resolution};
use crate::place::{ArtifactPlacer, PlaceError, copy_tree};
use crate::progress::ProgressReporter;
use crate::render::PageRenderer;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Output directory names that collide with source/asset conventions.
const RESERVED_OUT_DIRS: [&str; 2] = ["public", "static"];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no prior build output found at {0} (run the build step first)")]
    MissingBuildOutput(PathBuf),
    #[error("output directory name {0:?} is reserved; pick a different destination")]
    ReservedOutDir(String),
    #[error("the build uses locale routing, which cannot be statically exported")]
    LocaleRouting,
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("path resolution failed: {0}")]
    Paths(#[from] PathError),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("artifact placement failed: {0}")]
    Place(#[from] PlaceError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("export failed for {count} path(s):\n{listing}")]
    FailedPaths { count: usize, listing: String },
}

/// Coordinator phase, surfaced through progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    CopyingStatic,
    Dispatching,
    PlacingPrerendered,
    Finalizing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Validating => "Validating build output",
            Phase::CopyingStatic => "Copying static assets",
            Phase::Dispatching => "Rendering pages",
            Phase::PlacingPrerendered => "Placing prerendered routes",
            Phase::Finalizing => "Finalizing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub build_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Project-level static assets copied verbatim to the output root.
    pub public_dir: PathBuf,
    pub trailing_slash: bool,
    pub variant_tag: String,
    pub pool_size: usize,
    pub timeout: Duration,
    pub max_restarts: u32,
    pub exclude_api_pages: bool,
}

/// Summary of a successful run, for CLI display.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub paths_exported: usize,
    pub not_found: usize,
    pub prerendered_copied: usize,
    pub excluded_dynamic: BTreeSet<String>,
    pub has_api_pages: bool,
    pub duration: Duration,
}

pub struct ExportCoordinator {
    options: ExportOptions,
    renderer: Arc<dyn PageRenderer>,
    reporter: ProgressReporter,
}

impl ExportCoordinator {
    pub fn new(
        options: ExportOptions,
        renderer: Arc<dyn PageRenderer>,
        reporter: ProgressReporter,
    ) -> Self {
        Self {
            options,
            renderer,
            reporter,
        }
    }

    /// Run the full export. The override map, when given, extends or replaces
    /// the default path map before deduplication.
    pub fn run(
        &self,
        override_map: Option<&dyn Fn(PathMap) -> PathMap>,
    ) -> Result<ExportReport, ExportError> {
        let started = Instant::now();
        let opts = &self.options;

        // ---- Validating --------------------------------------------------
        self.reporter.phase(Phase::Validating);

        let pages = match PagesManifest::load(&opts.build_dir) {
            Ok(pages) => pages,
            Err(ManifestError::Missing(_)) => {
                return Err(ExportError::MissingBuildOutput(opts.build_dir.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let build_id = match read_build_id(&opts.build_dir) {
            Ok(id) => id,
            Err(ManifestError::Missing(_)) => {
                return Err(ExportError::MissingBuildOutput(opts.build_dir.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(name) = opts.out_dir.file_name().and_then(|n| n.to_str()) {
            if RESERVED_OUT_DIRS.contains(&name) {
                return Err(ExportError::ReservedOutDir(name.to_string()));
            }
        }
        if RoutesManifest::load(&opts.build_dir)?.i18n.is_some() {
            return Err(ExportError::LocaleRouting);
        }

        let marker = ExportMarker::load(&opts.build_dir)?;
        let trailing_slash = opts.trailing_slash || marker.export_trailing_slash;
        let prerender = PrerenderManifest::load(&opts.build_dir)?;

        // ---- CopyingStatic -----------------------------------------------
        self.reporter.phase(Phase::CopyingStatic);

        DetailRecord::new(&opts.out_dir, false).write(&opts.build_dir)?;

        match fs::remove_dir_all(&opts.out_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&opts.out_dir)?;

        if opts.public_dir.is_dir() {
            copy_tree(&opts.public_dir, &opts.out_dir)?;
        }
        let build_static = opts.build_dir.join("static");
        if build_static.is_dir() {
            copy_tree(&build_static, &opts.out_dir.join("_next/static"))?;
        }

        // ---- Dispatching -------------------------------------------------
        let resolution = paths::resolve(&pages, &prerender, override_map, opts.exclude_api_pages)?;
        self.warn_exclusions(&resolution);

        if resolution.paths.is_empty() {
            // Nothing to render is a completed export, not a failure; the
            // detail record must not read as an interrupted run.
            self.reporter.phase(Phase::Finalizing);
            DetailRecord::new(&opts.out_dir, true).write(&opts.build_dir)?;
            return Ok(ExportReport {
                excluded_dynamic: resolution.excluded_dynamic,
                has_api_pages: resolution.has_api_pages,
                duration: started.elapsed(),
                ..Default::default()
            });
        }

        self.reporter.phase(Phase::Dispatching);

        let settings = Arc::new(RenderSettings {
            build_id: build_id.clone(),
            build_dir: opts.build_dir.clone(),
            trailing_slash,
            variant_tag: opts.variant_tag.clone(),
        });
        let route_pages: BTreeMap<String, String> = resolution
            .paths
            .iter()
            .map(|p| (p.route.clone(), p.page.clone()))
            .collect();
        let tasks: Vec<RenderTask> = resolution
            .paths
            .iter()
            .map(|path| RenderTask {
                path: path.clone(),
                settings: Arc::clone(&settings),
            })
            .collect();

        self.reporter.start_batch(tasks.len());
        let results = dispatch::run(
            Arc::clone(&self.renderer),
            tasks,
            &DispatchOptions {
                pool_size: opts.pool_size,
                timeout: opts.timeout,
                max_restarts: opts.max_restarts,
            },
            &self.reporter,
        )?;

        let placer = ArtifactPlacer::new(&opts.out_dir, &build_id, trailing_slash, &opts.variant_tag);

        let mut failures: BTreeMap<String, String> = BTreeMap::new();
        let mut ledger: BTreeMap<String, crate::render::AlternateValidation> = BTreeMap::new();
        let mut exported = 0;
        let mut not_found = 0;

        for (route, result) in &results {
            if let Some(error) = &result.error {
                failures.insert(route.clone(), error.clone());
                continue;
            }
            let Some(outcome) = &result.outcome else {
                continue;
            };
            if let Some(validation) = &outcome.validation {
                let page = route_pages.get(route).cloned().unwrap_or_else(|| route.clone());
                ledger.insert(page, validation.clone());
            }
            if outcome.not_found {
                not_found += 1;
                continue;
            }
            placer.place_rendered(
                route,
                &outcome.html,
                &outcome.page_data,
                outcome.alternate_html.as_deref(),
            )?;
            exported += 1;
        }

        // ---- PlacingPrerendered ------------------------------------------
        let mut prerendered_copied = 0;
        if !prerender.routes.is_empty() {
            self.reporter.phase(Phase::PlacingPrerendered);
            prerendered_copied = placer.copy_prerendered(&prerender, &opts.build_dir)?;
        }

        // ---- Finalizing --------------------------------------------------
        self.reporter.phase(Phase::Finalizing);

        for (page, validation) in &ledger {
            if validation.has_errors() {
                failures
                    .entry(page.clone())
                    .or_insert_with(|| {
                        format!(
                            "alternate markup validation failed: {}",
                            validation.errors.join("; ")
                        )
                    });
            }
        }

        if !failures.is_empty() {
            let listing = failures
                .iter()
                .map(|(path, message)| format!("  {path}: {message}"))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ExportError::FailedPaths {
                count: failures.len(),
                listing,
            });
        }

        DetailRecord::new(&opts.out_dir, true).write(&opts.build_dir)?;

        Ok(ExportReport {
            paths_exported: exported,
            not_found,
            prerendered_copied,
            excluded_dynamic: resolution.excluded_dynamic,
            has_api_pages: resolution.has_api_pages,
            duration: started.elapsed(),
        })
    }

    fn warn_exclusions(&self, resolution: &Resolution) {
        if resolution.has_api_pages {
            self.reporter.warn(
                "API pages cannot be statically exported and were skipped".to_string(),
            );
        }
        for page in &resolution.excluded_dynamic {
            self.reporter.warn(format!(
                "dynamic page {page} has no export entry and was skipped"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use crate::render::AlternateValidation;
    use crate::render::tests::MockRenderer;
    use crate::test_helpers::BuildFixture;
    use std::sync::mpsc;

    fn coordinator(fixture: &BuildFixture, renderer: Arc<dyn PageRenderer>) -> ExportCoordinator {
        ExportCoordinator::new(fixture.options(), renderer, ProgressReporter::new(None))
    }

    // =========================================================================
    // Full-run success
    // =========================================================================

    #[test]
    fn full_run_exports_all_pages() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        fixture.add_page("/about");
        fixture.add_page("/blog/first");

        let coordinator = coordinator(&fixture, Arc::new(fixture.bundle_renderer()));
        let report = coordinator.run(None).unwrap();

        assert_eq!(report.paths_exported, 3);
        assert!(fixture.out_dir.join("index.html").exists());
        assert!(fixture.out_dir.join("about.html").exists());
        assert!(fixture.out_dir.join("blog/first.html").exists());
        assert!(
            fixture
                .out_dir
                .join("_next/data/test-build-id/about.json")
                .exists()
        );

        let record = DetailRecord::load(&fixture.build_dir).unwrap();
        assert!(record.success);
    }

    #[test]
    fn detail_record_is_pessimistic_until_finalized() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/only");

        let renderer = Arc::new(MockRenderer::failing(&["/only"]));
        let result = coordinator(&fixture, renderer).run(None);

        assert!(result.is_err());
        let record = DetailRecord::load(&fixture.build_dir).unwrap();
        assert!(!record.success);
    }

    #[test]
    fn passthrough_directories_are_copied() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        fixture.write_public("favicon.ico", "icon");
        fixture.write_build_static("chunks/app.js", "js");

        coordinator(&fixture, Arc::new(fixture.bundle_renderer()))
            .run(None)
            .unwrap();

        assert!(fixture.out_dir.join("favicon.ico").exists());
        assert!(fixture.out_dir.join("_next/static/chunks/app.js").exists());
    }

    #[test]
    fn build_marker_forces_trailing_slash_layout() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/about");
        fixture.write_export_marker(r#"{"exportTrailingSlash": true}"#);

        coordinator(&fixture, Arc::new(fixture.bundle_renderer()))
            .run(None)
            .unwrap();

        assert!(fixture.out_dir.join("about/index.html").exists());
        assert!(!fixture.out_dir.join("about.html").exists());
    }

    #[test]
    fn stale_output_is_cleared() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        fs::create_dir_all(&fixture.out_dir).unwrap();
        fs::write(fixture.out_dir.join("stale.html"), "old").unwrap();

        coordinator(&fixture, Arc::new(fixture.bundle_renderer()))
            .run(None)
            .unwrap();

        assert!(!fixture.out_dir.join("stale.html").exists());
        assert!(fixture.out_dir.join("index.html").exists());
    }

    // =========================================================================
    // Zero-path early completion
    // =========================================================================

    #[test]
    fn zero_paths_completes_with_success_record_and_no_dispatch() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/api/only");

        let renderer = Arc::new(MockRenderer::new());
        let report = coordinator(&fixture, renderer.clone()).run(None).unwrap();

        assert_eq!(report.paths_exported, 0);
        assert!(report.has_api_pages);
        assert!(renderer.rendered_routes().is_empty());
        assert!(DetailRecord::load(&fixture.build_dir).unwrap().success);
    }

    // =========================================================================
    // Preconditions
    // =========================================================================

    #[test]
    fn missing_build_output_is_fatal() {
        let fixture = BuildFixture::empty();
        let result = coordinator(&fixture, Arc::new(MockRenderer::new())).run(None);
        assert!(matches!(result, Err(ExportError::MissingBuildOutput(_))));
    }

    #[test]
    fn reserved_out_dir_is_fatal() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        let mut options = fixture.options();
        options.out_dir = fixture.tmp.path().join("public");

        let coordinator = ExportCoordinator::new(
            options,
            Arc::new(MockRenderer::new()),
            ProgressReporter::new(None),
        );
        match coordinator.run(None) {
            Err(ExportError::ReservedOutDir(name)) => assert_eq!(name, "public"),
            other => panic!("expected reserved-out-dir error, got {other:?}"),
        }
    }

    #[test]
    fn locale_routing_is_fatal() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        fixture.write_routes_manifest(r#"{"i18n": {"locales": ["en", "de"]}}"#);

        let result = coordinator(&fixture, Arc::new(MockRenderer::new())).run(None);
        assert!(matches!(result, Err(ExportError::LocaleRouting)));
    }

    #[test]
    fn fallback_page_aborts_before_dispatch() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        fixture.add_page("/blog/[slug]");
        fixture.write_prerender_manifest(
            r#"{"version": 1,
                "dynamicRoutes": {"/blog/[slug]": {"fallback": "/blog/[slug].html"}},
                "routes": {}, "notFoundRoutes": []}"#,
        );

        let renderer = Arc::new(MockRenderer::new());
        let result = coordinator(&fixture, renderer.clone()).run(None);

        assert!(matches!(
            result,
            Err(ExportError::Paths(PathError::FallbackPages { .. }))
        ));
        assert!(renderer.rendered_routes().is_empty());
    }

    // =========================================================================
    // Failure aggregation
    // =========================================================================

    #[test]
    fn render_errors_aggregate_and_list_sorted_paths() {
        let mut fixture = BuildFixture::new();
        for page in ["/", "/z-bad", "/a-bad", "/ok"] {
            fixture.add_page(page);
        }

        let renderer = Arc::new(MockRenderer::failing(&["/z-bad", "/a-bad"]));
        let result = coordinator(&fixture, renderer).run(None);

        match result {
            Err(ExportError::FailedPaths { count, listing }) => {
                assert_eq!(count, 2);
                let a = listing.find("/a-bad").unwrap();
                let z = listing.find("/z-bad").unwrap();
                assert!(a < z, "failing paths must be sorted: {listing}");
            }
            other => panic!("expected aggregated failure, got {other:?}"),
        }

        // Successful siblings were still placed before the run failed.
        assert!(fixture.out_dir.join("ok.html").exists());
    }

    #[test]
    fn single_render_error_names_exactly_that_path() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/bad");
        for i in 0..9 {
            fixture.add_page(&format!("/ok{i}"));
        }

        let renderer = Arc::new(MockRenderer::failing(&["/bad"]));
        match coordinator(&fixture, renderer).run(None) {
            Err(ExportError::FailedPaths { count, listing }) => {
                assert_eq!(count, 1);
                assert!(listing.contains("/bad"));
                assert!(!listing.contains("/ok"));
            }
            other => panic!("expected aggregated failure, got {other:?}"),
        }
    }

    #[test]
    fn validation_errors_fail_the_run_at_finalizing() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/amped");

        let renderer = Arc::new(MockRenderer {
            validation: BTreeMap::from([(
                "/amped".to_string(),
                AlternateValidation {
                    errors: vec!["disallowed script tag".to_string()],
                    warnings: vec![],
                },
            )]),
            ..Default::default()
        });

        match coordinator(&fixture, renderer).run(None) {
            Err(ExportError::FailedPaths { count, listing }) => {
                assert_eq!(count, 1);
                assert!(listing.contains("disallowed script tag"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(!DetailRecord::load(&fixture.build_dir).unwrap().success);
    }

    #[test]
    fn validation_warnings_alone_do_not_fail() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/amped");

        let renderer = Arc::new(MockRenderer {
            validation: BTreeMap::from([(
                "/amped".to_string(),
                AlternateValidation {
                    errors: vec![],
                    warnings: vec!["discouraged attribute".to_string()],
                },
            )]),
            ..Default::default()
        });

        assert!(coordinator(&fixture, renderer).run(None).is_ok());
    }

    // =========================================================================
    // Prerendered placement and not-found handling
    // =========================================================================

    #[test]
    fn prerendered_routes_are_copied_after_dispatch() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        fixture.write_prerender_manifest(
            r#"{"version": 1, "dynamicRoutes": {},
                "routes": {"/blog/a": {"srcRoute": "/blog/[slug]"}},
                "notFoundRoutes": []}"#,
        );
        fixture.add_prerendered("blog/a", "<html>a</html>", r#"{"p": 1}"#);

        let report = coordinator(&fixture, Arc::new(fixture.bundle_renderer()))
            .run(None)
            .unwrap();

        assert_eq!(report.prerendered_copied, 1);
        assert_eq!(
            fs::read_to_string(fixture.out_dir.join("blog/a.html")).unwrap(),
            "<html>a</html>"
        );
    }

    #[test]
    fn not_found_results_place_nothing() {
        let mut fixture = BuildFixture::new();
        fixture.add_page_bundle("/gone", r#"{"html": "", "notFound": true}"#);
        fixture.add_page("/here");

        let report = coordinator(&fixture, Arc::new(fixture.bundle_renderer()))
            .run(None)
            .unwrap();

        assert_eq!(report.paths_exported, 1);
        assert_eq!(report.not_found, 1);
        assert!(!fixture.out_dir.join("gone.html").exists());
        assert!(fixture.out_dir.join("here.html").exists());
    }

    // =========================================================================
    // Progress surface
    // =========================================================================

    #[test]
    fn phases_are_reported_in_order() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");

        let (tx, rx) = mpsc::channel();
        let coordinator = ExportCoordinator::new(
            fixture.options(),
            Arc::new(fixture.bundle_renderer()),
            ProgressReporter::new(Some(tx)),
        );
        coordinator.run(None).unwrap();

        let phases: Vec<Phase> = rx
            .try_iter()
            .filter_map(|e| match e {
                ProgressEvent::Phase(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::Validating,
                Phase::CopyingStatic,
                Phase::Dispatching,
                Phase::Finalizing,
            ]
        );
    }

    #[test]
    fn excluded_dynamic_pages_warn_but_do_not_fail() {
        let mut fixture = BuildFixture::new();
        fixture.add_page("/");
        fixture.add_page("/docs/[id]");
        fixture.write_prerender_manifest(
            r#"{"version": 1,
                "dynamicRoutes": {"/docs/[id]": {"fallback": false}},
                "routes": {}, "notFoundRoutes": []}"#,
        );

        let (tx, rx) = mpsc::channel();
        let coordinator = ExportCoordinator::new(
            fixture.options(),
            Arc::new(fixture.bundle_renderer()),
            ProgressReporter::new(Some(tx)),
        );
        let report = coordinator.run(None).unwrap();

        assert!(report.excluded_dynamic.contains("/docs/[id]"));
        let warned = rx.try_iter().any(
            |e| matches!(e, ProgressEvent::Warning(w) if w.contains("/docs/[id]")),
        );
        assert!(warned);
    }
}
