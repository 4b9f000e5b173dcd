//! # Static Export
//!
//! A one-shot static-site exporter. Given the manifests produced by an
//! earlier build phase, it renders every exportable page to static artifacts
//! (markup, data payload, optional alternate variant) and places them into a
//! deterministic output directory layout.
//!
//! # Architecture: One Coordinator, Five Phases
//!
//! The export run is a strictly sequenced pipeline driven by
//! [`export::ExportCoordinator`]:
//!
//! ```text
//! Validate → CopyStatic → Dispatch → PlacePrerendered → Finalize
//! ```
//!
//! Only the Dispatch phase is concurrent: a fixed pool of workers renders one
//! task per export path, with a per-task deadline and a bounded restart
//! budget for hung renders. Everything else runs on the coordinating thread.
//!
//! This separation exists for three reasons:
//!
//! - **Deterministic output**: path resolution and deduplication finish before
//!   any worker starts, so no two tasks can ever write the same file.
//! - **Partial-failure aggregation**: a render error on one path never stops
//!   the other paths; failures are collected and reported once, sorted.
//! - **Testability**: each phase is a function over explicit inputs, so unit
//!   tests exercise path mapping, dispatch, and placement in isolation.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`manifest`] | Build-phase input schemas: pages manifest, prerender manifest, markers, detail record |
//! | [`paths`] | Route canonicalization and the path map: which routes get exported, which are excluded |
//! | [`dispatch`] | Fixed-size worker pool with per-task timeout, restart budget, and result aggregation |
//! | [`place`] | Artifact placement: trailing-slash layout rules, data tree, prerendered-route copies |
//! | [`export`] | The coordinator state machine tying the phases together |
//! | [`render`] | The [`render::PageRenderer`] implementation backing production runs |
//! | [`progress`] | Throttled progress reporting across a batch of tasks |
//! | [`config`] | `export.toml` loading, validation, and defaults |
//! | [`output`] | CLI output formatting — pure format functions, print wrappers |
//!
//! # Design Decisions
//!
//! ## Explicit Manifest Deserialization
//!
//! Build inputs are JSON files with known schemas at known paths, parsed with
//! serde. A missing prerender manifest means "the build had no prerendered
//! routes" and is legal; a malformed one is a fatal parse error. There is no
//! dynamic module loading anywhere in the pipeline.
//!
//! ## Bulkhead Dispatch
//!
//! A hung render must not block its siblings. Each render attempt runs on a
//! dedicated thread supervised over a channel with a deadline; on timeout the
//! thread is abandoned and a fresh one retries the same task, up to a bounded
//! number of restarts. Pool slots are never reused mid-task, so a stuck
//! render cannot corrupt the tasks that follow it.
//!
//! ## Report-and-Stop, Not Transactional
//!
//! A failed run leaves already-written files in place and the detail record
//! at `success: false`. External tooling distinguishes "never ran", "ran and
//! failed", and "interrupted" from that record alone; rolling back thousands
//! of files buys nothing over re-running the export.
//!
//! ## Rendering Is a Collaborator
//!
//! The pipeline never renders markup itself. It calls a [`render::PageRenderer`]
//! once per task and consumes the result. Production uses the bundle-file
//! renderer in [`render`]; tests substitute mocks at the same seam.

pub mod config;
pub mod dispatch;
pub mod export;
pub mod manifest;
pub mod output;
pub mod paths;
pub mod place;
pub mod progress;
pub mod render;

#[cfg(test)]
pub(crate) mod test_helpers;
