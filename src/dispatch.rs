//! Bounded-concurrency render dispatch with per-task timeout and restart.
//!
//! A fixed pool of `pool_size` workers pulls tasks from a shared queue; each
//! worker owns one task at a time to completion or timeout. There is no
//! priority and no ordering guarantee beyond "every submitted task is
//! eventually attempted"; results land in a route-keyed map, so completion
//! order never matters.
//!
//! ## The Bulkhead
//!
//! Every attempt runs the renderer on a dedicated, named thread and the pool
//! worker supervises it over a channel with a deadline. On timeout the hung
//! thread is abandoned — never joined, never reused — and a fresh thread
//! retries the same task. A stuck render therefore cannot corrupt or delay
//! any task other than its own.
//!
//! Restarts are bounded: once a task exceeds its restart budget the whole
//! run fails, naming the still-hanging path. A deadline of zero disables the
//! timeout and restart mechanism entirely.
//!
//! ## Failure Propagation
//!
//! A rendering error (or panic) on one task is recorded in that task's
//! result and the batch continues; only restart exhaustion aborts the run.
//! The abort is cooperative: workers stop pulling new tasks, and in-flight
//! attempts finish or hit their own deadline.

use crate::paths::ExportPath;
use crate::progress::ProgressReporter;
use crate::render::{PageRenderer, RenderOutcome};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to build worker pool: {0}")]
    Pool(String),
    #[error("failed to spawn render worker: {0}")]
    WorkerSpawn(std::io::Error),
    #[error(
        "rendering of {route} did not finish within {restarts} restarts; \
         aborting the export (raise workers.timeout_ms if renders are expected to be slow)"
    )]
    RestartBudgetExhausted { route: String, restarts: u32 },
}

/// Immutable configuration snapshot threaded into every render call.
///
/// This replaces any process-wide "export mode" flag: a renderer learns
/// everything it needs from the task itself.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub build_id: String,
    pub build_dir: PathBuf,
    pub trailing_slash: bool,
    pub variant_tag: String,
}

/// One unit of dispatch: an export path plus the settings snapshot.
/// Never mutated after creation.
#[derive(Clone)]
pub struct RenderTask {
    pub path: ExportPath,
    pub settings: Arc<RenderSettings>,
}

/// Outcome of one task after all its attempts.
#[derive(Debug)]
pub struct RenderResult {
    pub duration: Duration,
    /// Attempts consumed, including the successful or final failing one.
    pub attempts: u32,
    /// Present iff the render succeeded.
    pub outcome: Option<RenderOutcome>,
    /// Present iff the render failed (error or panic). Timeouts never land
    /// here — exhausting the restart budget is fatal for the whole run.
    pub error: Option<String>,
}

impl RenderResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub pool_size: usize,
    /// Per-attempt deadline. Zero disables the timeout and restarts.
    pub timeout: Duration,
    pub max_restarts: u32,
}

/// What one supervised attempt produced.
enum Attempt {
    Finished(Result<RenderOutcome, String>),
    TimedOut,
}

/// Run every task to completion, failure, or restart exhaustion, and return
/// the route-keyed result map. Blocks until the whole batch is settled.
pub fn run(
    renderer: Arc<dyn PageRenderer>,
    tasks: Vec<RenderTask>,
    options: &DispatchOptions,
    reporter: &ProgressReporter,
) -> Result<BTreeMap<String, RenderResult>, DispatchError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.pool_size.max(1))
        .build()
        .map_err(|e| DispatchError::Pool(e.to_string()))?;

    let queue = Mutex::new(tasks.into_iter().collect::<VecDeque<_>>());
    let results = Mutex::new(BTreeMap::new());
    let fatal: Mutex<Option<DispatchError>> = Mutex::new(None);
    let abort = AtomicBool::new(false);
    let restart_seen = AtomicBool::new(false);

    pool.scope(|s| {
        for slot in 0..options.pool_size.max(1) {
            let renderer = Arc::clone(&renderer);
            let queue = &queue;
            let results = &results;
            let fatal = &fatal;
            let abort = &abort;
            let restart_seen = &restart_seen;

            s.spawn(move |_| {
                loop {
                    if abort.load(Ordering::SeqCst) {
                        break;
                    }
                    let task = match queue.lock().unwrap().pop_front() {
                        Some(task) => task,
                        None => break,
                    };

                    match run_task(
                        &renderer,
                        &task,
                        slot,
                        options,
                        reporter,
                        restart_seen,
                    ) {
                        Ok(result) => {
                            results.lock().unwrap().insert(task.path.route.clone(), result);
                            reporter.tick();
                        }
                        Err(error) => {
                            abort.store(true, Ordering::SeqCst);
                            fatal.lock().unwrap().get_or_insert(error);
                            break;
                        }
                    }
                }
            });
        }
    });

    if let Some(error) = fatal.into_inner().unwrap() {
        return Err(error);
    }
    Ok(results.into_inner().unwrap())
}

/// Attempt one task until it finishes, errors, or exhausts its restarts.
fn run_task(
    renderer: &Arc<dyn PageRenderer>,
    task: &RenderTask,
    slot: usize,
    options: &DispatchOptions,
    reporter: &ProgressReporter,
    restart_seen: &AtomicBool,
) -> Result<RenderResult, DispatchError> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match attempt(renderer, task, slot, attempts, options.timeout)? {
            Attempt::Finished(Ok(outcome)) => {
                return Ok(RenderResult {
                    duration: started.elapsed(),
                    attempts,
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Attempt::Finished(Err(message)) => {
                return Ok(RenderResult {
                    duration: started.elapsed(),
                    attempts,
                    outcome: None,
                    error: Some(message),
                });
            }
            Attempt::TimedOut => {
                let restarts_used = attempts - 1;
                if restarts_used >= options.max_restarts {
                    return Err(DispatchError::RestartBudgetExhausted {
                        route: task.path.route.clone(),
                        restarts: options.max_restarts,
                    });
                }
                if !restart_seen.swap(true, Ordering::SeqCst) {
                    reporter.warn(format!(
                        "Restarted rendering of {} because it exceeded the {}ms deadline. \
                         Raise workers.timeout_ms if renders are expected to be slow.",
                        task.path.route,
                        options.timeout.as_millis()
                    ));
                } else {
                    reporter.warn(format!(
                        "Restarted rendering of {} (restart {} of {})",
                        task.path.route, attempts, options.max_restarts
                    ));
                }
            }
        }
    }
}

/// Run one render attempt on a dedicated thread, supervised with a deadline.
/// On timeout the thread is abandoned, not joined — it may still be wedged
/// inside the renderer.
fn attempt(
    renderer: &Arc<dyn PageRenderer>,
    task: &RenderTask,
    slot: usize,
    attempt_no: u32,
    timeout: Duration,
) -> Result<Attempt, DispatchError> {
    let (tx, rx) = mpsc::channel();
    let renderer = Arc::clone(renderer);
    let task = task.clone();

    thread::Builder::new()
        .name(format!("export-render-{slot}-a{attempt_no}"))
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| renderer.render(&task)));
            let _ = tx.send(result);
        })
        .map_err(DispatchError::WorkerSpawn)?;

    let received = if timeout.is_zero() {
        rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
    } else {
        rx.recv_timeout(timeout)
    };

    Ok(match received {
        Ok(Ok(Ok(outcome))) => Attempt::Finished(Ok(outcome)),
        Ok(Ok(Err(error))) => Attempt::Finished(Err(error.to_string())),
        Ok(Err(panic)) => Attempt::Finished(Err(panic_message(panic))),
        Err(RecvTimeoutError::Timeout) => Attempt::TimedOut,
        Err(RecvTimeoutError::Disconnected) => {
            Attempt::Finished(Err("render worker disconnected".to_string()))
        }
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send + 'static>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
