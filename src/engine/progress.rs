//! Progress reporting and cooperative cancellation for indexing jobs

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Progress callback trait for UI integration
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts
    fn on_start(&self, phase: ProgressPhase, total: i64);

    /// Called during a phase with a non-decreasing position
    fn on_progress(&self, current: i64, total: i64);

    /// Free-form diagnostic from the job (skipped pictures, repairs)
    fn on_message(&self, message: &str);

    /// Called when the job finishes successfully
    fn on_complete(&self, summary: &str);

    /// Called when the job fails
    fn on_error(&self, error: &str);

    /// Called when the job is cancelled
    fn on_cancel(&self);
}

/// Job phases, in execution order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Audio delay pre-pass, counted in bytes
    AudioDelay,
    /// Picture aggregation, counted in bytes
    Indexing,
    /// Keyframe verification, counted in lines
    Verifying,
    /// D2V output, counted in lines
    Writing,
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProgressPhase::AudioDelay => "Calculating audio delays",
            ProgressPhase::Indexing => "Indexing video",
            ProgressPhase::Verifying => "Verifying keyframe locations",
            ProgressPhase::Writing => "Writing index",
        };
        f.write_str(name)
    }
}

/// Job-scoped cancellation flag, polled at loop boundaries
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Wraps a callback and keeps the reported positions monotonic per phase
pub struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    inner: Mutex<TrackerState>,
}

struct TrackerState {
    phase: Option<ProgressPhase>,
    current: i64,
    total: i64,
    last_update: Option<Instant>,
    update_interval: Duration,
}

impl ProgressTracker {
    pub fn new(callback: Arc<dyn ProgressCallback>) -> Self {
        Self {
            callback,
            inner: Mutex::new(TrackerState {
                phase: None,
                current: 0,
                total: 0,
                last_update: None,
                // At most 10 updates per second
                update_interval: Duration::from_millis(100),
            }),
        }
    }

    /// Tracker that reports nothing
    pub fn silent() -> Self {
        Self::new(Arc::new(NoOpProgressCallback))
    }

    pub fn with_update_interval(self, interval: Duration) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.update_interval = interval;
        }
        self
    }

    /// Enter a new phase, resetting the monotonic floor
    pub fn start_phase(&self, phase: ProgressPhase, total: i64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.phase = Some(phase);
            inner.current = 0;
            inner.total = total.max(0);
            inner.last_update = None;
        }
        self.callback.on_start(phase, total.max(0));
    }

    /// Report a position. Regressions are clamped to the last value.
    pub fn update(&self, current: i64, total: i64) {
        let report = match self.inner.lock() {
            Ok(mut inner) => {
                let total = total.max(inner.total);
                let current = current.clamp(inner.current, total.max(inner.current));
                let finished = current >= total;
                let due = inner
                    .last_update
                    .map_or(true, |last| last.elapsed() >= inner.update_interval);

                inner.current = current;
                inner.total = total;

                if due || finished {
                    inner.last_update = Some(Instant::now());
                    Some((current, total))
                } else {
                    None
                }
            }
            Err(_) => None,
        };

        if let Some((current, total)) = report {
            self.callback.on_progress(current, total);
        }
    }

    pub fn message(&self, message: &str) {
        self.callback.on_message(message);
    }

    pub fn complete(&self, summary: &str) {
        self.callback.on_complete(summary);
    }

    pub fn error(&self, error: &str) {
        self.callback.on_error(error);
    }

    pub fn cancel(&self) {
        self.callback.on_cancel();
    }

    pub fn phase(&self) -> Option<ProgressPhase> {
        self.inner.lock().ok().and_then(|inner| inner.phase)
    }

    /// Last reported (current, total)
    pub fn position(&self) -> (i64, i64) {
        self.inner
            .lock()
            .map(|inner| (inner.current, inner.total))
            .unwrap_or((0, 0))
    }
}

fn percent(current: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (current as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Console progress callback for CLI usage. Writes to stderr so the index
/// can go to stdout.
pub struct ConsoleProgressCallback {
    verbose: bool,
}

impl ConsoleProgressCallback {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_start(&self, phase: ProgressPhase, _total: i64) {
        eprintln!("{}...", phase);
    }

    fn on_progress(&self, current: i64, total: i64) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r  {:>5.1}%", percent(current, total));
        if current >= total {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }

    fn on_message(&self, message: &str) {
        if self.verbose {
            eprintln!("  {}", message);
        }
    }

    fn on_complete(&self, summary: &str) {
        eprintln!("Done. {}", summary);
    }

    fn on_error(&self, error: &str) {
        eprintln!("Error: {}", error);
    }

    fn on_cancel(&self) {
        eprintln!("Indexing cancelled");
    }
}

/// JSON progress callback for structured output, one event per line
pub struct JsonProgressCallback {
    output_progress_events: bool,
}

impl JsonProgressCallback {
    pub fn new(output_progress_events: bool) -> Self {
        Self {
            output_progress_events,
        }
    }

    fn emit(&self, event: serde_json::Value) {
        eprintln!("{}", event);
    }
}

impl ProgressCallback for JsonProgressCallback {
    fn on_start(&self, phase: ProgressPhase, total: i64) {
        self.emit(serde_json::json!({
            "event": "start",
            "phase": phase,
            "total": total,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn on_progress(&self, current: i64, total: i64) {
        if self.output_progress_events {
            self.emit(serde_json::json!({
                "event": "progress",
                "current": current,
                "total": total,
                "percent": percent(current, total),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }));
        }
    }

    fn on_message(&self, message: &str) {
        self.emit(serde_json::json!({
            "event": "log",
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn on_complete(&self, summary: &str) {
        self.emit(serde_json::json!({
            "event": "complete",
            "message": summary,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn on_error(&self, error: &str) {
        self.emit(serde_json::json!({
            "event": "error",
            "error": error,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn on_cancel(&self) {
        self.emit(serde_json::json!({
            "event": "cancel",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }
}

/// No-op progress callback for quiet mode
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_start(&self, _phase: ProgressPhase, _total: i64) {}
    fn on_progress(&self, _current: i64, _total: i64) {}
    fn on_message(&self, _message: &str) {}
    fn on_complete(&self, _summary: &str) {}
    fn on_error(&self, _error: &str) {}
    fn on_cancel(&self) {}
}
