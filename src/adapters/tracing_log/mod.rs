// Tracing log adapter - Job progress reported through the tracing subscriber

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, error, info, warn};

use crate::engine::progress::{ProgressCallback, ProgressPhase};

/// Progress callback that turns job events into log records
///
/// Percentages are logged at debug level in steps of `step_percent`; phase
/// changes and job messages at info.
pub struct TracingProgressCallback {
    step_percent: i64,
    last_logged: AtomicI64,
}

impl TracingProgressCallback {
    pub fn new() -> Self {
        Self::with_step(10)
    }

    pub fn with_step(step_percent: i64) -> Self {
        Self {
            step_percent: step_percent.clamp(1, 100),
            last_logged: AtomicI64::new(-1),
        }
    }
}

impl Default for TracingProgressCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCallback for TracingProgressCallback {
    fn on_start(&self, phase: ProgressPhase, total: i64) {
        self.last_logged.store(-1, Ordering::Relaxed);
        info!(%phase, total, "Phase started");
    }

    fn on_progress(&self, current: i64, total: i64) {
        if total <= 0 {
            return;
        }
        let percent = (current.saturating_mul(100) / total).clamp(0, 100);
        let bucket = percent / self.step_percent * self.step_percent;
        if self.last_logged.swap(bucket, Ordering::Relaxed) != bucket {
            debug!(current, total, "{}%", bucket);
        }
    }

    fn on_message(&self, message: &str) {
        info!("{}", message.trim_end());
    }

    fn on_complete(&self, summary: &str) {
        info!("{}", summary.trim_end());
    }

    fn on_error(&self, error: &str) {
        error!("{}", error);
    }

    fn on_cancel(&self) {
        warn!("Indexing cancelled");
    }
}
