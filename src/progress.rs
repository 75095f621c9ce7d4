//! Progress reporting and cancellation support.
//!
//! The scheduler reports progress once per batch boundary through a
//! [`ProgressHandler`]. Returning `false` from the handler requests
//! cancellation; a [`CancellationToken`] does the same from any other thread.
//! Both take effect at the next batch boundary, never mid-batch.
//!
//! # Example
//!
//! ```
//! use refract::{ProgressHandler, ProgressInfo};
//!
//! // Any `FnMut(f32) -> bool` closure is a handler.
//! let mut stop_halfway = |fraction: f32| fraction < 0.5;
//! assert!(stop_halfway.on_progress(&ProgressInfo::at(0.25)));
//!
//! // Structs can observe the full snapshot.
//! struct PrintProgress;
//!
//! impl ProgressHandler for PrintProgress {
//!     fn on_progress(&mut self, info: &ProgressInfo) -> bool {
//!         println!("{:.0}% ({} frames written)", info.fraction * 100.0, info.frames_written);
//!         true
//!     }
//! }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use crate::error::RefractError;

/// A snapshot of run progress, delivered at each batch boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// Completed share of the run in `[0, 1]`, non-decreasing.
    pub fraction: f32,
    /// Batches fully flushed to the sink.
    pub completed_batches: u64,
    /// Expected batch count, if the source declared a frame count.
    pub total_batches: Option<u64>,
    /// Frames handed to the sink so far.
    pub frames_written: u64,
    /// Wall-clock time since the run started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on batch throughput.
    pub estimated_remaining: Option<Duration>,
}

impl ProgressInfo {
    /// A bare snapshot at `fraction`, with every counter zeroed.
    pub fn at(fraction: f32) -> Self {
        Self {
            fraction,
            completed_batches: 0,
            total_batches: None,
            frames_written: 0,
            elapsed: Duration::ZERO,
            estimated_remaining: None,
        }
    }
}

/// Receives progress at batch boundaries and decides whether to continue.
///
/// Handlers run on the scheduler's control thread.
pub trait ProgressHandler {
    /// Called once per batch boundary. Return `false` to cancel the run.
    fn on_progress(&mut self, info: &ProgressInfo) -> bool;
}

impl<F> ProgressHandler for F
where
    F: FnMut(f32) -> bool,
{
    fn on_progress(&mut self, info: &ProgressInfo) -> bool {
        self(info.fraction)
    }
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to request
/// cancellation. The scheduler checks
/// [`is_cancelled`](CancellationToken::is_cancelled) at every batch boundary.
///
/// ```
/// use refract::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.clone().cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch accounting behind the progress fraction.
pub(crate) struct ProgressTracker {
    declared_frames: Option<u64>,
    total_batches: Option<u64>,
    completed_batches: u64,
    frames_pulled: u64,
    frames_written: u64,
    start_time: Instant,
    high_water: f32,
    mismatch_reported: bool,
}

impl ProgressTracker {
    pub(crate) fn new(declared_frames: Option<u64>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1) as u64;
        let total_batches = declared_frames
            .filter(|&frames| frames > 0)
            .map(|frames| frames.div_ceil(batch_size));
        Self {
            declared_frames,
            total_batches,
            completed_batches: 0,
            frames_pulled: 0,
            frames_written: 0,
            start_time: Instant::now(),
            high_water: 0.0,
            mismatch_reported: false,
        }
    }

    /// Record frames pulled from the source.
    ///
    /// Returns the mismatch the first time the source overruns its declared
    /// count.
    pub(crate) fn record_pulled(&mut self, frames: usize) -> Option<RefractError> {
        self.frames_pulled += frames as u64;
        match self.declared_frames {
            Some(declared) if self.frames_pulled > declared => self.mismatch(declared),
            _ => None,
        }
    }

    /// Record the end of the stream.
    ///
    /// Returns the mismatch if the source stopped short of its declared
    /// count and no mismatch has been reported yet.
    pub(crate) fn record_exhausted(&mut self) -> Option<RefractError> {
        match self.declared_frames {
            Some(declared) if self.frames_pulled < declared => self.mismatch(declared),
            _ => None,
        }
    }

    pub(crate) fn record_written(&mut self, frames: u64) {
        self.frames_written += frames;
    }

    pub(crate) fn complete_batch(&mut self) {
        self.completed_batches += 1;
    }

    pub(crate) fn frames_pulled(&self) -> u64 {
        self.frames_pulled
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Snapshot at the current batch boundary.
    pub(crate) fn snapshot(&mut self) -> ProgressInfo {
        let fraction = match self.total_batches {
            Some(total) => (self.completed_batches as f32 / total as f32).min(1.0),
            None => 0.0,
        };
        self.info_at(fraction)
    }

    /// Snapshot reporting the whole stream as done.
    pub(crate) fn finished(&mut self) -> ProgressInfo {
        self.info_at(1.0)
    }

    fn info_at(&mut self, fraction: f32) -> ProgressInfo {
        self.high_water = self.high_water.max(fraction);
        let elapsed = self.start_time.elapsed();

        let estimated_remaining = match self.total_batches {
            Some(total) if self.completed_batches > 0 => {
                let remaining = total.saturating_sub(self.completed_batches);
                let per_batch = elapsed.div_f64(self.completed_batches as f64);
                Some(per_batch.mul_f64(remaining as f64))
            }
            _ => None,
        };

        ProgressInfo {
            fraction: self.high_water,
            completed_batches: self.completed_batches,
            total_batches: self.total_batches,
            frames_written: self.frames_written,
            elapsed,
            estimated_remaining,
        }
    }

    fn mismatch(&mut self, declared: u64) -> Option<RefractError> {
        if self.mismatch_reported {
            return None;
        }
        self.mismatch_reported = true;
        Some(RefractError::SourceExhaustionMismatch {
            declared,
            actual: self.frames_pulled,
        })
    }
}
