//! The bounded-concurrency batch scheduler.
//!
//! [`BatchScheduler`] pulls frames from a [`FrameSource`] in batches of
//! `workers` frames, transforms every frame of a batch in parallel on a
//! dedicated rayon pool, and forwards the results to a [`VideoSink`] in
//! stream order. Batches are never pipelined: batch N is fully flushed to
//! the sink before any frame of batch N + 1 is dispatched.
//!
//! One control thread owns all run state. Workers report through a single
//! completion channel; every report carries the epoch of the batch it
//! belongs to, and reports from any other epoch are discarded.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use image::{DynamicImage, RgbImage};
//! use refract::{
//!     AudioSample, BatchScheduler, Frame, IterFrameSource, RefractError, StreamInfo,
//!     TransformConfiguration, TransformKind, TransformOptions, VideoSink,
//! };
//!
//! #[derive(Default)]
//! struct Collect(Vec<Frame>);
//!
//! impl VideoSink for Collect {
//!     fn append_frame(&mut self, frame: Frame, _: u64) -> Result<(), RefractError> {
//!         self.0.push(frame);
//!         Ok(())
//!     }
//!     fn append_audio(&mut self, _: AudioSample) -> Result<(), RefractError> { Ok(()) }
//!     fn finalize(&mut self) -> Result<(), RefractError> { Ok(()) }
//!     fn cancel(&mut self) {}
//! }
//!
//! let frames = (0..10).map(|_| Frame::new(DynamicImage::ImageRgb8(RgbImage::new(4, 4))));
//! let source = IterFrameSource::new(StreamInfo::new(4, 4, 30.0).with_frame_count(10), frames);
//! let invert = Arc::new(TransformConfiguration::new(TransformKind::Invert));
//!
//! BatchScheduler::new(source, Collect::default(), invert, &TransformOptions::new())
//!     .with_progress(|fraction: f32| {
//!         println!("{:.0}%", fraction * 100.0);
//!         true
//!     })
//!     .run_blocking()?;
//! # Ok::<(), RefractError>(())
//! ```

use std::any::Any;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::configuration::TransformOptions;
use crate::error::RefractError;
use crate::frame::Frame;
use crate::progress::{CancellationToken, ProgressHandler, ProgressInfo, ProgressTracker};
use crate::sink::VideoSink;
use crate::source::{AudioSource, FrameSource, NoAudio};
use crate::transform::FrameTransform;

/// Lifecycle of one run.
///
/// `Running` may move to `Cancelling`, `Finalizing` or `Failed`;
/// `Cancelling` ends in `Cancelled`. `Finalizing` ends in `Completed` or
/// `Failed`, or moves to `Cancelling` when the audio source or the sink
/// reports a cancellation. Transitions happen only at batch boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Batches are being pulled and transformed.
    Running,
    /// Cancellation was requested; resources are being released.
    Cancelling,
    /// Every frame is written; audio and the sink's finalize are running.
    Finalizing,
    /// The output was finalized.
    Completed,
    /// The run stopped on request.
    Cancelled,
    /// The run stopped on an error.
    Failed,
}

impl RunState {
    /// Returns `true` for states a run never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Running, Running | Cancelling | Finalizing | Failed)
                | (Cancelling, Cancelled)
                | (Finalizing, Completed | Cancelling | Failed)
        )
    }
}

/// One worker's report for one batch slot.
pub(crate) struct Completion {
    pub(crate) epoch: u64,
    pub(crate) index: usize,
    pub(crate) result: Result<Frame, RefractError>,
}

/// Gathers the reports of one batch, in slot order.
pub(crate) struct BatchCollector {
    epoch: u64,
    first_ordinal: u64,
    slots: Vec<Option<Frame>>,
    reported: Vec<bool>,
    remaining: usize,
}

impl BatchCollector {
    pub(crate) fn new(epoch: u64, first_ordinal: u64, len: usize) -> Self {
        Self {
            epoch,
            first_ordinal,
            slots: (0..len).map(|_| None).collect(),
            reported: vec![false; len],
            remaining: len,
        }
    }

    /// Record one report. Returns `false` if it was discarded.
    pub(crate) fn accept(&mut self, completion: Completion) -> bool {
        if completion.epoch != self.epoch {
            log::debug!(
                "Discarding stale result for slot {} of epoch {} (current epoch {})",
                completion.index,
                completion.epoch,
                self.epoch
            );
            return false;
        }
        let index = completion.index;
        if self.reported.get(index).copied().unwrap_or(true) {
            log::debug!("Ignoring repeated result for slot {index}");
            return false;
        }
        self.reported[index] = true;
        self.remaining -= 1;

        match completion.result {
            Ok(frame) => self.slots[index] = Some(frame),
            Err(error) => log::warn!(
                "Dropping frame {}: {error}",
                self.first_ordinal + index as u64
            ),
        }
        true
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    pub(crate) fn into_results(self) -> Vec<Option<Frame>> {
        self.slots
    }
}

/// Schedules frames through a transform in bounded parallel batches.
///
/// Built with [`new`](BatchScheduler::new), optionally given an audio
/// source and a progress handler, then consumed by one of
/// [`run`](BatchScheduler::run), [`spawn`](BatchScheduler::spawn),
/// [`run_blocking`](BatchScheduler::run_blocking) or `run_async`. Every
/// way of running reports exactly one outcome.
pub struct BatchScheduler<S, K, A = NoAudio> {
    source: S,
    sink: K,
    audio: A,
    transform: Arc<dyn FrameTransform>,
    progress: Option<Box<dyn ProgressHandler + Send>>,
    workers: usize,
    cancellation: Option<CancellationToken>,
    construction_error: Option<RefractError>,
    epoch: u64,
    state: RunState,
}

impl<S, K> BatchScheduler<S, K>
where
    S: FrameSource,
    K: VideoSink,
{
    /// Set up a run of `source` through `transform` into `sink`.
    ///
    /// Never fails: an unusable stream description is reported through the
    /// run's outcome before any batch runs.
    pub fn new(
        source: S,
        sink: K,
        transform: Arc<dyn FrameTransform>,
        options: &TransformOptions,
    ) -> Self {
        let construction_error = source.info().validate().err();
        Self {
            source,
            sink,
            audio: NoAudio,
            transform,
            progress: None,
            workers: options.workers().max(1),
            cancellation: options.cancellation.clone(),
            construction_error,
            epoch: 0,
            state: RunState::Running,
        }
    }
}

impl<S, K, A> BatchScheduler<S, K, A>
where
    S: FrameSource,
    K: VideoSink,
    A: AudioSource,
{
    /// Attach the audio track passed to the sink after the last frame.
    #[must_use]
    pub fn with_audio<B: AudioSource>(self, audio: B) -> BatchScheduler<S, K, B> {
        BatchScheduler {
            source: self.source,
            sink: self.sink,
            audio,
            transform: self.transform,
            progress: self.progress,
            workers: self.workers,
            cancellation: self.cancellation,
            construction_error: self.construction_error,
            epoch: self.epoch,
            state: self.state,
        }
    }

    /// Report progress to `handler` at every batch boundary.
    ///
    /// The handler returning `false` cancels the run.
    #[must_use]
    pub fn with_progress<P>(mut self, handler: P) -> Self
    where
        P: ProgressHandler + Send + 'static,
    {
        self.progress = Some(Box::new(handler));
        self
    }

    /// Run on the calling thread, then call `completion` with the outcome.
    pub fn run<C>(self, completion: C)
    where
        C: FnOnce(Result<(), RefractError>),
    {
        completion(self.run_blocking());
    }

    /// Run on the calling thread and return the outcome.
    ///
    /// # Errors
    ///
    /// [`RefractError::Cancelled`] when the progress handler or the
    /// cancellation token stopped the run, otherwise the error that
    /// aborted it.
    pub fn run_blocking(mut self) -> Result<(), RefractError> {
        log::info!(
            "Starting run with {} workers ({} frames declared)",
            self.workers,
            self.source
                .info()
                .frame_count
                .map_or_else(|| "no".to_string(), |count| count.to_string())
        );

        let outcome = match self.construction_error.take() {
            Some(error) => Err(error),
            None => self.build_pool().and_then(|pool| self.drive(&pool)),
        };

        match outcome {
            Ok(()) => {
                self.transition(RunState::Completed);
                log::info!("Run completed");
                Ok(())
            }
            Err(RefractError::Cancelled) => {
                self.transition(RunState::Cancelling);
                self.release();
                self.transition(RunState::Cancelled);
                log::warn!("Run cancelled");
                Err(RefractError::Cancelled)
            }
            Err(error) => {
                self.release();
                self.transition(RunState::Failed);
                log::warn!("Run failed: {error}");
                Err(error)
            }
        }
    }

    /// Run on a new control thread and call `completion` there.
    ///
    /// # Errors
    ///
    /// Returns [`RefractError::WorkerPool`] if the thread cannot be spawned;
    /// `completion` is then never called.
    pub fn spawn<C>(self, completion: C) -> Result<JoinHandle<()>, RefractError>
    where
        S: Send + 'static,
        K: Send + 'static,
        A: Send + 'static,
        C: FnOnce(Result<(), RefractError>) + Send + 'static,
    {
        thread::Builder::new()
            .name("refract-control".to_string())
            .spawn(move || self.run(completion))
            .map_err(|error| RefractError::WorkerPool(format!("cannot spawn control thread: {error}")))
    }

    /// Run on Tokio's blocking pool and await the outcome.
    ///
    /// # Errors
    ///
    /// Same as [`run_blocking`](BatchScheduler::run_blocking).
    #[cfg(feature = "async")]
    pub async fn run_async(self) -> Result<(), RefractError>
    where
        S: Send + 'static,
        K: Send + 'static,
        A: Send + 'static,
    {
        tokio::task::spawn_blocking(move || self.run_blocking())
            .await
            .map_err(|error| RefractError::WorkerPool(format!("control task failed: {error}")))?
    }

    fn build_pool(&self) -> Result<ThreadPool, RefractError> {
        ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|index| format!("refract-worker-{index}"))
            .build()
            .map_err(|error| RefractError::WorkerPool(error.to_string()))
    }

    fn drive(&mut self, pool: &ThreadPool) -> Result<(), RefractError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut tracker = ProgressTracker::new(self.source.info().frame_count, self.workers);

        if !self.report(&tracker.snapshot()) {
            return Err(RefractError::Cancelled);
        }

        loop {
            self.transition(RunState::Running);
            if self.cancellation_requested() {
                return Err(RefractError::Cancelled);
            }

            let first_ordinal = tracker.frames_pulled();
            let batch = self.pull_batch(&mut tracker)?;
            let is_final = batch.len() < self.workers;

            if !batch.is_empty() {
                let results = self.dispatch(pool, batch, first_ordinal, &sender, &receiver)?;
                if !self.report(&tracker.snapshot()) {
                    return Err(RefractError::Cancelled);
                }
                for frame in results.into_iter().flatten() {
                    self.sink.append_frame(frame, tracker.frames_written())?;
                    tracker.record_written(1);
                }
                tracker.complete_batch();
                self.epoch += 1;
            }

            if is_final {
                break;
            }
        }

        if let Some(mismatch) = tracker.record_exhausted() {
            log::warn!("{mismatch}");
        }
        if self.cancellation_requested() || !self.report(&tracker.finished()) {
            return Err(RefractError::Cancelled);
        }

        self.transition(RunState::Finalizing);
        let mut samples = 0u64;
        while let Some(sample) = self.audio.next_sample()? {
            self.sink.append_audio(sample)?;
            samples += 1;
        }
        log::debug!(
            "Wrote {} frames and {samples} audio samples, finalizing",
            tracker.frames_written()
        );
        self.sink.finalize()
    }

    fn pull_batch(&mut self, tracker: &mut ProgressTracker) -> Result<Vec<Frame>, RefractError> {
        let mut batch = Vec::with_capacity(self.workers);
        while batch.len() < self.workers {
            let Some(frame) = self.source.next_frame()? else {
                break;
            };
            batch.push(frame);
            if let Some(mismatch) = tracker.record_pulled(1) {
                log::warn!("{mismatch}");
            }
        }
        Ok(batch)
    }

    fn dispatch(
        &self,
        pool: &ThreadPool,
        batch: Vec<Frame>,
        first_ordinal: u64,
        sender: &Sender<Completion>,
        receiver: &Receiver<Completion>,
    ) -> Result<Vec<Option<Frame>>, RefractError> {
        let epoch = self.epoch;
        let mut collector = BatchCollector::new(epoch, first_ordinal, batch.len());

        for (index, frame) in batch.into_iter().enumerate() {
            let transform = Arc::clone(&self.transform);
            let sender = sender.clone();
            pool.spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| transform.apply(&frame)))
                    .unwrap_or_else(|payload| {
                        Err(RefractError::TransformFailure(panic_message(payload.as_ref())))
                    });
                // The receiver outlives every batch of the run.
                let _ = sender.send(Completion {
                    epoch,
                    index,
                    result,
                });
            });
        }

        while !collector.is_complete() {
            let completion = receiver
                .recv()
                .map_err(|_| RefractError::WorkerPool("workers disconnected".to_string()))?;
            collector.accept(completion);
        }
        Ok(collector.into_results())
    }

    fn report(&mut self, info: &ProgressInfo) -> bool {
        log::debug!(
            "Progress {:.3} ({} of {:?} batches)",
            info.fraction,
            info.completed_batches,
            info.total_batches
        );
        self.progress
            .as_mut()
            .is_none_or(|handler| handler.on_progress(info))
    }

    fn cancellation_requested(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn release(&mut self) {
        self.source.cancel();
        self.audio.cancel();
        self.sink.cancel();
        // Anything still in flight now belongs to a dead epoch.
        self.epoch += 1;
    }

    fn transition(&mut self, next: RunState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal run state transition {:?} -> {next:?}",
            self.state
        );
        log::debug!("Run state {:?} -> {next:?}", self.state);
        self.state = next;
    }
}

impl<S, K, A> Debug for BatchScheduler<S, K, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BatchScheduler")
            .field("workers", &self.workers)
            .field("epoch", &self.epoch)
            .field("state", &self.state)
            .field("has_progress", &self.progress.is_some())
            .field("has_cancellation", &self.cancellation.is_some())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("transform panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("transform panicked: {message}")
    } else {
        "transform panicked".to_string()
    }
}
