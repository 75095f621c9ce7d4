//! File-to-file video transform.
//!
//! [`VideoTransformEngine`] wires an [`FfmpegFrameSource`], an
//! [`FfmpegAudioSource`] and an [`FfmpegVideoSink`] behind a
//! [`BufferedSink`] to a [`BatchScheduler`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use refract::{TransformConfiguration, TransformKind, TransformOptions, VideoTransformEngine};
//!
//! let engine = VideoTransformEngine::new(TransformOptions::new().with_workers(8));
//! let grayscale = Arc::new(TransformConfiguration::new(TransformKind::Grayscale));
//!
//! let handle = engine.transform(
//!     "input.mp4",
//!     "output.mp4",
//!     grayscale,
//!     |fraction: f32| {
//!         println!("{:.0}%", fraction * 100.0);
//!         true
//!     },
//!     |outcome| match outcome {
//!         Ok(()) => println!("done"),
//!         Err(error) if error.is_cancelled() => println!("cancelled"),
//!         Err(error) => eprintln!("failed: {error}"),
//!     },
//! )?;
//! handle.join().ok();
//! # Ok::<(), refract::RefractError>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::configuration::TransformOptions;
use crate::decode::{FfmpegAudioSource, FfmpegFrameSource};
use crate::encode::FfmpegVideoSink;
use crate::error::RefractError;
use crate::progress::ProgressHandler;
use crate::scheduler::BatchScheduler;
use crate::sink::{BufferedSink, VideoSink};
use crate::source::FrameSource;
use crate::transform::FrameTransform;

/// Transforms video files frame by frame.
#[derive(Debug, Clone, Default)]
pub struct VideoTransformEngine {
    options: TransformOptions,
}

impl VideoTransformEngine {
    /// Create an engine running with `options`.
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    /// The options every run uses.
    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// Transform `input` into `output` on a background thread.
    ///
    /// `progress` is called at every batch boundary; returning `false`
    /// cancels the run and removes the partial output. `completion` runs
    /// exactly once on the background thread, also when the files cannot
    /// be opened.
    ///
    /// # Errors
    ///
    /// Returns [`RefractError::WorkerPool`] only if the background thread
    /// cannot be spawned.
    pub fn transform<P, Q, H, C>(
        &self,
        input: P,
        output: Q,
        transform: Arc<dyn FrameTransform>,
        progress: H,
        completion: C,
    ) -> Result<JoinHandle<()>, RefractError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        H: ProgressHandler + Send + 'static,
        C: FnOnce(Result<(), RefractError>) + Send + 'static,
    {
        let input = input.as_ref().to_path_buf();
        let output = output.as_ref().to_path_buf();
        let options = self.options.clone();

        thread::Builder::new()
            .name("refract-engine".to_string())
            .spawn(move || completion(run_file(input, output, transform, progress, &options)))
            .map_err(|error| RefractError::WorkerPool(format!("cannot spawn engine thread: {error}")))
    }

    /// Transform `input` into `output` on the calling thread.
    ///
    /// # Errors
    ///
    /// [`RefractError::Cancelled`] when `progress` or the cancellation token
    /// stopped the run, otherwise the error that aborted it.
    pub fn transform_blocking<P, Q, H>(
        &self,
        input: P,
        output: Q,
        transform: Arc<dyn FrameTransform>,
        progress: H,
    ) -> Result<(), RefractError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        H: ProgressHandler + Send + 'static,
    {
        run_file(
            input.as_ref().to_path_buf(),
            output.as_ref().to_path_buf(),
            transform,
            progress,
            &self.options,
        )
    }
}

fn run_file<H>(
    input: PathBuf,
    output: PathBuf,
    transform: Arc<dyn FrameTransform>,
    progress: H,
    options: &TransformOptions,
) -> Result<(), RefractError>
where
    H: ProgressHandler + Send + 'static,
{
    let source = FfmpegFrameSource::open(&input, options)?;

    let audio = match FfmpegAudioSource::open(&input) {
        Ok(audio) => Some(audio),
        Err(RefractError::NoAudioStream) => {
            log::info!("Media has no audio track");
            None
        }
        Err(error) => return Err(error),
    };

    let info = source.info().clone();
    let settings = options.encoder.clone();
    let audio_input = audio.as_ref().map(|_| input.clone());

    let sink: Box<dyn VideoSink> = if options.sink_queue == 0 {
        Box::new(FfmpegVideoSink::create(
            &output,
            &info,
            &settings,
            audio_input.as_deref(),
        )?)
    } else {
        Box::new(BufferedSink::spawn_with(options.sink_queue, move || {
            FfmpegVideoSink::create(&output, &info, &settings, audio_input.as_deref())
        })?)
    };

    let scheduler = BatchScheduler::new(source, sink, transform, options).with_progress(progress);
    match audio {
        Some(audio) => scheduler.with_audio(audio).run_blocking(),
        None => scheduler.run_blocking(),
    }
}
