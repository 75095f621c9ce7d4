//! # refract
//!
//! Refract videos through a per-frame image transform. Frames are
//! transformed in bounded parallel batches and written back in their
//! original order, with progress reporting and cooperative cancellation.
//!
//! The core is a [`BatchScheduler`] that pulls frames from a
//! [`FrameSource`], runs a [`FrameTransform`] on a fixed pool of workers
//! and forwards the results to a [`VideoSink`]. With the `ffmpeg` feature,
//! [`VideoTransformEngine`] connects it to real video files.
//!
//! ## Quick Start
//!
//! ### Transform a Video File
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use std::sync::Arc;
//!
//! use refract::{TransformConfiguration, TransformKind, TransformOptions, VideoTransformEngine};
//!
//! let engine = VideoTransformEngine::new(TransformOptions::new().with_frame_rate_cap(30.0));
//! let blur = Arc::new(TransformConfiguration::new(TransformKind::Blur { sigma: 3.0 }));
//! engine
//!     .transform_blocking("input.mp4", "blurred.mp4", blur, |_: f32| true)
//!     .unwrap();
//! # }
//! ```
//!
//! ### Bring Your Own Source and Sink
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use refract::{
//!     BatchScheduler, CancellationToken, Frame, FrameSource, RefractError, TransformOptions,
//!     VideoSink,
//! };
//!
//! fn run(source: impl FrameSource, sink: impl VideoSink) -> Result<(), RefractError> {
//!     let token = CancellationToken::new();
//!     let options = TransformOptions::new().with_workers(4).with_cancellation(token);
//!     let rotate = Arc::new(|frame: &Frame| Ok::<_, RefractError>(Frame::new(frame.image().rotate180())));
//!     BatchScheduler::new(source, sink, rotate, &options).run_blocking()
//! }
//! ```
//!
//! ### Transform Still Images
//!
//! [`ImageBatch`] runs a list of transforms over an image or a directory of
//! images and writes `<image>-<transform>.png` for every pair. It needs no
//! native libraries.
//!
//! ## Guarantees
//!
//! - **Order**: frames reach the sink in source order, whatever order the
//!   workers finish in
//! - **Bounded concurrency**: at most `workers` transform calls run at once,
//!   and a batch starts only after the previous one is flushed
//! - **Cancellation at batch boundaries**: a `false` from the progress
//!   handler, or a cancelled [`CancellationToken`], stops the run before the
//!   next batch reaches the sink
//! - **One outcome**: every run reports exactly one result
//! - **Partial failure tolerance**: a failed or panicking transform drops
//!   that one frame and the run continues
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | FFmpeg decoding and encoding, [`VideoTransformEngine`], and the `refract` binary |
//! | `async` | `BatchScheduler::run_async` on Tokio's blocking pool |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! The `ffmpeg` feature needs the FFmpeg development libraries installed on
//! your system.

pub mod configuration;
#[cfg(feature = "ffmpeg")]
pub mod decode;
#[cfg(feature = "ffmpeg")]
pub mod encode;
#[cfg(feature = "ffmpeg")]
pub mod engine;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod images;
pub mod progress;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod transform;
mod utilities;

pub use configuration::{
    DEFAULT_SINK_QUEUE, DEFAULT_WORKERS, FrameOutputOptions, JobFile, PixelFormat,
    TransformOptions,
};
#[cfg(feature = "ffmpeg")]
pub use decode::{FfmpegAudioSource, FfmpegFrameSource, MediaProbe, probe};
#[cfg(feature = "ffmpeg")]
pub use encode::{EncoderSettings, FfmpegVideoSink, VideoCodec};
#[cfg(feature = "ffmpeg")]
pub use engine::VideoTransformEngine;
pub use error::{ErrorKind, RefractError};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use frame::{AudioSample, Frame, StreamInfo, TimeBase};
pub use images::{ImageBatch, ImageBatchReport};
pub use progress::{CancellationToken, ProgressHandler, ProgressInfo};
pub use scheduler::{BatchScheduler, RunState};
pub use sink::{BufferedSink, VideoSink};
pub use source::{AudioSource, FrameSource, IterAudioSource, IterFrameSource, NoAudio};
pub use transform::{FrameTransform, Origin, TransformChain, TransformConfiguration, TransformKind};
pub use utilities::FrameDecimator;
