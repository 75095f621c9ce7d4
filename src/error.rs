//! Error types for the `refract` crate.
//!
//! This module defines [`RefractError`], the unified error type returned by
//! all fallible operations in the crate, and [`ErrorKind`], the coarse
//! classification the scheduler uses to decide whether an error is absorbed
//! (a single failed frame) or terminates the run.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use serde_json::Error as JsonError;
use thiserror::Error;

/// The unified error type for all `refract` operations.
///
/// Every error surfaced through a run's completion callback is one of these.
/// Variants carry enough context to diagnose the problem without additional
/// logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RefractError {
    /// A frame source, audio source, or video sink could not be established.
    #[error("Failed to set up the run: {0}")]
    Construction(String),

    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to the opener.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// The file does not contain an audio stream.
    #[error("No audio stream found in file")]
    NoAudioStream,

    /// The frame source reported geometry or timing that cannot be encoded.
    #[error("Unusable stream description: {0}")]
    InvalidStreamInfo(String),

    /// A frame could not be read or decoded from the source.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// An audio sample could not be read from the source.
    #[error("Failed to read audio: {0}")]
    AudioReadError(String),

    /// The declared frame count disagrees with what the source produced.
    ///
    /// Never fatal: the scheduler logs it once and keeps reporting
    /// best-effort progress.
    #[error("Source declared {declared} frames but produced {actual}")]
    SourceExhaustionMismatch {
        /// Frame count the source declared up front.
        declared: u64,
        /// Frames actually pulled when the mismatch was noticed.
        actual: u64,
    },

    /// A single transform call failed. Absorbed by the batch.
    #[error("Frame transform failed: {0}")]
    TransformFailure(String),

    /// The video sink rejected a frame or audio sample, or failed to finalize.
    #[error("Video sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The video encoder could not be configured or opened.
    #[error("Video encoding error: {0}")]
    VideoEncodeError(String),

    /// The run was cancelled by the progress handler or a
    /// [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// The worker pool could not be created or lost contact with the
    /// control thread.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// A configuration value or job file is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An error originating from the FFmpeg libraries.
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate during frame conversion.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// A job file could not be parsed.
    #[error("JSON error: {0}")]
    JsonError(#[from] JsonError),
}

/// Coarse classification of a [`RefractError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The source or sink could not be established. Reported before any
    /// batch runs.
    ConstructionFailure,
    /// Reading the next frame or audio sample failed mid-run.
    SourceRead,
    /// Declared and actual frame counts disagree. Informational.
    SourceExhaustionMismatch,
    /// A single transform call failed. Absorbed locally.
    TransformFailure,
    /// The sink refused data or could not finalize.
    SinkUnavailable,
    /// The run was cancelled on request.
    Cancelled,
    /// Invalid configuration or job file.
    Configuration,
}

impl RefractError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefractError::Construction(_)
            | RefractError::FileOpen { .. }
            | RefractError::NoVideoStream
            | RefractError::NoAudioStream
            | RefractError::InvalidStreamInfo(_)
            | RefractError::WorkerPool(_) => ErrorKind::ConstructionFailure,
            RefractError::VideoDecodeError(_) | RefractError::AudioReadError(_) => {
                ErrorKind::SourceRead
            }
            RefractError::SourceExhaustionMismatch { .. } => ErrorKind::SourceExhaustionMismatch,
            RefractError::TransformFailure(_) | RefractError::ImageError(_) => {
                ErrorKind::TransformFailure
            }
            RefractError::SinkUnavailable(_)
            | RefractError::VideoEncodeError(_)
            | RefractError::IoError(_) => ErrorKind::SinkUnavailable,
            RefractError::Cancelled => ErrorKind::Cancelled,
            RefractError::InvalidConfiguration(_) | RefractError::JsonError(_) => {
                ErrorKind::Configuration
            }
            #[cfg(feature = "ffmpeg")]
            RefractError::FfmpegError(_) => ErrorKind::SourceRead,
        }
    }

    /// Returns `true` if this error is the distinguished cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RefractError::Cancelled)
    }

    pub(crate) fn sink(message: impl Into<String>) -> Self {
        RefractError::SinkUnavailable(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        RefractError::InvalidConfiguration(message.into())
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for RefractError {
    fn from(error: ffmpeg_next::Error) -> Self {
        RefractError::FfmpegError(error.to_string())
    }
}
