//! Run configuration.
//!
//! [`TransformOptions`] is a builder that threads the worker count,
//! cancellation token, frame output settings and sink buffering through the
//! scheduler and the FFmpeg engine without polluting every signature.
//! [`JobFile`] is the JSON form the command-line tool reads.
//!
//! # Example
//!
//! ```
//! use refract::{CancellationToken, PixelFormat, TransformOptions};
//!
//! let token = CancellationToken::new();
//! let options = TransformOptions::new()
//!     .with_workers(8)
//!     .with_cancellation(token.clone())
//!     .with_frame_rate_cap(24.0)
//!     .with_resolution(Some(1280), None)
//!     .with_pixel_format(PixelFormat::Rgba8);
//! assert_eq!(options.workers(), 8);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::Deserialize;

#[cfg(feature = "ffmpeg")]
use ffmpeg_next::format::Pixel;

#[cfg(feature = "ffmpeg")]
use crate::encode::EncoderSettings;
use crate::error::RefractError;
use crate::progress::CancellationToken;
use crate::transform::{TransformChain, TransformConfiguration};

/// Number of frames processed concurrently per batch unless configured.
pub const DEFAULT_WORKERS: usize = 5;

/// Default capacity of the buffered sink queue, in frames.
pub const DEFAULT_SINK_QUEUE: usize = 8;

/// Pixel format of decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit RGB (24 bpp). This is the default.
    #[default]
    Rgb8,
    /// 8-bit RGBA with alpha pre-set to 255 (32 bpp).
    Rgba8,
    /// 8-bit grayscale (8 bpp).
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel in a tightly packed buffer.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    pub(crate) fn of(image: &DynamicImage) -> Option<Self> {
        match image {
            DynamicImage::ImageRgb8(_) => Some(PixelFormat::Rgb8),
            DynamicImage::ImageRgba8(_) => Some(PixelFormat::Rgba8),
            DynamicImage::ImageLuma8(_) => Some(PixelFormat::Gray8),
            _ => None,
        }
    }

    #[cfg(feature = "ffmpeg")]
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            PixelFormat::Rgb8 => Pixel::RGB24,
            PixelFormat::Rgba8 => Pixel::RGBA,
            PixelFormat::Gray8 => Pixel::GRAY8,
        }
    }
}

/// Frame output settings applied by the decoder.
///
/// When no dimensions are set the source resolution is used. Setting one
/// dimension together with
/// [`maintain_aspect_ratio`](FrameOutputOptions::maintain_aspect_ratio)
/// computes the other one from the source aspect ratio.
#[derive(Debug, Clone)]
pub struct FrameOutputOptions {
    /// Decoded pixel format.
    pub pixel_format: PixelFormat,
    /// Target width. `None` keeps the source width.
    pub width: Option<u32>,
    /// Target height. `None` keeps the source height.
    pub height: Option<u32>,
    /// Derive the missing dimension from the source aspect ratio.
    pub maintain_aspect_ratio: bool,
}

impl Default for FrameOutputOptions {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Rgb8,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
        }
    }
}

impl FrameOutputOptions {
    /// Resolve the final output dimensions given the source size.
    ///
    /// Returns `(width, height)`, each at least 1 when derived.
    pub fn resolve_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(width), Some(height)) => (width, height),
            (Some(width), None) if self.maintain_aspect_ratio && source_width > 0 => {
                let ratio = width as f64 / source_width as f64;
                let height = (source_height as f64 * ratio).round() as u32;
                (width, height.max(1))
            }
            (Some(width), None) => (width, source_height),
            (None, Some(height)) if self.maintain_aspect_ratio && source_height > 0 => {
                let ratio = height as f64 / source_height as f64;
                let width = (source_width as f64 * ratio).round() as u32;
                (width.max(1), height)
            }
            (None, Some(height)) => (source_width, height),
            (None, None) => (source_width, source_height),
        }
    }
}

/// Settings for one transform run.
///
/// All fields have defaults: five workers, no cancellation token, source
/// frame rate and resolution, RGB8 frames, and an eight-frame sink queue.
#[derive(Clone)]
pub struct TransformOptions {
    pub(crate) workers: usize,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) frame_rate_cap: Option<f64>,
    pub(crate) frame_output: FrameOutputOptions,
    pub(crate) sink_queue: usize,
    #[cfg(feature = "ffmpeg")]
    pub(crate) encoder: EncoderSettings,
}

impl Debug for TransformOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("TransformOptions")
            .field("workers", &self.workers)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("frame_rate_cap", &self.frame_rate_cap)
            .field("frame_output", &self.frame_output)
            .field("sink_queue", &self.sink_queue)
            .finish_non_exhaustive()
    }
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cancellation: None,
            frame_rate_cap: None,
            frame_output: FrameOutputOptions::default(),
            sink_queue: DEFAULT_SINK_QUEUE,
            #[cfg(feature = "ffmpeg")]
            encoder: EncoderSettings::default(),
        }
    }

    /// Set the batch size, which is also the number of parallel workers.
    ///
    /// A greater number may be faster but holds more decoded frames in
    /// memory. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Attach a cancellation token, observed at every batch boundary.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Cap the output frame rate.
    ///
    /// The resulting frame rate is the lower of the source rate and `cap`;
    /// surplus frames are dropped evenly. Non-positive values are ignored.
    #[must_use]
    pub fn with_frame_rate_cap(mut self, cap: f64) -> Self {
        self.frame_rate_cap = (cap.is_finite() && cap > 0.0).then_some(cap);
        self
    }

    /// Set the decoded pixel format.
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.frame_output.pixel_format = format;
        self
    }

    /// Set a custom render resolution.
    ///
    /// Pass `None` for either dimension to keep the source value, or to
    /// derive it from the aspect ratio.
    #[must_use]
    pub fn with_resolution(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.frame_output.width = width;
        self.frame_output.height = height;
        self
    }

    /// Control whether aspect ratio is preserved when only one dimension is
    /// given. Defaults to `true`.
    #[must_use]
    pub fn with_maintain_aspect_ratio(mut self, maintain: bool) -> Self {
        self.frame_output.maintain_aspect_ratio = maintain;
        self
    }

    /// Set the capacity of the writer-thread queue in front of the sink.
    ///
    /// `0` writes synchronously on the control thread.
    #[must_use]
    pub fn with_sink_queue(mut self, capacity: usize) -> Self {
        self.sink_queue = capacity;
        self
    }

    /// Set the encoder settings used by the FFmpeg sink.
    #[cfg(feature = "ffmpeg")]
    #[must_use]
    pub fn with_encoder(mut self, encoder: EncoderSettings) -> Self {
        self.encoder = encoder;
        self
    }

    /// Number of workers (and frames per batch).
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Frame-rate cap, if any.
    pub fn frame_rate_cap(&self) -> Option<f64> {
        self.frame_rate_cap
    }

    /// Frame output settings.
    pub fn frame_output(&self) -> &FrameOutputOptions {
        &self.frame_output
    }
}

/// A transform job read from JSON.
///
/// The same file drives a video transform (`input` and `output` are video
/// files) or a still-image batch (`input` is an image or a directory and
/// `output` a directory).
///
/// ```
/// use refract::JobFile;
///
/// let job = JobFile::from_json(r#"{
///     "input": "in.mp4",
///     "output": "out.mp4",
///     "workers": 4,
///     "transforms": [
///         { "kind": "blur", "sigma": 1.5 },
///         { "kind": "mirror", "origin": { "x": 0.3, "y": 0.5 } }
///     ]
/// }"#)?;
/// assert_eq!(job.transforms.len(), 2);
/// # Ok::<(), refract::RefractError>(())
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    /// Input video, image or image directory.
    pub input: PathBuf,
    /// Output video or image directory.
    pub output: PathBuf,
    /// Worker count override.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Frame-rate cap override.
    #[serde(default)]
    pub frame_rate_cap: Option<f64>,
    /// Render width override.
    #[serde(default)]
    pub width: Option<u32>,
    /// Render height override.
    #[serde(default)]
    pub height: Option<u32>,
    /// Replace an existing output file.
    #[serde(default)]
    pub overwrite: bool,
    /// Remove the image output directory before writing.
    #[serde(default)]
    pub clear_output_directory: bool,
    /// Transforms applied to every frame, in order.
    pub transforms: Vec<TransformConfiguration>,
}

impl JobFile {
    /// Parse and validate a job from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`RefractError::JsonError`] for malformed JSON and
    /// [`RefractError::InvalidConfiguration`] for values out of range.
    pub fn from_json(json: &str) -> Result<Self, RefractError> {
        let job: JobFile = serde_json::from_str(json)?;
        job.validate()?;
        Ok(job)
    }

    /// Read, parse and validate a job file.
    ///
    /// # Errors
    ///
    /// Returns [`RefractError::IoError`] if the file cannot be read, then
    /// the same errors as [`from_json`](JobFile::from_json).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RefractError> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), RefractError> {
        if self.transforms.is_empty() {
            return Err(RefractError::configuration(
                "job must list at least one transform",
            ));
        }
        if self.workers == Some(0) {
            return Err(RefractError::configuration("workers must be at least 1"));
        }
        if let Some(cap) = self.frame_rate_cap {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(RefractError::configuration(format!(
                    "frame_rate_cap {cap} must be a positive number"
                )));
            }
        }
        for transform in &self.transforms {
            transform.validate()?;
        }
        Ok(())
    }

    /// Apply the job's overrides on top of `options`.
    pub fn apply_to(&self, mut options: TransformOptions) -> TransformOptions {
        if let Some(workers) = self.workers {
            options = options.with_workers(workers);
        }
        if let Some(cap) = self.frame_rate_cap {
            options = options.with_frame_rate_cap(cap);
        }
        if self.width.is_some() || self.height.is_some() {
            options = options.with_resolution(self.width, self.height);
        }
        options
    }

    /// Build the transform chain described by the job.
    pub fn chain(&self) -> TransformChain {
        TransformChain::new(self.transforms.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = TransformOptions::new();
        assert_eq!(options.workers(), DEFAULT_WORKERS);
        assert!(options.frame_rate_cap().is_none());
        let debug = format!("{options:?}");
        assert!(debug.contains("has_cancellation: false"));
    }

    #[test]
    fn workers_clamp_to_one() {
        assert_eq!(TransformOptions::new().with_workers(0).workers(), 1);
    }

    #[test]
    fn frame_rate_cap_ignores_nonsense() {
        assert_eq!(TransformOptions::new().with_frame_rate_cap(-3.0).frame_rate_cap(), None);
        assert_eq!(TransformOptions::new().with_frame_rate_cap(24.0).frame_rate_cap(), Some(24.0));
    }

    #[test]
    fn width_only_keeps_aspect_ratio() {
        let output = FrameOutputOptions {
            width: Some(960),
            ..FrameOutputOptions::default()
        };
        assert_eq!(output.resolve_dimensions(1920, 1080), (960, 540));
    }

    #[test]
    fn height_only_without_aspect_keeps_source_width() {
        let output = FrameOutputOptions {
            height: Some(100),
            maintain_aspect_ratio: false,
            ..FrameOutputOptions::default()
        };
        assert_eq!(output.resolve_dimensions(640, 480), (640, 100));
    }

    #[test]
    fn job_rejects_empty_transform_list() {
        let error = JobFile::from_json(r#"{"input":"a","output":"b","transforms":[]}"#)
            .unwrap_err();
        assert!(error.to_string().contains("at least one transform"));
    }

    #[test]
    fn job_overrides_apply() {
        let job = JobFile::from_json(
            r#"{"input":"a","output":"b","workers":3,"width":320,"transforms":[{"kind":"invert"}]}"#,
        )
        .unwrap();
        let options = job.apply_to(TransformOptions::new());
        assert_eq!(options.workers(), 3);
        assert_eq!(options.frame_output().width, Some(320));
        assert_eq!(options.frame_output().height, None);
    }
}
