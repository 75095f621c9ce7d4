//! Frame, audio sample, and stream description types.
//!
//! A [`Frame`] is one decoded image; its position in the stream is implied by
//! arrival order from the [`FrameSource`](crate::FrameSource). An
//! [`AudioSample`] is an opaque unit of compressed audio that travels from
//! the source to the sink untouched.

use image::DynamicImage;

use crate::configuration::PixelFormat;
use crate::error::RefractError;

/// One decoded video frame.
///
/// Frames are immutable once produced: transforms receive a shared reference
/// and return a new frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: DynamicImage,
}

impl Frame {
    /// Wrap a decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Pixel layout, if it is one of the layouts the crate decodes into.
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::of(&self.image)
    }

    /// Borrow the underlying image.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Consume the frame and return the underlying image.
    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

impl From<DynamicImage> for Frame {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// A rational time base (`numerator / denominator` seconds per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    /// Numerator of the time base.
    pub numerator: i32,
    /// Denominator of the time base.
    pub denominator: i32,
}

impl TimeBase {
    /// Create a new time base.
    pub fn new(numerator: i32, denominator: i32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

/// One compressed audio packet passed through from source to sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    /// Encoded payload.
    pub data: Vec<u8>,
    /// Presentation timestamp in `time_base` ticks.
    pub pts: Option<i64>,
    /// Decode timestamp in `time_base` ticks.
    pub dts: Option<i64>,
    /// Duration in `time_base` ticks.
    pub duration: i64,
    /// Time base the timestamps are expressed in.
    pub time_base: TimeBase,
    /// Whether the packet is independently decodable.
    pub is_key: bool,
}

/// Stream metadata a frame source reports once, at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Width of the frames the source yields.
    pub width: u32,
    /// Height of the frames the source yields.
    pub height: u32,
    /// Output frame rate (after any frame-rate cap).
    pub frames_per_second: f64,
    /// Declared number of frames, if known.
    pub frame_count: Option<u64>,
    /// Clockwise display rotation in degrees (0, 90, 180 or 270).
    ///
    /// Frames are stored unrotated; players apply the rotation, so a sink
    /// should carry it into its output.
    pub rotation: u32,
}

impl StreamInfo {
    /// Describe a stream of `width`×`height` frames at `frames_per_second`.
    pub fn new(width: u32, height: u32, frames_per_second: f64) -> Self {
        Self {
            width,
            height,
            frames_per_second,
            frame_count: None,
            rotation: 0,
        }
    }

    /// Set the declared frame count.
    #[must_use]
    pub fn with_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = Some(frame_count);
        self
    }

    /// Set the clockwise display rotation.
    #[must_use]
    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation = degrees;
        self
    }

    /// Check that the description can drive a run.
    ///
    /// # Errors
    ///
    /// Returns [`RefractError::InvalidStreamInfo`] for zero-sized geometry,
    /// a frame rate that is not a positive, finite number, or a rotation
    /// that is not a quarter turn.
    pub fn validate(&self) -> Result<(), RefractError> {
        if self.width == 0 || self.height == 0 {
            return Err(RefractError::InvalidStreamInfo(format!(
                "frame geometry {}x{} is empty",
                self.width, self.height
            )));
        }
        if !self.frames_per_second.is_finite() || self.frames_per_second <= 0.0 {
            return Err(RefractError::InvalidStreamInfo(format!(
                "frame rate {} is not usable",
                self.frames_per_second
            )));
        }
        if self.rotation % 90 != 0 || self.rotation >= 360 {
            return Err(RefractError::InvalidStreamInfo(format!(
                "rotation of {} degrees is not a quarter turn",
                self.rotation
            )));
        }
        Ok(())
    }
}
