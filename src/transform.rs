//! The per-frame transform boundary and the built-in transforms.
//!
//! Anything implementing [`FrameTransform`] can be handed to the scheduler,
//! including plain closures. The built-in transforms are stateless image
//! operations selected by [`TransformKind`] and parameterised by a
//! [`TransformConfiguration`], which is also the JSON form used in job
//! files.
//!
//! # Example
//!
//! ```
//! use image::{DynamicImage, RgbImage};
//! use refract::{Frame, FrameTransform, TransformConfiguration, TransformKind};
//!
//! let blur = TransformConfiguration::new(TransformKind::Blur { sigma: 2.0 });
//! assert_eq!(blur.name(), "blur-2.00");
//!
//! let frame = Frame::new(DynamicImage::ImageRgb8(RgbImage::new(8, 8)));
//! let blurred = blur.apply(&frame)?;
//! assert_eq!(blurred.width(), 8);
//! # Ok::<(), refract::RefractError>(())
//! ```

use image::{DynamicImage, GenericImage, GenericImageView};
use serde::Deserialize;

use crate::configuration::PixelFormat;
use crate::error::RefractError;
use crate::frame::Frame;

/// A deterministic, possibly failing operation applied to one frame.
///
/// Implementations are called from several worker threads at once, so they
/// hold only read-only configuration.
pub trait FrameTransform: Send + Sync {
    /// Transform `frame` into a new frame.
    ///
    /// # Errors
    ///
    /// A failure drops this frame from the output; the run continues.
    fn apply(&self, frame: &Frame) -> Result<Frame, RefractError>;
}

impl<F> FrameTransform for F
where
    F: Fn(&Frame) -> Result<Frame, RefractError> + Send + Sync,
{
    fn apply(&self, frame: &Frame) -> Result<Frame, RefractError> {
        self(frame)
    }
}

/// A normalised point in the frame: `(0, 0)` is the top-left corner and
/// `(1, 1)` the bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Origin {
    /// Horizontal position in `[0, 1]`.
    pub x: f32,
    /// Vertical position in `[0, 1]`.
    pub y: f32,
}

impl Origin {
    /// Create an origin from normalised coordinates.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn validate(&self) -> Result<(), RefractError> {
        let in_range = |value: f32| (0.0..=1.0).contains(&value);
        if in_range(self.x) && in_range(self.y) {
            Ok(())
        } else {
            Err(RefractError::configuration(format!(
                "origin ({}, {}) must lie within [0, 1]",
                self.x, self.y
            )))
        }
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

/// The built-in transforms.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformKind {
    /// Desaturate, keeping the frame's pixel format.
    Grayscale,
    /// Invert every colour channel.
    Invert,
    /// Mirror left to right.
    FlipHorizontal,
    /// Mirror top to bottom.
    FlipVertical,
    /// Rotate by half a turn.
    Rotate180,
    /// Gaussian blur.
    Blur {
        /// Standard deviation in pixels. Must be positive.
        sigma: f32,
    },
    /// Add `amount` to every channel, saturating.
    Brighten {
        /// Signed brightness offset.
        amount: i32,
    },
    /// Reflect the part of the frame left of the origin onto the right.
    Mirror,
}

impl TransformKind {
    /// Whether this kind reads [`TransformConfiguration::origin`].
    pub fn uses_origin(&self) -> bool {
        matches!(self, TransformKind::Mirror)
    }

    fn label(&self) -> &'static str {
        match self {
            TransformKind::Grayscale => "grayscale",
            TransformKind::Invert => "invert",
            TransformKind::FlipHorizontal => "flip-horizontal",
            TransformKind::FlipVertical => "flip-vertical",
            TransformKind::Rotate180 => "rotate-180",
            TransformKind::Blur { .. } => "blur",
            TransformKind::Brighten { .. } => "brighten",
            TransformKind::Mirror => "mirror",
        }
    }
}

/// One configured transform.
///
/// In JSON the kind and its parameters sit next to the optional `origin`
/// and `name`:
///
/// ```json
/// { "kind": "mirror", "origin": { "x": 0.25, "y": 0.5 }, "name": "left-quarter" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformConfiguration {
    /// Which transform to run, with its parameters.
    #[serde(flatten)]
    pub kind: TransformKind,
    /// Reference point for kinds that [use one](TransformKind::uses_origin).
    /// Defaults to the frame centre.
    #[serde(default)]
    pub origin: Option<Origin>,
    /// Display name. Derived from the kind when absent.
    #[serde(default)]
    pub name: Option<String>,
}

impl TransformConfiguration {
    /// Configure `kind` with the default origin and a derived name.
    pub fn new(kind: TransformKind) -> Self {
        Self {
            kind,
            origin: None,
            name: None,
        }
    }

    /// Set the reference point.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The effective origin.
    pub fn origin(&self) -> Origin {
        self.origin.unwrap_or_default()
    }

    /// The display name, e.g. `blur-2.00` or `mirror-(0.50, 0.50)`.
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let label = self.kind.label();
        match &self.kind {
            TransformKind::Blur { sigma } => format!("{label}-{sigma:.2}"),
            TransformKind::Brighten { amount } => format!("{label}-{amount}"),
            kind if kind.uses_origin() => {
                let origin = self.origin();
                format!("{label}-({:.2}, {:.2})", origin.x, origin.y)
            }
            _ => label.to_string(),
        }
    }

    /// Check parameters before a run starts.
    ///
    /// # Errors
    ///
    /// Returns [`RefractError::InvalidConfiguration`] for a non-positive blur
    /// sigma, an origin outside `[0, 1]`, or an origin given to a kind that
    /// does not use one.
    pub fn validate(&self) -> Result<(), RefractError> {
        if let TransformKind::Blur { sigma } = self.kind {
            if !sigma.is_finite() || sigma <= 0.0 {
                return Err(RefractError::configuration(format!(
                    "blur sigma {sigma} must be positive"
                )));
            }
        }
        if let Some(origin) = &self.origin {
            if !self.kind.uses_origin() {
                return Err(RefractError::configuration(format!(
                    "{} does not take an origin",
                    self.kind.label()
                )));
            }
            origin.validate()?;
        }
        Ok(())
    }
}

impl FrameTransform for TransformConfiguration {
    fn apply(&self, frame: &Frame) -> Result<Frame, RefractError> {
        let input = frame.image();
        let output = match &self.kind {
            TransformKind::Grayscale => keep_format(input, input.grayscale()),
            TransformKind::Invert => {
                let mut image = input.clone();
                image.invert();
                image
            }
            TransformKind::FlipHorizontal => input.fliph(),
            TransformKind::FlipVertical => input.flipv(),
            TransformKind::Rotate180 => input.rotate180(),
            TransformKind::Blur { sigma } => {
                if !sigma.is_finite() || *sigma <= 0.0 {
                    return Err(RefractError::TransformFailure(format!(
                        "blur sigma {sigma} must be positive"
                    )));
                }
                input.blur(*sigma)
            }
            TransformKind::Brighten { amount } => input.brighten(*amount),
            TransformKind::Mirror => mirror(input, self.origin().x),
        };
        Ok(Frame::new(output))
    }
}

/// Several transforms applied in order. Empty chains return frames as is.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    steps: Vec<TransformConfiguration>,
}

impl TransformChain {
    /// Chain `steps` in order.
    pub fn new(steps: Vec<TransformConfiguration>) -> Self {
        Self { steps }
    }

    /// The configured steps.
    pub fn steps(&self) -> &[TransformConfiguration] {
        &self.steps
    }

    /// Names of every step joined with `+`.
    pub fn name(&self) -> String {
        self.steps
            .iter()
            .map(TransformConfiguration::name)
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl FrameTransform for TransformChain {
    fn apply(&self, frame: &Frame) -> Result<Frame, RefractError> {
        let Some((first, rest)) = self.steps.split_first() else {
            return Ok(frame.clone());
        };
        let mut current = first.apply(frame)?;
        for step in rest {
            current = step.apply(&current)?;
        }
        Ok(current)
    }
}

// Convert `output` back to the layout of `input` when it is a decoded format.
fn keep_format(input: &DynamicImage, output: DynamicImage) -> DynamicImage {
    match PixelFormat::of(input) {
        Some(PixelFormat::Rgb8) => DynamicImage::ImageRgb8(output.to_rgb8()),
        Some(PixelFormat::Rgba8) => DynamicImage::ImageRgba8(output.to_rgba8()),
        Some(PixelFormat::Gray8) => DynamicImage::ImageLuma8(output.to_luma8()),
        None => output,
    }
}

fn mirror(input: &DynamicImage, origin_x: f32) -> DynamicImage {
    let (width, height) = input.dimensions();
    let cut = (width as f32 * origin_x.clamp(0.0, 1.0)).round() as u32;
    let mut output = input.clone();

    for y in 0..height {
        for x in cut..width {
            // Pixel `x` reflects `cut - 1 - (x - cut)`.
            let Some(source) = (2 * cut).checked_sub(x + 1) else {
                break;
            };
            output.put_pixel(x, y, input.get_pixel(source, y));
        }
    }
    output
}
