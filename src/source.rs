//! Frame and audio source contracts.
//!
//! A [`FrameSource`] yields decoded frames in stream order and describes the
//! stream once through [`StreamInfo`]. An [`AudioSource`] is an independent
//! cursor over the same asset's audio. Both are pull-style: `None` marks the
//! end of the stream.
//!
//! [`IterFrameSource`] and [`IterAudioSource`] adapt any iterator, which is
//! how the tests and benchmarks feed synthetic streams to the scheduler.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use crate::error::RefractError;
use crate::frame::{AudioSample, Frame, StreamInfo};

/// Sequential producer of decoded frames.
pub trait FrameSource {
    /// Stream geometry, frame rate and declared frame count.
    fn info(&self) -> &StreamInfo;

    /// Pull the next frame. `Ok(None)` marks the end of the stream.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn next_frame(&mut self) -> Result<Option<Frame>, RefractError>;

    /// Release decoding resources. Must be idempotent.
    fn cancel(&mut self);
}

/// Sequential producer of audio samples, independent of the frame cursor.
pub trait AudioSource {
    /// Pull the next sample. `Ok(None)` marks the end of the audio.
    fn next_sample(&mut self) -> Result<Option<AudioSample>, RefractError>;

    /// Release reading resources. Must be idempotent.
    fn cancel(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn info(&self) -> &StreamInfo {
        (**self).info()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, RefractError> {
        (**self).next_frame()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}

impl<A: AudioSource + ?Sized> AudioSource for Box<A> {
    fn next_sample(&mut self) -> Result<Option<AudioSample>, RefractError> {
        (**self).next_sample()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}

/// An [`AudioSource`] with no samples, for runs without an audio track.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudio;

impl AudioSource for NoAudio {
    fn next_sample(&mut self) -> Result<Option<AudioSample>, RefractError> {
        Ok(None)
    }

    fn cancel(&mut self) {}
}

/// A [`FrameSource`] over any iterator of frames.
///
/// After [`cancel`](FrameSource::cancel) the iterator is dropped and the
/// source reports end of stream.
///
/// ```
/// use image::{DynamicImage, RgbImage};
/// use refract::{Frame, FrameSource, IterFrameSource, StreamInfo};
///
/// let frames = (0..3).map(|_| Frame::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2))));
/// let mut source = IterFrameSource::new(StreamInfo::new(2, 2, 30.0).with_frame_count(3), frames);
/// assert!(source.next_frame()?.is_some());
/// # Ok::<(), refract::RefractError>(())
/// ```
pub struct IterFrameSource<I> {
    info: StreamInfo,
    frames: Option<I>,
}

impl<I> IterFrameSource<I>
where
    I: Iterator<Item = Frame>,
{
    /// Wrap `frames`, described by `info`.
    pub fn new<T>(info: StreamInfo, frames: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            info,
            frames: Some(frames.into_iter()),
        }
    }

    /// Returns `true` once the source has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.frames.is_none()
    }
}

impl<I> FrameSource for IterFrameSource<I>
where
    I: Iterator<Item = Frame>,
{
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, RefractError> {
        Ok(self.frames.as_mut().and_then(Iterator::next))
    }

    fn cancel(&mut self) {
        self.frames = None;
    }
}

impl<I> Debug for IterFrameSource<I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("IterFrameSource")
            .field("info", &self.info)
            .field("cancelled", &self.frames.is_none())
            .finish()
    }
}

/// An [`AudioSource`] over any iterator of samples.
pub struct IterAudioSource<I> {
    samples: Option<I>,
}

impl<I> IterAudioSource<I>
where
    I: Iterator<Item = AudioSample>,
{
    /// Wrap `samples`.
    pub fn new<T>(samples: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            samples: Some(samples.into_iter()),
        }
    }
}

impl<I> AudioSource for IterAudioSource<I>
where
    I: Iterator<Item = AudioSample>,
{
    fn next_sample(&mut self) -> Result<Option<AudioSample>, RefractError> {
        Ok(self.samples.as_mut().and_then(Iterator::next))
    }

    fn cancel(&mut self) {
        self.samples = None;
    }
}

impl<I> Debug for IterAudioSource<I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("IterAudioSource")
            .field("cancelled", &self.samples.is_none())
            .finish()
    }
}
