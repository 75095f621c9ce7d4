//! FFmpeg-backed frame and audio sources.
//!
//! [`FfmpegFrameSource`] decodes the best video stream of a file, scales
//! every frame to the configured geometry and pixel format, and drops
//! frames evenly when a frame-rate cap is set. [`FfmpegAudioSource`] opens
//! its own demuxer on the same file and yields the best audio stream's
//! compressed packets untouched.
//!
//! # Example
//!
//! ```no_run
//! use refract::{FfmpegFrameSource, FrameSource, TransformOptions};
//!
//! let options = TransformOptions::new().with_frame_rate_cap(24.0);
//! let mut source = FfmpegFrameSource::open("input.mp4", &options)?;
//! println!("{:?}", source.info());
//! while let Some(frame) = source.next_frame()? {
//!     println!("{}x{}", frame.width(), frame.height());
//! }
//! # Ok::<(), refract::RefractError>(())
//! ```

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{context::Input, stream::Stream},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::configuration::{PixelFormat, TransformOptions};
use crate::error::RefractError;
use crate::ffmpeg::initialise;
use crate::frame::{AudioSample, Frame, StreamInfo, TimeBase};
use crate::source::{AudioSource, FrameSource};
use crate::utilities::{
    FrameDecimator, capped_frame_rate, estimate_frame_count, normalize_rotation, pack_rows,
    rotation_from_display_matrix,
};

/// What `probe` learns about a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    /// Source geometry, frame rate and frame count.
    pub stream: StreamInfo,
    /// Container duration in seconds, `0.0` when unknown.
    pub duration_seconds: f64,
    /// Video codec name.
    pub video_codec: String,
    /// Audio codec name, if the file has an audio track.
    pub audio_codec: Option<String>,
}

/// Describe the best video stream of `path` without decoding frames.
///
/// # Errors
///
/// [`RefractError::FileOpen`] if the file cannot be opened and
/// [`RefractError::NoVideoStream`] if it has no video.
pub fn probe<P: AsRef<Path>>(path: P) -> Result<MediaProbe, RefractError> {
    let path = path.as_ref();
    let input = open_input(path)?;
    let source_stream = SourceStream::locate(&input)?;

    let audio_codec = match input.streams().best(Type::Audio) {
        Some(stream) => {
            let context = CodecContext::from_parameters(stream.parameters())?;
            Some(context.id().name().to_string())
        }
        None => None,
    };

    Ok(MediaProbe {
        stream: StreamInfo {
            width: source_stream.width,
            height: source_stream.height,
            frames_per_second: source_stream.frames_per_second,
            frame_count: source_stream.frame_count,
            rotation: source_stream.rotation,
        },
        duration_seconds: container_duration(&input),
        video_codec: source_stream.codec,
        audio_codec,
    })
}

fn open_input(path: &Path) -> Result<Input, RefractError> {
    initialise(path)?;
    ffmpeg_next::format::input(&path).map_err(|error| RefractError::FileOpen {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })
}

fn container_duration(input: &Input) -> f64 {
    let microseconds = input.duration();
    if microseconds > 0 {
        microseconds as f64 / 1_000_000.0
    } else {
        0.0
    }
}

fn rational_to_f64(rate: Rational) -> Option<f64> {
    (rate.denominator() != 0 && rate.numerator() > 0)
        .then(|| rate.numerator() as f64 / rate.denominator() as f64)
}

/// The best video stream of an input, before any output settings.
struct SourceStream {
    index: usize,
    width: u32,
    height: u32,
    frames_per_second: f64,
    frame_count: Option<u64>,
    rotation: u32,
    codec: String,
}

impl SourceStream {
    fn locate(input: &Input) -> Result<Self, RefractError> {
        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or(RefractError::NoVideoStream)?;

        let context = CodecContext::from_parameters(stream.parameters())?;
        let codec = context.id().name().to_string();
        let decoder = context.decoder().video()?;

        let frames_per_second = rational_to_f64(stream.avg_frame_rate())
            .or_else(|| rational_to_f64(stream.rate()))
            .unwrap_or(0.0);

        let declared = stream.frames();
        let frame_count = if declared > 0 {
            Some(declared as u64)
        } else {
            estimate_frame_count(container_duration(input), frames_per_second)
        };

        Ok(Self {
            index: stream.index(),
            width: decoder.width(),
            height: decoder.height(),
            frames_per_second,
            frame_count,
            rotation: stream_rotation(&stream),
            codec,
        })
    }
}

// The `rotate` tag of older muxers, else the display matrix side data.
fn stream_rotation(stream: &Stream<'_>) -> u32 {
    if let Some(degrees) = stream
        .metadata()
        .get("rotate")
        .and_then(|tag| tag.trim().parse::<f64>().ok())
    {
        return normalize_rotation(degrees).unwrap_or(0);
    }

    let parameters = stream.parameters();
    let matrix = unsafe {
        let raw = &*parameters.as_ptr();
        let side_data = ffmpeg_sys_next::av_packet_side_data_get(
            raw.coded_side_data,
            raw.nb_coded_side_data,
            ffmpeg_sys_next::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side_data.is_null() || (*side_data).size < std::mem::size_of::<[i32; 9]>() {
            return 0;
        }
        std::ptr::read_unaligned((*side_data).data.cast::<[i32; 9]>())
    };
    rotation_from_display_matrix(&matrix).unwrap_or(0)
}

struct DecodeState {
    input: Input,
    decoder: VideoDecoder,
    scaler: ScalingContext,
    stream_index: usize,
    decimator: FrameDecimator,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    decoded: VideoFrame,
    scaled: VideoFrame,
    eof_sent: bool,
}

impl DecodeState {
    fn next(&mut self) -> Result<Option<Frame>, RefractError> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                if !self.decimator.keep() {
                    continue;
                }
                return self.convert().map(Some);
            }

            if self.eof_sent {
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.decoder.send_packet(&packet).map_err(|error| {
                            RefractError::VideoDecodeError(format!("send_packet failed: {error}"))
                        })?;
                    }
                }
                Err(FfmpegError::Eof) => {
                    self.decoder.send_eof().map_err(|error| {
                        RefractError::VideoDecodeError(format!("send_eof failed: {error}"))
                    })?;
                    self.eof_sent = true;
                }
                Err(error) => {
                    return Err(RefractError::VideoDecodeError(format!(
                        "reading packet failed: {error}"
                    )));
                }
            }
        }
    }

    fn convert(&mut self) -> Result<Frame, RefractError> {
        self.scaler
            .run(&self.decoded, &mut self.scaled)
            .map_err(|error| RefractError::VideoDecodeError(format!("scaling failed: {error}")))?;

        let (width, height) = (self.width, self.height);
        let row_len = width as usize * self.pixel_format.bytes_per_pixel();
        let buffer = pack_rows(
            self.scaled.data(0),
            self.scaled.stride(0),
            row_len,
            height as usize,
        );

        let image = match self.pixel_format {
            PixelFormat::Rgb8 => RgbImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgb8),
            PixelFormat::Rgba8 => {
                RgbaImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgba8)
            }
            PixelFormat::Gray8 => {
                GrayImage::from_raw(width, height, buffer).map(DynamicImage::ImageLuma8)
            }
        };
        image.map(Frame::new).ok_or_else(|| {
            RefractError::VideoDecodeError(
                "decoded frame data does not fill the image".to_string(),
            )
        })
    }
}

/// Decodes the best video stream of a file into [`Frame`]s.
pub struct FfmpegFrameSource {
    path: PathBuf,
    info: StreamInfo,
    state: Option<DecodeState>,
}

impl FfmpegFrameSource {
    /// Open `path` with the frame output and frame-rate settings of
    /// `options`.
    ///
    /// # Errors
    ///
    /// [`RefractError::FileOpen`] if the file cannot be opened,
    /// [`RefractError::NoVideoStream`] if it has no video, or an FFmpeg
    /// error if the decoder or scaler cannot be created.
    pub fn open<P: AsRef<Path>>(path: P, options: &TransformOptions) -> Result<Self, RefractError> {
        let path = path.as_ref();
        log::debug!("Opening frame source: {}", path.display());

        let input = open_input(path)?;
        let source_stream = SourceStream::locate(&input)?;

        let stream = input
            .stream(source_stream.index)
            .ok_or(RefractError::NoVideoStream)?;
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let output = options.frame_output();
        let (width, height) =
            output.resolve_dimensions(source_stream.width, source_stream.height);
        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            output.pixel_format.to_ffmpeg_pixel(),
            width,
            height,
            ScalingFlags::BILINEAR,
        )?;

        let frames_per_second =
            capped_frame_rate(source_stream.frames_per_second, options.frame_rate_cap());
        let decimator = match options.frame_rate_cap() {
            Some(cap) => FrameDecimator::new(source_stream.frames_per_second, cap),
            None => FrameDecimator::passthrough(),
        };
        let frame_count = source_stream
            .frame_count
            .map(|count| decimator.output_count(count));

        let info = StreamInfo {
            width,
            height,
            frames_per_second,
            frame_count,
            rotation: source_stream.rotation,
        };
        if source_stream.rotation != 0 {
            log::debug!("Source is displayed rotated {} degrees", source_stream.rotation);
        }
        log::info!(
            "Decoding {} ({}, {}x{} -> {}x{}, {:.3} fps, {:?} frames)",
            path.display(),
            source_stream.codec,
            source_stream.width,
            source_stream.height,
            width,
            height,
            frames_per_second,
            frame_count,
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            state: Some(DecodeState {
                input,
                decoder,
                scaler,
                stream_index: source_stream.index,
                decimator,
                pixel_format: output.pixel_format,
                width,
                height,
                decoded: VideoFrame::empty(),
                scaled: VideoFrame::empty(),
                eof_sent: false,
            }),
        })
    }

    /// The file being decoded.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, RefractError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let frame = state.next()?;
        if frame.is_none() {
            self.state = None;
        }
        Ok(frame)
    }

    fn cancel(&mut self) {
        if self.state.take().is_some() {
            log::debug!("Released decoder for {}", self.path.display());
        }
    }
}

/// Reads the best audio stream of a file as compressed packets.
pub struct FfmpegAudioSource {
    input: Option<Input>,
    stream_index: usize,
    time_base: TimeBase,
}

impl FfmpegAudioSource {
    /// Open the audio track of `path`.
    ///
    /// # Errors
    ///
    /// [`RefractError::NoAudioStream`] if the file has no audio, which
    /// callers usually treat as "nothing to pass through".
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RefractError> {
        let input = open_input(path.as_ref())?;
        let stream = input
            .streams()
            .best(Type::Audio)
            .ok_or(RefractError::NoAudioStream)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        Ok(Self {
            input: Some(input),
            stream_index,
            time_base: TimeBase::new(time_base.numerator(), time_base.denominator()),
        })
    }
}

impl AudioSource for FfmpegAudioSource {
    fn next_sample(&mut self) -> Result<Option<AudioSample>, RefractError> {
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };

        loop {
            let mut packet = Packet::empty();
            match packet.read(input) {
                Ok(()) if packet.stream() == self.stream_index => {
                    return Ok(Some(AudioSample {
                        data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                        pts: packet.pts(),
                        dts: packet.dts(),
                        duration: packet.duration(),
                        time_base: self.time_base,
                        is_key: packet.is_key(),
                    }));
                }
                Ok(()) => continue,
                Err(FfmpegError::Eof) => {
                    self.input = None;
                    return Ok(None);
                }
                Err(error) => {
                    return Err(RefractError::AudioReadError(error.to_string()));
                }
            }
        }
    }

    fn cancel(&mut self) {
        self.input = None;
    }
}
