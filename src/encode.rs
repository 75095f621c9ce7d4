//! FFmpeg-backed video sink.
//!
//! [`FfmpegVideoSink`] encodes transformed frames into a video container
//! (MP4, MKV, MOV, ...) and copies the source's audio packets into it
//! without re-encoding.
//!
//! # Example
//!
//! ```no_run
//! use refract::{EncoderSettings, FfmpegVideoSink, StreamInfo, VideoCodec, VideoSink};
//!
//! let info = StreamInfo::new(1280, 720, 30.0);
//! let settings = EncoderSettings::default().with_codec(VideoCodec::H265).with_crf(28);
//! let mut sink = FfmpegVideoSink::create("output.mp4", &info, &settings, None)?;
//! // ... append frames ...
//! sink.finalize()?;
//! # Ok::<(), refract::RefractError>(())
//! ```

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Dictionary, Packet, Rational,
    codec::{Id, context::Context as CodecContext},
    encoder::Video as VideoEncoder,
    format::{Flags as FormatFlags, Pixel, context::Output},
    frame::Video as VideoFrame,
    media::Type,
    packet::Flags as PacketFlags,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::imageops::FilterType;

use crate::error::RefractError;
use crate::ffmpeg::initialise;
use crate::frame::{AudioSample, Frame, StreamInfo};
use crate::sink::VideoSink;
use crate::utilities::{display_matrix, unpack_rows};

/// Supported output video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    /// H.264 / AVC.
    #[default]
    H264,
    /// H.265 / HEVC.
    H265,
    /// MPEG-4 Part 2 (for AVI compatibility).
    Mpeg4,
}

impl VideoCodec {
    fn to_codec_id(self) -> Id {
        match self {
            VideoCodec::H264 => Id::H264,
            VideoCodec::H265 => Id::HEVC,
            VideoCodec::Mpeg4 => Id::MPEG4,
        }
    }

    fn supports_crf(self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265)
    }
}

/// Encoder settings. Geometry and frame rate come from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Codec to use. Default is H.264.
    pub codec: VideoCodec,
    /// Constant Rate Factor (0-51, lower is better). Default: 23.
    /// Ignored by codecs without CRF support.
    pub crf: Option<u32>,
    /// Bitrate in bits per second.
    pub bitrate: Option<usize>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            crf: Some(23),
            bitrate: None,
        }
    }
}

impl EncoderSettings {
    /// Set the codec.
    #[must_use]
    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the CRF quality value.
    #[must_use]
    pub fn with_crf(mut self, crf: u32) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: usize) -> Self {
        self.bitrate = Some(bitrate);
        self
    }
}

struct AudioTrack {
    index: usize,
    time_base: Rational,
}

struct EncodeState {
    output: Output,
    encoder: VideoEncoder,
    scaler: ScalingContext,
    video_index: usize,
    video_time_base: Rational,
    encoder_time_base: Rational,
    audio: Option<AudioTrack>,
    width: u32,
    height: u32,
}

impl EncodeState {
    fn encode(&mut self, frame: Frame, presentation_index: u64) -> Result<(), RefractError> {
        let image = frame.into_image();
        let rgb = if image.width() != self.width || image.height() != self.height {
            image
                .resize_exact(self.width, self.height, FilterType::Lanczos3)
                .to_rgb8()
        } else {
            image.to_rgb8()
        };

        let mut source = VideoFrame::new(Pixel::RGB24, self.width, self.height);
        let stride = source.stride(0);
        unpack_rows(rgb.as_raw(), source.data_mut(0), stride, self.width as usize * 3);

        let mut scaled = VideoFrame::empty();
        self.scaler
            .run(&source, &mut scaled)
            .map_err(|error| RefractError::sink(format!("scaling failed: {error}")))?;
        scaled.set_pts(Some(presentation_index as i64));

        self.encoder
            .send_frame(&scaled)
            .map_err(|error| RefractError::VideoEncodeError(format!("send_frame failed: {error}")))?;
        self.drain()
    }

    fn drain(&mut self) -> Result<(), RefractError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.video_index);
            packet.rescale_ts(self.encoder_time_base, self.video_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|error| RefractError::sink(format!("write packet failed: {error}")))?;
        }
        Ok(())
    }

    fn write_audio(&mut self, sample: AudioSample) -> Result<(), RefractError> {
        let Some(track) = &self.audio else {
            return Ok(());
        };
        let mut packet = Packet::copy(&sample.data);
        packet.set_pts(sample.pts);
        packet.set_dts(sample.dts);
        packet.set_duration(sample.duration);
        if sample.is_key {
            packet.set_flags(PacketFlags::KEY);
        }
        packet.set_stream(track.index);
        packet.rescale_ts(
            Rational::new(sample.time_base.numerator, sample.time_base.denominator),
            track.time_base,
        );
        packet.set_position(-1);
        packet
            .write_interleaved(&mut self.output)
            .map_err(|error| RefractError::sink(format!("write audio packet failed: {error}")))
    }

    fn finish(&mut self) -> Result<(), RefractError> {
        self.encoder
            .send_eof()
            .map_err(|error| RefractError::VideoEncodeError(format!("send_eof failed: {error}")))?;
        self.drain()?;
        self.output
            .write_trailer()
            .map_err(|error| RefractError::sink(format!("cannot write trailer: {error}")))
    }
}

/// Encodes frames into a video file, with optional stream-copied audio.
///
/// Not [`Send`]: wrap it with
/// [`BufferedSink::spawn_with`](crate::BufferedSink::spawn_with) to write
/// from a dedicated thread.
pub struct FfmpegVideoSink {
    path: PathBuf,
    state: Option<EncodeState>,
    finished: bool,
}

impl FfmpegVideoSink {
    /// Create `path` (container inferred from the extension) for a stream
    /// described by `info`.
    ///
    /// When `audio_input` names a file with an audio track, an output audio
    /// stream mirroring its parameters is added for
    /// [`append_audio`](VideoSink::append_audio).
    ///
    /// # Errors
    ///
    /// [`RefractError::FileOpen`] if the output cannot be created and
    /// [`RefractError::VideoEncodeError`] if the codec cannot be opened.
    pub fn create<P: AsRef<Path>>(
        path: P,
        info: &StreamInfo,
        settings: &EncoderSettings,
        audio_input: Option<&Path>,
    ) -> Result<Self, RefractError> {
        let path = path.as_ref();
        initialise(path)?;
        info.validate()?;

        // YUV 4:2:0 needs even dimensions.
        let width = (info.width & !1).max(2);
        let height = (info.height & !1).max(2);
        let frame_rate = Rational::from(info.frames_per_second);
        let encoder_time_base = frame_rate.invert();

        log::info!(
            "Encoding {} (codec={:?}, {width}x{height}, {:.3} fps)",
            path.display(),
            settings.codec,
            info.frames_per_second,
        );

        let mut output = ffmpeg_next::format::output(&path).map_err(|error| {
            RefractError::FileOpen {
                path: path.to_path_buf(),
                reason: format!("cannot open output: {error}"),
            }
        })?;
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let codec_id = settings.codec.to_codec_id();
        let codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            RefractError::VideoEncodeError(format!("codec {codec_id:?} not available"))
        })?;

        let (video_index, encoder) = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|error| RefractError::VideoEncodeError(format!("cannot add stream: {error}")))?;

            let mut encoder = CodecContext::from_parameters(stream.parameters())?
                .encoder()
                .video()
                .map_err(|error| {
                    RefractError::VideoEncodeError(format!("cannot create video encoder: {error}"))
                })?;
            encoder.set_width(width);
            encoder.set_height(height);
            encoder.set_format(Pixel::YUV420P);
            encoder.set_time_base(encoder_time_base);
            encoder.set_frame_rate(Some(frame_rate));
            if let Some(bitrate) = settings.bitrate {
                encoder.set_bit_rate(bitrate);
            }
            if needs_global_header {
                unsafe {
                    (*encoder.as_mut_ptr()).flags |=
                        ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
                }
            }

            let mut options = Dictionary::new();
            if let Some(crf) = settings.crf.filter(|_| settings.codec.supports_crf()) {
                options.set("crf", &crf.to_string());
            }
            let encoder = encoder.open_as_with(codec, options).map_err(|error| {
                RefractError::VideoEncodeError(format!("cannot open encoder: {error}"))
            })?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            if info.rotation != 0 {
                let parameters = unsafe { stream.parameters().as_mut_ptr() };
                attach_display_matrix(parameters, info.rotation)?;
            }
            (stream.index(), encoder)
        };

        let audio_index = match audio_input {
            Some(audio_path) => add_audio_stream(&mut output, audio_path)?,
            None => None,
        };

        output
            .write_header()
            .map_err(|error| RefractError::sink(format!("cannot write header: {error}")))?;

        let video_time_base = output
            .stream(video_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| RefractError::sink("video stream vanished after header"))?;
        let audio = audio_index.and_then(|index| {
            output.stream(index).map(|stream| AudioTrack {
                index,
                time_base: stream.time_base(),
            })
        });

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|error| RefractError::VideoEncodeError(format!("cannot create scaler: {error}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            state: Some(EncodeState {
                output,
                encoder,
                scaler,
                video_index,
                video_time_base,
                encoder_time_base,
                audio,
                width,
                height,
            }),
            finished: false,
        })
    }

    /// The file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&mut self) -> Result<&mut EncodeState, RefractError> {
        self.state
            .as_mut()
            .ok_or_else(|| RefractError::sink("output is already closed"))
    }
}

// Players rotate the stored frames by this matrix. Must run after the
// encoder parameters are copied into the stream.
fn attach_display_matrix(
    parameters: *mut ffmpeg_sys_next::AVCodecParameters,
    degrees: u32,
) -> Result<(), RefractError> {
    let matrix = display_matrix(degrees);
    let size = std::mem::size_of_val(&matrix);
    unsafe {
        let side_data = ffmpeg_sys_next::av_packet_side_data_new(
            &mut (*parameters).coded_side_data,
            &mut (*parameters).nb_coded_side_data,
            ffmpeg_sys_next::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
            size,
            0,
        );
        if side_data.is_null() {
            return Err(RefractError::sink("cannot attach display matrix"));
        }
        std::ptr::copy_nonoverlapping(matrix.as_ptr().cast::<u8>(), (*side_data).data, size);
    }
    log::debug!("Output is displayed rotated {degrees} degrees");
    Ok(())
}

// Mirror the best audio stream of `audio_path` as a stream-copy track.
fn add_audio_stream(output: &mut Output, audio_path: &Path) -> Result<Option<usize>, RefractError> {
    let input = ffmpeg_next::format::input(&audio_path).map_err(|error| RefractError::FileOpen {
        path: audio_path.to_path_buf(),
        reason: error.to_string(),
    })?;
    let Some(source) = input.streams().best(Type::Audio) else {
        return Ok(None);
    };

    let mut stream = output.add_stream(ffmpeg_next::encoder::find(Id::None))?;
    stream.set_parameters(source.parameters());
    // Let the muxer pick the codec tag.
    unsafe {
        (*stream.parameters().as_mut_ptr()).codec_tag = 0;
    }
    stream.set_time_base(source.time_base());
    Ok(Some(stream.index()))
}

impl VideoSink for FfmpegVideoSink {
    fn append_frame(&mut self, frame: Frame, presentation_index: u64) -> Result<(), RefractError> {
        self.state()?.encode(frame, presentation_index)
    }

    fn append_audio(&mut self, sample: AudioSample) -> Result<(), RefractError> {
        self.state()?.write_audio(sample)
    }

    fn finalize(&mut self) -> Result<(), RefractError> {
        self.state()?.finish()?;
        self.state = None;
        self.finished = true;
        log::info!("Wrote {}", self.path.display());
        Ok(())
    }

    fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Close the container before removing the partial file.
        self.state = None;
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed partial output {}", self.path.display()),
            Err(error) if error.kind() == IoErrorKind::NotFound => {}
            Err(error) => log::warn!(
                "Could not remove partial output {}: {error}",
                self.path.display()
            ),
        }
    }
}
