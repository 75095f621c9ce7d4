//! FFmpeg initialisation and log level control.
//!
//! FFmpeg has its own console logging, separate from the [`log`] facade
//! the rest of the crate uses. [`set_ffmpeg_log_level`] tunes it without
//! importing `ffmpeg-next` directly.
//!
//! ```no_run
//! use refract::FfmpegLogLevel;
//!
//! // Only fatal errors from the decoder and encoder.
//! refract::set_ffmpeg_log_level(FfmpegLogLevel::Fatal);
//! ```

use std::path::Path;

use ffmpeg_next::util::log::Level;

use crate::error::RefractError;

/// FFmpeg console verbosity, from silent to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print nothing.
    Quiet,
    /// Unrecoverable errors only.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Debugging output.
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

/// Set FFmpeg's console verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Initialise FFmpeg, attributing failure to `path`.
pub(crate) fn initialise(path: &Path) -> Result<(), RefractError> {
    ffmpeg_next::init().map_err(|error| RefractError::FileOpen {
        path: path.to_path_buf(),
        reason: format!("FFmpeg initialisation failed: {error}"),
    })
}
