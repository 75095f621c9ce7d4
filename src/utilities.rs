//! Internal utility functions.
//!
//! Helpers for pixel-row copying, frame-rate capping and frame-count
//! estimation that do not belong in any single public module.

/// Copy `height` rows of `row_len` bytes out of a plane whose rows are
/// `stride` bytes apart, stripping the padding.
///
/// FFmpeg frames frequently carry per-row padding (stride > width × bpp).
/// The result can be passed directly to [`image::ImageBuffer::from_raw`].
#[cfg(feature = "ffmpeg")]
pub(crate) fn pack_rows(data: &[u8], stride: usize, row_len: usize, height: usize) -> Vec<u8> {
    if stride == row_len {
        // No padding: copy the entire plane at once.
        return data[..row_len * height].to_vec();
    }
    let mut buffer = Vec::with_capacity(row_len * height);
    for row in 0..height {
        let row_start = row * stride;
        buffer.extend_from_slice(&data[row_start..row_start + row_len]);
    }
    buffer
}

/// The inverse of [`pack_rows`]: spread tightly packed rows into a plane
/// with `stride`-byte rows.
#[cfg(feature = "ffmpeg")]
pub(crate) fn unpack_rows(packed: &[u8], plane: &mut [u8], stride: usize, row_len: usize) {
    for (row, chunk) in packed.chunks_exact(row_len).enumerate() {
        let start = row * stride;
        plane[start..start + row_len].copy_from_slice(chunk);
    }
}

/// Output frame rate for a source rate and an optional cap.
#[cfg(feature = "ffmpeg")]
pub(crate) fn capped_frame_rate(source_fps: f64, cap: Option<f64>) -> f64 {
    match cap {
        Some(cap) if cap < source_fps => cap,
        _ => source_fps,
    }
}

/// Estimate a frame count from a duration when the container does not
/// declare one.
#[cfg(feature = "ffmpeg")]
pub(crate) fn estimate_frame_count(duration_seconds: f64, frames_per_second: f64) -> Option<u64> {
    let estimate = duration_seconds * frames_per_second;
    (estimate.is_finite() && estimate > 0.0).then(|| estimate.round() as u64)
}

/// Snap `degrees` to a clockwise quarter turn in `0..360`.
#[cfg(feature = "ffmpeg")]
pub(crate) fn normalize_rotation(degrees: f64) -> Option<u32> {
    if !degrees.is_finite() {
        return None;
    }
    let quarters = (degrees / 90.0).round() as i64;
    Some((quarters * 90).rem_euclid(360) as u32)
}

/// Clockwise rotation encoded by a 16.16 fixed-point display matrix.
///
/// Returns `None` for a degenerate matrix.
#[cfg(feature = "ffmpeg")]
pub(crate) fn rotation_from_display_matrix(matrix: &[i32; 9]) -> Option<u32> {
    let fixed = |value: i32| f64::from(value) / 65536.0;
    let scale_x = fixed(matrix[0]).hypot(fixed(matrix[3]));
    let scale_y = fixed(matrix[1]).hypot(fixed(matrix[4]));
    if scale_x == 0.0 || scale_y == 0.0 {
        return None;
    }
    let radians = (fixed(matrix[1]) / scale_y).atan2(fixed(matrix[0]) / scale_x);
    normalize_rotation(radians.to_degrees())
}

/// The display matrix for a clockwise rotation of `degrees`.
#[cfg(feature = "ffmpeg")]
pub(crate) fn display_matrix(degrees: u32) -> [i32; 9] {
    let (sin, cos) = f64::from(degrees).to_radians().sin_cos();
    let fixed = |value: f64| (value * 65536.0).round() as i32;
    [fixed(cos), fixed(sin), 0, fixed(-sin), fixed(cos), 0, 0, 0, 1 << 30]
}

/// Drops frames evenly so that a `source_fps` stream plays at `target_fps`.
///
/// Frame `i` is kept when `floor((i + 1) * target / source)` exceeds
/// `floor(i * target / source)`, which keeps exactly
/// `floor(n * target / source)` of the first `n` frames.
#[derive(Debug, Clone)]
pub struct FrameDecimator {
    ratio: f64,
    index: u64,
}

impl FrameDecimator {
    /// A decimator from `source_fps` down to `min(source_fps, target_fps)`.
    pub fn new(source_fps: f64, target_fps: f64) -> Self {
        let ratio = if source_fps > 0.0 && target_fps > 0.0 {
            (target_fps / source_fps).min(1.0)
        } else {
            1.0
        };
        Self { ratio, index: 0 }
    }

    /// A decimator that keeps every frame.
    pub fn passthrough() -> Self {
        Self {
            ratio: 1.0,
            index: 0,
        }
    }

    /// Decide whether the next source frame is kept.
    pub fn keep(&mut self) -> bool {
        let index = self.index;
        self.index += 1;
        if self.ratio >= 1.0 {
            return true;
        }
        let before = (index as f64 * self.ratio).floor();
        let after = ((index + 1) as f64 * self.ratio).floor();
        after > before
    }

    /// Frames kept out of `source_frames`.
    pub fn output_count(&self, source_frames: u64) -> u64 {
        if self.ratio >= 1.0 {
            source_frames
        } else {
            (source_frames as f64 * self.ratio).floor() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "ffmpeg")]
    #[test]
    fn pack_rows_strips_padding() {
        // Two rows of 3 bytes with a stride of 4.
        let plane = [1, 2, 3, 0, 4, 5, 6, 0];
        assert_eq!(pack_rows(&plane, 4, 3, 2), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(pack_rows(&plane, 4, 4, 2), plane.to_vec());
    }

    #[cfg(feature = "ffmpeg")]
    #[test]
    fn unpack_rows_restores_stride() {
        let mut plane = [9u8; 8];
        unpack_rows(&[1, 2, 3, 4, 5, 6], &mut plane, 4, 3);
        assert_eq!(plane, [1, 2, 3, 9, 4, 5, 6, 9]);
    }

    #[test]
    fn halving_keeps_every_other_frame() {
        let mut decimator = FrameDecimator::new(60.0, 30.0);
        let kept: Vec<bool> = (0..6).map(|_| decimator.keep()).collect();
        assert_eq!(kept, vec![false, true, false, true, false, true]);
        assert_eq!(decimator.output_count(6), 3);
    }

    #[test]
    fn uneven_ratio_matches_output_count() {
        let mut decimator = FrameDecimator::new(30.0, 24.0);
        let kept = (0..300).filter(|_| decimator.keep()).count() as u64;
        assert_eq!(kept, decimator.output_count(300));
        assert_eq!(kept, 240);
    }

    #[test]
    fn cap_above_source_changes_nothing() {
        let mut decimator = FrameDecimator::new(24.0, 60.0);
        assert!((0..10).all(|_| decimator.keep()));
        assert!(FrameDecimator::passthrough().keep());
    }

    #[cfg(feature = "ffmpeg")]
    #[test]
    fn capped_rate_never_exceeds_source() {
        assert_eq!(capped_frame_rate(24.0, Some(60.0)), 24.0);
        assert_eq!(capped_frame_rate(60.0, Some(24.0)), 24.0);
        assert_eq!(capped_frame_rate(30.0, None), 30.0);
    }

    #[cfg(feature = "ffmpeg")]
    #[test]
    fn frame_count_estimate() {
        assert_eq!(estimate_frame_count(2.0, 29.97), Some(60));
        assert_eq!(estimate_frame_count(0.0, 30.0), None);
        assert_eq!(estimate_frame_count(f64::NAN, 30.0), None);
    }

    #[cfg(feature = "ffmpeg")]
    #[test]
    fn portrait_display_matrix_reads_as_quarter_turn() {
        // The matrix phones write for a portrait recording.
        let portrait = [0, 65536, 0, -65536, 0, 0, 0, 0, 1 << 30];
        assert_eq!(rotation_from_display_matrix(&portrait), Some(90));
        assert_eq!(display_matrix(90), portrait);
        assert_eq!(rotation_from_display_matrix(&display_matrix(270)), Some(270));
        assert_eq!(rotation_from_display_matrix(&display_matrix(180)), Some(180));
        assert_eq!(rotation_from_display_matrix(&[0; 9]), None);
    }

    #[cfg(feature = "ffmpeg")]
    #[test]
    fn rotation_tags_snap_to_quarter_turns() {
        assert_eq!(normalize_rotation(-90.0), Some(270));
        assert_eq!(normalize_rotation(89.6), Some(90));
        assert_eq!(normalize_rotation(720.0), Some(0));
        assert_eq!(normalize_rotation(f64::NAN), None);
    }
}
