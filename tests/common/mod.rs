//! Shared mocks for the scheduler integration tests.
//!
//! Each mock frame is a 1x1 grayscale image whose pixel value is its
//! 1-based position in the stream, so the sink's contents can be read back
//! as a list of frame numbers.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, GrayImage, Luma};
use refract::{
    AudioSample, AudioSource, Frame, FrameSource, FrameTransform, RefractError, StreamInfo,
    TimeBase, VideoSink,
};

/// Added to every pixel by [`MockTransform`].
pub const OFFSET: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Frame number (after the transform offset is removed) and its
    /// presentation index.
    Frame(u8, u64),
    Audio(i64),
    Finalize,
    SinkCancel,
    SourceCancel,
    AudioCancel,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Frame numbers in the order the sink received them.
    pub fn frames(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Frame(number, _) => Some(number),
                _ => None,
            })
            .collect()
    }

    pub fn presentation_indices(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Frame(_, index) => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }

    pub fn audio_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Audio(_)))
            .count()
    }
}

pub fn frame(value: u8) -> Frame {
    Frame::new(DynamicImage::ImageLuma8(GrayImage::from_pixel(
        1,
        1,
        Luma([value]),
    )))
}

pub fn value_of(frame: &Frame) -> u8 {
    frame.image().to_luma8().get_pixel(0, 0).0[0]
}

pub fn frame_numbers(range: std::ops::RangeInclusive<u8>) -> Vec<u8> {
    range.collect()
}

// ── Source ─────────────────────────────────────────────────────────

pub struct MockSource {
    info: StreamInfo,
    produced: u8,
    available: u8,
    fail_at: Option<u8>,
    log: EventLog,
}

impl MockSource {
    /// A source yielding `available` frames and declaring the same count.
    pub fn new(available: u8, log: &EventLog) -> Self {
        Self::declaring(available, Some(u64::from(available)), log)
    }

    pub fn declaring(available: u8, declared: Option<u64>, log: &EventLog) -> Self {
        let mut info = StreamInfo::new(1, 1, 30.0);
        info.frame_count = declared;
        Self {
            info,
            produced: 0,
            available,
            fail_at: None,
            log: log.clone(),
        }
    }

    pub fn with_info(mut self, info: StreamInfo) -> Self {
        self.info = info;
        self
    }

    /// Fail the pull of frame number `number`.
    pub fn failing_at(mut self, number: u8) -> Self {
        self.fail_at = Some(number);
        self
    }
}

impl FrameSource for MockSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, RefractError> {
        if self.produced >= self.available {
            return Ok(None);
        }
        let number = self.produced + 1;
        if self.fail_at == Some(number) {
            return Err(RefractError::VideoDecodeError(format!(
                "corrupt frame {number}"
            )));
        }
        self.produced = number;
        Ok(Some(frame(number)))
    }

    fn cancel(&mut self) {
        self.log.push(Event::SourceCancel);
    }
}

pub struct MockAudio {
    remaining: i64,
    next_pts: i64,
    log: EventLog,
}

impl MockAudio {
    pub fn new(samples: i64, log: &EventLog) -> Self {
        Self {
            remaining: samples,
            next_pts: 0,
            log: log.clone(),
        }
    }
}

impl AudioSource for MockAudio {
    fn next_sample(&mut self) -> Result<Option<AudioSample>, RefractError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let pts = self.next_pts;
        self.next_pts += 1024;
        Ok(Some(AudioSample {
            data: vec![0; 16],
            pts: Some(pts),
            dts: Some(pts),
            duration: 1024,
            time_base: TimeBase::new(1, 48_000),
            is_key: true,
        }))
    }

    fn cancel(&mut self) {
        self.log.push(Event::AudioCancel);
    }
}

// ── Sink ───────────────────────────────────────────────────────────

pub struct MockSink {
    log: EventLog,
    fail_append_at: Option<u64>,
    fail_finalize: bool,
    cancel_finalize: bool,
}

impl MockSink {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            fail_append_at: None,
            fail_finalize: false,
            cancel_finalize: false,
        }
    }

    /// Reject the frame with presentation index `index`.
    pub fn rejecting_at(mut self, index: u64) -> Self {
        self.fail_append_at = Some(index);
        self
    }

    pub fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    /// Report a cancellation from `finalize`, as a writer stopped by its
    /// owner would.
    pub fn cancelled_at_finalize(mut self) -> Self {
        self.cancel_finalize = true;
        self
    }
}

impl VideoSink for MockSink {
    fn append_frame(&mut self, frame: Frame, presentation_index: u64) -> Result<(), RefractError> {
        if self.fail_append_at == Some(presentation_index) {
            return Err(RefractError::SinkUnavailable("disk full".to_string()));
        }
        let number = value_of(&frame).wrapping_sub(OFFSET);
        self.log.push(Event::Frame(number, presentation_index));
        Ok(())
    }

    fn append_audio(&mut self, sample: AudioSample) -> Result<(), RefractError> {
        self.log.push(Event::Audio(sample.pts.unwrap_or_default()));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RefractError> {
        if self.fail_finalize {
            return Err(RefractError::SinkUnavailable("trailer write failed".to_string()));
        }
        if self.cancel_finalize {
            return Err(RefractError::Cancelled);
        }
        self.log.push(Event::Finalize);
        Ok(())
    }

    fn cancel(&mut self) {
        self.log.push(Event::SinkCancel);
    }
}

// ── Transform ──────────────────────────────────────────────────────

/// Adds [`OFFSET`] to every pixel, with optional per-frame latency,
/// failures and panics. Tracks how many calls overlap.
#[derive(Default)]
pub struct MockTransform {
    latency: Option<fn(u8) -> Duration>,
    failing: HashSet<u8>,
    panicking: HashSet<u8>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: fn(u8) -> Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn failing(mut self, numbers: &[u8]) -> Self {
        self.failing.extend(numbers);
        self
    }

    pub fn panicking(mut self, numbers: &[u8]) -> Self {
        self.panicking.extend(numbers);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FrameTransform for MockTransform {
    fn apply(&self, frame: &Frame) -> Result<Frame, RefractError> {
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(active, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let number = value_of(frame);
        if let Some(latency) = self.latency {
            thread::sleep(latency(number));
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(&number) {
            panic!("frame {number} exploded");
        }
        if self.failing.contains(&number) {
            return Err(RefractError::TransformFailure(format!("frame {number}")));
        }
        Ok(frame_with_offset(number))
    }
}

fn frame_with_offset(number: u8) -> Frame {
    frame(number.wrapping_add(OFFSET))
}

/// Later frames finish first.
pub fn reverse_latency(number: u8) -> Duration {
    Duration::from_millis(u64::from(20u8.saturating_sub(number % 20)))
}

/// Pseudo-random latency, up to 7 ms.
pub fn scattered_latency(number: u8) -> Duration {
    Duration::from_millis(u64::from(number.wrapping_mul(37) % 8))
}

/// Progress calls seen by a handler, shareable with the test body.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog(Arc<Mutex<Vec<f32>>>);

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that records every fraction and continues while `keep_going`
    /// returns `true` for the call number (1-based).
    pub fn handler(
        &self,
        keep_going: impl Fn(usize) -> bool + Send + 'static,
    ) -> impl FnMut(f32) -> bool + Send + 'static {
        let log = Arc::clone(&self.0);
        move |fraction| {
            let mut calls = log.lock().unwrap();
            calls.push(fraction);
            keep_going(calls.len())
        }
    }

    pub fn fractions(&self) -> Vec<f32> {
        self.0.lock().unwrap().clone()
    }
}

/// Completion callback recorder.
#[derive(Debug, Clone, Default)]
pub struct Outcomes(Arc<Mutex<Vec<Result<(), RefractError>>>>);

impl Outcomes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl FnOnce(Result<(), RefractError>) + Send + 'static {
        let outcomes = Arc::clone(&self.0);
        move |outcome| outcomes.lock().unwrap().push(outcome)
    }

    pub fn take(&self) -> Vec<Result<(), RefractError>> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

pub fn shared(transform: MockTransform) -> Arc<MockTransform> {
    Arc::new(transform)
}
