//! Video sink contract and a buffered writer-thread adapter.
//!
//! A [`VideoSink`] consumes transformed frames in presentation order, then
//! the audio samples, then a single [`finalize`](VideoSink::finalize) call.
//! [`cancel`](VideoSink::cancel) abandons the output instead.
//!
//! [`BufferedSink`] moves any sink onto a dedicated writer thread behind a
//! bounded channel. Appends block while the queue is full, which throttles
//! the scheduler to the sink's write rate without spinning.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::RefractError;
use crate::frame::{AudioSample, Frame};

/// Ordered consumer of transformed frames and pass-through audio.
pub trait VideoSink {
    /// Append one frame at `presentation_index` (0-based, contiguous).
    ///
    /// May block while the sink applies backpressure.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn append_frame(&mut self, frame: Frame, presentation_index: u64) -> Result<(), RefractError>;

    /// Append one audio sample. Called only after every frame.
    fn append_audio(&mut self, sample: AudioSample) -> Result<(), RefractError>;

    /// Flush and close the output. Terminal.
    fn finalize(&mut self) -> Result<(), RefractError>;

    /// Abandon the output and release resources. Must be idempotent.
    fn cancel(&mut self);
}

impl<K: VideoSink + ?Sized> VideoSink for Box<K> {
    fn append_frame(&mut self, frame: Frame, presentation_index: u64) -> Result<(), RefractError> {
        (**self).append_frame(frame, presentation_index)
    }

    fn append_audio(&mut self, sample: AudioSample) -> Result<(), RefractError> {
        (**self).append_audio(sample)
    }

    fn finalize(&mut self) -> Result<(), RefractError> {
        (**self).finalize()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}

enum Command {
    Frame(Frame, u64),
    Audio(AudioSample),
    Finalize(Sender<Result<(), RefractError>>),
}

/// A [`VideoSink`] that forwards to another sink on a writer thread.
///
/// The first error raised by the inner sink is kept; every later call
/// returns [`RefractError::SinkUnavailable`] carrying its message. Dropping
/// a `BufferedSink` that was never finalized cancels the inner sink.
///
/// ```
/// use image::{DynamicImage, RgbImage};
/// use refract::{AudioSample, BufferedSink, Frame, RefractError, VideoSink};
///
/// #[derive(Default)]
/// struct Count(u64);
///
/// impl VideoSink for Count {
///     fn append_frame(&mut self, _: Frame, _: u64) -> Result<(), RefractError> {
///         self.0 += 1;
///         Ok(())
///     }
///     fn append_audio(&mut self, _: AudioSample) -> Result<(), RefractError> { Ok(()) }
///     fn finalize(&mut self) -> Result<(), RefractError> { Ok(()) }
///     fn cancel(&mut self) {}
/// }
///
/// let mut sink = BufferedSink::spawn(Count::default(), 2)?;
/// let frame = Frame::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2)));
/// sink.append_frame(frame, 0)?;
/// sink.finalize()?;
/// # Ok::<(), RefractError>(())
/// ```
pub struct BufferedSink {
    sender: Option<Sender<Command>>,
    cancelled: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    writer: Option<JoinHandle<()>>,
}

impl BufferedSink {
    /// Move `inner` onto a writer thread with a queue of `capacity` items.
    ///
    /// A capacity of `0` makes every append a rendezvous with the writer.
    ///
    /// # Errors
    ///
    /// Returns [`RefractError::Construction`] if the thread cannot be spawned.
    pub fn spawn<K>(inner: K, capacity: usize) -> Result<Self, RefractError>
    where
        K: VideoSink + Send + 'static,
    {
        Self::spawn_with(capacity, move || Ok(inner))
    }

    /// Build the inner sink on the writer thread with `factory`.
    ///
    /// Sinks that are not [`Send`] (such as FFmpeg output contexts) never
    /// leave the writer thread. Waits until the factory has returned.
    ///
    /// # Errors
    ///
    /// Returns whatever `factory` returns on failure, or
    /// [`RefractError::Construction`] if the thread cannot be spawned.
    pub fn spawn_with<K, F>(capacity: usize, factory: F) -> Result<Self, RefractError>
    where
        K: VideoSink + 'static,
        F: FnOnce() -> Result<K, RefractError> + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let (ready_sender, ready_receiver) = crossbeam_channel::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let writer = {
            let cancelled = Arc::clone(&cancelled);
            let failure = Arc::clone(&failure);
            thread::Builder::new()
                .name("refract-writer".to_string())
                .spawn(move || match factory() {
                    Ok(inner) => {
                        let _ = ready_sender.send(Ok(()));
                        write_loop(inner, &receiver, &cancelled, &failure);
                    }
                    Err(error) => {
                        let _ = ready_sender.send(Err(error));
                    }
                })
                .map_err(|error| {
                    RefractError::Construction(format!("cannot spawn sink writer: {error}"))
                })?
        };

        match ready_receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let _ = writer.join();
                return Err(error);
            }
            Err(_) => {
                let _ = writer.join();
                return Err(RefractError::Construction(
                    "sink writer exited during setup".to_string(),
                ));
            }
        }

        Ok(Self {
            sender: Some(sender),
            cancelled,
            failure,
            writer: Some(writer),
        })
    }

    /// Returns `true` once the inner sink has reported an error.
    pub fn has_failed(&self) -> bool {
        self.failure_message().is_some()
    }

    fn failure_message(&self) -> Option<String> {
        self.failure
            .lock()
            .ok()
            .and_then(|failure| failure.clone())
    }

    fn unavailable(&self) -> RefractError {
        match self.failure_message() {
            Some(message) => RefractError::sink(message),
            None => RefractError::sink("sink writer has stopped"),
        }
    }

    fn send(&self, command: Command) -> Result<(), RefractError> {
        if self.has_failed() {
            return Err(self.unavailable());
        }
        let sender = self.sender.as_ref().ok_or_else(|| self.unavailable())?;
        sender.send(command).map_err(|_| self.unavailable())
    }

    fn join_writer(&mut self) -> Result<(), RefractError> {
        match self.writer.take() {
            Some(writer) => writer
                .join()
                .map_err(|_| RefractError::sink("sink writer panicked")),
            None => Ok(()),
        }
    }
}

impl VideoSink for BufferedSink {
    fn append_frame(&mut self, frame: Frame, presentation_index: u64) -> Result<(), RefractError> {
        self.send(Command::Frame(frame, presentation_index))
    }

    fn append_audio(&mut self, sample: AudioSample) -> Result<(), RefractError> {
        self.send(Command::Audio(sample))
    }

    fn finalize(&mut self) -> Result<(), RefractError> {
        let (reply_sender, reply_receiver) = crossbeam_channel::bounded(1);
        self.send(Command::Finalize(reply_sender))?;
        self.sender = None;

        let result = reply_receiver.recv().map_err(|_| self.unavailable());
        self.join_writer()?;
        result?
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        self.sender = None;
        if self.join_writer().is_err() {
            log::warn!("Sink writer panicked during cancellation");
        }
    }
}

impl Drop for BufferedSink {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.cancel();
        }
    }
}

fn write_loop<K: VideoSink>(
    mut inner: K,
    receiver: &Receiver<Command>,
    cancelled: &AtomicBool,
    failure: &Mutex<Option<String>>,
) {
    for command in receiver.iter() {
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        let result = match command {
            Command::Frame(frame, index) => inner.append_frame(frame, index),
            Command::Audio(sample) => inner.append_audio(sample),
            Command::Finalize(reply) => {
                let result = inner.finalize();
                if let Err(error) = &result {
                    record_failure(failure, error);
                }
                let _ = reply.send(result);
                return;
            }
        };
        if let Err(error) = result {
            log::warn!("Sink rejected data: {error}");
            record_failure(failure, &error);
            break;
        }
    }
    // Closed without finalize: abandon the output.
    inner.cancel();
}

fn record_failure(failure: &Mutex<Option<String>>, error: &RefractError) {
    if let Ok(mut slot) = failure.lock() {
        slot.get_or_insert_with(|| error.to_string());
    }
}
