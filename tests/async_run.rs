//! Running the scheduler from async code.

#![cfg(feature = "async")]

mod common;

use common::{Event, EventLog, MockSink, MockSource, MockTransform, frame_numbers, shared};
use refract::{BatchScheduler, CancellationToken, RefractError, TransformOptions};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_async_completes_in_order() {
    let log = EventLog::new();
    BatchScheduler::new(
        MockSource::new(12, &log),
        MockSink::new(&log),
        shared(MockTransform::new().with_latency(common::scattered_latency)),
        &TransformOptions::new().with_workers(5),
    )
    .run_async()
    .await
    .unwrap();

    assert_eq!(log.frames(), frame_numbers(1..=12));
    assert_eq!(log.count(&Event::Finalize), 1);
}

#[tokio::test]
async fn run_async_reports_cancellation() {
    let log = EventLog::new();
    let token = CancellationToken::new();
    token.cancel();

    let result = BatchScheduler::new(
        MockSource::new(4, &log),
        MockSink::new(&log),
        shared(MockTransform::new()),
        &TransformOptions::new().with_cancellation(token),
    )
    .run_async()
    .await;

    assert!(matches!(result, Err(RefractError::Cancelled)));
    assert_eq!(log.count(&Event::SinkCancel), 1);
}
