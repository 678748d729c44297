//! Driving a full request into a downstream sink

use bytes::Bytes;
use rcc_shape::streaming::{ChannelSink, StreamOrchestrator, sse_response_headers_for};
use rcc_shape::utils::CancelHandle;
use rcc_shape::{ShapeConfig, SseFraming};
use tracing_test::traced_test;

use crate::support;

#[tokio::test]
async fn run_into_channel_sink() {
    let bytes = support::load_sse_fixture_as_bytes("openai/text_then_tool.sse")
        .expect("load fixture");
    let (mut sink, mut rx) = ChannelSink::channel(4);

    let reader = tokio::spawn(async move {
        let mut frames: Vec<Bytes> = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    });

    let summary = StreamOrchestrator::new(&support::eager_config())
        .run(futures_util::stream::iter(bytes), &mut sink)
        .await
        .expect("drive succeeds");
    drop(sink);

    let frames = reader.await.expect("reader task");
    assert_eq!(summary.frames_sent, frames.len());
    assert!(summary.upstream_error.is_none());
    assert!(!summary.cancelled);

    let text: String = frames.iter().map(|f| String::from_utf8_lossy(f)).collect();
    let parsed = support::parse_sse_output(&text);
    assert_eq!(parsed.first().map(|f| f.kind()), Some("message_start"));
    assert_eq!(parsed.last().map(|f| f.kind()), Some("message_stop"));
}

#[tokio::test]
async fn data_only_framing_drops_event_lines() {
    let config = support::eager_config().with_framing(SseFraming::DataOnly);
    let frames = support::transcode_fixture("openai/parallel_tools.sse", &config).await;
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f.event.is_none()));
    assert_eq!(frames.last().map(|f| f.kind()), Some("message_stop"));
}

#[tokio::test]
#[traced_test]
async fn cancelled_drive_still_terminates_and_logs() {
    let bytes = support::load_sse_fixture_as_bytes("openai/parallel_tools.sse")
        .expect("load fixture");
    let handle = CancelHandle::new();
    handle.cancel();

    let mut sink = rcc_shape::streaming::BufferSink::new();
    let summary = StreamOrchestrator::new(&support::eager_config())
        .with_cancel(handle)
        .run(futures_util::stream::iter(bytes), &mut sink)
        .await
        .expect("drive succeeds");

    assert!(summary.cancelled);
    assert_eq!(sink.close_count(), 1);
    let parsed = support::parse_sse_output(&sink.text());
    assert_eq!(
        parsed.iter().map(|f| f.kind()).collect::<Vec<_>>(),
        vec!["message_start", "message_delta", "message_stop"]
    );
    assert!(logs_contain("cancelled"));
}

#[test]
fn response_headers_follow_config() {
    let config = ShapeConfig::default().with_request_id_header("x-correlation-id");
    let headers = sse_response_headers_for(&config, "req-7").expect("valid headers");
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["x-correlation-id"], "req-7");
    assert!(headers.get("x-request-id").is_none());
}
