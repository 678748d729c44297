//! SSE emitter and sinks
//!
//! Serializes [`AnthEvent`]s into SSE frames and delivers them to a sink.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::{
    CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::{DEFAULT_REQUEST_ID_HEADER, ShapeConfig, SseFraming};
use crate::error::{Result, ShapeError};
use crate::types::AnthEvent;

/// Frame encoder for outgoing SSE
#[derive(Debug, Clone, Copy, Default)]
pub struct SseEmitter {
    framing: SseFraming,
}

impl SseEmitter {
    pub fn new(framing: SseFraming) -> Self {
        Self { framing }
    }

    pub fn from_config(config: &ShapeConfig) -> Self {
        Self::new(config.framing)
    }

    pub fn framing(&self) -> SseFraming {
        self.framing
    }

    /// Encode one event as a complete frame.
    pub fn encode(&self, event: &AnthEvent) -> Result<Bytes> {
        let data = serde_json::to_vec(event)?;
        let mut out = BytesMut::with_capacity(data.len() + 40);
        if self.framing == SseFraming::EventAndData {
            out.put_slice(b"event: ");
            out.put_slice(event.event_name().as_bytes());
            out.put_u8(b'\n');
        }
        out.put_slice(b"data: ");
        out.put_slice(&data);
        out.put_slice(b"\n\n");
        Ok(out.freeze())
    }

    /// Encode each event as its own frame.
    pub fn encode_all(&self, events: &[AnthEvent]) -> Result<Vec<Bytes>> {
        events.iter().map(|e| self.encode(e)).collect()
    }

    /// Forward an unrecognized object verbatim as a bare `data:` frame.
    pub fn encode_passthrough(&self, value: &Value) -> Result<Bytes> {
        let data = serde_json::to_vec(value)?;
        let mut out = BytesMut::with_capacity(data.len() + 8);
        out.put_slice(b"data: ");
        out.put_slice(&data);
        out.put_slice(b"\n\n");
        Ok(out.freeze())
    }
}

/// Headers for an SSE response, with `x-request-id` correlation.
pub fn sse_response_headers(request_id: &str) -> Result<HeaderMap> {
    sse_response_headers_named(DEFAULT_REQUEST_ID_HEADER, request_id)
}

/// Headers for an SSE response using the configured correlation header.
pub fn sse_response_headers_for(config: &ShapeConfig, request_id: &str) -> Result<HeaderMap> {
    sse_response_headers_named(&config.request_id_header, request_id)
}

fn sse_response_headers_named(header: &str, request_id: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let name = HeaderName::from_bytes(header.as_bytes())
        .map_err(|e| ShapeError::Config(format!("invalid request id header `{header}`: {e}")))?;
    let value = HeaderValue::from_str(request_id)
        .map_err(|e| ShapeError::Config(format!("invalid request id `{request_id}`: {e}")))?;
    headers.insert(name, value);
    Ok(headers)
}

/// Downstream destination for SSE frames
///
/// `close` is the terminal call; drivers invoke it exactly once.
#[async_trait]
pub trait SseSink: Send {
    async fn send(&mut self, frame: Bytes) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Sink backed by a bounded tokio channel.
///
/// Sending fails once the receiver is dropped; closing drops the sender so
/// the receiver observes end of stream.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink and the receiver that reads from it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SseSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ShapeError::Sink("sink already closed".to_string()))?;
        tx.send(frame)
            .await
            .map_err(|_| ShapeError::Sink("downstream receiver dropped".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

/// In-memory sink collecting every frame
#[derive(Debug, Default)]
pub struct BufferSink {
    frames: Vec<Bytes>,
    close_count: usize,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// All frames concatenated as text.
    pub fn text(&self) -> String {
        self.frames
            .iter()
            .map(|f| String::from_utf8_lossy(f))
            .collect()
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.close_count
    }

    pub fn is_closed(&self) -> bool {
        self.close_count > 0
    }
}

#[async_trait]
impl SseSink for BufferSink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(ShapeError::Sink("sink already closed".to_string()));
        }
        self.frames.push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.close_count += 1;
        Ok(())
    }
}
