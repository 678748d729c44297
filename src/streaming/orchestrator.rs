//! Stream orchestrator
//!
//! Wires the frame reader, the transcoder and the emitter into one driver for
//! a single streaming request. Whatever ends the request (upstream end,
//! upstream error, cancellation, a failing sink) the finalize sequence runs
//! at most once and the sink is closed exactly once.

use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use super::emitter::{SseEmitter, SseSink};
use super::frame_reader::read_frames;
use super::transcoder::Transcoder;
use crate::config::ShapeConfig;
use crate::error::{Result, ShapeError};
use crate::types::{AnthEvent, Chunk};
use crate::utils::CancelHandle;

/// SSE bytes ready to be written to an HTTP response.
pub type SseByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Stop reason reported when the upstream fails.
pub const ERROR_STOP_REASON: &str = "error";

/// Outcome of [`StreamOrchestrator::drive`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveSummary {
    /// Frames handed to the sink.
    pub frames_sent: usize,
    /// Upstream error message, if the source failed.
    pub upstream_error: Option<String>,
    /// Whether the drive stopped because of a cancel request.
    pub cancelled: bool,
}

/// Per-request reader → transcoder → emitter pipeline
#[derive(Debug)]
pub struct StreamOrchestrator {
    transcoder: Transcoder,
    emitter: SseEmitter,
    wrote_output: bool,
    cancel: Option<CancelHandle>,
}

impl StreamOrchestrator {
    pub fn new(config: &ShapeConfig) -> Self {
        Self {
            transcoder: Transcoder::new(config),
            emitter: SseEmitter::from_config(config),
            wrote_output: false,
            cancel: None,
        }
    }

    /// Stop driving when `handle` is cancelled.
    pub fn with_cancel(mut self, handle: CancelHandle) -> Self {
        self.cancel = Some(handle);
        self
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Whether any frame has been produced yet.
    pub fn wrote_output(&self) -> bool {
        self.wrote_output
    }

    pub fn process_object(&mut self, value: &Value) -> Result<Vec<Bytes>> {
        self.process_object_at(value, Instant::now())
    }

    /// Frames produced by one upstream object.
    ///
    /// OpenAI chunks go through the transcoder; anything else is passed through
    /// verbatim as a bare `data:` frame.
    pub fn process_object_at(&mut self, value: &Value, now: Instant) -> Result<Vec<Bytes>> {
        let frames = if Chunk::looks_like_chunk(value) {
            match Chunk::from_value(value) {
                Ok(chunk) => {
                    let events = self.transcoder.process_chunk_at(&chunk, now);
                    self.emitter.encode_all(&events)?
                }
                Err(e) => {
                    tracing::debug!(target: "rcc::orchestrator", error = %e, "chunk-like object did not parse; passing through");
                    vec![self.emitter.encode_passthrough(value)?]
                }
            }
        } else {
            tracing::trace!(target: "rcc::orchestrator", "passing through unknown object");
            vec![self.emitter.encode_passthrough(value)?]
        };
        self.wrote_output |= !frames.is_empty();
        Ok(frames)
    }

    /// Closing frames for a normal end of input. Empty on a second call.
    pub fn finish(&mut self) -> Result<Vec<Bytes>> {
        let events = self.transcoder.finalize();
        let frames = self.emitter.encode_all(&events)?;
        self.wrote_output |= !frames.is_empty();
        Ok(frames)
    }

    /// Closing frames after an upstream error.
    ///
    /// Before any output this is a single `message_delta` with stop reason
    /// `error`; afterwards the error is recorded as the stop reason (unless one
    /// is known) and the normal finalize sequence follows.
    pub fn fail(&mut self, error: &ShapeError) -> Result<Vec<Bytes>> {
        tracing::warn!(target: "rcc::orchestrator", error = %error, wrote_output = self.wrote_output, "upstream failed");
        if !self.wrote_output {
            self.transcoder.abandon();
            let event = AnthEvent::message_delta(Some(ERROR_STOP_REASON.to_string()), None);
            self.wrote_output = true;
            return Ok(vec![self.emitter.encode(&event)?]);
        }
        self.transcoder.record_stop_reason(ERROR_STOP_REASON);
        self.finish()
    }

    /// Read SSE bytes from `source` and drive the pipeline into `sink`.
    pub async fn run<S, B, E, K>(self, source: S, sink: &mut K) -> Result<DriveSummary>
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
        K: SseSink + ?Sized,
    {
        self.drive(read_frames(source), sink).await
    }

    /// Drive parsed upstream objects into `sink`, then close it.
    ///
    /// A sink failure stops the drive and is returned after the sink has been
    /// closed. Upstream errors are reported through the stream itself and in
    /// the summary.
    pub async fn drive<S, K>(mut self, source: S, sink: &mut K) -> Result<DriveSummary>
    where
        S: Stream<Item = Result<Value>> + Send,
        K: SseSink + ?Sized,
    {
        let mut summary = DriveSummary::default();
        let pumped = self.pump(source, sink, &mut summary).await;
        let closed = sink.close().await;
        tracing::debug!(target: "rcc::orchestrator", frames = summary.frames_sent, "sink closed");
        pumped.and(closed).map(|()| summary)
    }

    async fn pump<S, K>(&mut self, source: S, sink: &mut K, summary: &mut DriveSummary) -> Result<()>
    where
        S: Stream<Item = Result<Value>> + Send,
        K: SseSink + ?Sized,
    {
        let mut source = Box::pin(source);
        loop {
            if self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
                tracing::debug!(target: "rcc::orchestrator", "cancelled");
                summary.cancelled = true;
                break;
            }
            match source.next().await {
                Some(Ok(value)) => {
                    let frames = self.process_object(&value)?;
                    send_all(sink, frames, summary).await?;
                }
                Some(Err(e)) => {
                    summary.upstream_error = Some(e.to_string());
                    let frames = self.fail(&e)?;
                    return send_all(sink, frames, summary).await;
                }
                None => break,
            }
        }
        let frames = self.finish()?;
        send_all(sink, frames, summary).await
    }
}

async fn send_all<K>(sink: &mut K, frames: Vec<Bytes>, summary: &mut DriveSummary) -> Result<()>
where
    K: SseSink + ?Sized,
{
    for frame in frames {
        sink.send(frame).await?;
        summary.frames_sent += 1;
    }
    Ok(())
}

/// Transcode an OpenAI SSE byte stream into Anthropic SSE bytes.
pub fn transcode_stream<S, B, E>(source: S, config: &ShapeConfig) -> SseByteStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut orchestrator = StreamOrchestrator::new(config);
    let out = async_stream::stream! {
        let mut frames = read_frames(source);
        while let Some(item) = frames.next().await {
            let produced = match item {
                Ok(value) => orchestrator.process_object(&value),
                Err(e) => {
                    match orchestrator.fail(&e) {
                        Ok(closing) => {
                            for frame in closing {
                                yield Ok(frame);
                            }
                        }
                        Err(err) => yield Err(err),
                    }
                    return;
                }
            };
            match produced {
                Ok(batch) => {
                    for frame in batch {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        match orchestrator.finish() {
            Ok(closing) => {
                for frame in closing {
                    yield Ok(frame);
                }
            }
            Err(e) => yield Err(e),
        }
    };
    Box::pin(out)
}

/// Transcode a live upstream response.
pub fn transcode_response(response: reqwest::Response, config: &ShapeConfig) -> SseByteStream {
    transcode_stream(response.bytes_stream(), config)
}
