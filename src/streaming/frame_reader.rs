//! SSE frame reader
//!
//! Turns an OpenAI-style SSE byte stream into parsed JSON payloads.
//!
//! - bytes are buffered until a full line is available, so a payload (or a
//!   multi-byte character) split across network chunks is never truncated
//! - every `data:` line yields one payload; `data: [DONE]` ends the stream
//! - `event:`, `id:`, `retry:` and `:` comment lines are ignored
//! - a data line that is not JSON is dropped
//! - a trailing partial line without a newline is discarded at end of input

use std::fmt::Display;
use std::pin::Pin;

use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::error::{Result, ShapeError};

/// JSON payloads read from an upstream SSE stream.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Marker payload that terminates an OpenAI stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Line decoder over raw SSE bytes
///
/// Yields lines without their `\n` / `\r\n` terminator.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    /// Bytes already searched for a newline.
    scanned: usize,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for SseLineDecoder {
    type Item = String;
    type Error = ShapeError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        self.scanned = self.scanned.min(buf.len());
        let Some(offset) = buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = buf.len();
            return Ok(None);
        };
        let newline = self.scanned + offset;
        self.scanned = 0;

        let mut line = buf.split_to(newline + 1);
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if !buf.is_empty() {
            tracing::debug!(target: "rcc::sse", bytes = buf.len(), "discarding partial trailing line");
            buf.clear();
        }
        self.scanned = 0;
        Ok(None)
    }
}

/// One meaningful SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Data(Value),
    Done,
}

/// Push-mode frame reader
///
/// Feed chunks with [`FrameReader::push`]; call [`FrameReader::finish`] at end
/// of input. After `[DONE]` (or `finish`) further input is ignored.
#[derive(Debug, Default)]
pub struct FrameReader {
    decoder: SseLineDecoder,
    buffer: BytesMut,
    done: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stream has completed (`[DONE]` seen or `finish` called).
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume one chunk of bytes and return the frames it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Ok(Some(line)) = self.decoder.decode(&mut self.buffer) {
            if let Some(frame) = parse_line(&line) {
                let done = frame == SseFrame::Done;
                frames.push(frame);
                if done {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// Signal end of input. Complete lines still buffered are processed; a
    /// partial trailing line is discarded. Returns nothing on a second call.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        let mut frames = Vec::new();
        while let Ok(Some(line)) = self.decoder.decode_eof(&mut self.buffer) {
            if let Some(frame) = parse_line(&line) {
                let done = frame == SseFrame::Done;
                frames.push(frame);
                if done {
                    break;
                }
            }
        }
        self.buffer.clear();
        self.done = true;
        frames
    }
}

/// Interpret one SSE line.
fn parse_line(line: &str) -> Option<SseFrame> {
    let rest = line.strip_prefix("data:")?;
    let payload = rest.strip_prefix(' ').unwrap_or(rest).trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_MARKER {
        return Some(SseFrame::Done);
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(SseFrame::Data(value)),
        Err(e) => {
            tracing::debug!(target: "rcc::sse", error = %e, "dropping non-JSON data line");
            None
        }
    }
}

/// Read JSON payloads from a byte-chunk stream.
///
/// The returned stream ends after `[DONE]`, at end of input, or right after
/// yielding a single `ShapeError::Upstream` for a source error.
pub fn read_frames<S, B, E>(source: S) -> FrameStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let out = async_stream::stream! {
        let mut source = Box::pin(source);
        let mut reader = FrameReader::new();

        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    for frame in reader.push(chunk.as_ref()) {
                        match frame {
                            SseFrame::Data(value) => yield Ok(value),
                            SseFrame::Done => return,
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "rcc::sse", error = %e, "upstream stream error");
                    yield Err(ShapeError::Upstream(e.to_string()));
                    return;
                }
            }
        }

        for frame in reader.finish() {
            if let SseFrame::Data(value) = frame {
                yield Ok(value);
            }
        }
    };

    Box::pin(out)
}
