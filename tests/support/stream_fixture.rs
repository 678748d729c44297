//! Test fixtures utilities: load SSE byte streams and read back transcoded frames

#![allow(dead_code)]

use futures_util::StreamExt;
use rcc_shape::ShapeConfig;
use rcc_shape::streaming::transcode_stream;
use serde_json::Value;
use std::io;
use std::path::PathBuf;

pub type ByteChunks = Vec<Result<Vec<u8>, io::Error>>;

/// Absolute path of a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Load an `.sse` fixture file and split it into SSE events (separated by blank lines), returning a byte stream
pub fn load_sse_fixture_as_bytes(name: &str) -> io::Result<ByteChunks> {
    let raw = std::fs::read_to_string(fixture_path(name))?;
    let normalized = raw.replace("\r\n", "\n");
    let mut out = Vec::new();
    for chunk in normalized.split("\n\n") {
        let s = chunk.trim_end_matches('\n');
        if s.is_empty() {
            continue;
        }
        let mut owned = String::from(s);
        owned.push_str("\n\n");
        out.push(Ok(owned.into_bytes()));
    }
    Ok(out)
}

/// Re-split a byte stream into chunks of `size` bytes, ignoring event boundaries.
pub fn rechunk(chunks: ByteChunks, size: usize) -> ByteChunks {
    let joined: Vec<u8> = chunks
        .into_iter()
        .flat_map(|c| c.expect("fixture chunk"))
        .collect();
    joined
        .chunks(size.max(1))
        .map(|c| Ok(c.to_vec()))
        .collect()
}

/// One frame read back from transcoder output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutFrame {
    pub event: Option<String>,
    pub data: Value,
}

impl OutFrame {
    pub fn kind(&self) -> &str {
        self.data["type"].as_str().unwrap_or("")
    }
}

/// Parse SSE text produced by the emitter.
pub fn parse_sse_output(text: &str) -> Vec<OutFrame> {
    text.split("\n\n")
        .filter(|block| !block.is_empty())
        .map(|block| {
            let mut event = None;
            let mut data = Value::Null;
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = Some(name.to_string());
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(payload).expect("frame data is JSON");
                }
            }
            OutFrame { event, data }
        })
        .collect()
}

/// Run a byte stream through the transcoder and return the raw output text.
pub async fn transcode_to_text(bytes: ByteChunks, config: &ShapeConfig) -> String {
    let mut out = String::new();
    let mut stream = transcode_stream(futures_util::stream::iter(bytes), config);
    while let Some(frame) = stream.next().await {
        let frame = frame.expect("frame encodes");
        out.push_str(std::str::from_utf8(&frame).expect("frames are UTF-8"));
    }
    out
}

/// Run a fixture through the transcoder and parse the frames back.
pub async fn transcode_fixture(name: &str, config: &ShapeConfig) -> Vec<OutFrame> {
    let bytes = load_sse_fixture_as_bytes(name).expect("load fixture");
    parse_sse_output(&transcode_to_text(bytes, config).await)
}

/// Config with coalescing off, so every text delta is emitted as it arrives.
pub fn eager_config() -> ShapeConfig {
    ShapeConfig::default().with_coalesce_window_ms(0)
}

/// `(event type, block index)` pairs, handy for asserting ordering.
pub fn outline(frames: &[OutFrame]) -> Vec<(String, Option<u64>)> {
    frames
        .iter()
        .map(|f| (f.kind().to_string(), f.data["index"].as_u64()))
        .collect()
}
