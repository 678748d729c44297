//! OpenAI → Anthropic streaming transcoder
//!
//! A per-request state machine that turns `chat.completion.chunk` objects into
//! Anthropic Messages streaming events.
//!
//! Block layout: text always uses index 0; each tool call gets its own block
//! at `tool_index + 1`, or the next free index when that one is taken. A block
//! index is never reused and a closed block is never reopened; late events
//! for a closed block are dropped.
//!
//! Text deltas are coalesced: a delta is flushed immediately when no flush
//! happened yet or at least one coalescing window has passed since the last
//! one; otherwise it is buffered until the next qualifying delta, a tool event,
//! a finish reason or [`Transcoder::finalize`]. Tool-argument fragments are
//! forwarded verbatim and never coalesced.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::config::ShapeConfig;
use crate::types::{
    AnthEvent, AnthUsage, Chunk, ChunkUsage, MessageStart, ToolCallDelta, map_finish_reason,
};
use crate::utils::{new_call_id, new_message_id};

/// Text block index.
pub const TEXT_BLOCK_INDEX: usize = 0;

/// Tool name used when a call never received one.
pub const FALLBACK_TOOL_NAME: &str = "tool";

/// Stop reason used when the upstream never reported one.
pub const DEFAULT_STOP_REASON: &str = "end_turn";

/// Lifecycle of a transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderState {
    NotStarted,
    Started,
    Finalizing,
    Done,
}

/// Per-tool-call accumulator
#[derive(Debug, Clone, Default)]
pub struct ToolCallAccum {
    pub id: Option<String>,
    pub name: Option<String>,
    pub block_index: usize,
    /// Every argument fragment seen so far, concatenated.
    pub argument_buffer: String,
    /// Fragments that arrived before the block could start.
    pending: Vec<String>,
    pub started: bool,
    pub stopped: bool,
}

impl ToolCallAccum {
    fn new(block_index: usize) -> Self {
        Self {
            block_index,
            ..Self::default()
        }
    }

    /// Emit `content_block_start` and release held fragments.
    fn start(&mut self, fallback_name: Option<&str>, out: &mut Vec<AnthEvent>) {
        if self.started {
            return;
        }
        let name = match (&self.name, fallback_name) {
            (Some(name), _) => name.clone(),
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => return,
        };
        let id = self.id.get_or_insert_with(new_call_id).clone();
        out.push(AnthEvent::tool_start(self.block_index, id, name));
        self.started = true;
        for fragment in self.pending.drain(..) {
            out.push(AnthEvent::input_json_delta(self.block_index, fragment));
        }
    }
}

/// Streaming transcoder for one request
#[derive(Debug)]
pub struct Transcoder {
    window: Duration,
    state: TranscoderState,

    message_id: Option<String>,
    model: Option<String>,
    created: Option<i64>,

    text_open: bool,
    text_closed: bool,
    text_buffer: String,
    last_flush: Option<Instant>,

    /// Keyed by upstream `tool_calls[].index`.
    tools: BTreeMap<u32, ToolCallAccum>,
    used_indices: BTreeSet<usize>,

    stop_reason: Option<String>,
    pending_usage: Option<AnthUsage>,
    usage_sent: bool,
}

impl Transcoder {
    pub fn new(config: &ShapeConfig) -> Self {
        Self::with_window(config.coalesce_window())
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            state: TranscoderState::NotStarted,
            message_id: None,
            model: None,
            created: None,
            text_open: false,
            text_closed: false,
            text_buffer: String::new(),
            last_flush: None,
            tools: BTreeMap::new(),
            used_indices: BTreeSet::new(),
            stop_reason: None,
            pending_usage: None,
            usage_sent: false,
        }
    }

    pub fn state(&self) -> TranscoderState {
        self.state
    }

    /// Indices of blocks currently open, ascending.
    pub fn open_blocks(&self) -> Vec<usize> {
        let mut open: Vec<usize> = self
            .tools
            .values()
            .filter(|t| t.started && !t.stopped)
            .map(|t| t.block_index)
            .collect();
        if self.text_open {
            open.push(TEXT_BLOCK_INDEX);
        }
        open.sort_unstable();
        open
    }

    /// The stop reason recorded so far, if any.
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Record a stop reason unless one is already known.
    pub fn record_stop_reason(&mut self, reason: &str) {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason.to_string());
        }
    }

    /// Mark the transcoder finished without emitting anything.
    pub fn abandon(&mut self) {
        self.state = TranscoderState::Done;
    }

    pub fn process_chunk(&mut self, chunk: &Chunk) -> Vec<AnthEvent> {
        self.process_chunk_at(chunk, Instant::now())
    }

    /// Process one chunk as if it arrived at `now`.
    pub fn process_chunk_at(&mut self, chunk: &Chunk, now: Instant) -> Vec<AnthEvent> {
        let mut out = Vec::new();
        if self.state == TranscoderState::Done {
            tracing::debug!(target: "rcc::transcode", "chunk after finalize ignored");
            return out;
        }

        if self.state == TranscoderState::NotStarted {
            self.capture_metadata(chunk);
        }

        if let Some(choice) = chunk.first_choice() {
            if let Some(delta) = &choice.delta {
                if delta.role.as_deref() == Some("assistant") {
                    self.ensure_started(&mut out);
                }
                if let Some(text) = delta.content.as_deref()
                    && !text.is_empty()
                {
                    self.on_text(text, now, &mut out);
                }
                for tc in &delta.tool_calls {
                    self.on_tool_delta(tc, now, &mut out);
                }
            }
            if let Some(reason) = choice.finish_reason.as_deref()
                && !reason.is_empty()
            {
                self.on_finish(reason, now, &mut out);
            }
        }

        if let Some(usage) = chunk.usage {
            self.on_usage(usage, &mut out);
        }

        out
    }

    /// Close everything and terminate the message. Runs once; later calls
    /// return nothing.
    pub fn finalize(&mut self) -> Vec<AnthEvent> {
        let mut out = Vec::new();
        if self.state == TranscoderState::Done {
            return out;
        }
        self.ensure_started(&mut out);
        self.state = TranscoderState::Finalizing;

        self.close_all(Instant::now(), &mut out);

        if !self.usage_sent {
            let stop = self
                .stop_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());
            out.push(AnthEvent::message_delta(Some(stop), self.pending_usage.take()));
            self.usage_sent = true;
        }
        out.push(AnthEvent::MessageStop);

        self.state = TranscoderState::Done;
        tracing::debug!(target: "rcc::transcode", stop_reason = ?self.stop_reason, "stream finalized");
        out
    }

    fn capture_metadata(&mut self, chunk: &Chunk) {
        if self.message_id.is_none() {
            self.message_id = chunk.id.clone().filter(|s| !s.is_empty());
        }
        if self.model.is_none() {
            self.model = chunk.model.clone().filter(|s| !s.is_empty());
        }
        if self.created.is_none() {
            self.created = chunk.created;
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<AnthEvent>) {
        if self.state != TranscoderState::NotStarted {
            return;
        }
        let message = MessageStart::new(
            self.message_id.clone().unwrap_or_else(new_message_id),
            self.model.clone().unwrap_or_else(|| "unknown".to_string()),
            self.created
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        );
        out.push(AnthEvent::MessageStart { message });
        self.state = TranscoderState::Started;
    }

    fn on_text(&mut self, text: &str, now: Instant, out: &mut Vec<AnthEvent>) {
        if self.text_closed {
            tracing::debug!(target: "rcc::transcode", "text after text block closed dropped");
            return;
        }
        self.ensure_started(out);
        if !self.text_open {
            out.push(AnthEvent::text_start(TEXT_BLOCK_INDEX));
            self.text_open = true;
            self.used_indices.insert(TEXT_BLOCK_INDEX);
        }
        self.text_buffer.push_str(text);

        let due = match self.last_flush {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.window,
        };
        if due {
            self.flush_text(now, out);
        }
    }

    fn flush_text(&mut self, now: Instant, out: &mut Vec<AnthEvent>) {
        if self.text_buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text_buffer);
        out.push(AnthEvent::text_delta(TEXT_BLOCK_INDEX, text));
        self.last_flush = Some(now);
    }

    fn close_text(&mut self, out: &mut Vec<AnthEvent>) {
        if self.text_open {
            out.push(AnthEvent::block_stop(TEXT_BLOCK_INDEX));
            self.text_open = false;
            self.text_closed = true;
        }
    }

    /// Upstream index of a tool delta. Providers that omit `index` are matched
    /// by id, otherwise the most recent call continues.
    fn tool_key(&self, tc: &ToolCallDelta) -> u32 {
        if let Some(index) = tc.index {
            return index;
        }
        if let Some(id) = tc.id.as_deref() {
            if let Some((key, _)) = self.tools.iter().find(|(_, t)| t.id.as_deref() == Some(id)) {
                return *key;
            }
            return self.tools.keys().next_back().map_or(0, |k| k + 1);
        }
        self.tools.keys().next_back().copied().unwrap_or(0)
    }

    fn allocate_block(&mut self, key: u32) -> usize {
        let preferred = key as usize + 1;
        let index = if self.used_indices.contains(&preferred) {
            self.used_indices
                .iter()
                .next_back()
                .map_or(preferred, |max| max + 1)
        } else {
            preferred
        };
        self.used_indices.insert(index);
        index
    }

    fn on_tool_delta(&mut self, tc: &ToolCallDelta, now: Instant, out: &mut Vec<AnthEvent>) {
        let key = self.tool_key(tc);
        if self.tools.get(&key).is_some_and(|t| t.stopped) {
            tracing::debug!(target: "rcc::transcode", key, "tool delta for closed block dropped");
            return;
        }

        self.ensure_started(out);
        self.flush_text(now, out);

        if !self.tools.contains_key(&key) {
            let block = self.allocate_block(key);
            self.tools.insert(key, ToolCallAccum::new(block));
        }
        let Some(accum) = self.tools.get_mut(&key) else {
            return;
        };

        if accum.id.is_none() {
            accum.id = tc.id.clone().filter(|s| !s.is_empty());
        }
        let function = tc.function.as_ref();
        if accum.name.is_none() {
            accum.name = function
                .and_then(|f| f.name.clone())
                .filter(|s| !s.is_empty());
        }

        accum.start(None, out);

        if let Some(fragment) = function.and_then(|f| f.arguments.as_deref())
            && !fragment.is_empty()
        {
            accum.argument_buffer.push_str(fragment);
            if accum.started {
                out.push(AnthEvent::input_json_delta(accum.block_index, fragment));
            } else {
                accum.pending.push(fragment.to_string());
            }
        }
    }

    fn close_tools(&mut self, out: &mut Vec<AnthEvent>) {
        let mut open: Vec<&mut ToolCallAccum> =
            self.tools.values_mut().filter(|t| !t.stopped).collect();
        open.sort_by_key(|t| t.block_index);
        for accum in open {
            accum.start(Some(FALLBACK_TOOL_NAME), out);
            out.push(AnthEvent::block_stop(accum.block_index));
            accum.stopped = true;
        }
    }

    fn close_all(&mut self, now: Instant, out: &mut Vec<AnthEvent>) {
        self.flush_text(now, out);
        self.close_text(out);
        self.close_tools(out);
    }

    fn on_finish(&mut self, reason: &str, now: Instant, out: &mut Vec<AnthEvent>) {
        self.ensure_started(out);
        self.close_all(now, out);
        self.stop_reason = Some(map_finish_reason(reason));
        if let Some(usage) = self.pending_usage.take()
            && !self.usage_sent
        {
            out.push(AnthEvent::message_delta(self.stop_reason.clone(), Some(usage)));
            self.usage_sent = true;
        }
    }

    /// Usage goes out once the stop reason is known; earlier usage (running
    /// totals, or a choice-less chunk ahead of the finish) is held.
    fn on_usage(&mut self, usage: ChunkUsage, out: &mut Vec<AnthEvent>) {
        let usage = AnthUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        };
        if self.usage_sent {
            return;
        }
        if self.stop_reason.is_some() {
            self.ensure_started(out);
            out.push(AnthEvent::message_delta(self.stop_reason.clone(), Some(usage)));
            self.usage_sent = true;
        } else {
            self.pending_usage = Some(usage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockDelta, ContentBlock};
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn chunk(v: Value) -> Chunk {
        Chunk::from_value(&v).unwrap()
    }

    fn text(s: &str) -> Chunk {
        chunk(json!({"choices": [{"delta": {"content": s}}]}))
    }

    fn tool(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> Chunk {
        let mut function = serde_json::Map::new();
        if let Some(name) = name {
            function.insert("name".into(), json!(name));
        }
        if let Some(args) = args {
            function.insert("arguments".into(), json!(args));
        }
        let mut call = json!({"index": index, "function": function});
        if let Some(id) = id {
            call["id"] = json!(id);
        }
        chunk(json!({"choices": [{"delta": {"tool_calls": [call]}}]}))
    }

    fn finish(reason: &str) -> Chunk {
        chunk(json!({"choices": [{"delta": {}, "finish_reason": reason}]}))
    }

    fn names(events: &[AnthEvent]) -> Vec<&'static str> {
        events.iter().map(AnthEvent::event_name).collect()
    }

    fn text_deltas(events: &[AnthEvent]) -> usize {
        events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    AnthEvent::ContentBlockDelta {
                        delta: BlockDelta::TextDelta { .. },
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn simple_text_stream() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        let mut events = t.process_chunk(&chunk(json!({
            "id": "chatcmpl-9", "model": "gpt-x", "created": 1700000000,
            "choices": [{"delta": {"role": "assistant"}}]
        })));
        events.extend(t.process_chunk(&text("Hel")));
        events.extend(t.process_chunk(&text("lo")));
        events.extend(t.process_chunk(&finish("stop")));
        events.extend(t.finalize());

        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        match &events[0] {
            AnthEvent::MessageStart { message } => {
                assert_eq!(message.id, "chatcmpl-9");
                assert_eq!(message.model, "gpt-x");
                assert_eq!(message.created, 1700000000);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            events[5],
            AnthEvent::message_delta(Some("end_turn".to_string()), None)
        );
        assert_eq!(t.state(), TranscoderState::Done);
    }

    #[test]
    fn content_before_role_still_starts_message() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        let events = t.process_chunk(&text("hi"));
        assert_eq!(names(&events)[0], "message_start");
        match &events[0] {
            AnthEvent::MessageStart { message } => {
                assert!(message.id.starts_with("msg_"));
                assert_eq!(message.model, "unknown");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn coalescing_window_batches_rapid_deltas() {
        let t0 = Instant::now();

        let mut t = Transcoder::with_window(Duration::from_millis(1000));
        let mut events = t.process_chunk_at(&text("a"), t0);
        events.extend(t.process_chunk_at(&text("b"), t0 + Duration::from_millis(50)));
        assert_eq!(text_deltas(&events), 1);
        let tail = t.finalize();
        assert_eq!(text_deltas(&tail), 1);
        assert!(tail.contains(&AnthEvent::text_delta(0, "b")));

        let mut t = Transcoder::with_window(Duration::from_millis(1000));
        let mut events = t.process_chunk_at(&text("a"), t0);
        events.extend(t.process_chunk_at(&text("b"), t0 + Duration::from_millis(1500)));
        assert_eq!(text_deltas(&events), 2);
    }

    #[test]
    fn buffered_text_flushes_in_order_on_next_due_delta() {
        let t0 = Instant::now();
        let mut t = Transcoder::with_window(Duration::from_millis(100));
        let mut events = t.process_chunk_at(&text("1"), t0);
        events.extend(t.process_chunk_at(&text("2"), t0 + Duration::from_millis(10)));
        events.extend(t.process_chunk_at(&text("3"), t0 + Duration::from_millis(20)));
        events.extend(t.process_chunk_at(&text("4"), t0 + Duration::from_millis(150)));
        let deltas: Vec<AnthEvent> = events
            .into_iter()
            .filter(|e| matches!(e, AnthEvent::ContentBlockDelta { .. }))
            .collect();
        assert_eq!(
            deltas,
            vec![AnthEvent::text_delta(0, "1"), AnthEvent::text_delta(0, "234")]
        );
    }

    #[test]
    fn tool_call_blocks_and_arguments() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        let mut events = t.process_chunk(&tool(0, Some("call_a"), Some("shell"), Some("")));
        events.extend(t.process_chunk(&tool(0, None, None, Some("{\"comm"))));
        events.extend(t.process_chunk(&tool(0, None, None, Some("and\":[\"ls\"]}"))));
        events.extend(t.process_chunk(&finish("tool_calls")));
        events.extend(t.finalize());

        assert_eq!(
            events[1],
            AnthEvent::ContentBlockStart {
                index: 1,
                content_block: ContentBlock::ToolUse {
                    id: "call_a".to_string(),
                    name: "shell".to_string(),
                    input: json!({}),
                },
            }
        );
        assert_eq!(events[2], AnthEvent::input_json_delta(1, "{\"comm"));
        assert_eq!(events[3], AnthEvent::input_json_delta(1, "and\":[\"ls\"]}"));
        assert_eq!(events[4], AnthEvent::block_stop(1));
        assert_eq!(
            events[5],
            AnthEvent::message_delta(Some("tool_use".to_string()), None)
        );
        assert_eq!(events[6], AnthEvent::MessageStop);
    }

    #[test]
    fn arguments_before_name_are_held_then_released() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        let first = t.process_chunk(&tool(0, None, None, Some("{\"a\":")));
        assert_eq!(names(&first), vec!["message_start"]);
        let second = t.process_chunk(&tool(0, Some("call_z"), Some("read"), Some("1}")));
        assert_eq!(
            names(&second),
            vec!["content_block_start", "content_block_delta", "content_block_delta"]
        );
        assert_eq!(second[1], AnthEvent::input_json_delta(1, "{\"a\":"));
        assert_eq!(second[2], AnthEvent::input_json_delta(1, "1}"));
    }

    #[test]
    fn nameless_tool_gets_fallback_name_at_close() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&tool(0, None, None, Some("{}")));
        let events = t.finalize();
        match &events[0] {
            AnthEvent::ContentBlockStart {
                content_block: ContentBlock::ToolUse { name, .. },
                ..
            } => assert_eq!(name, FALLBACK_TOOL_NAME),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(events[1], AnthEvent::input_json_delta(1, "{}"));
        assert_eq!(events[2], AnthEvent::block_stop(1));
    }

    #[test]
    fn pending_text_flushes_before_tool_events() {
        let t0 = Instant::now();
        let mut t = Transcoder::with_window(Duration::from_secs(10));
        t.process_chunk_at(&text("a"), t0);
        let events = t.process_chunk_at(&text("b"), t0);
        assert!(events.is_empty());
        let events = t.process_chunk_at(&tool(0, Some("c"), Some("x"), None), t0);
        assert_eq!(events[0], AnthEvent::text_delta(0, "b"));
        assert_eq!(names(&events)[1], "content_block_start");
    }

    #[test]
    fn closed_blocks_are_never_reopened() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&text("hi"));
        t.process_chunk(&tool(0, Some("c"), Some("x"), Some("{}")));
        t.process_chunk(&finish("stop"));
        assert!(t.process_chunk(&text("late")).is_empty());
        assert!(t.process_chunk(&tool(0, None, None, Some("x"))).is_empty());
        assert!(t.open_blocks().is_empty());
    }

    #[test]
    fn colliding_block_index_moves_to_next_free() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&tool(1, Some("a"), Some("one"), None));
        let events = t.process_chunk(&tool(0, Some("b"), Some("two"), None));
        let AnthEvent::ContentBlockStart { index, .. } = &events[0] else {
            panic!("unexpected {:?}", events[0]);
        };
        // index 1 is free, upstream index 0 prefers 1
        assert_eq!(*index, 1);
        let events = t.process_chunk(&tool(1, None, None, Some("{}")));
        assert_eq!(events[0], AnthEvent::input_json_delta(2, "{}"));

        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&tool(0, Some("a"), Some("one"), None));
        t.process_chunk(&tool(5, Some("b"), Some("two"), None));
        t.process_chunk(&tool(0, None, None, None));
        assert_eq!(t.open_blocks(), vec![1, 6]);
    }

    #[test]
    fn usage_after_finish_is_sent_once() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&text("x"));
        t.process_chunk(&finish("length"));
        let events = t.process_chunk(&chunk(json!({
            "choices": [],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2}
        })));
        assert_eq!(
            events,
            vec![AnthEvent::message_delta(
                Some("max_tokens".to_string()),
                Some(AnthUsage {
                    input_tokens: 10,
                    output_tokens: 2
                })
            )]
        );
        assert_eq!(t.finalize(), vec![AnthEvent::MessageStop]);
    }

    #[test]
    fn early_usage_is_held_for_finalize() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        let events = t.process_chunk(&chunk(json!({
            "choices": [{"delta": {"content": "x"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1}
        })));
        assert!(!names(&events).contains(&"message_delta"));
        let tail = t.finalize();
        assert!(tail.contains(&AnthEvent::message_delta(
            Some("end_turn".to_string()),
            Some(AnthUsage {
                input_tokens: 1,
                output_tokens: 1
            })
        )));
    }

    #[test]
    fn choiceless_usage_before_finish_waits_for_stop_reason() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&chunk(json!({"choices": [{"delta": {"role": "assistant", "content": "hi"}}]})));
        let early = t.process_chunk(&chunk(json!({
            "choices": [],
            "usage": {"prompt_tokens": 4, "completion_tokens": 3}
        })));
        assert!(early.is_empty());

        let at_finish = t.process_chunk(&finish("tool_calls"));
        assert_eq!(
            at_finish,
            vec![
                AnthEvent::block_stop(0),
                AnthEvent::message_delta(
                    Some("tool_use".to_string()),
                    Some(AnthUsage {
                        input_tokens: 4,
                        output_tokens: 3
                    })
                ),
            ]
        );
        assert_eq!(t.finalize(), vec![AnthEvent::MessageStop]);
    }

    #[test]
    fn choiceless_usage_without_finish_is_sent_by_finalize() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&text("x"));
        t.process_chunk(&chunk(json!({
            "choices": [],
            "usage": {"prompt_tokens": 4, "completion_tokens": 3}
        })));
        assert_eq!(
            t.finalize(),
            vec![
                AnthEvent::block_stop(0),
                AnthEvent::message_delta(
                    Some("end_turn".to_string()),
                    Some(AnthUsage {
                        input_tokens: 4,
                        output_tokens: 3
                    })
                ),
                AnthEvent::MessageStop,
            ]
        );
    }

    #[test]
    fn finalize_on_empty_input_is_well_formed_and_runs_once() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        let events = t.finalize();
        assert_eq!(
            names(&events),
            vec!["message_start", "message_delta", "message_stop"]
        );
        assert!(t.finalize().is_empty());
        assert!(t.process_chunk(&text("late")).is_empty());
    }

    #[test]
    fn finish_reason_tool_calls_maps_to_tool_use() {
        let mut t = Transcoder::with_window(Duration::ZERO);
        t.process_chunk(&finish("tool_calls"));
        let events = t.finalize();
        assert!(events.contains(&AnthEvent::message_delta(Some("tool_use".to_string()), None)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Role,
        Text(String),
        Tool {
            index: u32,
            with_id: bool,
            with_name: bool,
            args: Option<String>,
        },
        Finish(&'static str),
        Usage { choiceless: bool },
        Wait(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Role),
            "[a-z {}\"]{0,6}".prop_map(Op::Text),
            (0u32..4, any::<bool>(), any::<bool>(), proptest::option::of("[a-z{}:\",]{0,5}"))
                .prop_map(|(index, with_id, with_name, args)| Op::Tool {
                    index,
                    with_id,
                    with_name,
                    args
                }),
            prop::sample::select(vec!["stop", "length", "tool_calls", "weird"]).prop_map(Op::Finish),
            any::<bool>().prop_map(|choiceless| Op::Usage { choiceless }),
            (0u64..2000).prop_map(Op::Wait),
        ]
    }

    fn op_chunk(op: &Op) -> Option<Chunk> {
        Some(match op {
            Op::Role => chunk(json!({"choices": [{"delta": {"role": "assistant"}}]})),
            Op::Text(s) => text(s),
            Op::Tool {
                index,
                with_id,
                with_name,
                args,
            } => tool(
                *index,
                with_id.then_some("call_p"),
                with_name.then_some("fn"),
                args.as_deref(),
            ),
            Op::Finish(reason) => finish(reason),
            Op::Usage { choiceless } => {
                let choices = if *choiceless {
                    json!([])
                } else {
                    json!([{"delta": {}}])
                };
                chunk(json!({"choices": choices, "usage": {"prompt_tokens": 1, "completion_tokens": 2}}))
            }
            Op::Wait(_) => return None,
        })
    }

    /// Check the sequence-level invariants of a finalized stream.
    fn assert_well_formed(events: &[AnthEvent]) -> Result<(), TestCaseError> {
        let starts = events
            .iter()
            .filter(|e| matches!(e, AnthEvent::MessageStart { .. }))
            .count();
        prop_assert_eq!(starts, 1);
        prop_assert!(
            matches!(events.first(), Some(AnthEvent::MessageStart { .. })),
            "first event is not message_start"
        );
        let stops = events
            .iter()
            .filter(|e| matches!(e, AnthEvent::MessageStop))
            .count();
        prop_assert_eq!(stops, 1);
        prop_assert!(matches!(events.last(), Some(AnthEvent::MessageStop)));

        let mut open = BTreeSet::new();
        let mut closed = BTreeSet::new();
        for e in events {
            match e {
                AnthEvent::ContentBlockStart { index, .. } => {
                    prop_assert!(!closed.contains(index), "reopened {}", index);
                    prop_assert!(open.insert(*index), "started twice {}", index);
                }
                AnthEvent::ContentBlockDelta { index, .. } => {
                    prop_assert!(open.contains(index), "delta outside block {}", index);
                }
                AnthEvent::ContentBlockStop { index } => {
                    prop_assert!(open.remove(index), "stop without start {}", index);
                    closed.insert(*index);
                }
                _ => {}
            }
        }
        prop_assert!(open.is_empty(), "unclosed blocks {:?}", open);
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_any_sequence_finalizes_well_formed(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let mut t = Transcoder::with_window(Duration::from_millis(500));
            let mut now = Instant::now();
            let mut events = Vec::new();
            for op in &ops {
                if let Op::Wait(ms) = op {
                    now += Duration::from_millis(*ms);
                }
                if let Some(c) = op_chunk(op) {
                    events.extend(t.process_chunk_at(&c, now));
                }
            }
            events.extend(t.finalize());
            assert_well_formed(&events)?;
        }

        #[test]
        fn prop_argument_fragments_concatenate_exactly(
            calls in proptest::collection::vec(proptest::collection::vec("[ -~]{0,8}", 1..6), 1..4),
            interleave in any::<bool>(),
        ) {
            let mut t = Transcoder::with_window(Duration::ZERO);
            let mut events = Vec::new();
            let mut schedule: Vec<(u32, &String)> = Vec::new();
            if interleave {
                let longest = calls.iter().map(Vec::len).max().unwrap_or(0);
                for step in 0..longest {
                    for (i, frags) in calls.iter().enumerate() {
                        if let Some(f) = frags.get(step) {
                            schedule.push((i as u32, f));
                        }
                    }
                }
            } else {
                for (i, frags) in calls.iter().enumerate() {
                    for f in frags {
                        schedule.push((i as u32, f));
                    }
                }
            }
            let mut seen = BTreeSet::new();
            for (i, frag) in schedule {
                let first = seen.insert(i);
                let name = first.then_some("fn");
                events.extend(t.process_chunk(&tool(i, None, name, Some(frag.as_str()))));
            }
            events.extend(t.process_chunk(&finish("tool_calls")));
            events.extend(t.finalize());

            for (i, frags) in calls.iter().enumerate() {
                let block = i + 1;
                let joined: String = events
                    .iter()
                    .filter_map(|e| match e {
                        AnthEvent::ContentBlockDelta {
                            index,
                            delta: BlockDelta::InputJsonDelta { partial_json },
                        } if *index == block => Some(partial_json.as_str()),
                        _ => None,
                    })
                    .collect();
                prop_assert_eq!(joined, frags.concat());
            }
        }
    }
}
