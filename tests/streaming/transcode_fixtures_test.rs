//! OpenAI to Anthropic transcoding over recorded SSE fixtures

use std::collections::BTreeSet;
use std::io;

use rcc_shape::ShapeConfig;
use serde_json::json;

use crate::support::{self, OutFrame};

fn s(kind: &str, index: Option<u64>) -> (String, Option<u64>) {
    (kind.to_string(), index)
}

/// Every started block stops exactly once, nothing follows `message_stop`.
fn assert_well_formed(frames: &[OutFrame]) {
    let anth: Vec<&OutFrame> = frames.iter().filter(|f| f.event.is_some()).collect();
    assert_eq!(anth.first().map(|f| f.kind()), Some("message_start"));
    assert_eq!(anth.last().map(|f| f.kind()), Some("message_stop"));

    let mut open = BTreeSet::new();
    let mut closed = BTreeSet::new();
    for f in &anth {
        let index = f.data["index"].as_u64();
        match f.kind() {
            "content_block_start" => {
                let i = index.expect("start has index");
                assert!(!closed.contains(&i), "block {i} restarted");
                assert!(open.insert(i), "block {i} started twice");
            }
            "content_block_delta" => {
                assert!(open.contains(&index.expect("delta has index")), "delta outside open block");
            }
            "content_block_stop" => {
                let i = index.expect("stop has index");
                assert!(open.remove(&i), "stop for block {i} that is not open");
                closed.insert(i);
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "blocks left open: {open:?}");
    for f in &anth {
        assert_eq!(f.event.as_deref(), Some(f.kind()), "event name matches payload type");
    }
}

#[tokio::test]
async fn text_then_tool_fixture() {
    let frames =
        support::transcode_fixture("openai/text_then_tool.sse", &support::eager_config()).await;
    assert_well_formed(&frames);

    assert_eq!(
        support::outline(&frames),
        vec![
            s("message_start", None),
            s("content_block_start", Some(0)),
            s("content_block_delta", Some(0)),
            s("content_block_delta", Some(0)),
            s("content_block_start", Some(1)),
            s("content_block_delta", Some(1)),
            s("content_block_delta", Some(1)),
            s("content_block_stop", Some(0)),
            s("content_block_stop", Some(1)),
            s("message_delta", None),
            s("message_stop", None),
        ]
    );

    let start = &frames[0].data["message"];
    assert_eq!(start["id"], "chatcmpl-001");
    assert_eq!(start["model"], "gpt-4o");
    assert_eq!(start["role"], "assistant");

    assert_eq!(
        frames[4].data["content_block"],
        json!({"type": "tool_use", "id": "call_a", "name": "shell", "input": {}})
    );
    let args: String = frames[5..7]
        .iter()
        .map(|f| f.data["delta"]["partial_json"].as_str().unwrap())
        .collect();
    assert_eq!(args, r#"{"command":["ls"]}"#);

    assert_eq!(frames[9].data["delta"]["stop_reason"], "tool_use");
    assert_eq!(
        frames[9].data["usage"],
        json!({"input_tokens": 10, "output_tokens": 5})
    );
}

#[tokio::test]
async fn coalescing_keeps_text_intact() {
    let frames =
        support::transcode_fixture("openai/text_then_tool.sse", &ShapeConfig::default()).await;
    assert_well_formed(&frames);
    let text: String = frames
        .iter()
        .filter(|f| f.kind() == "content_block_delta" && f.data["index"] == 0)
        .map(|f| f.data["delta"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(text, "Let me check.");
}

#[tokio::test]
async fn parallel_tools_fixture() {
    let frames =
        support::transcode_fixture("openai/parallel_tools.sse", &support::eager_config()).await;
    assert_well_formed(&frames);

    assert_eq!(
        support::outline(&frames),
        vec![
            s("message_start", None),
            s("content_block_start", Some(1)),
            s("content_block_start", Some(2)),
            s("content_block_delta", Some(2)),
            s("content_block_delta", Some(1)),
            s("content_block_delta", Some(2)),
            s("content_block_stop", Some(1)),
            s("content_block_stop", Some(2)),
            s("message_delta", None),
            s("message_stop", None),
        ]
    );
    assert_eq!(frames[1].data["content_block"]["name"], "read_file");
    assert_eq!(frames[2].data["content_block"]["name"], "write_file");

    let args_for = |index: u64| -> String {
        frames
            .iter()
            .filter(|f| f.kind() == "content_block_delta" && f.data["index"] == index)
            .map(|f| f.data["delta"]["partial_json"].as_str().unwrap())
            .collect()
    };
    assert_eq!(args_for(1), r#"{"path":"a.txt"}"#);
    assert_eq!(args_for(2), r#"{"path":"b.txt","content":"x"}"#);
    assert_eq!(frames[8].data["usage"]["output_tokens"], 9);
}

#[tokio::test]
async fn nameless_tool_gets_fallback_name_at_finish() {
    let frames = support::transcode_fixture(
        "openai/nameless_tool_no_done.sse",
        &support::eager_config(),
    )
    .await;
    assert_well_formed(&frames);

    assert_eq!(
        support::outline(&frames),
        vec![
            s("message_start", None),
            s("content_block_start", Some(1)),
            s("content_block_delta", Some(1)),
            s("content_block_delta", Some(1)),
            s("content_block_stop", Some(1)),
            s("message_delta", None),
            s("message_stop", None),
        ]
    );
    assert_eq!(frames[1].data["content_block"]["name"], "tool");
    assert_eq!(frames[1].data["content_block"]["id"], "call_x");
    assert_eq!(frames[5].data["delta"]["stop_reason"], "max_tokens");
    assert!(frames[5].data.get("usage").is_none());
}

#[tokio::test]
async fn unknown_objects_pass_through_and_input_after_done_is_ignored() {
    let frames =
        support::transcode_fixture("openai/passthrough_mixed.sse", &support::eager_config()).await;

    assert_eq!(frames[0].event, None);
    assert_eq!(frames[0].data, json!({"type": "ping"}));
    assert_well_formed(&frames[1..]);

    let text: Vec<&str> = frames
        .iter()
        .filter_map(|f| f.data["delta"]["text"].as_str())
        .collect();
    assert_eq!(text, vec!["ok"]);
    assert_eq!(
        frames[frames.len() - 2].data["delta"]["stop_reason"],
        "end_turn"
    );
}

#[tokio::test]
async fn output_does_not_depend_on_network_chunking() {
    let config = support::eager_config();
    for name in [
        "openai/text_then_tool.sse",
        "openai/parallel_tools.sse",
        "openai/nameless_tool_no_done.sse",
        "openai/passthrough_mixed.sse",
    ] {
        let whole = support::load_sse_fixture_as_bytes(name).expect("load fixture");
        let expected = support::transcode_to_text(whole, &config).await;
        for size in [1, 3, 7, 64] {
            let bytes = support::load_sse_fixture_as_bytes(name).expect("load fixture");
            let got = support::transcode_to_text(support::rechunk(bytes, size), &config).await;
            assert_eq!(got, expected, "{name} split every {size} bytes");
        }
    }
}

#[tokio::test]
async fn upstream_error_mid_stream_closes_open_blocks() {
    let mut bytes = support::load_sse_fixture_as_bytes("openai/text_then_tool.sse")
        .expect("load fixture");
    bytes.truncate(4);
    bytes.push(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));

    let text = support::transcode_to_text(bytes, &support::eager_config()).await;
    let frames = support::parse_sse_output(&text);
    assert_well_formed(&frames);

    let delta = frames
        .iter()
        .find(|f| f.kind() == "message_delta")
        .expect("message_delta");
    assert_eq!(delta.data["delta"]["stop_reason"], "error");
    assert_eq!(frames.iter().filter(|f| f.kind() == "message_stop").count(), 1);
}

#[tokio::test]
async fn upstream_error_before_output_is_single_frame() {
    let bytes: support::ByteChunks = vec![Err(io::Error::other("refused"))];
    let text = support::transcode_to_text(bytes, &support::eager_config()).await;
    let frames = support::parse_sse_output(&text);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event.as_deref(), Some("message_delta"));
    assert_eq!(frames[0].data["delta"]["stop_reason"], "error");
}
