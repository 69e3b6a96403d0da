use codex_bridge_core::{RecordingTraceProvider, SpanKind};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::span_budget::json_char_size;

use super::*;

fn item(value: Value) -> ThreadItem {
    serde_json::from_value(value).expect("thread item")
}

fn tracker(provider: &RecordingTraceProvider, max_chars: Option<usize>) -> ItemSpanTracker {
    ItemSpanTracker::new(
        Arc::new(provider.clone()),
        Some("tool-span".to_owned()),
        max_chars,
    )
}

#[test]
fn failed_command_gets_one_errored_span_closed_once() {
    let provider = RecordingTraceProvider::new();
    let mut spans = tracker(&provider, Some(8192));

    spans.item_started(&item(json!({
        "id": "cmd_1", "type": "command_execution", "command": "cargo test",
        "status": "in_progress"
    })));
    spans.item_updated(&item(json!({
        "id": "cmd_1", "type": "command_execution", "command": "cargo test",
        "aggregated_output": "running 3 tests", "status": "in_progress"
    })));
    spans.item_completed(&item(json!({
        "id": "cmd_1", "type": "command_execution", "command": "cargo test",
        "exit_code": 101, "status": "failed"
    })));
    drop(spans);

    let records = provider.spans_named(COMMAND_SPAN_NAME);
    assert_eq!(records.len(), 1);
    let span = &records[0];
    assert_eq!(span.kind, SpanKind::Custom);
    assert_eq!(span.parent_id.as_deref(), Some("tool-span"));
    assert_eq!(span.finish_count, 1);
    assert_eq!(
        Value::Object(span.data.clone()),
        json!({
            "command": "cargo test",
            "status": "failed",
            "exit_code": 101,
            "output": "running 3 tests"
        })
    );
    let error = span.error.as_ref().expect("errored span");
    assert_eq!(error.message, "Codex command execution failed.");
    assert_eq!(error.data, json!({"exit_code": 101}));
}

#[test]
fn failed_mcp_call_with_message_is_errored() {
    let provider = RecordingTraceProvider::new();
    let mut spans = tracker(&provider, Some(8192));

    spans.item_started(&item(json!({
        "id": "mcp_1", "type": "mcp_tool_call", "server": "docs", "tool": "search",
        "arguments": {"q": "rust"}, "status": "in_progress"
    })));
    let started = provider.spans_named(MCP_SPAN_NAME);
    assert!(!started[0].data.contains_key("result"));

    spans.item_completed(&item(json!({
        "id": "mcp_1", "type": "mcp_tool_call", "server": "docs", "tool": "search",
        "arguments": {"q": "rust"}, "error": {"message": "permission denied"},
        "status": "failed"
    })));

    let records = provider.spans_named(MCP_SPAN_NAME);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].finish_count, 1);
    assert_eq!(records[0].data["arguments"], json!({"q": "rust"}));
    assert_eq!(records[0].data["error"], json!({"message": "permission denied"}));
    assert_eq!(records[0].data["result"], Value::Null);
    assert_eq!(
        records[0].error.as_ref().map(|e| e.message.as_str()),
        Some("permission denied")
    );
}

#[test]
fn successful_mcp_call_records_result_without_error() {
    let provider = RecordingTraceProvider::new();
    let mut spans = tracker(&provider, Some(8192));
    spans.item_completed(&item(json!({
        "id": "mcp_2", "type": "mcp_tool_call", "server": "docs", "tool": "fetch",
        "arguments": null,
        "result": {"content": [{"type": "text", "text": "ok"}], "structured_content": null},
        "status": "completed"
    })));

    let records = provider.spans_named(MCP_SPAN_NAME);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error, None);
    assert_eq!(
        records[0].data["result"],
        json!({"content": [{"type": "text", "text": "ok"}], "structured_content": null})
    );
}

#[test]
fn reasoning_text_is_budgeted() {
    let provider = RecordingTraceProvider::new();
    let mut spans = tracker(&provider, Some(60));
    let long = "r".repeat(500);
    spans.item_started(&item(json!({"id": "r_1", "type": "reasoning", "text": "plan"})));
    spans.item_completed(&item(json!({"id": "r_1", "type": "reasoning", "text": long})));

    let records = provider.spans_named(REASONING_SPAN_NAME);
    assert_eq!(records.len(), 1);
    let text = records[0].data["text"].as_str().expect("text");
    assert!(text.starts_with("rrr"));
    assert!(text.contains("... [truncated, "));
    assert!(json_char_size(&Value::Object(records[0].data.clone())) <= 60);
}

#[test]
fn untracked_items_open_no_spans() {
    let provider = RecordingTraceProvider::new();
    let mut spans = tracker(&provider, Some(8192));
    spans.item_completed(&item(json!({"id": "m_1", "type": "agent_message", "text": "hi"})));
    spans.item_started(&item(json!({"type": "command_execution", "command": "ls"})));
    spans.item_started(&item(json!({"id": "f_1", "type": "file_change", "changes": []})));
    drop(spans);
    assert!(provider.spans().is_empty());
}

#[test]
fn dropping_tracker_closes_open_spans() {
    let provider = RecordingTraceProvider::new();
    let mut spans = tracker(&provider, None);
    spans.item_started(&item(json!({
        "id": "cmd_9", "type": "command_execution", "command": "sleep 10",
        "status": "in_progress"
    })));
    assert_eq!(provider.spans()[0].finish_count, 0);

    drop(spans);
    let records = provider.spans();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].finish_count, 1);
    assert_eq!(records[0].error, None);
}
