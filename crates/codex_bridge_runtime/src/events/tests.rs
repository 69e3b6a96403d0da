use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;

#[test]
fn parses_lifecycle_events() {
    assert_eq!(
        parse_thread_event(r#"{"type":"thread.started","thread_id":"thr_1"}"#),
        Ok(ThreadEvent::ThreadStarted {
            thread_id: "thr_1".to_owned()
        })
    );
    assert_eq!(
        parse_thread_event(r#"{"type":"turn.started"}"#),
        Ok(ThreadEvent::TurnStarted)
    );
    assert_eq!(
        parse_thread_event(
            r#"{"type":"turn.completed","usage":{"input_tokens":10,"cached_input_tokens":2,"output_tokens":5}}"#
        ),
        Ok(ThreadEvent::TurnCompleted {
            usage: Usage {
                input_tokens: 10,
                cached_input_tokens: 2,
                output_tokens: 5,
            }
        })
    );
    assert_eq!(
        parse_thread_event(r#"{"type":"turn.failed","error":{"message":"rate limited"}}"#),
        Ok(ThreadEvent::TurnFailed {
            error: ThreadError {
                message: "rate limited".to_owned()
            }
        })
    );
    assert_eq!(
        parse_thread_event(r#"{"type":"error","message":"stream broke"}"#),
        Ok(ThreadEvent::Error {
            message: "stream broke".to_owned()
        })
    );
}

#[test]
fn parses_command_execution_item_with_optional_fields() {
    let event = parse_thread_event(
        r#"{"type":"item.updated","item":{"id":"cmd_1","type":"command_execution","command":"ls","status":"in_progress","cwd":"/tmp"}}"#,
    )
    .expect("parse");

    let ThreadEvent::ItemUpdated { item } = event else {
        panic!("expected item.updated");
    };
    assert_eq!(item.id.as_deref(), Some("cmd_1"));
    assert_eq!(item.item_type, ThreadItemType::CommandExecution);
    let ThreadItemPayload::CommandExecution(command) = item.payload else {
        panic!("expected command payload");
    };
    assert_eq!(command.command, "ls");
    assert_eq!(command.aggregated_output, None);
    assert_eq!(command.exit_code, None);
    assert_eq!(command.status, ItemStatus::InProgress);
    assert_eq!(command.extra.get("cwd"), Some(&json!("/tmp")));
}

#[test]
fn parses_mcp_tool_call_result_and_error() {
    let event = parse_thread_event(
        r#"{"type":"item.completed","item":{"id":"mcp_1","type":"mcp_tool_call","server":"docs","tool":"search","arguments":{"q":"rust"},"result":{"content":[{"type":"text","text":"hit"}],"structured_content":{"hits":1}},"status":"completed"}}"#,
    )
    .expect("parse");
    let item = event.item().expect("item").clone();
    let ThreadItemPayload::McpToolCall(call) = item.payload else {
        panic!("expected mcp payload");
    };
    assert_eq!(call.server, "docs");
    assert_eq!(call.arguments, json!({"q": "rust"}));
    assert_eq!(
        call.result,
        Some(McpToolCallResult {
            content: vec![json!({"type": "text", "text": "hit"})],
            structured_content: Some(json!({"hits": 1})),
        })
    );
    assert_eq!(call.status, ItemStatus::Completed);

    let failed = parse_thread_event(
        r#"{"type":"item.completed","item":{"id":"mcp_2","type":"mcp_tool_call","server":"docs","tool":"search","arguments":null,"error":{"message":"denied"},"status":"failed"}}"#,
    )
    .expect("parse");
    let ThreadItemPayload::McpToolCall(call) = &failed.item().expect("item").payload else {
        panic!("expected mcp payload");
    };
    assert_eq!(call.error.as_ref().map(|e| e.message.as_str()), Some("denied"));
    assert_eq!(call.status, ItemStatus::Failed);
}

#[test]
fn unknown_event_and_item_types_are_preserved() {
    let event = parse_thread_event(r#"{"type":"session.note","note":"hi"}"#).expect("parse");
    assert_eq!(event.event_type(), "session.note");
    let ThreadEvent::Unknown { fields, .. } = &event else {
        panic!("expected unknown event");
    };
    assert_eq!(fields.get("note"), Some(&json!("hi")));

    let event = parse_thread_event(
        r#"{"type":"item.completed","item":{"id":"f_1","type":"file_change","changes":[{"path":"a.rs","kind":"update"}],"status":"completed"}}"#,
    )
    .expect("parse");
    let item = event.item().expect("item");
    assert_eq!(item.item_type, ThreadItemType::FileChange);
    let ThreadItemPayload::Other(fields) = &item.payload else {
        panic!("expected raw payload");
    };
    assert_eq!(fields.get("status"), Some(&json!("completed")));

    let event = parse_thread_event(
        r#"{"type":"item.started","item":{"id":"x_1","type":"future_item","status":"queued"}}"#,
    )
    .expect("parse");
    assert_eq!(
        event.item().map(|item| item.item_type.clone()),
        Some(ThreadItemType::Unknown("future_item".to_owned()))
    );
}

#[test]
fn serialization_restores_wire_shape() {
    let raw = json!({
        "type": "item.completed",
        "item": {
            "id": "msg_1",
            "type": "agent_message",
            "text": "done",
            "annotations": []
        }
    });
    let event: ThreadEvent = serde_json::from_value(raw.clone()).expect("parse");
    assert_eq!(
        event.item().and_then(ThreadItem::agent_message_text),
        Some("done")
    );
    assert_eq!(serde_json::to_value(&event).expect("serialize"), raw);
}

#[test]
fn malformed_lines_become_parse_errors() {
    let err = parse_thread_event("not json").expect_err("must fail");
    assert!(matches!(err, CodexError::ParseEvent { ref line, .. } if line == "not json"));
    assert_eq!(err.to_string(), "Failed to parse event: not json");

    let err = parse_thread_event(r#"{"thread_id":"x"}"#).expect_err("missing type");
    let CodexError::ParseEvent { reason, .. } = err else {
        panic!("expected parse error");
    };
    assert!(reason.contains("missing string type"));

    assert!(parse_thread_event(r#"{"type":"thread.started"}"#).is_err());
}
