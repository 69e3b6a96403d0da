use std::sync::Arc;

use codex_bridge_core::{MapContext, ReadOnlyContext, RecordContext};
use pretty_assertions::assert_eq;
use serde_json::{json, Map};

use super::*;

const KEY: &str = "codex_thread_id";

fn with_context(context: impl RunContext + 'static) -> ToolContext {
    ToolContext::new("call-1").with_context(Arc::new(context))
}

fn config_message(result: Result<(), CodexToolError>) -> String {
    match result {
        Err(CodexToolError::Config(message)) => message,
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn map_context_round_trips_thread_id() {
    let map = Arc::new(MapContext::new());
    let ctx = ToolContext::new("call-1").with_context(map.clone());

    validate_run_context(&ctx, KEY).expect("writable");
    assert_eq!(read_thread_id(&ctx, KEY).expect("read"), None);
    store_thread_id(&ctx, KEY, Some("thread-1")).expect("store");
    assert_eq!(read_thread_id(&ctx, KEY).expect("read"), Some("thread-1".to_owned()));
    assert_eq!(map.snapshot()[KEY], json!("thread-1"));

    store_thread_id(&ctx, KEY, None).expect("noop");
    assert_eq!(map.snapshot()[KEY], json!("thread-1"));
}

#[test]
fn stored_values_are_trimmed_and_typed() {
    let ctx = with_context(MapContext::new().with_value(KEY, json!("  t-9  ")));
    assert_eq!(read_thread_id(&ctx, KEY).expect("read"), Some("t-9".to_owned()));

    let ctx = with_context(MapContext::new().with_value(KEY, json!("   ")));
    assert_eq!(read_thread_id(&ctx, KEY).expect("read"), None);

    let ctx = with_context(MapContext::new().with_value(KEY, json!(42)));
    assert_eq!(
        read_thread_id(&ctx, KEY),
        Err(CodexToolError::Config(
            "Run context \"codex_thread_id\" must be a string when provided.".to_owned()
        ))
    );
}

#[test]
fn unusable_contexts_are_rejected() {
    let message = config_message(validate_run_context(&ToolContext::new("c"), KEY));
    assert!(message.ends_with("Supply a ToolContext built with with_context(..)."));

    let ctx = with_context(ReadOnlyContext::new(Map::new()));
    assert_eq!(
        config_message(validate_run_context(&ctx, KEY)),
        "with_run_context_thread_id(true) requires a writable run context; this one is read-only."
    );

    let ctx = with_context(RecordContext::new([KEY]).frozen());
    assert!(config_message(validate_run_context(&ctx, KEY))
        .ends_with("this record is frozen."));

    let ctx = with_context(RecordContext::new(["other"]));
    assert!(config_message(validate_run_context(&ctx, KEY))
        .contains("to support field \"codex_thread_id\""));
}

#[test]
fn record_context_accepts_declared_field() {
    let record = Arc::new(RecordContext::new([KEY]));
    let ctx = ToolContext::new("call-1").with_context(record.clone());
    store_thread_id(&ctx, KEY, Some("thread-2")).expect("store");
    assert_eq!(record.get_value(KEY), Some(json!("thread-2")));
}

#[test]
fn best_effort_store_swallows_failures() {
    let ctx = with_context(ReadOnlyContext::new(Map::new()));
    store_thread_id_after_error(&ctx, KEY, Some("thread-3"));
    assert_eq!(read_thread_id(&ctx, KEY).expect("read"), None);
}
