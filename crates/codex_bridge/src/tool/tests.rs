use std::collections::HashMap;
use std::time::Duration;

use codex_bridge_runtime::CancellationToken;
use pretty_assertions::assert_eq;

use super::*;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn api_key_resolution_order() {
    let explicit = resolve_codex_options(
        Some(CodexOptions::new().with_api_key("explicit")),
        env_of(&[("CODEX_API_KEY", "process")]),
    );
    assert_eq!(explicit.api_key.as_deref(), Some("explicit"));

    let from_map = resolve_codex_options(
        Some(
            CodexOptions::new()
                .with_env("OPENAI_API_KEY", "map-openai")
                .with_env("CODEX_API_KEY", ""),
        ),
        env_of(&[("CODEX_API_KEY", "process")]),
    );
    assert_eq!(from_map.api_key.as_deref(), Some("map-openai"));

    let from_process = resolve_codex_options(
        None,
        env_of(&[("CODEX_API_KEY", ""), ("OPENAI_API_KEY", "process-openai")]),
    );
    assert_eq!(from_process.api_key.as_deref(), Some("process-openai"));

    let none = resolve_codex_options(None, env_of(&[]));
    assert_eq!(none, CodexOptions::default());
}

#[test]
fn thread_option_overrides_win() {
    assert_eq!(merge_thread_options(None, None, Some(String::new()), None), None);
    assert_eq!(
        merge_thread_options(Some(ThreadOptions::default()), None, None, None),
        None
    );

    let merged = merge_thread_options(
        Some(
            ThreadOptions::new()
                .with_model("gpt-5")
                .with_sandbox_mode(SandboxMode::ReadOnly)
                .with_working_directory("/defaults"),
        ),
        Some(SandboxMode::WorkspaceWrite),
        Some("/override".to_owned()),
        Some(true),
    )
    .expect("merged");
    assert_eq!(merged.model.as_deref(), Some("gpt-5"));
    assert_eq!(merged.sandbox_mode, Some(SandboxMode::WorkspaceWrite));
    assert_eq!(merged.working_directory.as_deref(), Some("/override"));
    assert_eq!(merged.skip_git_repo_check, Some(true));
}

#[test]
fn turn_options_keep_signal_and_timeout() {
    let signal = CancellationToken::new();
    let defaults = TurnOptions::new()
        .with_output_schema(json!({"type": "object"}))
        .with_signal(signal.clone())
        .with_idle_timeout(Duration::from_secs(3));

    let kept = merge_turn_options(Some(defaults.clone()), None);
    assert_eq!(kept.output_schema, Some(json!({"type": "object"})));

    let merged = merge_turn_options(Some(defaults), Some(json!({"type": "object", "x": 1})));
    assert_eq!(merged.output_schema, Some(json!({"type": "object", "x": 1})));
    assert_eq!(merged.idle_timeout, Some(Duration::from_secs(3)));
    signal.cancel();
    assert!(merged.signal.expect("signal").is_cancelled());

    assert_eq!(merge_turn_options(None, None).output_schema, None);
}

#[test]
fn usage_maps_to_one_host_request() {
    let usage = Usage {
        input_tokens: 10,
        cached_input_tokens: 4,
        output_tokens: 5,
    };
    assert_eq!(
        to_host_usage(&usage),
        HostUsage {
            requests: 1,
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            input_tokens_details: InputTokensDetails { cached_tokens: 4 },
            output_tokens_details: OutputTokensDetails {
                reasoning_tokens: 0
            },
        }
    );
}

#[test]
fn result_text_parses_back() {
    let result = CodexToolResult {
        thread_id: Some("T1".to_owned()),
        response: "ok".to_owned(),
        usage: Some(Usage {
            input_tokens: 1,
            cached_input_tokens: 0,
            output_tokens: 1,
        }),
    };
    let text = result.to_string();
    assert_eq!(
        serde_json::from_str::<Value>(&text).expect("json"),
        json!({
            "thread_id": "T1",
            "response": "ok",
            "usage": {"input_tokens": 1, "cached_input_tokens": 0, "output_tokens": 1}
        })
    );
    let parsed: CodexToolResult = serde_json::from_str(&text).expect("result");
    assert_eq!(parsed, result);
    assert_eq!(ToolOutput::Completed(result).to_string(), text);
}

#[test]
fn construction_applies_defaults() {
    let tool = codex_tool(CodexToolOptions::new()).expect("tool");
    assert_eq!(tool.name(), "codex");
    assert_eq!(
        tool.description(),
        "Executes an agentic Codex task against the current workspace."
    );
    assert_eq!(tool.run_context_thread_id_key(), "codex_thread_id");
    assert!(tool.is_enabled());
    assert!(tool.params_json_schema()["properties"].get("thread_id").is_some());
    assert!(tool.persisted_thread().is_none());

    let hidden = codex_tool(
        CodexToolOptions::new()
            .with_name("codex_docs")
            .with_run_context_thread_id(true)
            .with_enabled(false),
    )
    .expect("tool");
    assert_eq!(hidden.run_context_thread_id_key(), "codex_thread_id_docs");
    assert!(hidden.params_json_schema()["properties"].get("thread_id").is_none());
    assert!(!hidden.is_enabled());
}

#[test]
fn construction_rejects_bad_configuration() {
    let err = codex_tool(CodexToolOptions::new().with_name("docs")).expect_err("bad name");
    assert!(matches!(err, CodexToolError::Config(_)));

    let err = codex_tool(CodexToolOptions::new().with_output_schema(json!({"type": "array"})))
        .expect_err("bad schema");
    assert!(matches!(err, CodexToolError::Codex(CodexError::InvalidOutputSchema(_))));

    let err = codex_tool(
        CodexToolOptions::new()
            .with_name("codex_a-b")
            .with_run_context_thread_id(true),
    )
    .expect_err("bad suffix");
    assert!(err.to_string().contains("[A-Za-z0-9_]+"));
}
