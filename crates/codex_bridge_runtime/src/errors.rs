use std::time::Duration;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodexError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    InvalidOutputSchema(String),
    #[error("failed to spawn codex: {0}")]
    Spawn(String),
    #[error("codex process has no stdin")]
    NoStdin,
    #[error("codex process has no stdout")]
    NoStdout,
    #[error("Codex Exec exited with {}: {stderr}", exit_label(.code))]
    ExitFailure { code: Option<i32>, stderr: String },
    #[error("codex output line exceeds stream limit of {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("Failed to parse event: {line}")]
    ParseEvent { line: String, reason: String },
    #[error("Codex turn failed{}", turn_failed_suffix(.0))]
    TurnFailed(String),
    #[error("Codex stream error: {0}")]
    Stream(String),
    #[error("Codex stream idle for {}s", .idle.as_secs_f64())]
    IdleTimeout { idle: Duration },
    #[error("Codex turn cancelled")]
    Cancelled,
    #[error("Unsupported platform: {os} ({arch})")]
    UnsupportedPlatform { os: String, arch: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    Internal(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_owned(),
    }
}

fn turn_failed_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}
