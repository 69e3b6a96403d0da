//! Thread-id persistence in the host's run context.

use codex_bridge_core::{ContextError, RunContext, ToolContext};
use serde_json::Value;

use crate::errors::CodexToolError;

const MISSING_CONTEXT: &str = "with_run_context_thread_id(true) requires a run context. Supply a ToolContext built with with_context(..).";
const READ_ONLY_CONTEXT: &str = "with_run_context_thread_id(true) requires a writable run context; this one is read-only.";
const FROZEN_CONTEXT: &str = "with_run_context_thread_id(true) requires a writable run context; this record is frozen.";

/// Fail unless the call's run context can take a write to `key`.
/// Side effects: none.
pub fn validate_run_context(ctx: &ToolContext, key: &str) -> Result<(), CodexToolError> {
    let context = require_context(ctx)?;
    context
        .check_writable(key)
        .map_err(|err| context_error(&err, key))
}

/// Stored thread id, trimmed. Empty and absent values read as `None`.
pub fn read_thread_id(ctx: &ToolContext, key: &str) -> Result<Option<String>, CodexToolError> {
    let Some(context) = ctx.context.as_deref() else {
        return Ok(None);
    };
    match context.get_value(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_owned()))
        }
        Some(_) => Err(CodexToolError::Config(format!(
            "Run context \"{key}\" must be a string when provided."
        ))),
    }
}

/// Write `thread_id` under `key`. `None` is a no-op.
pub fn store_thread_id(
    ctx: &ToolContext,
    key: &str,
    thread_id: Option<&str>,
) -> Result<(), CodexToolError> {
    let Some(thread_id) = thread_id else {
        return Ok(());
    };
    let context = require_context(ctx)?;
    context
        .check_writable(key)
        .map_err(|err| context_error(&err, key))?;
    context
        .set_value(key, Value::String(thread_id.to_owned()))
        .map_err(|_| unable_to_store(key))
}

/// Best-effort store on a failure path; a failed write is logged, not raised.
pub fn store_thread_id_after_error(ctx: &ToolContext, key: &str, thread_id: Option<&str>) {
    if thread_id.is_none() {
        return;
    }
    if let Err(err) = store_thread_id(ctx, key, thread_id) {
        tracing::warn!(
            key,
            thread_id = thread_id.unwrap_or_default(),
            error = %err,
            "failed to store codex thread id in run context after error"
        );
    }
}

fn require_context(ctx: &ToolContext) -> Result<&dyn RunContext, CodexToolError> {
    ctx.context
        .as_deref()
        .ok_or_else(|| CodexToolError::Config(MISSING_CONTEXT.to_owned()))
}

fn context_error(err: &ContextError, key: &str) -> CodexToolError {
    let message = match err {
        ContextError::ReadOnly => READ_ONLY_CONTEXT.to_owned(),
        ContextError::Frozen => FROZEN_CONTEXT.to_owned(),
        ContextError::MissingField(_) => format!(
            "with_run_context_thread_id(true) requires the run context to support field \"{key}\". \
             Use a MapContext, or declare the field on the RecordContext."
        ),
        ContextError::Rejected { .. } => return unable_to_store(key),
    };
    CodexToolError::Config(message)
}

fn unable_to_store(key: &str) -> CodexToolError {
    CodexToolError::Config(format!(
        "Unable to store Codex thread_id in run context field \"{key}\". \
         Use a MapContext or a RecordContext declaring that field."
    ))
}

#[cfg(test)]
mod tests;
