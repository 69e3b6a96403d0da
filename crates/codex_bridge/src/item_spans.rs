use std::collections::HashMap;
use std::sync::Arc;

use codex_bridge_core::{ItemSpan, SpanError, SpanKind, TraceProvider};
use codex_bridge_runtime::{
    CommandExecutionItem, ItemStatus, McpToolCallItem, ReasoningItem, ThreadItem,
    ThreadItemPayload,
};
use serde_json::{Map, Value};

use crate::span_budget::{merge_span_data, truncate_span_value};

pub(crate) const COMMAND_SPAN_NAME: &str = "Codex command execution";
pub(crate) const MCP_SPAN_NAME: &str = "Codex MCP tool call";
pub(crate) const REASONING_SPAN_NAME: &str = "Codex reasoning";
const COMMAND_FAILED_MESSAGE: &str = "Codex command execution failed.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Started,
    Updated,
    Completed,
}

/// Open spans of one turn, keyed by item id.
///
/// Only command, MCP and reasoning items get spans. A span opens on the
/// first event seen for its item and closes on completion; whatever is still
/// open when the tracker drops is closed then.
pub(crate) struct ItemSpanTracker {
    tracer: Arc<dyn TraceProvider>,
    parent_id: Option<String>,
    max_chars: Option<usize>,
    spans: HashMap<String, Box<dyn ItemSpan>>,
}

impl ItemSpanTracker {
    pub(crate) fn new(
        tracer: Arc<dyn TraceProvider>,
        parent_id: Option<String>,
        max_chars: Option<usize>,
    ) -> Self {
        Self {
            tracer,
            parent_id,
            max_chars,
            spans: HashMap::new(),
        }
    }

    pub(crate) fn item_started(&mut self, item: &ThreadItem) {
        self.apply(item, Phase::Started);
    }

    pub(crate) fn item_updated(&mut self, item: &ThreadItem) {
        self.apply(item, Phase::Updated);
    }

    pub(crate) fn item_completed(&mut self, item: &ThreadItem) {
        self.apply(item, Phase::Completed);
    }

    /// Close every open span.
    pub(crate) fn close_all(&mut self) {
        for (_, span) in self.spans.drain() {
            span.finish();
        }
    }

    fn apply(&mut self, item: &ThreadItem, phase: Phase) {
        let Some(item_id) = item.id.as_deref().filter(|id| !id.is_empty()) else {
            return;
        };
        let (name, updates) = match &item.payload {
            ThreadItemPayload::CommandExecution(command) => {
                (COMMAND_SPAN_NAME, self.command_updates(command))
            }
            ThreadItemPayload::McpToolCall(call) => {
                (MCP_SPAN_NAME, self.mcp_updates(call, phase))
            }
            ThreadItemPayload::Reasoning(reasoning) => {
                (REASONING_SPAN_NAME, self.reasoning_updates(reasoning))
            }
            _ => return,
        };

        let max_chars = self.max_chars;
        match self.spans.get_mut(item_id) {
            Some(span) => {
                let data = merge_span_data(span.data(), updates, max_chars);
                span.set_data(data);
            }
            None => {
                let data = merge_span_data(&Map::new(), updates, max_chars);
                let span = self.tracer.start_span(
                    name,
                    SpanKind::Custom,
                    self.parent_id.as_deref(),
                    data,
                );
                self.spans.insert(item_id.to_owned(), span);
            }
        }

        if phase != Phase::Completed {
            return;
        }
        let Some(mut span) = self.spans.remove(item_id) else {
            return;
        };
        if let Some(error) = self.completion_error(&item.payload) {
            span.set_error(error);
        }
        span.finish();
    }

    fn command_updates(&self, item: &CommandExecutionItem) -> Map<String, Value> {
        let mut updates = Map::new();
        updates.insert("command".to_owned(), Value::String(item.command.clone()));
        updates.insert("status".to_owned(), status_value(&item.status));
        updates.insert("exit_code".to_owned(), Value::from(item.exit_code));
        // Missing output keeps whatever an earlier event recorded.
        if let Some(output) = item.aggregated_output.as_deref().filter(|o| !o.is_empty()) {
            updates.insert(
                "output".to_owned(),
                truncate_span_value(Value::String(output.to_owned()), self.max_chars),
            );
        }
        updates
    }

    fn mcp_updates(&self, item: &McpToolCallItem, phase: Phase) -> Map<String, Value> {
        let mut updates = Map::new();
        updates.insert("server".to_owned(), Value::String(item.server.clone()));
        updates.insert("tool".to_owned(), Value::String(item.tool.clone()));
        updates.insert("status".to_owned(), status_value(&item.status));
        updates.insert(
            "arguments".to_owned(),
            truncate_span_value(item.arguments.clone(), self.max_chars),
        );
        if phase != Phase::Started {
            let result = to_value(item.result.as_ref());
            let error = to_value(item.error.as_ref());
            updates.insert(
                "result".to_owned(),
                truncate_span_value(result, self.max_chars),
            );
            updates.insert("error".to_owned(), truncate_span_value(error, self.max_chars));
        }
        updates
    }

    fn reasoning_updates(&self, item: &ReasoningItem) -> Map<String, Value> {
        let mut updates = Map::new();
        updates.insert(
            "text".to_owned(),
            truncate_span_value(Value::String(item.text.clone()), self.max_chars),
        );
        updates
    }

    fn completion_error(&self, payload: &ThreadItemPayload) -> Option<SpanError> {
        match payload {
            ThreadItemPayload::CommandExecution(command)
                if command.status == ItemStatus::Failed =>
            {
                let mut data = Map::new();
                data.insert("exit_code".to_owned(), Value::from(command.exit_code));
                if let Some(output) = command
                    .aggregated_output
                    .as_deref()
                    .filter(|o| !o.is_empty())
                {
                    data.insert(
                        "output".to_owned(),
                        truncate_span_value(Value::String(output.to_owned()), self.max_chars),
                    );
                }
                Some(SpanError::new(COMMAND_FAILED_MESSAGE).with_data(Value::Object(data)))
            }
            ThreadItemPayload::McpToolCall(call) if call.status == ItemStatus::Failed => call
                .error
                .as_ref()
                .filter(|error| !error.message.is_empty())
                .map(|error| SpanError::new(error.message.clone())),
            _ => None,
        }
    }
}

impl Drop for ItemSpanTracker {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn status_value(status: &ItemStatus) -> Value {
    Value::String(status.as_wire().to_owned())
}

fn to_value<T: serde::Serialize>(value: Option<&T>) -> Value {
    match value {
        None => Value::Null,
        Some(value) => serde_json::to_value(value).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests;
