//! Tool arguments: the parameter schema a host advertises and the parser for
//! the JSON a model sends back.

use codex_bridge_runtime::{Input, UserInput};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::CodexToolError;

const INPUTS_DESCRIPTION: &str =
    "Structured inputs appended to the Codex task. Provide at least one input item.";
const THREAD_ID_DESCRIPTION: &str = "Optional Codex thread ID to resume. If omitted, a new thread is started unless configured elsewhere.";
const INVALID_INPUT_PREFIX: &str = "Invalid JSON input for codex tool: ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum InputKind {
    Text,
    LocalImage,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInputItem {
    #[serde(rename = "type")]
    kind: InputKind,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParameters {
    inputs: Vec<RawInputItem>,
    #[serde(default)]
    thread_id: Option<String>,
}

/// Run-context mode hides `thread_id` from the model.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRunContextParameters {
    inputs: Vec<RawInputItem>,
}

/// Validated arguments of one tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallArguments {
    pub inputs: Vec<UserInput>,
    /// Trimmed, never empty.
    pub thread_id: Option<String>,
}

impl ToolCallArguments {
    pub fn to_input(&self) -> Input {
        if self.inputs.is_empty() {
            Input::Text(String::new())
        } else {
            Input::Items(self.inputs.clone())
        }
    }

    /// Response used when the turn produced no agent message.
    pub fn default_response(&self) -> String {
        if self.inputs.is_empty() {
            "Codex task completed with no inputs.".to_owned()
        } else {
            "Codex task completed with inputs.".to_owned()
        }
    }
}

/// Strict JSON schema of the tool parameters. Every property is listed in
/// `required`; optional ones are nullable.
pub fn params_json_schema(include_thread_id: bool) -> Value {
    let nullable_string = json!({"anyOf": [{"type": "string"}, {"type": "null"}]});
    let mut properties = json!({
        "inputs": {
            "type": "array",
            "description": INPUTS_DESCRIPTION,
            "minItems": 1,
            "items": {
                "type": "object",
                "properties": {
                    "type": {"type": "string", "enum": ["text", "local_image"]},
                    "text": nullable_string,
                    "path": nullable_string,
                },
                "required": ["type", "text", "path"],
                "additionalProperties": false,
            },
        },
    });
    let mut required = vec![json!("inputs")];
    if include_thread_id {
        let mut thread_id = nullable_string.clone();
        thread_id["description"] = json!(THREAD_ID_DESCRIPTION);
        properties["thread_id"] = thread_id;
        required.push(json!("thread_id"));
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Parse and validate raw tool arguments. An empty string counts as `{}`.
/// Allocation: parsed JSON tree plus owned inputs. Complexity: O(input size).
pub fn parse_tool_input(
    input_json: &str,
    accept_thread_id: bool,
) -> Result<ToolCallArguments, CodexToolError> {
    let value: Value = if input_json.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(input_json).map_err(|err| {
            tracing::debug!(error = %err, "invalid JSON input for codex tool");
            invalid_input(input_json)
        })?
    };

    let (items, thread_id) = if accept_thread_id {
        let raw: RawParameters =
            serde_json::from_value(value).map_err(invalid_input)?;
        (raw.inputs, raw.thread_id)
    } else {
        let raw: RawRunContextParameters =
            serde_json::from_value(value).map_err(invalid_input)?;
        (raw.inputs, None)
    };

    if items.is_empty() {
        return Err(invalid_input("\"inputs\" must contain at least one item."));
    }
    let inputs = items
        .into_iter()
        .map(validate_item)
        .collect::<Result<Vec<_>, _>>()
        .map_err(invalid_input)?;

    let thread_id = match thread_id {
        None => None,
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(invalid_input(
                    "When provided, \"thread_id\" must be a non-empty string.",
                ));
            }
            Some(trimmed.to_owned())
        }
    };

    Ok(ToolCallArguments { inputs, thread_id })
}

fn validate_item(item: RawInputItem) -> Result<UserInput, &'static str> {
    let text = item.text.as_deref().map(str::trim).unwrap_or_default();
    let path = item.path.as_deref().map(str::trim).unwrap_or_default();
    match item.kind {
        InputKind::Text => {
            if text.is_empty() {
                return Err("Text inputs must include a non-empty \"text\" field.");
            }
            if !path.is_empty() {
                return Err("\"path\" is not allowed when type is \"text\".");
            }
            Ok(UserInput::Text {
                text: text.to_owned(),
            })
        }
        InputKind::LocalImage => {
            if path.is_empty() {
                return Err("Local image inputs must include a non-empty \"path\" field.");
            }
            if !text.is_empty() {
                return Err("\"text\" is not allowed when type is \"local_image\".");
            }
            Ok(UserInput::LocalImage { path: path.into() })
        }
    }
}

fn invalid_input(detail: impl std::fmt::Display) -> CodexToolError {
    CodexToolError::InvalidInput(format!("{INVALID_INPUT_PREFIX}{detail}"))
}
