//! Typed view over the `codex exec --experimental-json` line protocol.
//!
//! Every stdout line is one JSON object discriminated by `type`. Unknown
//! event and item types are kept as raw maps instead of failing, so newer
//! CLI versions keep working.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::CodexError;

/// Token counts reported once per completed turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadError {
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ThreadEvent {
    ThreadStarted { thread_id: String },
    TurnStarted,
    TurnCompleted { usage: Usage },
    TurnFailed { error: ThreadError },
    ItemStarted { item: ThreadItem },
    ItemUpdated { item: ThreadItem },
    ItemCompleted { item: ThreadItem },
    Error { message: String },
    Unknown {
        event_type: String,
        fields: Map<String, Value>,
    },
}

impl ThreadEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::ThreadStarted { .. } => "thread.started",
            Self::TurnStarted => "turn.started",
            Self::TurnCompleted { .. } => "turn.completed",
            Self::TurnFailed { .. } => "turn.failed",
            Self::ItemStarted { .. } => "item.started",
            Self::ItemUpdated { .. } => "item.updated",
            Self::ItemCompleted { .. } => "item.completed",
            Self::Error { .. } => "error",
            Self::Unknown { event_type, .. } => event_type.as_str(),
        }
    }

    /// Item carried by `item.*` events.
    pub fn item(&self) -> Option<&ThreadItem> {
        match self {
            Self::ItemStarted { item } | Self::ItemUpdated { item } | Self::ItemCompleted { item } => {
                Some(item)
            }
            _ => None,
        }
    }
}

/// Parse one protocol line.
/// Allocation: one JSON tree. Complexity: O(line length).
pub fn parse_thread_event(line: &str) -> Result<ThreadEvent, CodexError> {
    serde_json::from_str(line).map_err(|err| CodexError::ParseEvent {
        line: line.to_owned(),
        reason: err.to_string(),
    })
}

#[derive(Deserialize)]
struct ThreadStartedFields {
    thread_id: String,
}

#[derive(Deserialize)]
struct TurnCompletedFields {
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct TurnFailedFields {
    #[serde(default)]
    error: ThreadError,
}

#[derive(Deserialize)]
struct ItemFields {
    item: ThreadItem,
}

#[derive(Deserialize)]
struct ErrorFields {
    #[serde(default)]
    message: String,
}

fn from_fields<T, E>(fields: Map<String, Value>) -> Result<T, E>
where
    T: DeserializeOwned,
    E: serde::de::Error,
{
    serde_json::from_value(Value::Object(fields)).map_err(E::custom)
}

impl<'de> Deserialize<'de> for ThreadEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        let event_type = fields
            .remove("type")
            .and_then(|v| v.as_str().map(ToOwned::to_owned))
            .ok_or_else(|| serde::de::Error::custom("thread event missing string type"))?;

        let event = match event_type.as_str() {
            "thread.started" => {
                let data: ThreadStartedFields = from_fields(fields)?;
                Self::ThreadStarted {
                    thread_id: data.thread_id,
                }
            }
            "turn.started" => Self::TurnStarted,
            "turn.completed" => {
                let data: TurnCompletedFields = from_fields(fields)?;
                Self::TurnCompleted { usage: data.usage }
            }
            "turn.failed" => {
                let data: TurnFailedFields = from_fields(fields)?;
                Self::TurnFailed { error: data.error }
            }
            "item.started" => Self::ItemStarted {
                item: from_fields::<ItemFields, _>(fields)?.item,
            },
            "item.updated" => Self::ItemUpdated {
                item: from_fields::<ItemFields, _>(fields)?.item,
            },
            "item.completed" => Self::ItemCompleted {
                item: from_fields::<ItemFields, _>(fields)?.item,
            },
            "error" => {
                let data: ErrorFields = from_fields(fields)?;
                Self::Error {
                    message: data.message,
                }
            }
            _ => Self::Unknown { event_type, fields },
        };
        Ok(event)
    }
}

impl Serialize for ThreadEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut fields = match self {
            Self::ThreadStarted { thread_id } => {
                let mut fields = Map::new();
                fields.insert("thread_id".to_owned(), Value::String(thread_id.clone()));
                fields
            }
            Self::TurnStarted => Map::new(),
            Self::TurnCompleted { usage } => {
                let mut fields = Map::new();
                let usage = serde_json::to_value(usage).map_err(serde::ser::Error::custom)?;
                fields.insert("usage".to_owned(), usage);
                fields
            }
            Self::TurnFailed { error } => {
                let mut fields = Map::new();
                let error = serde_json::to_value(error).map_err(serde::ser::Error::custom)?;
                fields.insert("error".to_owned(), error);
                fields
            }
            Self::ItemStarted { item } | Self::ItemUpdated { item } | Self::ItemCompleted { item } => {
                let mut fields = Map::new();
                let item = serde_json::to_value(item).map_err(serde::ser::Error::custom)?;
                fields.insert("item".to_owned(), item);
                fields
            }
            Self::Error { message } => {
                let mut fields = Map::new();
                fields.insert("message".to_owned(), Value::String(message.clone()));
                fields
            }
            Self::Unknown { fields, .. } => fields.clone(),
        };
        fields.insert(
            "type".to_owned(),
            Value::String(self.event_type().to_owned()),
        );
        Value::Object(fields).serialize(serializer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadItemType {
    AgentMessage,
    Reasoning,
    CommandExecution,
    FileChange,
    McpToolCall,
    WebSearch,
    TodoList,
    Error,
    Unknown(String),
}

impl ThreadItemType {
    pub fn as_wire(&self) -> &str {
        match self {
            Self::AgentMessage => "agent_message",
            Self::Reasoning => "reasoning",
            Self::CommandExecution => "command_execution",
            Self::FileChange => "file_change",
            Self::McpToolCall => "mcp_tool_call",
            Self::WebSearch => "web_search",
            Self::TodoList => "todo_list",
            Self::Error => "error",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "agent_message" => Self::AgentMessage,
            "reasoning" => Self::Reasoning,
            "command_execution" => Self::CommandExecution,
            "file_change" => Self::FileChange,
            "mcp_tool_call" => Self::McpToolCall,
            "web_search" => Self::WebSearch,
            "todo_list" => Self::TodoList,
            "error" => Self::Error,
            _ => Self::Unknown(raw.to_owned()),
        }
    }
}

impl Serialize for ThreadItemType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ThreadItemType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(raw.as_str()))
    }
}

/// Lifecycle status shared by command and MCP items.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Unknown(String),
}

impl ItemStatus {
    pub fn as_wire(&self) -> &str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Unknown(raw.to_owned()),
        }
    }
}

impl Serialize for ItemStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ItemStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(raw.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessageItem {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReasoningItem {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandExecutionItem {
    #[serde(default)]
    pub command: String,
    /// Missing on some completion events; consumers keep the last seen output.
    #[serde(default)]
    pub aggregated_output: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct McpToolCallResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub structured_content: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpToolCallError {
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpToolCallItem {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub result: Option<McpToolCallResult>,
    #[serde(default)]
    pub error: Option<McpToolCallError>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ThreadItemPayload {
    AgentMessage(AgentMessageItem),
    Reasoning(ReasoningItem),
    CommandExecution(CommandExecutionItem),
    McpToolCall(McpToolCallItem),
    Other(Map<String, Value>),
}

/// One unit of work or output surfaced during a turn.
/// `id` is the join key between item events and externally tracked spans.
#[derive(Clone, Debug, PartialEq)]
pub struct ThreadItem {
    pub id: Option<String>,
    pub item_type: ThreadItemType,
    pub payload: ThreadItemPayload,
}

impl ThreadItem {
    pub fn agent_message_text(&self) -> Option<&str> {
        match &self.payload {
            ThreadItemPayload::AgentMessage(message) => Some(message.text.as_str()),
            _ => None,
        }
    }
}

impl Serialize for ThreadItem {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let object = match &self.payload {
            ThreadItemPayload::AgentMessage(data) => {
                serde_json::to_value(data).map_err(serde::ser::Error::custom)?
            }
            ThreadItemPayload::Reasoning(data) => {
                serde_json::to_value(data).map_err(serde::ser::Error::custom)?
            }
            ThreadItemPayload::CommandExecution(data) => {
                serde_json::to_value(data).map_err(serde::ser::Error::custom)?
            }
            ThreadItemPayload::McpToolCall(data) => {
                serde_json::to_value(data).map_err(serde::ser::Error::custom)?
            }
            ThreadItemPayload::Other(extra) => Value::Object(extra.clone()),
        };
        let Value::Object(mut fields) = object else {
            return Err(serde::ser::Error::custom(
                "thread item payload must serialize to object",
            ));
        };

        fields.remove("id");
        fields.remove("type");
        if let Some(id) = &self.id {
            fields.insert("id".to_owned(), Value::String(id.clone()));
        }
        fields.insert(
            "type".to_owned(),
            Value::String(self.item_type.as_wire().to_owned()),
        );
        Value::Object(fields).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ThreadItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        let id = match fields.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(_) => return Err(serde::de::Error::custom("thread item id must be a string")),
        };
        let raw_type = fields
            .remove("type")
            .and_then(|v| v.as_str().map(ToOwned::to_owned))
            .ok_or_else(|| serde::de::Error::custom("thread item missing string type"))?;
        let item_type = ThreadItemType::from_wire(raw_type.as_str());

        let payload = match &item_type {
            ThreadItemType::AgentMessage => ThreadItemPayload::AgentMessage(from_fields(fields)?),
            ThreadItemType::Reasoning => ThreadItemPayload::Reasoning(from_fields(fields)?),
            ThreadItemType::CommandExecution => {
                ThreadItemPayload::CommandExecution(from_fields(fields)?)
            }
            ThreadItemType::McpToolCall => ThreadItemPayload::McpToolCall(from_fields(fields)?),
            _ => ThreadItemPayload::Other(fields),
        };

        Ok(Self {
            id,
            item_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests;
