pub mod codex;
pub mod errors;
pub mod events;
pub mod exec;
pub mod options;
pub mod output_schema;
pub mod thread;

pub use codex::Codex;
pub use errors::CodexError;
pub use events::{
    parse_thread_event, AgentMessageItem, CommandExecutionItem, ItemStatus, McpToolCallError,
    McpToolCallItem, McpToolCallResult, ReasoningItem, ThreadError, ThreadEvent, ThreadItem,
    ThreadItemPayload, ThreadItemType, Usage,
};
pub use exec::{
    find_codex_path, platform_target_triple, resolve_stream_limit_bytes, CodexExec, ExecArgs,
    ExecRunner, ExecStream, DEFAULT_STREAM_LIMIT_BYTES, STREAM_LIMIT_ENV,
};
pub use options::{
    ApprovalPolicy, CodexOptions, ReasoningEffort, SandboxMode, ThreadOptions, TurnOptions,
    WebSearchMode,
};
pub use output_schema::{create_output_schema_file, resolve_output_schema, OutputSchemaFile};
pub use thread::{normalize_input, Input, Thread, Turn, TurnStream, UserInput};
pub use tokio_util::sync::CancellationToken;
