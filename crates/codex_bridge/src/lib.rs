//! Public facade for the codex_bridge workspace.
//! Default path: build a tool with `codex_tool`. Use `codex_bridge::runtime` to drive threads directly.

mod errors;
mod failure;
mod item_spans;
mod naming;
mod observer;
mod params;
mod run_context;
pub mod span_budget;
mod tool;

pub use codex_bridge_core::{
    ContextError, HostFuture, InputTokensDetails, ItemSpan, MapContext, OutputTokensDetails,
    ReadOnlyContext, RecordContext, RecordingTraceProvider, RunContext, SpanError, SpanKind,
    SpanRecord, ToolContext, TraceProvider, TracingTraceProvider, Usage as HostUsage,
};
pub use codex_bridge_runtime::{
    ApprovalPolicy, CancellationToken, Codex, CodexError, CodexOptions, ReasoningEffort,
    SandboxMode, Thread, ThreadEvent, ThreadItem, ThreadOptions, TurnOptions, Usage,
    WebSearchMode,
};
pub use errors::CodexToolError;
pub use failure::{failure_handler_fn, DefaultFailureHandler, FailureHandler};
pub use naming::{
    ensure_unique_codex_tool_names, DEFAULT_RUN_CONTEXT_THREAD_ID_KEY, DEFAULT_TOOL_NAME,
};
pub use observer::{observer_fn, CodexToolStreamEvent, StreamObserver};
pub use params::{parse_tool_input, ToolCallArguments};
pub use tool::{
    codex_tool, merge_thread_options, merge_turn_options, resolve_codex_options, to_host_usage,
    CodexTool, CodexToolOptions, CodexToolResult, ToolOutput, API_KEY_ENV_NAMES,
    DEFAULT_SPAN_DATA_MAX_CHARS,
};

pub use codex_bridge_core as host;
pub use codex_bridge_runtime as runtime;
