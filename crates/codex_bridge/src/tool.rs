use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use codex_bridge_core::{
    InputTokensDetails, OutputTokensDetails, SpanError, SpanKind, ToolContext,
    Usage as HostUsage,
};
use codex_bridge_runtime::{
    resolve_output_schema, Codex, CodexError, CodexOptions, SandboxMode, Thread, ThreadEvent,
    ThreadOptions, TurnOptions, TurnStream, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use crate::errors::CodexToolError;
use crate::failure::{DefaultFailureHandler, FailureHandler};
use crate::item_spans::ItemSpanTracker;
use crate::naming::{resolve_run_context_thread_id_key, resolve_tool_name};
use crate::observer::{CodexToolStreamEvent, StreamDispatcher, StreamObserver};
use crate::params::{params_json_schema, parse_tool_input, ToolCallArguments};
use crate::run_context::{
    read_thread_id, store_thread_id, store_thread_id_after_error, validate_run_context,
};

pub const DEFAULT_SPAN_DATA_MAX_CHARS: usize = 8192;
pub const API_KEY_ENV_NAMES: [&str; 2] = ["CODEX_API_KEY", "OPENAI_API_KEY"];

const DEFAULT_DESCRIPTION: &str = "Executes an agentic Codex task against the current workspace.";
const RECOVERED_FAILURE_MESSAGE: &str = "Error running Codex tool (non-fatal)";
const PERSISTED_THREAD_CONFLICT: &str =
    "Codex tool is configured with persist_session=true and already has an active thread.";

/// Configuration of one Codex tool.
///
/// Tool-level `sandbox_mode`, `working_directory` and `skip_git_repo_check`
/// override the same fields of `default_thread_options`; `output_schema`
/// overrides the schema of `default_turn_options`.
#[derive(Clone)]
pub struct CodexToolOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Raw JSON schema or field descriptor for the final agent message.
    pub output_schema: Option<Value>,
    /// Shared client. When absent one is built lazily from `codex_options`.
    pub codex: Option<Arc<Codex>>,
    pub codex_options: Option<CodexOptions>,
    pub default_thread_options: Option<ThreadOptions>,
    /// Thread resumed when neither the call nor the run context names one.
    pub thread_id: Option<String>,
    pub sandbox_mode: Option<SandboxMode>,
    pub working_directory: Option<String>,
    pub skip_git_repo_check: Option<bool>,
    pub default_turn_options: Option<TurnOptions>,
    /// `None` disables span payload truncation.
    pub span_data_max_chars: Option<usize>,
    /// Reuse one thread across every call of this tool.
    pub persist_session: bool,
    pub on_stream: Option<Arc<dyn StreamObserver>>,
    /// `None` makes call failures propagate to the host.
    pub failure_handler: Option<Arc<dyn FailureHandler>>,
    /// Read and write the thread id through the host run context.
    pub use_run_context_thread_id: bool,
    pub run_context_thread_id_key: Option<String>,
    pub is_enabled: bool,
}

impl Default for CodexToolOptions {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            output_schema: None,
            codex: None,
            codex_options: None,
            default_thread_options: None,
            thread_id: None,
            sandbox_mode: None,
            working_directory: None,
            skip_git_repo_check: None,
            default_turn_options: None,
            span_data_max_chars: Some(DEFAULT_SPAN_DATA_MAX_CHARS),
            persist_session: false,
            on_stream: None,
            failure_handler: Some(Arc::new(DefaultFailureHandler)),
            use_run_context_thread_id: false,
            run_context_thread_id_key: None,
            is_enabled: true,
        }
    }
}

impl CodexToolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_codex(mut self, codex: Codex) -> Self {
        self.codex = Some(Arc::new(codex));
        self
    }

    pub fn with_codex_options(mut self, options: CodexOptions) -> Self {
        self.codex_options = Some(options);
        self
    }

    pub fn with_default_thread_options(mut self, options: ThreadOptions) -> Self {
        self.default_thread_options = Some(options);
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_sandbox_mode(mut self, mode: SandboxMode) -> Self {
        self.sandbox_mode = Some(mode);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_skip_git_repo_check(mut self, skip: bool) -> Self {
        self.skip_git_repo_check = Some(skip);
        self
    }

    pub fn with_default_turn_options(mut self, options: TurnOptions) -> Self {
        self.default_turn_options = Some(options);
        self
    }

    pub fn with_span_data_max_chars(mut self, max_chars: Option<usize>) -> Self {
        self.span_data_max_chars = max_chars;
        self
    }

    pub fn with_persist_session(mut self, persist: bool) -> Self {
        self.persist_session = persist;
        self
    }

    pub fn with_on_stream(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.on_stream = Some(observer);
        self
    }

    pub fn with_failure_handler(mut self, handler: Option<Arc<dyn FailureHandler>>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn with_run_context_thread_id(mut self, enabled: bool) -> Self {
        self.use_run_context_thread_id = enabled;
        self
    }

    pub fn with_run_context_thread_id_key(mut self, key: impl Into<String>) -> Self {
        self.run_context_thread_id_key = Some(key.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.is_enabled = enabled;
        self
    }
}

impl fmt::Debug for CodexToolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodexToolOptions")
            .field("name", &self.name)
            .field("codex_options", &self.codex_options)
            .field("default_thread_options", &self.default_thread_options)
            .field("thread_id", &self.thread_id)
            .field("span_data_max_chars", &self.span_data_max_chars)
            .field("persist_session", &self.persist_session)
            .field("has_on_stream", &self.on_stream.is_some())
            .field("has_failure_handler", &self.failure_handler.is_some())
            .field("use_run_context_thread_id", &self.use_run_context_thread_id)
            .field("run_context_thread_id_key", &self.run_context_thread_id_key)
            .field("is_enabled", &self.is_enabled)
            .finish()
    }
}

/// Successful outcome of one call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodexToolResult {
    pub thread_id: Option<String>,
    pub response: String,
    pub usage: Option<Usage>,
}

impl fmt::Display for CodexToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

/// What a call hands back to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutput {
    Completed(CodexToolResult),
    /// A failure turned into text by the failure handler.
    Recovered(String),
}

impl ToolOutput {
    pub fn result(&self) -> Option<&CodexToolResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Recovered(_) => None,
        }
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(result) => result.fmt(f),
            Self::Recovered(message) => f.write_str(message),
        }
    }
}

enum CodexSource {
    Provided(Arc<Codex>),
    Lazy {
        options: CodexOptions,
        cell: OnceCell<Arc<Codex>>,
    },
}

/// A host-callable tool that runs one Codex turn per invocation.
///
/// Cheap to clone; clones share the lazily created client and the persisted
/// session.
#[derive(Clone)]
pub struct CodexTool {
    inner: Arc<CodexToolInner>,
}

struct CodexToolInner {
    name: String,
    description: String,
    params_json_schema: Value,
    is_enabled: bool,
    codex: CodexSource,
    thread_options: Option<ThreadOptions>,
    turn_options: TurnOptions,
    configured_thread_id: Option<String>,
    span_data_max_chars: Option<usize>,
    persist_session: bool,
    persisted_thread: Mutex<Option<Thread>>,
    on_stream: Option<Arc<dyn StreamObserver>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    use_run_context_thread_id: bool,
    run_context_thread_id_key: String,
}

/// Build a Codex tool. Configuration errors surface here, before any call.
pub fn codex_tool(options: CodexToolOptions) -> Result<CodexTool, CodexToolError> {
    CodexTool::new(options)
}

impl CodexTool {
    pub fn new(options: CodexToolOptions) -> Result<Self, CodexToolError> {
        let name = resolve_tool_name(options.name.as_deref())?;
        let run_context_thread_id_key = resolve_run_context_thread_id_key(
            &name,
            options.run_context_thread_id_key.as_deref(),
            options.use_run_context_thread_id,
        )?;
        let description = options
            .description
            .filter(|description| !description.is_empty())
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_owned());
        let output_schema = options
            .output_schema
            .as_ref()
            .map(resolve_output_schema)
            .transpose()?;
        let thread_options = merge_thread_options(
            options.default_thread_options,
            options.sandbox_mode,
            options.working_directory,
            options.skip_git_repo_check,
        );
        let codex = match options.codex {
            Some(codex) => CodexSource::Provided(codex),
            None => CodexSource::Lazy {
                options: resolve_codex_options(options.codex_options, |name| {
                    std::env::var(name).ok()
                }),
                cell: OnceCell::new(),
            },
        };

        Ok(Self {
            inner: Arc::new(CodexToolInner {
                params_json_schema: params_json_schema(!options.use_run_context_thread_id),
                name,
                description,
                is_enabled: options.is_enabled,
                codex,
                thread_options,
                turn_options: merge_turn_options(options.default_turn_options, output_schema),
                configured_thread_id: options
                    .thread_id
                    .map(|id| id.trim().to_owned())
                    .filter(|id| !id.is_empty()),
                span_data_max_chars: options.span_data_max_chars,
                persist_session: options.persist_session,
                persisted_thread: Mutex::new(None),
                on_stream: options.on_stream,
                failure_handler: options.failure_handler,
                use_run_context_thread_id: options.use_run_context_thread_id,
                run_context_thread_id_key,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Strict parameter schema to advertise to the model.
    pub fn params_json_schema(&self) -> &Value {
        &self.inner.params_json_schema
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled
    }

    pub fn run_context_thread_id_key(&self) -> &str {
        &self.inner.run_context_thread_id_key
    }

    /// Thread cached by `persist_session`, if a call created one.
    pub fn persisted_thread(&self) -> Option<Thread> {
        lock(&self.inner.persisted_thread).clone()
    }

    /// Run one call with the model-supplied JSON arguments.
    ///
    /// The call runs under a function span named after the tool. Failures go
    /// to the failure handler when one is set and propagate otherwise; either
    /// way a known thread id is first written back to the run context.
    pub async fn invoke(
        &self,
        ctx: &ToolContext,
        input_json: &str,
    ) -> Result<ToolOutput, CodexToolError> {
        let mut tool_span = ctx
            .tracer
            .start_span(self.name(), SpanKind::Function, None, Map::new());
        let mut resolved_thread_id = None;
        let outcome = self
            .run_call(ctx, input_json, tool_span.span_id(), &mut resolved_thread_id)
            .await;

        let output = match outcome {
            Ok(result) => Ok(ToolOutput::Completed(result)),
            Err(err) => {
                if self.inner.use_run_context_thread_id {
                    store_thread_id_after_error(
                        ctx,
                        &self.inner.run_context_thread_id_key,
                        resolved_thread_id.as_deref(),
                    );
                }
                tool_span.set_error(
                    SpanError::new(RECOVERED_FAILURE_MESSAGE).with_data(json!({
                        "tool_name": self.inner.name,
                        "error": err.to_string(),
                    })),
                );
                match &self.inner.failure_handler {
                    None => Err(err),
                    Some(handler) => {
                        let message = handler.handle(ctx, &err).await;
                        tracing::error!(tool = %self.inner.name, error = %err, "codex tool failed");
                        Ok(ToolOutput::Recovered(message))
                    }
                }
            }
        };
        tool_span.finish();
        output
    }

    async fn run_call(
        &self,
        ctx: &ToolContext,
        input_json: &str,
        span_id: &str,
        resolved_thread_id: &mut Option<String>,
    ) -> Result<CodexToolResult, CodexToolError> {
        let inner = &self.inner;
        let args = parse_tool_input(input_json, !inner.use_run_context_thread_id)?;
        if inner.use_run_context_thread_id {
            validate_run_context(ctx, &inner.run_context_thread_id_key)?;
        }

        let codex = self.codex().await?;
        let call_thread_id = self.call_thread_id(ctx, &args)?;
        let thread = if inner.persist_session {
            self.persisted_or_new_thread(&codex, call_thread_id.as_deref())?
        } else {
            self.new_thread(&codex, call_thread_id.as_deref())
        };
        *resolved_thread_id = thread.id().or(call_thread_id);

        let stream = thread
            .run_streamed(args.to_input(), inner.turn_options.clone())
            .await?;
        let (response, usage) = self
            .consume_turn(stream, ctx, &thread, span_id, &args, resolved_thread_id)
            .await?;

        if let Some(usage) = &usage {
            ctx.add_usage(&to_host_usage(usage));
        }
        if inner.use_run_context_thread_id {
            store_thread_id(
                ctx,
                &inner.run_context_thread_id_key,
                resolved_thread_id.as_deref(),
            )?;
        }
        tracing::debug!(
            tool = %inner.name,
            thread_id = resolved_thread_id.as_deref().unwrap_or_default(),
            "codex tool call completed"
        );

        Ok(CodexToolResult {
            thread_id: resolved_thread_id.clone(),
            response,
            usage,
        })
    }

    /// Drain the turn: feed the observer, track item spans and aggregate.
    /// Spans and the observer queue are settled before returning, on every path.
    async fn consume_turn(
        &self,
        mut stream: TurnStream,
        ctx: &ToolContext,
        thread: &Thread,
        span_id: &str,
        args: &ToolCallArguments,
        resolved_thread_id: &mut Option<String>,
    ) -> Result<(String, Option<Usage>), CodexToolError> {
        let mut spans = ItemSpanTracker::new(
            Arc::clone(&ctx.tracer),
            Some(span_id.to_owned()),
            self.inner.span_data_max_chars,
        );
        let dispatcher = self
            .inner
            .on_stream
            .as_ref()
            .map(|observer| StreamDispatcher::spawn(Arc::clone(observer)));
        let mut final_response = String::new();
        let mut usage = None;

        let outcome: Result<(), CodexToolError> = loop {
            let event = match stream.next_event().await {
                None => break Ok(()),
                Some(Ok(event)) => event,
                Some(Err(err)) => break Err(CodexToolError::from(err)),
            };
            if let Some(dispatcher) = &dispatcher {
                dispatcher.send(CodexToolStreamEvent {
                    event: event.clone(),
                    thread: thread.clone(),
                    tool_call_id: ctx.tool_call_id.clone(),
                });
            }

            match event {
                ThreadEvent::ThreadStarted { thread_id } => {
                    resolved_thread_id.get_or_insert(thread_id);
                }
                ThreadEvent::ItemStarted { item } => spans.item_started(&item),
                ThreadEvent::ItemUpdated { item } => spans.item_updated(&item),
                ThreadEvent::ItemCompleted { item } => {
                    spans.item_completed(&item);
                    if let Some(text) = item.agent_message_text() {
                        final_response = text.to_owned();
                    }
                }
                ThreadEvent::TurnCompleted { usage: turn_usage } => usage = Some(turn_usage),
                ThreadEvent::TurnFailed { error } => {
                    break Err(CodexError::TurnFailed(error.message).into());
                }
                ThreadEvent::Error { message } => break Err(CodexError::Stream(message).into()),
                ThreadEvent::TurnStarted | ThreadEvent::Unknown { .. } => {}
            }
        };

        drop(stream);
        if let Some(dispatcher) = dispatcher {
            dispatcher.finish().await;
        }
        spans.close_all();
        outcome?;

        if final_response.is_empty() {
            final_response = args.default_response();
        }
        Ok((final_response, usage))
    }

    async fn codex(&self) -> Result<Arc<Codex>, CodexToolError> {
        match &self.inner.codex {
            CodexSource::Provided(codex) => Ok(Arc::clone(codex)),
            CodexSource::Lazy { options, cell } => {
                let codex = cell
                    .get_or_try_init(|| async { Codex::new(options.clone()).map(Arc::new) })
                    .await?;
                Ok(Arc::clone(codex))
            }
        }
    }

    /// Explicit argument, then run context, then the configured default.
    fn call_thread_id(
        &self,
        ctx: &ToolContext,
        args: &ToolCallArguments,
    ) -> Result<Option<String>, CodexToolError> {
        if let Some(thread_id) = &args.thread_id {
            return Ok(Some(thread_id.clone()));
        }
        if self.inner.use_run_context_thread_id {
            if let Some(thread_id) = read_thread_id(ctx, &self.inner.run_context_thread_id_key)? {
                return Ok(Some(thread_id));
            }
        }
        Ok(self.inner.configured_thread_id.clone())
    }

    fn new_thread(&self, codex: &Codex, thread_id: Option<&str>) -> Thread {
        let options = self.inner.thread_options.clone().unwrap_or_default();
        match thread_id {
            Some(thread_id) => codex.resume_thread(thread_id, options),
            None => codex.start_thread(options),
        }
    }

    fn persisted_or_new_thread(
        &self,
        codex: &Codex,
        thread_id: Option<&str>,
    ) -> Result<Thread, CodexToolError> {
        let mut slot = lock(&self.inner.persisted_thread);
        if let Some(existing) = slot.as_ref() {
            if let (Some(requested), Some(active)) = (thread_id, existing.id()) {
                if requested != active {
                    return Err(CodexToolError::Config(PERSISTED_THREAD_CONFLICT.to_owned()));
                }
            }
            return Ok(existing.clone());
        }
        let thread = self.new_thread(codex, thread_id);
        *slot = Some(thread.clone());
        Ok(thread)
    }
}

impl fmt::Debug for CodexTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodexTool")
            .field("name", &self.inner.name)
            .field("is_enabled", &self.inner.is_enabled)
            .field("thread_options", &self.inner.thread_options)
            .field("persist_session", &self.inner.persist_session)
            .field("use_run_context_thread_id", &self.inner.use_run_context_thread_id)
            .field("run_context_thread_id_key", &self.inner.run_context_thread_id_key)
            .finish()
    }
}

/// Fill in the API key: explicit option, then the `env` map, then the process
/// environment. Empty values are skipped.
pub fn resolve_codex_options<F>(options: Option<CodexOptions>, process_env: F) -> CodexOptions
where
    F: Fn(&str) -> Option<String>,
{
    let mut options = options.unwrap_or_default();
    if options.api_key.as_deref().is_some_and(|key| !key.is_empty()) {
        return options;
    }
    let from_env_map = options.env.as_ref().and_then(|env| {
        API_KEY_ENV_NAMES
            .iter()
            .find_map(|name| env.get(*name).filter(|value| !value.is_empty()).cloned())
    });
    let api_key = from_env_map.or_else(|| {
        API_KEY_ENV_NAMES
            .iter()
            .find_map(|name| process_env(name).filter(|value| !value.is_empty()))
    });
    if api_key.is_some() {
        options.api_key = api_key;
    }
    options
}

/// `None` when neither defaults nor overrides carry anything.
pub fn merge_thread_options(
    defaults: Option<ThreadOptions>,
    sandbox_mode: Option<SandboxMode>,
    working_directory: Option<String>,
    skip_git_repo_check: Option<bool>,
) -> Option<ThreadOptions> {
    let defaults = defaults.filter(|options| !options.is_empty());
    let working_directory = working_directory.filter(|dir| !dir.is_empty());
    if defaults.is_none()
        && sandbox_mode.is_none()
        && working_directory.is_none()
        && skip_git_repo_check.is_none()
    {
        return None;
    }

    let mut merged = defaults.unwrap_or_default();
    if sandbox_mode.is_some() {
        merged.sandbox_mode = sandbox_mode;
    }
    if working_directory.is_some() {
        merged.working_directory = working_directory;
    }
    if skip_git_repo_check.is_some() {
        merged.skip_git_repo_check = skip_git_repo_check;
    }
    Some(merged)
}

pub fn merge_turn_options(
    defaults: Option<TurnOptions>,
    output_schema: Option<Value>,
) -> TurnOptions {
    let mut merged = defaults.unwrap_or_default();
    if output_schema.is_some() {
        merged.output_schema = output_schema;
    }
    merged
}

/// Host usage for one call: one request, reasoning tokens unreported.
pub fn to_host_usage(usage: &Usage) -> HostUsage {
    HostUsage {
        requests: 1,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        input_tokens_details: InputTokensDetails {
            cached_tokens: usage.cached_input_tokens,
        },
        output_tokens_details: OutputTokensDetails {
            reasoning_tokens: 0,
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests;
