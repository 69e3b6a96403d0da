use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::errors::CodexError;
use crate::events::{parse_thread_event, ThreadEvent, ThreadItem, Usage};
use crate::exec::{ExecArgs, ExecRunner, ExecStream};
use crate::options::{CodexOptions, ThreadOptions, TurnOptions};
use crate::output_schema::{create_output_schema_file, OutputSchemaFile};

/// One structured prompt fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserInput {
    Text { text: String },
    LocalImage { path: PathBuf },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Text(String),
    Items(Vec<UserInput>),
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<UserInput>> for Input {
    fn from(value: Vec<UserInput>) -> Self {
        Self::Items(value)
    }
}

/// Split input into the stdin prompt and `--image` paths.
/// Text fragments are joined by a blank line; empty image paths are skipped.
/// Allocation: prompt String + image Vec. Complexity: O(total input size).
pub fn normalize_input(input: &Input) -> (String, Vec<String>) {
    match input {
        Input::Text(text) => (text.clone(), Vec::new()),
        Input::Items(items) => {
            let mut texts = Vec::new();
            let mut images = Vec::new();
            for item in items {
                match item {
                    UserInput::Text { text } => texts.push(text.as_str()),
                    UserInput::LocalImage { path } if !path.as_os_str().is_empty() => {
                        images.push(path.to_string_lossy().into_owned());
                    }
                    UserInput::LocalImage { .. } => {}
                }
            }
            (texts.join("\n\n"), images)
        }
    }
}

/// Result of a fully consumed turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Turn {
    /// Completed items in arrival order.
    pub items: Vec<ThreadItem>,
    /// Text of the last completed agent message, empty when none arrived.
    pub final_response: String,
    pub usage: Option<Usage>,
}

/// Resumable conversation handle.
///
/// Cloning shares the identifier slot and the turn lock, so clones observe the
/// same conversation and their turns run one at a time.
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    exec: Arc<dyn ExecRunner>,
    options: CodexOptions,
    thread_options: ThreadOptions,
    id: ArcSwapOption<String>,
    turn_lock: Arc<Mutex<()>>,
}

impl Thread {
    pub(crate) fn new(
        exec: Arc<dyn ExecRunner>,
        options: CodexOptions,
        thread_options: ThreadOptions,
        id: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                exec,
                options,
                thread_options,
                id: ArcSwapOption::from(id.map(Arc::new)),
                turn_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Identifier assigned by the CLI, `None` until the first `thread.started`.
    pub fn id(&self) -> Option<String> {
        self.inner.id.load_full().map(|id| id.as_ref().clone())
    }

    pub fn thread_options(&self) -> &ThreadOptions {
        &self.inner.thread_options
    }

    /// First id wins; a known id (resume or earlier turn) never changes.
    fn record_id(&self, id: &str) {
        self.inner
            .id
            .rcu(|current| current.clone().or_else(|| Some(Arc::new(id.to_owned()))));
    }

    /// Start one turn and return its live event stream.
    ///
    /// Waits for any earlier turn on this thread to finish first.
    /// Side effects: stages the output schema, spawns the CLI.
    pub async fn run_streamed(
        &self,
        input: impl Into<Input>,
        turn_options: TurnOptions,
    ) -> Result<TurnStream, CodexError> {
        let turn_guard = Arc::clone(&self.inner.turn_lock).lock_owned().await;
        let schema_file = create_output_schema_file(turn_options.output_schema.as_ref())?;

        let (prompt, images) = normalize_input(&input.into());
        let signal = turn_options.signal.unwrap_or_default();
        let exec_signal = signal.child_token();
        let args = self.exec_args(prompt, images, schema_file.path(), exec_signal.clone());

        let lines = self.inner.exec.run(args)?;
        Ok(TurnStream {
            thread: self.clone(),
            lines,
            schema_file,
            signal,
            exec_signal,
            idle_timeout: turn_options.idle_timeout,
            turn_guard: Some(turn_guard),
        })
    }

    /// Run one turn to completion.
    /// Fails on the first protocol error, `turn.failed` or stream `error` event.
    pub async fn run(
        &self,
        input: impl Into<Input>,
        turn_options: TurnOptions,
    ) -> Result<Turn, CodexError> {
        let mut stream = self.run_streamed(input, turn_options).await?;
        let mut turn = Turn::default();
        while let Some(event) = stream.next_event().await {
            match event? {
                ThreadEvent::ItemCompleted { item } => {
                    if let Some(text) = item.agent_message_text() {
                        turn.final_response = text.to_owned();
                    }
                    turn.items.push(item);
                }
                ThreadEvent::TurnCompleted { usage } => turn.usage = Some(usage),
                ThreadEvent::TurnFailed { error } => {
                    return Err(CodexError::TurnFailed(error.message))
                }
                ThreadEvent::Error { message } => return Err(CodexError::Stream(message)),
                _ => {}
            }
        }
        Ok(turn)
    }

    fn exec_args(
        &self,
        input: String,
        images: Vec<String>,
        schema_path: Option<&Path>,
        signal: CancellationToken,
    ) -> ExecArgs {
        let options = &self.inner.options;
        let thread_options = &self.inner.thread_options;
        ExecArgs {
            input,
            base_url: options.base_url.clone(),
            api_key: options.api_key.clone(),
            thread_id: self.id(),
            images,
            model: thread_options.model.clone(),
            sandbox_mode: thread_options.sandbox_mode,
            working_directory: thread_options.working_directory.clone(),
            additional_directories: thread_options.additional_directories.clone(),
            skip_git_repo_check: thread_options.skip_git_repo_check.unwrap_or(false),
            output_schema_file: schema_path.map(Path::to_path_buf),
            model_reasoning_effort: thread_options.model_reasoning_effort,
            network_access_enabled: thread_options.network_access_enabled,
            web_search_mode: thread_options.web_search_mode,
            web_search_enabled: thread_options.web_search_enabled,
            approval_policy: thread_options.approval_policy,
            signal: Some(signal),
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("thread_options", &self.inner.thread_options)
            .finish()
    }
}

/// Live events of one turn.
///
/// The stream ends (`None`) when the CLI exits cleanly; after the first error
/// it ends as well. Dropping it early terminates the subprocess and releases
/// the staged schema.
pub struct TurnStream {
    thread: Thread,
    lines: ExecStream,
    schema_file: OutputSchemaFile,
    signal: CancellationToken,
    exec_signal: CancellationToken,
    idle_timeout: Option<Duration>,
    turn_guard: Option<OwnedMutexGuard<()>>,
}

impl TurnStream {
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Caller-visible cancellation signal of this turn.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub fn is_finished(&self) -> bool {
        self.turn_guard.is_none()
    }

    /// Wait for the next event, bounded by the idle timeout when configured.
    /// On idle expiry the turn signal is cancelled so the subprocess terminates.
    /// A cancelled signal fails the turn without waiting for more output.
    pub async fn next_event(&mut self) -> Option<Result<ThreadEvent, CodexError>> {
        if self.is_finished() {
            return None;
        }

        let signal = self.signal.clone();
        let wait = tokio::select! {
            biased;
            _ = signal.cancelled() => Wait::Cancelled,
            wait = next_line_within(&mut self.lines, self.idle_timeout) => wait,
        };
        let next = match wait {
            Wait::Line(next) => next,
            Wait::Idle(idle) => {
                self.signal.cancel();
                return Some(Err(self.fail(CodexError::IdleTimeout { idle })));
            }
            Wait::Cancelled => return Some(Err(self.fail(CodexError::Cancelled))),
        };

        match next {
            None => {
                self.finish();
                None
            }
            Some(Err(err)) => Some(Err(self.fail(err))),
            Some(Ok(line)) => match parse_thread_event(&line) {
                Ok(event) => {
                    if let ThreadEvent::ThreadStarted { thread_id } = &event {
                        self.thread.record_id(thread_id);
                    }
                    Some(Ok(event))
                }
                Err(err) => Some(Err(self.fail(err))),
            },
        }
    }

    fn fail(&mut self, err: CodexError) -> CodexError {
        self.exec_signal.cancel();
        self.finish();
        err
    }

    fn finish(&mut self) {
        self.schema_file.cleanup();
        self.turn_guard = None;
    }
}

enum Wait {
    Line(Option<Result<String, CodexError>>),
    Idle(Duration),
    Cancelled,
}

async fn next_line_within(lines: &mut ExecStream, idle_timeout: Option<Duration>) -> Wait {
    match idle_timeout {
        Some(idle) => match tokio::time::timeout(idle, lines.next_line()).await {
            Ok(next) => Wait::Line(next),
            Err(_) => Wait::Idle(idle),
        },
        None => Wait::Line(lines.next_line().await),
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.exec_signal.cancel();
        }
        self.schema_file.cleanup();
    }
}

impl fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnStream")
            .field("thread", &self.thread)
            .field("idle_timeout", &self.idle_timeout)
            .field("finished", &self.is_finished())
            .finish()
    }
}
