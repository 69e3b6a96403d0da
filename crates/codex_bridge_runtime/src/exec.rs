use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::CodexError;
use crate::options::{ApprovalPolicy, ReasoningEffort, SandboxMode, WebSearchMode};

pub const CODEX_PATH_ENV: &str = "CODEX_PATH";
pub const STREAM_LIMIT_ENV: &str = "CODEX_SUBPROCESS_STREAM_LIMIT_BYTES";
pub const ORIGINATOR_ENV: &str = "CODEX_INTERNAL_ORIGINATOR_OVERRIDE";
pub const ORIGINATOR: &str = "codex_sdk_rs";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const API_KEY_ENV: &str = "CODEX_API_KEY";

pub const DEFAULT_STREAM_LIMIT_BYTES: usize = 8 * 1024 * 1024;
pub const MIN_STREAM_LIMIT_BYTES: usize = 64 * 1024;
pub const MAX_STREAM_LIMIT_BYTES: usize = 64 * 1024 * 1024;

const LINE_CHANNEL_CAPACITY: usize = 256;

/// One turn invocation of `codex exec`.
#[derive(Clone, Debug, Default)]
pub struct ExecArgs {
    pub input: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub thread_id: Option<String>,
    pub images: Vec<String>,
    pub model: Option<String>,
    pub sandbox_mode: Option<SandboxMode>,
    pub working_directory: Option<String>,
    pub additional_directories: Vec<String>,
    pub skip_git_repo_check: bool,
    pub output_schema_file: Option<PathBuf>,
    pub model_reasoning_effort: Option<ReasoningEffort>,
    pub network_access_enabled: Option<bool>,
    pub web_search_mode: Option<WebSearchMode>,
    pub web_search_enabled: Option<bool>,
    pub approval_policy: Option<ApprovalPolicy>,
    /// Cancelling asks the process to terminate; remaining output is still drained.
    pub signal: Option<CancellationToken>,
}

impl ExecArgs {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    /// CLI arguments after the executable, ending with `-` (prompt on stdin).
    /// Allocation: one Vec plus one String per flag. Complexity: O(flags).
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec!["exec".to_owned(), "--experimental-json".to_owned()];

        if let Some(model) = &self.model {
            push_flag(&mut args, "--model", model);
        }
        if let Some(mode) = self.sandbox_mode {
            push_flag(&mut args, "--sandbox", mode.as_wire());
        }
        if let Some(dir) = &self.working_directory {
            push_flag(&mut args, "--cd", dir);
        }
        for dir in &self.additional_directories {
            push_flag(&mut args, "--add-dir", dir);
        }
        if self.skip_git_repo_check {
            args.push("--skip-git-repo-check".to_owned());
        }
        if let Some(path) = &self.output_schema_file {
            push_flag(&mut args, "--output-schema", &path.to_string_lossy());
        }
        if let Some(effort) = self.model_reasoning_effort {
            push_config(
                &mut args,
                format!("model_reasoning_effort=\"{}\"", effort.as_wire()),
            );
        }
        if let Some(enabled) = self.network_access_enabled {
            push_config(
                &mut args,
                format!("sandbox_workspace_write.network_access={enabled}"),
            );
        }
        let web_search = match (self.web_search_mode, self.web_search_enabled) {
            (Some(mode), _) => Some(mode),
            (None, Some(true)) => Some(WebSearchMode::Live),
            (None, Some(false)) => Some(WebSearchMode::Disabled),
            (None, None) => None,
        };
        if let Some(mode) = web_search {
            push_config(&mut args, format!("web_search=\"{}\"", mode.as_wire()));
        }
        if let Some(policy) = self.approval_policy {
            push_config(
                &mut args,
                format!("approval_policy=\"{}\"", policy.as_wire()),
            );
        }

        if let Some(thread_id) = &self.thread_id {
            args.push("resume".to_owned());
            args.push(thread_id.clone());
        }
        for image in &self.images {
            push_flag(&mut args, "--image", image);
        }
        args.push("-".to_owned());
        args
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_owned());
    args.push(value.to_owned());
}

fn push_config(args: &mut Vec<String>, entry: String) {
    args.push("--config".to_owned());
    args.push(entry);
}

/// Launches one turn and yields its stdout lines.
///
/// Must be called inside a tokio runtime. The returned stream is finite; the
/// last item is an error when the process failed.
pub trait ExecRunner: Send + Sync {
    fn run(&self, args: ExecArgs) -> Result<ExecStream, CodexError>;
}

/// Lazy line stream of one running turn.
pub struct ExecStream {
    rx: mpsc::Receiver<Result<String, CodexError>>,
    task: Option<JoinHandle<()>>,
}

impl ExecStream {
    /// Build a stream fed by an external producer.
    /// The producer ends the stream by dropping its sender.
    pub fn from_receiver(rx: mpsc::Receiver<Result<String, CodexError>>) -> Self {
        Self { rx, task: None }
    }

    /// Next non-empty trimmed line, `None` once the process finished cleanly.
    pub async fn next_line(&mut self) -> Option<Result<String, CodexError>> {
        let next = self.rx.recv().await;
        if next.is_none() {
            if let Some(task) = self.task.take() {
                if let Err(err) = task.await {
                    return Some(Err(CodexError::Internal(format!(
                        "exec driver task join failed: {err}"
                    ))));
                }
            }
        }
        next
    }
}

impl std::fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStream")
            .field("driver_running", &self.task.is_some())
            .finish()
    }
}

/// `ExecRunner` that spawns the real `codex` executable.
#[derive(Clone, Debug)]
pub struct CodexExec {
    executable: PathBuf,
    env: Option<HashMap<String, String>>,
    stream_limit_bytes: usize,
}

impl CodexExec {
    /// `executable = None` resolves through [`find_codex_path`].
    /// `env = None` inherits the process environment.
    pub fn new(
        executable: Option<PathBuf>,
        env: Option<HashMap<String, String>>,
        stream_limit_bytes: Option<usize>,
    ) -> Result<Self, CodexError> {
        let executable = match executable {
            Some(path) => path,
            None => find_codex_path()?,
        };
        let env_limit = std::env::var(STREAM_LIMIT_ENV).ok();
        let stream_limit_bytes =
            resolve_stream_limit_bytes(stream_limit_bytes, env_limit.as_deref())?;
        Ok(Self {
            executable,
            env,
            stream_limit_bytes,
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn stream_limit_bytes(&self) -> usize {
        self.stream_limit_bytes
    }

    /// Child environment: caller map or process env, plus the SDK overlay.
    /// Allocation: one map. Complexity: O(env vars).
    pub fn child_env(&self, args: &ExecArgs) -> HashMap<String, String> {
        let mut env = match &self.env {
            Some(env) => env.clone(),
            None => std::env::vars().collect(),
        };
        env.insert(ORIGINATOR_ENV.to_owned(), ORIGINATOR.to_owned());
        if let Some(base_url) = &args.base_url {
            env.insert(BASE_URL_ENV.to_owned(), base_url.clone());
        }
        if let Some(api_key) = &args.api_key {
            env.insert(API_KEY_ENV.to_owned(), api_key.clone());
        }
        env
    }
}

impl ExecRunner for CodexExec {
    fn run(&self, args: ExecArgs) -> Result<ExecStream, CodexError> {
        let mut command = Command::new(&self.executable);
        command
            .args(args.command_args())
            .env_clear()
            .envs(self.child_env(&args))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|err| CodexError::Spawn(err.to_string()))?;
        tracing::debug!(
            executable = %self.executable.display(),
            pid = ?child.id(),
            resume = args.thread_id.is_some(),
            "spawned codex exec"
        );

        let Some(stdin) = child.stdin.take() else {
            kill_quietly(&mut child);
            return Err(CodexError::NoStdin);
        };
        let Some(stdout) = child.stdout.take() else {
            kill_quietly(&mut child);
            return Err(CodexError::NoStdout);
        };
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let driver = ProcessDriver {
            child,
            stdin,
            stdout,
            stderr,
            input: args.input,
            signal: args.signal.unwrap_or_default(),
            limit: self.stream_limit_bytes,
            tx,
        };
        let task = tokio::spawn(driver.run());
        Ok(ExecStream {
            rx,
            task: Some(task),
        })
    }
}

struct ProcessDriver {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    input: String,
    signal: CancellationToken,
    limit: usize,
    tx: mpsc::Sender<Result<String, CodexError>>,
}

impl ProcessDriver {
    async fn run(self) {
        let Self {
            mut child,
            mut stdin,
            stdout,
            stderr,
            input,
            signal,
            limit,
            tx,
        } = self;

        let stderr_task = stderr.map(|mut stderr| {
            tokio::spawn(async move {
                let mut captured = Vec::new();
                // Best effort: whatever was read before a failure is kept.
                let _ = stderr.read_to_end(&mut captured).await;
                captured
            })
        });

        if let Err(err) = write_prompt(&mut stdin, input.as_bytes()).await {
            kill_quietly(&mut child);
            let _ = tx
                .send(Err(CodexError::Io(format!("failed to write prompt: {err}"))))
                .await;
            return;
        }
        drop(stdin);

        let mut reader = BufReader::new(stdout);
        let mut line = Vec::with_capacity(4096);
        let mut terminate_sent = false;
        loop {
            let read = tokio::select! {
                read = read_bounded_line(&mut reader, &mut line, limit) => read,
                _ = signal.cancelled(), if !terminate_sent => {
                    terminate(&mut child);
                    terminate_sent = true;
                    continue;
                }
            };

            let read = match read {
                Ok(read) => read,
                Err(err) => {
                    kill_quietly(&mut child);
                    let _ = tx
                        .send(Err(CodexError::Io(format!("failed to read stdout: {err}"))))
                        .await;
                    return;
                }
            };

            let content_len = line.len() - usize::from(line.ends_with(b"\n"));
            if content_len > limit {
                kill_quietly(&mut child);
                let _ = tx.send(Err(CodexError::LineTooLong { limit })).await;
                return;
            }

            if !line.is_empty() {
                let text = String::from_utf8_lossy(&line);
                let trimmed = text.trim();
                if !trimmed.is_empty() && tx.send(Ok(trimmed.to_owned())).await.is_err() {
                    kill_quietly(&mut child);
                    return;
                }
                line.clear();
            }
            if read == 0 {
                break;
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(err) => {
                let _ = tx
                    .send(Err(CodexError::Io(format!("failed to wait for codex: {err}"))))
                    .await;
                return;
            }
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        tracing::debug!(status = %status, terminated = terminate_sent, "codex exec exited");

        if !status.success() {
            let _ = tx
                .send(Err(CodexError::ExitFailure {
                    code: status.code(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                }))
                .await;
        }
    }
}

async fn write_prompt(stdin: &mut ChildStdin, input: &[u8]) -> std::io::Result<()> {
    let written = match stdin.write_all(input).await {
        Ok(()) => stdin.shutdown().await,
        Err(err) => Err(err),
    };
    match written {
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Append bytes up to and including the next newline, reading at most
/// `limit + 1` bytes in total into `line`.
/// Cancellation keeps partially read bytes in `line`.
async fn read_bounded_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let budget = limit.saturating_add(1).saturating_sub(line.len()) as u64;
    (&mut *reader).take(budget).read_until(b'\n', line).await
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        match nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
            Ok(()) => return,
            Err(err) => tracing::warn!(error = %err, "failed to send SIGTERM to codex"),
        }
    }
    kill_quietly(child);
}

fn kill_quietly(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        tracing::debug!(error = %err, "codex process already gone");
    }
}

/// Pick the stdout line limit: explicit value, then the environment value, then the default.
/// Allocation: error message only. Complexity: O(1).
pub fn resolve_stream_limit_bytes(
    explicit: Option<usize>,
    env_value: Option<&str>,
) -> Result<usize, CodexError> {
    let limit = match (explicit, env_value) {
        (Some(limit), _) => limit,
        (None, Some(raw)) => raw.trim().parse::<usize>().map_err(|_| {
            CodexError::InvalidConfig(format!(
                "{STREAM_LIMIT_ENV} must be an integer number of bytes, got {raw:?}"
            ))
        })?,
        (None, None) => DEFAULT_STREAM_LIMIT_BYTES,
    };
    if !(MIN_STREAM_LIMIT_BYTES..=MAX_STREAM_LIMIT_BYTES).contains(&limit) {
        return Err(CodexError::InvalidConfig(format!(
            "codex_subprocess_stream_limit_bytes must be between {MIN_STREAM_LIMIT_BYTES} and {MAX_STREAM_LIMIT_BYTES} bytes, got {limit}"
        )));
    }
    Ok(limit)
}

/// Locate the `codex` executable.
/// Order: `CODEX_PATH`, then `PATH`, then the bundled vendor directory.
pub fn find_codex_path() -> Result<PathBuf, CodexError> {
    resolve_codex_path(
        std::env::var_os(CODEX_PATH_ENV),
        std::env::var_os("PATH"),
        || platform_target_triple(std::env::consts::OS, std::env::consts::ARCH),
    )
}

fn resolve_codex_path(
    override_path: Option<OsString>,
    search_path: Option<OsString>,
    target_triple: impl FnOnce() -> Result<&'static str, CodexError>,
) -> Result<PathBuf, CodexError> {
    if let Some(path) = override_path.filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let binary = if cfg!(windows) { "codex.exe" } else { "codex" };
    if let Some(search_path) = search_path {
        if let Some(found) = std::env::split_paths(&search_path)
            .map(|dir| dir.join(binary))
            .find(|candidate| candidate.is_file())
        {
            return Ok(found);
        }
    }

    Ok(Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("vendor")
        .join(target_triple()?)
        .join("codex")
        .join(binary))
}

/// Map an OS / architecture pair onto the vendor directory name.
pub fn platform_target_triple(os: &str, arch: &str) -> Result<&'static str, CodexError> {
    let arch_key = match arch {
        "x86_64" | "amd64" => "x86_64",
        "aarch64" | "arm64" => "aarch64",
        _ => "",
    };
    let triple = match (os, arch_key) {
        ("linux", "x86_64") => "x86_64-unknown-linux-musl",
        ("linux", "aarch64") => "aarch64-unknown-linux-musl",
        ("macos" | "darwin", "x86_64") => "x86_64-apple-darwin",
        ("macos" | "darwin", "aarch64") => "aarch64-apple-darwin",
        ("windows" | "win32", "x86_64") => "x86_64-pc-windows-msvc",
        ("windows" | "win32", "aarch64") => "aarch64-pc-windows-msvc",
        _ => {
            return Err(CodexError::UnsupportedPlatform {
                os: os.to_owned(),
                arch: arch.to_owned(),
            })
        }
    };
    Ok(triple)
}

#[cfg(test)]
mod tests;
