use std::fmt;
use std::sync::Arc;

use crate::errors::CodexError;
use crate::exec::{CodexExec, ExecRunner};
use crate::options::{CodexOptions, ThreadOptions};
use crate::thread::Thread;

/// Entry point: owns the exec runner shared by every thread it creates.
#[derive(Clone)]
pub struct Codex {
    exec: Arc<dyn ExecRunner>,
    options: CodexOptions,
}

impl Codex {
    /// Resolve the executable and stream limit now, so configuration errors
    /// surface before the first turn.
    pub fn new(options: CodexOptions) -> Result<Self, CodexError> {
        let exec = CodexExec::new(
            options.codex_path_override.clone(),
            options.env.clone(),
            options.codex_subprocess_stream_limit_bytes,
        )?;
        Ok(Self::with_exec(Arc::new(exec), options))
    }

    /// Use a custom runner, e.g. a remote executor or a scripted fake.
    pub fn with_exec(exec: Arc<dyn ExecRunner>, options: CodexOptions) -> Self {
        Self { exec, options }
    }

    pub fn options(&self) -> &CodexOptions {
        &self.options
    }

    pub fn start_thread(&self, options: ThreadOptions) -> Thread {
        Thread::new(Arc::clone(&self.exec), self.options.clone(), options, None)
    }

    /// Thread whose first turn resumes `id`.
    pub fn resume_thread(&self, id: impl Into<String>, options: ThreadOptions) -> Thread {
        Thread::new(
            Arc::clone(&self.exec),
            self.options.clone(),
            options,
            Some(id.into()),
        )
    }
}

impl fmt::Debug for Codex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codex")
            .field("options", &self.options)
            .finish()
    }
}
