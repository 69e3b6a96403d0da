use codex_bridge_runtime::CodexError;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodexToolError {
    /// Misconfiguration by the tool's owner: bad options or an unusable run context.
    #[error("{0}")]
    Config(String),
    /// Tool arguments supplied by the model failed validation.
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Codex(#[from] CodexError),
}
