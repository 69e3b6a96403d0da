use std::sync::Arc;

use codex_bridge_core::{HostFuture, ToolContext};

use crate::errors::CodexToolError;

/// Turns a failed call into the text handed back to the model.
pub trait FailureHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a ToolContext, error: &'a CodexToolError) -> HostFuture<'a, String>;
}

/// Reports the error and asks the model to retry.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFailureHandler;

impl FailureHandler for DefaultFailureHandler {
    fn handle<'a>(&'a self, _ctx: &'a ToolContext, error: &'a CodexToolError) -> HostFuture<'a, String> {
        let message =
            format!("An error occurred while running the tool. Please try again. Error: {error}");
        Box::pin(async move { message })
    }
}

struct FnFailureHandler<F> {
    callback: F,
}

impl<F> FailureHandler for FnFailureHandler<F>
where
    F: Fn(&ToolContext, &CodexToolError) -> String + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a ToolContext, error: &'a CodexToolError) -> HostFuture<'a, String> {
        let message = (self.callback)(ctx, error);
        Box::pin(async move { message })
    }
}

/// Wrap a plain closure as a failure handler.
pub fn failure_handler_fn<F>(callback: F) -> Arc<dyn FailureHandler>
where
    F: Fn(&ToolContext, &CodexToolError) -> String + Send + Sync + 'static,
{
    Arc::new(FnFailureHandler { callback })
}
