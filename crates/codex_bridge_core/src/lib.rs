//! Host-side contract types shared by the codex_bridge crates.
//! A host orchestration framework provides these; tools only consume them.

use std::future::Future;
use std::pin::Pin;

mod context;
mod tool_context;
mod trace;
mod usage;

pub use context::{ContextError, MapContext, ReadOnlyContext, RecordContext, RunContext};
pub use tool_context::ToolContext;
pub use trace::{
    ItemSpan, RecordingTraceProvider, SpanError, SpanKind, SpanRecord, TraceProvider,
    TracingTraceProvider,
};
pub use usage::{InputTokensDetails, OutputTokensDetails, Usage};

pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
