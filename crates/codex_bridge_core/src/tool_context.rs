use std::fmt;
use std::sync::{Arc, Mutex};

use crate::context::RunContext;
use crate::trace::{TraceProvider, TracingTraceProvider};
use crate::usage::Usage;

/// Per-call state a host hands to a tool invocation.
pub struct ToolContext {
    pub context: Option<Arc<dyn RunContext>>,
    pub tool_call_id: String,
    pub tool_arguments: String,
    pub tracer: Arc<dyn TraceProvider>,
    usage: Mutex<Usage>,
}

impl ToolContext {
    /// Context with no run-context bag and the `tracing` provider.
    /// Allocation: one String. Complexity: O(1).
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            context: None,
            tool_call_id: tool_call_id.into(),
            tool_arguments: String::new(),
            tracer: Arc::new(TracingTraceProvider),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn with_context(mut self, context: Arc<dyn RunContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_tool_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.tool_arguments = arguments.into();
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn TraceProvider>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Fold one usage record into the run total.
    /// Allocation: none. Complexity: O(1).
    pub fn add_usage(&self, usage: &Usage) {
        let mut guard = match self.usage.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.add(usage);
    }

    pub fn usage(&self) -> Usage {
        match self.usage.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("has_context", &self.context.is_some())
            .field("tool_call_id", &self.tool_call_id)
            .field("usage", &self.usage())
            .finish()
    }
}
