use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    /// Span bracketing one tool invocation.
    Function,
    /// Free-form span opened by a tool for its own sub-steps.
    Custom,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanError {
    pub message: String,
    pub data: Value,
}

impl SpanError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Value::Object(Map::new()),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// One open observability span.
/// `finish` consumes the span, so a span is closed at most once.
pub trait ItemSpan: Send {
    fn span_id(&self) -> &str;
    fn data(&self) -> &Map<String, Value>;
    fn set_data(&mut self, data: Map<String, Value>);
    fn set_error(&mut self, error: SpanError);
    fn finish(self: Box<Self>);
}

/// Host tracing back end consumed by tools.
pub trait TraceProvider: Send + Sync {
    /// Open and start one span.
    /// Side effects: provider-specific recording.
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent_id: Option<&str>,
        data: Map<String, Value>,
    ) -> Box<dyn ItemSpan>;
}

/// Default provider: one `tracing` span per host span.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTraceProvider;

struct TracingSpan {
    id: String,
    span: tracing::Span,
    data: Map<String, Value>,
    error: Option<SpanError>,
}

impl TraceProvider for TracingTraceProvider {
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent_id: Option<&str>,
        data: Map<String, Value>,
    ) -> Box<dyn ItemSpan> {
        let id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "host_span",
            span_name = %name,
            span_kind = ?kind,
            span_id = %id,
            parent_id = parent_id.unwrap_or(""),
        );
        tracing::debug!(parent: &span, "span started");
        Box::new(TracingSpan {
            id,
            span,
            data,
            error: None,
        })
    }
}

impl ItemSpan for TracingSpan {
    fn span_id(&self) -> &str {
        &self.id
    }

    fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    fn set_data(&mut self, data: Map<String, Value>) {
        self.data = data;
    }

    fn set_error(&mut self, error: SpanError) {
        self.error = Some(error);
    }

    fn finish(self: Box<Self>) {
        let this = *self;
        let span = this.span;
        let data = Value::Object(this.data).to_string();
        match this.error {
            Some(error) => tracing::warn!(
                parent: &span,
                error = %error.message,
                error_data = %error.data,
                data = %data,
                "span finished with error"
            ),
            None => tracing::debug!(parent: &span, data = %data, "span finished"),
        }
    }
}

/// Snapshot of one span captured by [`RecordingTraceProvider`].
#[derive(Clone, Debug, PartialEq)]
pub struct SpanRecord {
    pub span_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub data: Map<String, Value>,
    pub error: Option<SpanError>,
    pub finish_count: usize,
}

/// In-memory provider keeping every span in start order.
#[derive(Clone, Debug, Default)]
pub struct RecordingTraceProvider {
    records: Arc<Mutex<Vec<SpanRecord>>>,
}

impl RecordingTraceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// All spans in start order.
    /// Allocation: O(n) clone. Complexity: O(n).
    pub fn spans(&self) -> Vec<SpanRecord> {
        lock(&self.records).clone()
    }

    pub fn spans_named(&self, name: &str) -> Vec<SpanRecord> {
        lock(&self.records)
            .iter()
            .filter(|record| record.name == name)
            .cloned()
            .collect()
    }
}

impl TraceProvider for RecordingTraceProvider {
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent_id: Option<&str>,
        data: Map<String, Value>,
    ) -> Box<dyn ItemSpan> {
        let id = Uuid::new_v4().to_string();
        let index = {
            let mut records = lock(&self.records);
            records.push(SpanRecord {
                span_id: id.clone(),
                parent_id: parent_id.map(ToOwned::to_owned),
                name: name.to_owned(),
                kind,
                data: data.clone(),
                error: None,
                finish_count: 0,
            });
            records.len() - 1
        };
        Box::new(RecordingSpan {
            index,
            id,
            data,
            records: Arc::clone(&self.records),
        })
    }
}

struct RecordingSpan {
    index: usize,
    id: String,
    data: Map<String, Value>,
    records: Arc<Mutex<Vec<SpanRecord>>>,
}

impl RecordingSpan {
    fn update(&self, apply: impl FnOnce(&mut SpanRecord)) {
        if let Some(record) = lock(&self.records).get_mut(self.index) {
            apply(record);
        }
    }
}

impl ItemSpan for RecordingSpan {
    fn span_id(&self) -> &str {
        &self.id
    }

    fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    fn set_data(&mut self, data: Map<String, Value>) {
        self.data = data;
        let snapshot = self.data.clone();
        self.update(|record| record.data = snapshot);
    }

    fn set_error(&mut self, error: SpanError) {
        self.update(|record| record.error = Some(error));
    }

    fn finish(self: Box<Self>) {
        self.update(|record| record.finish_count += 1);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
