//! Live stream observation.
//!
//! Events are queued to a dedicated worker so a slow or failing observer never
//! stalls the turn. Observer errors and panics are logged and dropped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use codex_bridge_core::HostFuture;
use codex_bridge_runtime::{Thread, ThreadEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One raw event of a running tool call.
#[derive(Clone)]
pub struct CodexToolStreamEvent {
    pub event: ThreadEvent,
    pub thread: Thread,
    pub tool_call_id: String,
}

impl fmt::Debug for CodexToolStreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodexToolStreamEvent")
            .field("event", &self.event.event_type())
            .field("thread_id", &self.thread.id())
            .field("tool_call_id", &self.tool_call_id)
            .finish()
    }
}

/// Receives every event of a tool call, in emission order.
pub trait StreamObserver: Send + Sync + 'static {
    fn on_event<'a>(&'a self, event: &'a CodexToolStreamEvent) -> HostFuture<'a, Result<(), String>>;
}

struct FnObserver<F> {
    callback: F,
}

impl<F, Fut> StreamObserver for FnObserver<F>
where
    F: Fn(CodexToolStreamEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_event<'a>(&'a self, event: &'a CodexToolStreamEvent) -> HostFuture<'a, Result<(), String>> {
        let pending = (self.callback)(event.clone());
        Box::pin(async move {
            pending.await;
            Ok(())
        })
    }
}

/// Wrap an async closure as an observer.
pub fn observer_fn<F, Fut>(callback: F) -> Arc<dyn StreamObserver>
where
    F: Fn(CodexToolStreamEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnObserver { callback })
}

/// Queue plus worker for one tool call.
pub(crate) struct StreamDispatcher {
    tx: mpsc::UnboundedSender<CodexToolStreamEvent>,
    worker: JoinHandle<()>,
}

impl StreamDispatcher {
    pub(crate) fn spawn(observer: Arc<dyn StreamObserver>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(observer_loop(observer, rx));
        Self { tx, worker }
    }

    /// Enqueue without waiting on the observer.
    /// Allocation: one queue node. Complexity: O(1).
    pub(crate) fn send(&self, event: CodexToolStreamEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("stream observer queue closed; dropping event");
        }
    }

    /// Close the queue and wait until every queued event was handled.
    pub(crate) async fn finish(self) {
        drop(self.tx);
        if let Err(err) = self.worker.await {
            tracing::warn!(error = %err, "stream observer worker ended abnormally");
        }
    }
}

/// Each callback runs in its own task so a panic stays contained; the worker
/// still awaits it before taking the next event, which keeps delivery ordered.
async fn observer_loop(
    observer: Arc<dyn StreamObserver>,
    mut rx: mpsc::UnboundedReceiver<CodexToolStreamEvent>,
) {
    while let Some(event) = rx.recv().await {
        let event_type = event.event.event_type().to_owned();
        let observer = Arc::clone(&observer);
        let handled = tokio::spawn(async move { observer.on_event(&event).await }).await;
        match handled {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(event_type = %event_type, error = %err, "stream observer failed");
            }
            Err(err) => {
                tracing::warn!(event_type = %event_type, error = %err, "stream observer panicked");
            }
        }
    }
}
