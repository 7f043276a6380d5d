use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Pipeline milestones, emitted strictly in stage order. `Done` or `Error` is
/// always the terminal step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Launch,
    Navigate,
    Scroll,
    Snapshot,
    Download,
    Rewrite,
    Save,
    Done,
    Error,
}

/// A typed progress event. Serializes with a `type` tag so a surrounding
/// server can forward the stream to observers as-is.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum CloneEvent {
    /// Free-text milestone.
    Pipeline(String),
    Step(StepKind),
    /// Console output captured from the rendered page.
    Console(String),
    /// Raw network diagnostics from the rendered page.
    Network(String),
    /// Terminal failure message.
    Error(String),
}

/// Send half of the progress stream. Cloneable so browser event listeners can
/// forward into the same channel; a closed receiver silently drops events.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<CloneEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<CloneEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything. Used by tests and embedders that do not
    /// observe progress.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: CloneEvent) {
        tracing::debug!(?event, "clone event");
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn pipeline(&self, message: impl Into<String>) {
        self.emit(CloneEvent::Pipeline(message.into()));
    }

    pub fn step(&self, step: StepKind) {
        self.emit(CloneEvent::Step(step));
    }

    pub fn console(&self, message: impl Into<String>) {
        self.emit(CloneEvent::Console(message.into()));
    }

    pub fn network(&self, message: impl Into<String>) {
        self.emit(CloneEvent::Network(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(CloneEvent::Error(message.into()));
    }
}
