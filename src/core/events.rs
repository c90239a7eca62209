//! Updates sent by handler tasks to the session.
//!
//! Handler tasks never touch session state. Every mutation they want travels
//! through one channel that only the foreground loop drains, so updates from
//! a single task arrive in the order they were sent.
//!
//! Streamed markup is sent with an acknowledgement: the task waits until the
//! session has rendered it before pulling the next chunk.

use tokio::sync::{mpsc, oneshot};

use crate::core::error_log::FailureOrigin;
use crate::models::Message;

pub type TaskId = u64;

/// Capacity of the update channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Chat,
    Agent,
    Shell,
}

impl TaskKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Chat => "chat",
            TaskKind::Agent => "agent",
            TaskKind::Shell => "shell",
        }
    }
}

#[derive(Debug)]
pub struct Update {
    pub task: TaskId,
    /// Session generation the task was launched in.
    pub generation: u64,
    pub kind: UpdateKind,
    /// Signalled once the update has been applied.
    pub ack: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    /// Append markup to the transcript.
    Append(String),
    /// Append markup as a new block.
    AppendSection(String),
    ScrollToEnd,
    /// Append a message to the history.
    Record(Message),
    /// Write the error log without touching the transcript.
    LogError {
        origin: FailureOrigin,
        message: String,
    },
    /// The task failed; log, render and record it.
    Failed {
        origin: FailureOrigin,
        message: String,
    },
}

/// Handle a task uses to talk to its session.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: TaskId,
    pub generation: u64,
    tx: mpsc::Sender<Update>,
}

impl TaskContext {
    pub fn new(id: TaskId, generation: u64, tx: mpsc::Sender<Update>) -> Self {
        Self { id, generation, tx }
    }

    pub async fn send(&self, kind: UpdateKind) {
        self.deliver(kind, None).await;
    }

    /// Send `kind` and wait until the session has applied it.
    ///
    /// Returns early if the session goes away or drops the update.
    pub async fn send_and_wait(&self, kind: UpdateKind) {
        let (ack, applied) = oneshot::channel();
        if self.deliver(kind, Some(ack)).await {
            let _ = applied.await;
        }
    }

    async fn deliver(&self, kind: UpdateKind, ack: Option<oneshot::Sender<()>>) -> bool {
        let update = Update {
            task: self.id,
            generation: self.generation,
            kind,
            ack,
        };
        if self.tx.send(update).await.is_err() {
            tracing::debug!(task = self.id, "Session dropped; discarding update");
            return false;
        }
        true
    }

    pub async fn append(&self, markup: impl Into<String>) {
        self.send(UpdateKind::Append(markup.into())).await;
    }

    /// Append streamed markup and wait for it to be rendered.
    pub async fn append_rendered(&self, markup: impl Into<String>) {
        self.send_and_wait(UpdateKind::Append(markup.into())).await;
    }

    pub async fn append_section(&self, markup: impl Into<String>) {
        self.send(UpdateKind::AppendSection(markup.into())).await;
    }

    pub async fn scroll_to_end(&self) {
        self.send(UpdateKind::ScrollToEnd).await;
    }

    pub async fn record(&self, message: Message) {
        self.send(UpdateKind::Record(message)).await;
    }

    pub async fn log_error(&self, origin: FailureOrigin, message: impl Into<String>) {
        self.send(UpdateKind::LogError {
            origin,
            message: message.into(),
        })
        .await;
    }

    pub async fn fail(&self, origin: FailureOrigin, message: impl Into<String>) {
        self.send(UpdateKind::Failed {
            origin,
            message: message.into(),
        })
        .await;
    }
}
