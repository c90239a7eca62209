//! Tracking of handler tasks.
//!
//! Handler tasks are spawned fire-and-forget, but their join handles stay
//! here so a completion observer can reap them. A task that panicked is
//! reported back to the session, which records it like any other fault.

use std::any::Any;

use futures_util::FutureExt;
use tokio::task::{JoinError, JoinHandle};

use crate::core::events::{TaskId, TaskKind};

struct TrackedTask {
    id: TaskId,
    kind: TaskKind,
    generation: u64,
    handle: JoinHandle<()>,
}

/// A finished task and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: TaskId,
    pub kind: TaskKind,
    pub generation: u64,
    /// `Err` holds the panic or cancellation message.
    pub outcome: Result<(), String>,
}

#[derive(Default)]
pub struct TaskTracker {
    next_id: TaskId,
    tasks: Vec<TrackedTask>,
}

impl TaskTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id for the next task.
    pub fn next_id(&mut self) -> TaskId {
        self.next_id += 1;
        self.next_id
    }

    pub fn track(&mut self, id: TaskId, kind: TaskKind, generation: u64, handle: JoinHandle<()>) {
        tracing::debug!(task = id, kind = kind.label(), generation, "Task started");
        self.tasks.push(TrackedTask {
            id,
            kind,
            generation,
            handle,
        });
    }

    /// Remove every finished task and report how each ended.
    pub fn reap(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        self.tasks.retain_mut(|task| {
            if !task.handle.is_finished() {
                return true;
            }
            match (&mut task.handle).now_or_never() {
                Some(result) => {
                    done.push(Completion {
                        id: task.id,
                        kind: task.kind,
                        generation: task.generation,
                        outcome: result.map_err(join_error_message),
                    });
                    false
                }
                None => true,
            }
        });
        done
    }

    /// Number of tasks launched in `generation` that have not been reaped.
    ///
    /// A finished task counts until reaped, since its last updates may still
    /// be waiting in the channel.
    #[must_use]
    pub fn in_flight(&self, generation: u64) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.generation == generation)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        format!("Task panicked: {}", panic_message(err.into_panic()))
    } else {
        format!("Task was cancelled: {err}")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn reap_all(tracker: &mut TaskTracker) -> Vec<Completion> {
        let mut all = Vec::new();
        while !tracker.is_empty() {
            all.extend(tracker.reap());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        all
    }

    #[tokio::test]
    async fn reaps_successful_tasks() {
        let mut tracker = TaskTracker::new();
        let id = tracker.next_id();
        tracker.track(id, TaskKind::Shell, 0, tokio::spawn(async {}));

        let done = reap_all(&mut tracker).await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, id);
        assert_eq!(done[0].outcome, Ok(()));
    }

    #[tokio::test]
    async fn panics_become_failed_completions() {
        let mut tracker = TaskTracker::new();
        let id = tracker.next_id();
        tracker.track(
            id,
            TaskKind::Agent,
            2,
            tokio::spawn(async { panic!("agent exploded") }),
        );

        let done = reap_all(&mut tracker).await;
        assert_eq!(done[0].generation, 2);
        let message = done[0].outcome.clone().unwrap_err();
        assert!(message.contains("agent exploded"), "{message}");
    }

    #[tokio::test]
    async fn in_flight_counts_only_the_given_generation() {
        let mut tracker = TaskTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let id = tracker.next_id();
        tracker.track(
            id,
            TaskKind::Chat,
            1,
            tokio::spawn(async move {
                let _ = rx.await;
            }),
        );
        assert_eq!(tracker.in_flight(1), 1);
        assert_eq!(tracker.in_flight(2), 0);

        tx.send(()).unwrap();
        reap_all(&mut tracker).await;
        assert_eq!(tracker.in_flight(1), 0);
    }

    #[test]
    fn ids_are_unique() {
        let mut tracker = TaskTracker::new();
        assert_ne!(tracker.next_id(), tracker.next_id());
    }
}
