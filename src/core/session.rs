//! Session state, command dispatch and update application.
//!
//! The session is the only owner of the transcript, the history and the mode
//! state. Handler tasks report through the update channel, and the foreground
//! loop calls [`Session::tick`] to apply what they sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::error_log::{ErrorLog, FailureOrigin};
use crate::core::events::{TaskContext, TaskKind, UPDATE_CHANNEL_CAPACITY, Update, UpdateKind};
use crate::core::handlers::{self, agent, chat, shell};
use crate::core::mode::{Mode, ModeState, SubmitBehavior};
use crate::core::tasks::{Completion, TaskTracker};
use crate::core::transcript::{History, Transcript};
use crate::escape::escape;
use crate::llm_client::{ChatClient, ReasoningAgent, ToolManager};
use crate::models::Message;
use crate::prompts;
use crate::surface::{Status, Surface};

/// Input that resets the session instead of being dispatched.
pub const RESET_COMMAND: &str = "clear";

const SETTLE_POLL: Duration = Duration::from_millis(10);

/// What happens to a submission while another task is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionPolicy {
    /// Hold new submissions until the running task is reaped.
    #[default]
    Queue,
    /// Dispatch immediately; concurrent tasks interleave their output.
    Overlap,
}

/// External services the handlers talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatClient>,
    pub agent: Arc<dyn ReasoningAgent>,
    pub tools: Arc<dyn ToolManager>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    pub max_iterations: u32,
    pub submission_policy: SubmissionPolicy,
    pub mode: Mode,
    pub submit_behavior: SubmitBehavior,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            system_prompt: prompts::default_system_prompt(),
            max_iterations: 10,
            submission_policy: SubmissionPolicy::default(),
            mode: Mode::default(),
            submit_behavior: SubmitBehavior::default(),
        }
    }
}

/// Result of [`Session::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input; nothing changed.
    Ignored,
    /// The reset command ran.
    Reset,
    /// Held until the running task finishes.
    Queued,
    Dispatched(TaskKind),
}

impl SubmitOutcome {
    /// Whether the input box should be cleared.
    #[must_use]
    pub fn consumed(self) -> bool {
        !matches!(self, SubmitOutcome::Ignored)
    }
}

pub struct Session<S: Surface> {
    state: ModeState,
    transcript: Transcript,
    history: History,
    generation: u64,
    surface: S,
    error_log: ErrorLog,
    collaborators: Collaborators,
    max_iterations: u32,
    policy: SubmissionPolicy,
    tasks: TaskTracker,
    queue: VecDeque<(Mode, String)>,
    tx: mpsc::Sender<Update>,
    rx: mpsc::Receiver<Update>,
}

impl<S: Surface> Session<S> {
    pub fn new(
        surface: S,
        collaborators: Collaborators,
        error_log: ErrorLog,
        options: SessionOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let mut session = Self {
            state: ModeState::new(options.mode, options.submit_behavior),
            transcript: Transcript::new(),
            history: History::new(options.system_prompt),
            generation: 0,
            surface,
            error_log,
            collaborators,
            max_iterations: options.max_iterations.max(1),
            policy: options.submission_policy,
            tasks: TaskTracker::new(),
            queue: VecDeque::new(),
            tx,
            rx,
        };
        session.refresh_status();
        session
    }

    // === Accessors ===

    #[must_use]
    pub fn transcript(&self) -> &str {
        self.transcript.as_str()
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    #[must_use]
    pub fn mode_state(&self) -> ModeState {
        self.state
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[must_use]
    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether a task of the current generation is still running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.tasks.in_flight(self.generation) > 0
    }

    /// No tasks, no queued submissions, no pending updates.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.queue.is_empty() && self.rx.is_empty()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status {
            mode: self.state.mode,
            submit_behavior: self.state.submit_behavior,
            queued: self.queue.len(),
            busy: self.is_busy(),
        }
    }

    // === Mode state ===

    pub fn cycle_mode(&mut self) -> Mode {
        let mode = self.state.cycle_mode();
        tracing::debug!(%mode, "Mode changed");
        self.refresh_status();
        mode
    }

    pub fn toggle_submit_behavior(&mut self) -> SubmitBehavior {
        let behavior = self.state.toggle_submit_behavior();
        self.refresh_status();
        behavior
    }

    fn refresh_status(&mut self) {
        let status = self.status();
        self.surface.refresh_status(&status);
    }

    // === Dispatch ===

    /// Route a submitted line to the handler for the current mode.
    ///
    /// Never fails; handler faults end up in the transcript and error log.
    pub fn submit(&mut self, line: &str) -> SubmitOutcome {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return SubmitOutcome::Ignored;
        }
        if trimmed == RESET_COMMAND {
            self.reset();
            return SubmitOutcome::Reset;
        }

        let mode = self.state.mode;
        if self.policy == SubmissionPolicy::Queue && (self.is_busy() || !self.queue.is_empty()) {
            self.queue.push_back((mode, line.to_string()));
            tracing::debug!(queued = self.queue.len(), "Submission queued");
            self.refresh_status();
            return SubmitOutcome::Queued;
        }

        SubmitOutcome::Dispatched(self.dispatch(mode, line.to_string()))
    }

    fn dispatch(&mut self, mode: Mode, line: String) -> TaskKind {
        let id = self.tasks.next_id();
        let ctx = TaskContext::new(id, self.generation, self.tx.clone());

        let (kind, handle) = match mode {
            Mode::Chat => {
                self.history.push(Message::user(line.clone()));
                self.transcript.append_section(&chat::header(&line));
                self.render();
                let client = Arc::clone(&self.collaborators.chat);
                let history = self.history.snapshot();
                (
                    TaskKind::Chat,
                    tokio::spawn(chat::run(ctx, client, history)),
                )
            }
            Mode::Agent => {
                self.transcript.append_section(&agent::header(&line));
                self.render();
                let agent = Arc::clone(&self.collaborators.agent);
                let tools = Arc::clone(&self.collaborators.tools);
                (
                    TaskKind::Agent,
                    tokio::spawn(agent::run(ctx, agent, tools, line, self.max_iterations)),
                )
            }
            Mode::Terminal => (TaskKind::Shell, tokio::spawn(shell::run(ctx, line))),
        };

        tracing::info!(task = id, kind = kind.label(), generation = self.generation, "Dispatched");
        self.tasks.track(id, kind, self.generation, handle);
        self.refresh_status();
        kind
    }

    /// Clear the transcript and history and orphan every running task.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.history.reset();
        self.generation += 1;
        let dropped = self.queue.len();
        self.queue.clear();
        tracing::info!(generation = self.generation, dropped, "Session reset");
        self.render();
        self.refresh_status();
    }

    // === Updates ===

    /// Apply pending updates, reap finished tasks and start queued work.
    ///
    /// Returns whether anything changed.
    pub fn tick(&mut self) -> bool {
        // Reap first: every update a reaped task sent is already queued.
        let completions = self.tasks.reap();
        let mut changed = false;

        while let Ok(update) = self.rx.try_recv() {
            self.apply(update);
            changed = true;
        }

        for completion in completions {
            self.observe(completion);
            changed = true;
        }

        if self.dispatch_queued() {
            changed = true;
        }
        changed
    }

    /// Tick until every task has been reaped and the queue is empty.
    pub async fn settle(&mut self) {
        loop {
            self.tick();
            if self.is_idle() {
                break;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    fn apply(&mut self, update: Update) {
        let Update {
            task,
            generation,
            kind,
            ack,
        } = update;
        let stale = generation != self.generation;
        match kind {
            UpdateKind::LogError { origin, message } => {
                self.error_log.record(origin, &message);
            }
            UpdateKind::Failed { origin, message } => {
                self.record_failure(origin, &message, generation);
            }
            _ if stale => {
                tracing::debug!(task, generation, "Discarding update from before reset");
            }
            UpdateKind::Append(markup) => {
                self.transcript.append(&markup);
                self.render();
            }
            UpdateKind::AppendSection(markup) => {
                self.transcript.append_section(&markup);
                self.render();
            }
            UpdateKind::ScrollToEnd => self.surface.scroll_to_end(),
            UpdateKind::Record(message) => self.history.push(message),
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Log a failure and, unless it predates a reset, show it.
    pub fn record_failure(&mut self, origin: FailureOrigin, message: &str, generation: u64) {
        tracing::error!(origin = %origin, generation, "{message}");
        self.error_log.record(origin, message);
        if generation != self.generation {
            return;
        }

        match origin {
            FailureOrigin::Shell => {
                self.transcript
                    .append_section(&format!("Error: {}", escape(message)));
            }
            _ => {
                self.transcript.append(&handlers::fault_block(message));
                self.history
                    .push(Message::assistant(handlers::fault_message(message)));
            }
        }
        self.render();
        self.surface.scroll_to_end();
    }

    fn observe(&mut self, completion: Completion) {
        match completion.outcome {
            Ok(()) => {
                tracing::debug!(task = completion.id, kind = completion.kind.label(), "Task finished");
            }
            Err(message) => {
                self.record_failure(FailureOrigin::Task, &message, completion.generation);
            }
        }
        self.refresh_status();
    }

    fn dispatch_queued(&mut self) -> bool {
        if self.is_busy() {
            return false;
        }
        let Some((mode, line)) = self.queue.pop_front() else {
            return false;
        };
        self.dispatch(mode, line);
        true
    }

    fn render(&mut self) {
        self.surface.render(self.transcript.as_str());
    }
}
