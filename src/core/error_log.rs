//! Durable failure log.
//!
//! Each entry is one line: `[marker] <RFC 3339 timestamp> <message>`. The file
//! is opened in append mode for every entry and written with a single call,
//! then flushed, so concurrent sessions never interleave partial entries.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Which failure path produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// In-band `Error` event from the agent.
    AgentEvent,
    /// Chat stream fault.
    ChatStream,
    /// Agent stream fault.
    AgentStream,
    /// Shell launch or execution fault.
    Shell,
    /// Task ended in a panic.
    Task,
}

impl FailureOrigin {
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            FailureOrigin::AgentEvent => "agent-event",
            FailureOrigin::ChatStream => "chat-stream",
            FailureOrigin::AgentStream => "agent-stream",
            FailureOrigin::Shell => "shell",
            FailureOrigin::Task => "task",
        }
    }
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    pub fn append(&self, origin: FailureOrigin, message: &str) -> Result<()> {
        let entry = format_entry(origin, message);
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open error log {}", self.path.display()))?;
        file.write_all(entry.as_bytes())
            .with_context(|| format!("Failed to write error log {}", self.path.display()))?;
        file.flush()?;
        Ok(())
    }

    /// Append one entry, reporting a failure to write through `tracing` only.
    pub fn record(&self, origin: FailureOrigin, message: &str) {
        if let Err(err) = self.append(origin, message) {
            tracing::error!(origin = %origin, "{err:#}");
        }
    }
}

fn format_entry(origin: FailureOrigin, message: &str) -> String {
    let timestamp = chrono::Local::now().to_rfc3339();
    let message = message.replace('\r', "").replace('\n', "\\n");
    format!("[{}] {timestamp} {message}\n", origin.marker())
}
