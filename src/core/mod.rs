//! Session engine for chatterm.
//!
//! This module owns the session state and the pipeline that turns streamed
//! handler output into transcript mutations:
//!
//! - `mode`: Interaction mode and submit behavior
//! - `transcript`: Rendered transcript and structured history
//! - `error_log`: Durable, append-only failure log
//! - `events`: Updates sent by handler tasks to the foreground loop
//! - `tasks`: Tracking and reaping of handler tasks
//! - `session`: Dispatcher, update application and reset
//! - `handlers`: Chat, agent and shell handlers

pub mod error_log;
pub mod events;
pub mod handlers;
pub mod mode;
pub mod session;
pub mod tasks;
pub mod transcript;

use thiserror::Error;

/// Failures the session engine distinguishes by kind.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unexpected agent event `{kind}` outside the agent protocol")]
    ProtocolViolation { kind: &'static str },
    #[error("Tool manager failed: {0:#}")]
    ToolManager(anyhow::Error),
    #[error("Failed to launch shell command: {0}")]
    ShellLaunch(#[source] std::io::Error),
}
