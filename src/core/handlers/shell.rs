//! Terminal mode: run a line through the system shell.

use std::process::{Output, Stdio};

use tokio::process::Command;

use crate::core::SessionError;
use crate::core::error_log::FailureOrigin;
use crate::core::events::TaskContext;
use crate::escape::escape;
use crate::models::Message;

/// Label that marks shell output in the history.
pub const PREVIOUS_COMMAND_LABEL: &str = "[PREVIOUS COMMAND]";

fn shell_command(line: &str) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(line);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Run `line` and capture both output streams.
pub async fn execute(line: &str) -> Result<Output, SessionError> {
    shell_command(line)
        .output()
        .await
        .map_err(SessionError::ShellLaunch)
}

/// Stdout if the command wrote any, otherwise stderr.
#[must_use]
pub fn shown_output(output: &Output) -> String {
    if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

#[must_use]
pub fn transcript_block(line: &str, shown: &str) -> String {
    format!("$ {}\n[mono]{}[/mono]", escape(line), escape(shown))
}

#[must_use]
pub fn history_entry(line: &str, shown: &str) -> String {
    format!("{PREVIOUS_COMMAND_LABEL}\n\n$ {line}\n{shown}")
}

pub async fn run(ctx: TaskContext, line: String) {
    match execute(&line).await {
        Ok(output) => {
            tracing::debug!(task = ctx.id, status = %output.status, "Shell command finished");
            let shown = shown_output(&output);
            ctx.append_section(transcript_block(&line, &shown)).await;
            ctx.record(Message::user(history_entry(&line, &shown))).await;
            ctx.scroll_to_end().await;
        }
        Err(err) => {
            tracing::warn!(task = ctx.id, "{err}");
            ctx.fail(FailureOrigin::Shell, err.to_string()).await;
        }
    }
}
