//! Rendering surfaces for the session transcript.

use std::fmt;
use std::io::Write;

use crate::core::mode::{Mode, SubmitBehavior};
use crate::markup;

/// Snapshot of the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub mode: Mode,
    pub submit_behavior: SubmitBehavior,
    /// Submissions waiting for the in-flight task.
    pub queued: usize,
    pub busy: bool,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MODE: {} | ENTER: {}",
            self.mode.label(),
            self.submit_behavior.label()
        )?;
        if self.busy {
            f.write_str(" | RUNNING")?;
        }
        if self.queued > 0 {
            write!(f, " | QUEUED: {}", self.queued)?;
        }
        Ok(())
    }
}

/// Where the session shows its transcript.
pub trait Surface {
    /// Show the full transcript markup. Called after every mutation.
    fn render(&mut self, markup: &str);

    /// Pin the view to the newest content.
    fn scroll_to_end(&mut self);

    /// Refresh the status indicator and input styling.
    fn refresh_status(&mut self, status: &Status);
}

/// Surface that prints the plain transcript to a writer as it grows.
///
/// Used for one-shot `--prompt` runs.
pub struct ConsoleSurface<W: Write> {
    out: W,
    shown: String,
}

impl ConsoleSurface<std::io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
        }
    }

    fn write(&mut self, text: &str) {
        if let Err(err) = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
        {
            tracing::warn!("Failed to write transcript: {err}");
        }
    }
}

impl<W: Write> Surface for ConsoleSurface<W> {
    fn render(&mut self, markup: &str) {
        let plain = markup::plain(markup);
        if let Some(delta) = plain.strip_prefix(self.shown.as_str()) {
            let delta = delta.to_string();
            self.write(&delta);
        } else {
            // The transcript was reset; start over on a fresh line.
            self.write("\n");
            self.write(&plain);
        }
        self.shown = plain;
    }

    fn scroll_to_end(&mut self) {}

    fn refresh_status(&mut self, status: &Status) {
        tracing::debug!(%status, "Status changed");
    }
}
