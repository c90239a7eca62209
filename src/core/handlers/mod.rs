//! Handlers for submitted lines, one per mode.
//!
//! Each handler has a synchronous part run by the dispatcher (header and
//! history bookkeeping) and an async `run` that is spawned as a task and
//! reports back through a [`TaskContext`](crate::core::events::TaskContext).

pub mod agent;
pub mod chat;
pub mod shell;

use crate::escape::escape;

pub(crate) fn user_block(line: &str) -> String {
    format!("[blue]USER:[/blue]\n{}\n", escape(line))
}

/// Transcript block for a task fault.
#[must_use]
pub fn fault_block(message: &str) -> String {
    format!("\n\n[red]ERROR: {}[/red]\n", escape(message))
}

/// History entry for a task fault.
#[must_use]
pub fn fault_message(message: &str) -> String {
    format!("Error: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_block_escapes_message() {
        assert_eq!(
            fault_block("bad [x]"),
            "\n\n[red]ERROR: bad \\[x\\][/red]\n"
        );
        assert_eq!(fault_message("bad [x]"), "Error: bad [x]");
    }
}
