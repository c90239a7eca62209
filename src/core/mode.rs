//! Interaction mode state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which handler receives a submitted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Chat,
    Terminal,
    Agent,
}

impl Mode {
    /// Next mode in the cycle `Chat -> Terminal -> Agent -> Chat`.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Mode::Chat => Mode::Terminal,
            Mode::Terminal => Mode::Agent,
            Mode::Agent => Mode::Chat,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Terminal => "terminal",
            Mode::Agent => "agent",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Mode::Chat),
            "terminal" | "shell" => Ok(Mode::Terminal),
            "agent" => Ok(Mode::Agent),
            other => Err(format!("unknown mode `{other}` (expected chat, terminal or agent)")),
        }
    }
}

/// What the Enter key does in the input box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitBehavior {
    /// Enter submits; the alternate action inserts a newline.
    #[default]
    SingleLineSubmit,
    /// Enter inserts a newline; the alternate action submits.
    MultilineInsert,
}

impl SubmitBehavior {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            SubmitBehavior::SingleLineSubmit => SubmitBehavior::MultilineInsert,
            SubmitBehavior::MultilineInsert => SubmitBehavior::SingleLineSubmit,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SubmitBehavior::SingleLineSubmit => "submit",
            SubmitBehavior::MultilineInsert => "new-line",
        }
    }
}

/// Current mode plus the orthogonal submit behavior. Every combination is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeState {
    pub mode: Mode,
    pub submit_behavior: SubmitBehavior,
}

impl ModeState {
    #[must_use]
    pub fn new(mode: Mode, submit_behavior: SubmitBehavior) -> Self {
        Self {
            mode,
            submit_behavior,
        }
    }

    pub fn cycle_mode(&mut self) -> Mode {
        self.mode = self.mode.next();
        self.mode
    }

    pub fn toggle_submit_behavior(&mut self) -> SubmitBehavior {
        self.submit_behavior = self.submit_behavior.toggled();
        self.submit_behavior
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycling_three_times_is_identity() {
        for start in [Mode::Chat, Mode::Terminal, Mode::Agent] {
            let mut state = ModeState::new(start, SubmitBehavior::default());
            state.cycle_mode();
            state.cycle_mode();
            state.cycle_mode();
            assert_eq!(state.mode, start);
        }
    }

    #[test]
    fn cycle_order() {
        let mut state = ModeState::default();
        assert_eq!(state.cycle_mode(), Mode::Terminal);
        assert_eq!(state.cycle_mode(), Mode::Agent);
        assert_eq!(state.cycle_mode(), Mode::Chat);
    }

    #[test]
    fn toggling_twice_is_identity() {
        let mut state = ModeState::default();
        assert_eq!(
            state.toggle_submit_behavior(),
            SubmitBehavior::MultilineInsert
        );
        assert_eq!(
            state.toggle_submit_behavior(),
            SubmitBehavior::SingleLineSubmit
        );
    }

    #[test]
    fn mode_and_behavior_are_independent() {
        let mut state = ModeState::new(Mode::Agent, SubmitBehavior::MultilineInsert);
        state.cycle_mode();
        assert_eq!(state.submit_behavior, SubmitBehavior::MultilineInsert);
        state.toggle_submit_behavior();
        assert_eq!(state.mode, Mode::Chat);
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("Agent".parse::<Mode>().unwrap(), Mode::Agent);
        assert_eq!("shell".parse::<Mode>().unwrap(), Mode::Terminal);
        assert!("repl".parse::<Mode>().is_err());
    }
}
