//! Application state for the chatterm TUI.

use crate::core::mode::{Mode, SubmitBehavior};
use crate::core::session::{Session, SubmitOutcome};
use crate::tui::scrolling::MouseScrollState;
use crate::tui::transcript::TuiSurface;

/// Global UI state for the TUI.
pub struct App {
    pub session: Session<TuiSurface>,
    pub input: String,
    /// Cursor position in characters, not bytes.
    pub cursor_position: usize,
    pub mouse_scroll: MouseScrollState,
    /// Transcript viewport from the last frame, for page scrolling.
    pub last_transcript_width: u16,
    pub last_transcript_visible: usize,
    pub should_quit: bool,
}

impl App {
    #[must_use]
    pub fn new(session: Session<TuiSurface>) -> Self {
        Self {
            session,
            input: String::new(),
            cursor_position: 0,
            mouse_scroll: MouseScrollState::new(),
            last_transcript_width: 0,
            last_transcript_visible: 0,
            should_quit: false,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.session.mode_state().mode
    }

    #[must_use]
    pub fn submit_behavior(&self) -> SubmitBehavior {
        self.session.mode_state().submit_behavior
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map_or(self.input.len(), |(idx, _)| idx)
    }

    fn char_count(&self) -> usize {
        self.input.chars().count()
    }

    pub fn insert_char(&mut self, c: char) {
        let idx = self.byte_index();
        self.input.insert(idx, c);
        self.cursor_position += 1;
    }

    pub fn insert_str(&mut self, text: &str) {
        let idx = self.byte_index();
        self.input.insert_str(idx, text);
        self.cursor_position += text.chars().count();
    }

    pub fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let idx = self.byte_index();
            self.input.remove(idx);
        }
    }

    pub fn delete_char_forward(&mut self) {
        if self.cursor_position < self.char_count() {
            let idx = self.byte_index();
            self.input.remove(idx);
        }
    }

    pub fn move_cursor_left(&mut self) {
        self.cursor_position = self.cursor_position.saturating_sub(1);
    }

    pub fn move_cursor_right(&mut self) {
        if self.cursor_position < self.char_count() {
            self.cursor_position += 1;
        }
    }

    pub fn move_cursor_start(&mut self) {
        self.cursor_position = 0;
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor_position = self.char_count();
    }

    pub fn clear_input(&mut self) {
        self.input.clear();
        self.cursor_position = 0;
    }

    /// Hand the input to the session. The box is cleared unless the input
    /// was blank.
    pub fn submit_input(&mut self) -> SubmitOutcome {
        let outcome = self.session.submit(&self.input);
        if outcome.consumed() {
            self.clear_input();
        }
        outcome
    }

    /// Scroll the transcript using the viewport of the last frame.
    pub fn scroll_transcript(&mut self, delta_lines: i32) {
        let width = self.last_transcript_width;
        let visible = self.last_transcript_visible;
        self.session
            .surface_mut()
            .scroll_by(delta_lines, width, visible);
    }

    /// Lines moved by one page key.
    #[must_use]
    pub fn page_size(&self) -> i32 {
        i32::try_from(self.last_transcript_visible.saturating_sub(1).max(1)).unwrap_or(i32::MAX)
    }
}
