//! Scroll state tracking for transcript rendering.

use std::time::{Duration, Instant};

// === Scroll Anchors ===

/// Scroll anchor for the transcript view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptScroll {
    #[default]
    ToBottom,
    Scrolled {
        top: usize,
    },
}

impl TranscriptScroll {
    /// Resolve the anchor to a top line index.
    #[must_use]
    pub fn resolve_top(self, total_lines: usize, visible_lines: usize) -> (Self, usize) {
        let max_start = total_lines.saturating_sub(visible_lines);
        match self {
            TranscriptScroll::ToBottom => (TranscriptScroll::ToBottom, max_start),
            TranscriptScroll::Scrolled { top } if top >= max_start => {
                (TranscriptScroll::ToBottom, max_start)
            }
            TranscriptScroll::Scrolled { top } => (self, top),
        }
    }

    /// Apply a delta scroll and return the updated anchor.
    #[must_use]
    pub fn scrolled_by(self, delta_lines: i32, total_lines: usize, visible_lines: usize) -> Self {
        if delta_lines == 0 {
            return self;
        }
        if total_lines <= visible_lines {
            return TranscriptScroll::ToBottom;
        }

        let (_, current_top) = self.resolve_top(total_lines, visible_lines);
        let max_start = total_lines.saturating_sub(visible_lines);

        let new_top = if delta_lines < 0 {
            current_top.saturating_sub(delta_lines.unsigned_abs() as usize)
        } else {
            let delta = usize::try_from(delta_lines).unwrap_or(usize::MAX);
            current_top.saturating_add(delta).min(max_start)
        };

        if new_top == max_start {
            TranscriptScroll::ToBottom
        } else {
            TranscriptScroll::Scrolled { top: new_top }
        }
    }
}

/// Direction for mouse scroll input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    fn sign(self) -> i32 {
        match self {
            ScrollDirection::Up => -1,
            ScrollDirection::Down => 1,
        }
    }
}

/// Stateful tracker for mouse scroll accumulation.
#[derive(Debug, Default)]
pub struct MouseScrollState {
    last_event_at: Option<Instant>,
}

impl MouseScrollState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a wheel event and return the line delta. Bursts of events
    /// (trackpads) scroll one line each, isolated wheel ticks three.
    pub fn on_scroll(&mut self, direction: ScrollDirection) -> i32 {
        let now = Instant::now();
        let is_trackpad = self
            .last_event_at
            .is_some_and(|last| now.duration_since(last) < Duration::from_millis(35));
        self.last_event_at = Some(now);

        let lines_per_tick = if is_trackpad { 1 } else { 3 };
        direction.sign() * lines_per_tick
    }
}
