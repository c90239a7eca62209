//! Transcript surface and cached line layout for the TUI.

use ratatui::text::{Line, Span};
use unicode_width::UnicodeWidthChar;

use crate::markup;
use crate::surface::{Status, Surface};
use crate::tui::scrolling::TranscriptScroll;

const TAB_WIDTH: usize = 4;

/// Cache of wrapped transcript lines for the current width.
#[derive(Debug, Default)]
pub struct TranscriptViewCache {
    width: u16,
    version: u64,
    lines: Vec<Line<'static>>,
}

impl TranscriptViewCache {
    /// Ensure cached lines match the provided markup/width/version.
    pub fn ensure(&mut self, markup: &str, width: u16, version: u64) {
        if self.width == width && self.version == version {
            return;
        }
        self.width = width;
        self.version = version;
        self.lines = markup::parse(markup)
            .into_iter()
            .flat_map(|line| wrap_line(line, usize::from(width)))
            .collect();
    }

    #[must_use]
    pub fn lines(&self) -> &[Line<'static>] {
        &self.lines
    }

    #[must_use]
    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }
}

/// Split a styled line into rows no wider than `width` columns.
#[must_use]
pub fn wrap_line(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    if width == 0 {
        return vec![line];
    }

    let mut rows = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut used = 0;

    for span in line.spans {
        let style = span.style;
        let mut buf = String::new();
        for ch in span.content.chars() {
            let ch_width = if ch == '\t' {
                TAB_WIDTH
            } else {
                ch.width().unwrap_or(0)
            };
            if used + ch_width > width && used > 0 {
                if !buf.is_empty() {
                    current.push(Span::styled(std::mem::take(&mut buf), style));
                }
                rows.push(Line::from(std::mem::take(&mut current)));
                used = 0;
            }
            if ch == '\t' {
                buf.push_str(&" ".repeat(TAB_WIDTH));
            } else {
                buf.push(ch);
            }
            used += ch_width;
        }
        if !buf.is_empty() {
            current.push(Span::styled(buf, style));
        }
    }

    if !current.is_empty() || rows.is_empty() {
        rows.push(Line::from(current));
    }
    rows
}

/// [`Surface`] that keeps the transcript for the next frame.
#[derive(Debug, Default)]
pub struct TuiSurface {
    markup: String,
    version: u64,
    status: Status,
    pub scroll: TranscriptScroll,
    cache: TranscriptViewCache,
}

impl TuiSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Wrapped lines for a viewport `width` columns wide.
    pub fn lines(&mut self, width: u16) -> &[Line<'static>] {
        self.cache.ensure(&self.markup, width, self.version);
        self.cache.lines()
    }

    pub fn scroll_by(&mut self, delta_lines: i32, width: u16, visible_lines: usize) {
        self.cache.ensure(&self.markup, width, self.version);
        self.scroll = self
            .scroll
            .scrolled_by(delta_lines, self.cache.total_lines(), visible_lines);
    }
}

impl Surface for TuiSurface {
    fn render(&mut self, markup: &str) {
        if self.markup != markup {
            markup.clone_into(&mut self.markup);
            self.version += 1;
        }
    }

    fn scroll_to_end(&mut self) {
        self.scroll = TranscriptScroll::ToBottom;
    }

    fn refresh_status(&mut self, status: &Status) {
        self.status = *status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::Mode;

    fn text(line: &Line<'_>) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    #[test]
    fn long_lines_wrap_at_width() {
        let rows = wrap_line(Line::from("abcdefgh"), 3);
        let rows: Vec<String> = rows.iter().map(text).collect();
        assert_eq!(rows, vec!["abc", "def", "gh"]);
    }

    #[test]
    fn wrapping_keeps_span_styles() {
        let line = markup::parse("[red]abcd[/red]").remove(0);
        let style = line.spans[0].style;
        let rows = wrap_line(line, 2);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.spans[0].style == style));
    }

    #[test]
    fn empty_lines_survive_wrapping() {
        assert_eq!(wrap_line(Line::from(""), 10).len(), 1);
    }

    #[test]
    fn render_bumps_version_only_on_change() {
        let mut surface = TuiSurface::new();
        surface.render("hello");
        surface.render("hello");
        assert_eq!(surface.version, 1);
        surface.render("hello world");
        assert_eq!(surface.version, 2);
    }

    #[test]
    fn scroll_to_end_repins_after_manual_scroll() {
        let mut surface = TuiSurface::new();
        surface.render(&"line\n".repeat(40));
        surface.scroll_by(-5, 80, 10);
        assert_ne!(surface.scroll, TranscriptScroll::ToBottom);
        surface.scroll_to_end();
        assert_eq!(surface.scroll, TranscriptScroll::ToBottom);
    }

    #[test]
    fn status_is_kept_for_the_next_frame() {
        let mut surface = TuiSurface::new();
        let status = Status {
            mode: Mode::Agent,
            ..Status::default()
        };
        surface.refresh_status(&status);
        assert_eq!(surface.status().mode, Mode::Agent);
    }
}
