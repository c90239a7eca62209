//! Inline markup used by the transcript.
//!
//! Grammar:
//! - `[name]` opens a styled span, `[/name]` closes the innermost open span of
//!   that name. Only the names in [`Tag`] are recognized.
//! - `\x` is a literal `x` for any character `x`.
//! - Anything else, including unknown or unbalanced tags, is literal text.

use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};

use crate::palette;

/// Longest tag we look ahead for, including the slash of a closing tag.
const MAX_TAG_LEN: usize = 8;

/// Style tags understood by the transcript renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Blue,
    Green,
    Red,
    Orange,
    Purple,
    Dim,
    Bold,
    Mono,
}

impl Tag {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "blue" => Some(Tag::Blue),
            "green" => Some(Tag::Green),
            "red" => Some(Tag::Red),
            "orange" => Some(Tag::Orange),
            "purple" => Some(Tag::Purple),
            "dim" => Some(Tag::Dim),
            "bold" => Some(Tag::Bold),
            "mono" => Some(Tag::Mono),
            _ => None,
        }
    }

    fn style(self) -> Style {
        match self {
            Tag::Blue => Style::default()
                .fg(palette::BLUE)
                .add_modifier(Modifier::BOLD),
            Tag::Green => Style::default()
                .fg(palette::GREEN)
                .add_modifier(Modifier::BOLD),
            Tag::Red => Style::default().fg(palette::RED),
            Tag::Orange => Style::default().fg(palette::ORANGE),
            Tag::Purple => Style::default().fg(palette::PURPLE),
            Tag::Dim => Style::default().fg(palette::TEXT_MUTED),
            Tag::Bold => Style::default().add_modifier(Modifier::BOLD),
            Tag::Mono => Style::default().fg(palette::SNOW).bg(palette::INK),
        }
    }
}

#[derive(Default)]
struct LineBuilder {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    text: String,
    open: Vec<Tag>,
}

impl LineBuilder {
    fn style(&self) -> Style {
        self.open
            .iter()
            .fold(Style::default(), |style, tag| style.patch(tag.style()))
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.spans.push(Span::styled(text, self.style()));
        }
    }

    fn newline(&mut self) {
        self.flush_text();
        self.lines.push(Line::from(std::mem::take(&mut self.spans)));
    }

    fn open(&mut self, tag: Tag) {
        self.flush_text();
        self.open.push(tag);
    }

    fn close(&mut self, tag: Tag) -> bool {
        let Some(pos) = self.open.iter().rposition(|open| *open == tag) else {
            return false;
        };
        self.flush_text();
        self.open.truncate(pos);
        true
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush_text();
        self.lines.push(Line::from(self.spans));
        self.lines
    }
}

/// Look for a recognized tag at the start of `rest` (which begins with `[`).
/// Returns the tag, whether it closes, and its length in bytes.
fn read_tag(rest: &str) -> Option<(Tag, bool, usize)> {
    let inner = rest.get(1..)?;
    let (end, _) = inner
        .char_indices()
        .take(MAX_TAG_LEN + 1)
        .find(|(_, c)| *c == ']')?;
    let body = &inner[..end];
    let (closing, name) = match body.strip_prefix('/') {
        Some(name) => (true, name),
        None => (false, body),
    };
    let tag = Tag::from_name(name)?;
    Some((tag, closing, end + 2))
}

/// Parse markup into styled terminal lines.
#[must_use]
pub fn parse(markup: &str) -> Vec<Line<'static>> {
    let mut builder = LineBuilder::default();
    let mut chars = markup.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, literal)) if literal == '\n' => {
                    builder.newline();
                }
                Some((_, literal)) => builder.text.push(literal),
                None => builder.text.push('\\'),
            },
            '\n' => builder.newline(),
            '[' => {
                if let Some((tag, closing, len)) = read_tag(&markup[idx..]) {
                    let applied = if closing {
                        builder.close(tag)
                    } else {
                        builder.open(tag);
                        true
                    };
                    if applied {
                        // Tags are ASCII, so the byte length is the char count.
                        for _ in 1..len {
                            chars.next();
                        }
                        continue;
                    }
                }
                builder.text.push('[');
            }
            _ => builder.text.push(c),
        }
    }

    builder.finish()
}

/// Render markup to the plain text a reader would see.
#[must_use]
pub fn plain(markup: &str) -> String {
    parse(markup)
        .iter()
        .map(|line| {
            line.spans
                .iter()
                .map(|span| span.content.as_ref())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_are_styled_and_stripped() {
        let lines = parse("[blue]USER:[/blue]\nhello");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].spans.len(), 1);
        assert_eq!(lines[0].spans[0].content, "USER:");
        assert_eq!(lines[0].spans[0].style.fg, Some(palette::BLUE));
        assert_eq!(lines[1].spans[0].content, "hello");
        assert_eq!(lines[1].spans[0].style, Style::default());
    }

    #[test]
    fn nested_tags_combine_styles() {
        let lines = parse("[mono][bold]x[/bold]y[/mono]");
        let spans = &lines[0].spans;
        assert_eq!(spans.len(), 2);
        assert!(spans[0].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(spans[0].style.bg, Some(palette::INK));
        assert!(!spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(spans[1].style.bg, Some(palette::INK));
    }

    #[test]
    fn unknown_and_unbalanced_tags_are_literal() {
        assert_eq!(plain("[monospace]x[/monospace]"), "[monospace]x[/monospace]");
        assert_eq!(plain("a[/red]b"), "a[/red]b");
        assert_eq!(plain("[unterminated"), "[unterminated");
    }

    #[test]
    fn unclosed_tag_styles_to_end() {
        let lines = parse("[red]ERROR: boom");
        assert_eq!(lines[0].spans[0].style.fg, Some(palette::RED));
        assert_eq!(plain("[red]ERROR: boom"), "ERROR: boom");
    }

    #[test]
    fn backslash_escapes_any_character() {
        assert_eq!(plain(r"\[red\]"), "[red]");
        assert_eq!(plain(r"a\\b"), r"a\b");
        assert_eq!(plain("dangling\\"), "dangling\\");
    }

    #[test]
    fn empty_lines_are_preserved() {
        assert_eq!(parse("a\n\nb").len(), 3);
        assert_eq!(plain("a\n\nb"), "a\n\nb");
        assert_eq!(plain(""), "");
    }
}
