//! TUI event loop and rendering logic for chatterm.

use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use unicode_width::UnicodeWidthStr;

use crate::core::mode::SubmitBehavior;
use crate::core::session::Session;
use crate::palette::{self, InputTheme};
use crate::tui::app::App;
use crate::tui::scrolling::ScrollDirection;
use crate::tui::transcript::TuiSurface;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_INPUT_LINES: usize = 6;

/// Run the interactive TUI until the user quits.
///
/// # Examples
///
/// ```ignore
/// # use chatterm::tui::{TuiSurface, run_tui};
/// # async fn example(session: chatterm::core::session::Session<TuiSurface>) -> anyhow::Result<()> {
/// run_tui(session).await
/// # }
/// ```
pub async fn run_tui(session: Session<TuiSurface>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableBracketedPaste,
        EnableMouseCapture
    )?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(session);
    let result = run_event_loop(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableBracketedPaste,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        app.session.tick();
        terminal.draw(|f| render(f, app))?;

        if app.should_quit {
            tracing::info!("Quit requested");
            return Ok(());
        }

        if event::poll(POLL_INTERVAL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(app, key),
                Event::Paste(text) => app.insert_str(&text.replace('\r', "\n")),
                Event::Mouse(mouse) => handle_mouse_event(app, mouse),
                _ => {}
            }
        } else {
            // Let handler tasks make progress while the terminal is quiet.
            tokio::task::yield_now().await;
        }
    }
}

// === Input ===

/// What `Enter` does for a given submit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterAction {
    Submit,
    Newline,
}

#[must_use]
pub fn enter_action(behavior: SubmitBehavior, alt: bool) -> EnterAction {
    match (behavior, alt) {
        (SubmitBehavior::SingleLineSubmit, false) | (SubmitBehavior::MultilineInsert, true) => {
            EnterAction::Submit
        }
        (SubmitBehavior::SingleLineSubmit, true) | (SubmitBehavior::MultilineInsert, false) => {
            EnterAction::Newline
        }
    }
}

pub fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    match key.code {
        KeyCode::Char('c') if ctrl => app.should_quit = true,
        KeyCode::Char('t') if ctrl => {
            let mode = app.session.cycle_mode();
            tracing::debug!(mode = mode.label(), "Mode cycled");
        }
        KeyCode::Char('l') if ctrl => {
            app.session.toggle_submit_behavior();
        }
        KeyCode::Char('s') if ctrl => {
            app.submit_input();
        }
        KeyCode::Enter => match enter_action(app.submit_behavior(), alt) {
            EnterAction::Submit => {
                app.submit_input();
            }
            EnterAction::Newline => app.insert_char('\n'),
        },
        KeyCode::PageUp => {
            let page = app.page_size();
            app.scroll_transcript(-page);
        }
        KeyCode::PageDown => {
            let page = app.page_size();
            app.scroll_transcript(page);
        }
        KeyCode::Backspace => app.delete_char(),
        KeyCode::Delete => app.delete_char_forward(),
        KeyCode::Left => app.move_cursor_left(),
        KeyCode::Right => app.move_cursor_right(),
        KeyCode::Home => app.move_cursor_start(),
        KeyCode::End => app.move_cursor_end(),
        KeyCode::Char('u') if ctrl => app.clear_input(),
        KeyCode::Char(c) if !ctrl && !alt => app.insert_char(c),
        _ => {}
    }
}

fn handle_mouse_event(app: &mut App, mouse: MouseEvent) {
    let direction = match mouse.kind {
        MouseEventKind::ScrollUp => ScrollDirection::Up,
        MouseEventKind::ScrollDown => ScrollDirection::Down,
        _ => return,
    };
    let delta = app.mouse_scroll.on_scroll(direction);
    app.scroll_transcript(delta);
}

// === Rendering ===

fn render(f: &mut Frame, app: &mut App) {
    let size = f.area();
    let theme = palette::input_theme(app.mode());
    let input_lines = app.input.split('\n').count().clamp(1, MAX_INPUT_LINES);
    let input_height = u16::try_from(input_lines).unwrap_or(1) + 2;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(input_height),
            Constraint::Length(1),
        ])
        .split(size);

    render_transcript(f, chunks[0], app);
    render_status(f, chunks[1], app, theme);
    render_input(f, chunks[2], app, theme);
    render_instructions(f, chunks[3], app.submit_behavior());
}

fn render_transcript(f: &mut Frame, area: Rect, app: &mut App) {
    let visible = usize::from(area.height);
    app.last_transcript_width = area.width;
    app.last_transcript_visible = visible;

    let surface = app.session.surface_mut();
    let anchor = surface.scroll;
    let lines = surface.lines(area.width);
    let (anchor, top) = anchor.resolve_top(lines.len(), visible);
    let end = (top + visible).min(lines.len());
    let shown = lines[top..end].to_vec();
    surface.scroll = anchor;

    let paragraph = Paragraph::new(shown).style(Style::default().fg(palette::TEXT_PRIMARY));
    f.render_widget(paragraph, area);
}

fn render_status(f: &mut Frame, area: Rect, app: &App, theme: InputTheme) {
    let status = app.session.surface().status();
    let indicator = if status.busy {
        palette::STATUS_BUSY
    } else {
        palette::STATUS_IDLE
    };
    let line = Line::from(vec![
        Span::styled("● ", Style::default().fg(indicator)),
        Span::styled(
            status.to_string(),
            Style::default()
                .fg(theme.border)
                .add_modifier(Modifier::BOLD),
        ),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn render_input(f: &mut Frame, area: Rect, app: &App, theme: InputTheme) {
    let mut style = Style::default().fg(palette::TEXT_PRIMARY);
    if let Some(background) = theme.background {
        style = style.bg(background);
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(style);

    let inner_rows = usize::from(area.height.saturating_sub(2)).max(1);
    let before: String = app.input.chars().take(app.cursor_position).collect();
    let cursor_row = before.matches('\n').count();
    let cursor_col = before.rsplit('\n').next().map_or(0, UnicodeWidthStr::width);
    let offset = cursor_row.saturating_sub(inner_rows - 1);

    let paragraph = if app.input.is_empty() {
        Paragraph::new(Line::from(Span::styled(
            theme.placeholder,
            Style::default().fg(palette::TEXT_DIM),
        )))
    } else {
        let lines: Vec<Line> = app.input.split('\n').map(Line::from).collect();
        Paragraph::new(lines).scroll((u16::try_from(offset).unwrap_or(0), 0))
    };
    f.render_widget(paragraph.block(block), area);

    let max_x = area.right().saturating_sub(2);
    let x = area
        .x
        .saturating_add(1)
        .saturating_add(u16::try_from(cursor_col).unwrap_or(u16::MAX))
        .min(max_x);
    let y = area
        .y
        .saturating_add(1)
        .saturating_add(u16::try_from(cursor_row - offset).unwrap_or(0));
    f.set_cursor_position(Position::new(x, y));
}

#[must_use]
pub fn instructions(behavior: SubmitBehavior) -> String {
    let (submit, newline) = match behavior {
        SubmitBehavior::SingleLineSubmit => ("Enter", "Alt+Enter"),
        SubmitBehavior::MultilineInsert => ("Alt+Enter/Ctrl+S", "Enter"),
    };
    format!(
        "{submit} submit · {newline} new line · Ctrl+T mode · Ctrl+L enter behavior · PgUp/PgDn scroll · Ctrl+C quit"
    )
}

fn render_instructions(f: &mut Frame, area: Rect, behavior: SubmitBehavior) {
    let line = Line::from(Span::styled(
        instructions(behavior),
        Style::default().fg(palette::TEXT_MUTED),
    ));
    f.render_widget(Paragraph::new(line), area);
}
