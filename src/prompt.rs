use std::io;
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Alignment;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use tracing::warn;

/// Answers the operator questions raised while staging manifests or
/// picking a study.
pub trait Decider {
    fn confirm(&self, question: &str) -> bool;
    /// Index into `options`, or `None` when the operator backs out.
    fn select(&self, title: &str, options: &[String]) -> Option<usize>;
}

/// Fixed answers for `--non-interactive` runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDecider {
    pub confirm: bool,
    pub select: Option<usize>,
}

impl FixedDecider {
    pub fn new(confirm: bool) -> Self {
        Self {
            confirm,
            select: None,
        }
    }

    pub fn selecting(mut self, index: usize) -> Self {
        self.select = Some(index);
        self
    }
}

impl Decider for FixedDecider {
    fn confirm(&self, _question: &str) -> bool {
        self.confirm
    }

    fn select(&self, _title: &str, options: &[String]) -> Option<usize> {
        self.select.filter(|index| *index < options.len())
    }
}

/// Full-screen dialog on the controlling terminal. Terminal failures count
/// as a decline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalDecider;

type Backend = CrosstermBackend<io::Stdout>;

impl TerminalDecider {
    fn with_terminal<R>(
        &self,
        body: impl FnOnce(&mut Terminal<Backend>) -> io::Result<R>,
    ) -> io::Result<R> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        let result = Terminal::new(CrosstermBackend::new(stdout))
            .and_then(|mut terminal| body(&mut terminal));

        disable_raw_mode()?;
        io::stdout().execute(LeaveAlternateScreen)?;
        result
    }

    fn run_confirm(&self, question: &str) -> io::Result<bool> {
        self.with_terminal(|terminal| {
            loop {
                terminal.draw(|frame| {
                    let block = Block::default().borders(Borders::ALL).title("Confirm");
                    let text = Paragraph::new(vec![
                        Line::from(question.to_string()),
                        Line::from(""),
                        Line::from("Press y to confirm, n to cancel."),
                    ])
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true })
                    .block(block);
                    frame.render_widget(text, frame.area());
                })?;

                if event::poll(Duration::from_millis(100))? {
                    if let Event::Key(key) = event::read()? {
                        if key.kind != KeyEventKind::Press {
                            continue;
                        }
                        match key.code {
                            KeyCode::Char('y') | KeyCode::Char('Y') => return Ok(true),
                            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                                return Ok(false);
                            }
                            _ => {}
                        }
                    }
                }
            }
        })
    }

    fn run_select(&self, title: &str, options: &[String]) -> io::Result<Option<usize>> {
        if options.is_empty() {
            return Ok(None);
        }
        self.with_terminal(|terminal| {
            let mut state = ListState::default();
            state.select(Some(0));
            loop {
                terminal.draw(|frame| {
                    let items = options
                        .iter()
                        .map(|option| ListItem::new(option.as_str()))
                        .collect::<Vec<_>>();
                    let list = List::new(items)
                        .block(
                            Block::default()
                                .borders(Borders::ALL)
                                .title(format!("{title} (Enter to choose, Esc to cancel)")),
                        )
                        .highlight_style(
                            Style::default()
                                .fg(Color::Yellow)
                                .add_modifier(Modifier::BOLD),
                        )
                        .highlight_symbol("> ");
                    frame.render_stateful_widget(list, frame.area(), &mut state);
                })?;

                if event::poll(Duration::from_millis(100))? {
                    if let Event::Key(key) = event::read()? {
                        if key.kind != KeyEventKind::Press {
                            continue;
                        }
                        let current = state.selected().unwrap_or(0);
                        match key.code {
                            KeyCode::Up | KeyCode::Char('k') => {
                                state.select(Some(current.saturating_sub(1)));
                            }
                            KeyCode::Down | KeyCode::Char('j') => {
                                state.select(Some((current + 1).min(options.len() - 1)));
                            }
                            KeyCode::Enter => return Ok(Some(current)),
                            KeyCode::Esc | KeyCode::Char('q') => return Ok(None),
                            _ => {}
                        }
                    }
                }
            }
        })
    }
}

impl Decider for TerminalDecider {
    fn confirm(&self, question: &str) -> bool {
        self.run_confirm(question).unwrap_or_else(|err| {
            warn!(error = %err, "terminal prompt failed");
            false
        })
    }

    fn select(&self, title: &str, options: &[String]) -> Option<usize> {
        self.run_select(title, options).unwrap_or_else(|err| {
            warn!(error = %err, "terminal prompt failed");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_decider_ignores_out_of_range_selection() {
        let options = vec!["ABC".to_string(), "XYZ".to_string()];
        assert_eq!(FixedDecider::new(true).selecting(1).select("Study", &options), Some(1));
        assert_eq!(FixedDecider::new(true).selecting(5).select("Study", &options), None);
        assert!(!FixedDecider::default().confirm("Overwrite?"));
    }
}
