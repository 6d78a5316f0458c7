use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use florence::{
    format_gold, Clock, EducationSystem, ManualClock, Player, ProgressUpdate, TransactionKind,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rust_decimal::Decimal;
use std::io;

/// Gold earned per `w` (a day's labour)
const DAY_WAGE: i64 = 10;

/// Gold paid toward the first loan per `r`
const REPAYMENT_STEP: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Ledger,
    Finances,
    Education,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Ledger => Page::Finances,
            Page::Finances => Page::Education,
            Page::Education => Page::Ledger,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Ledger => Page::Education,
            Page::Finances => Page::Ledger,
            Page::Education => Page::Finances,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Ledger => "Ledger",
            Page::Finances => "Finances",
            Page::Education => "Education",
        }
    }
}

pub struct App {
    pub player: Player,
    pub education: EducationSystem,
    pub clock: ManualClock,
    pub current_page: Page,
    pub ledger_state: TableState,
    pub course_state: TableState,
    pub message: String,
}

impl App {
    pub fn new(player: Player, education: EducationSystem, clock: ManualClock) -> Self {
        let mut ledger_state = TableState::default();
        if !player.ledger.transactions().is_empty() {
            ledger_state.select(Some(0));
        }

        let mut course_state = TableState::default();
        course_state.select(Some(0));

        let message = format!("Welcome to Florence, {}.", player.name);

        Self {
            player,
            education,
            clock,
            current_page: Page::Ledger,
            ledger_state,
            course_state,
            message,
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    fn selectable_len(&self) -> usize {
        match self.current_page {
            Page::Ledger => self.player.ledger.transactions().len(),
            Page::Education => self.education.enrollable_courses(&self.player).len(),
            Page::Finances => 0,
        }
    }

    fn active_state(&mut self) -> &mut TableState {
        match self.current_page {
            Page::Education => &mut self.course_state,
            _ => &mut self.ledger_state,
        }
    }

    pub fn next(&mut self) {
        let len = self.selectable_len();
        if len == 0 {
            return;
        }
        let state = self.active_state();
        let i = state.selected().map_or(0, |i| if i + 1 >= len { 0 } else { i + 1 });
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.selectable_len();
        if len == 0 {
            return;
        }
        let state = self.active_state();
        let i = state.selected().map_or(0, |i| if i == 0 { len - 1 } else { i - 1 });
        state.select(Some(i));
    }

    /// `w`: a day's labour
    pub fn work(&mut self) {
        self.message = match self.player.ledger.earn_gold(Decimal::from(DAY_WAGE), "Day labour", &self.clock) {
            Ok(balance) => format!("You worked a day. Total gold: {}", format_gold(balance)),
            Err(e) => e.to_string(),
        };
        self.ledger_state.select(Some(0));
    }

    /// `n`: advance one day, collect income, study
    pub fn next_day(&mut self) {
        self.clock.advance_days(1);
        self.player.game_date = Some(self.clock.now());
        let income = match self.player.ledger.pay_income(1, &self.clock) {
            Ok(net) => format!("income {} gold.", format_gold(net)),
            Err(e) => format!("income not paid: {}.", e),
        };

        let study = match self.education.update_progress(&mut self.player, &self.clock) {
            Ok(ProgressUpdate::Completed(done)) => format!(" {}", done),
            Ok(ProgressUpdate::InProgress { progress }) => format!(" Studies {}% complete.", progress),
            Ok(ProgressUpdate::Idle) => String::new(),
            Err(e) => format!(" {}", e),
        };

        self.message = format!(
            "{}: {}{}",
            self.clock.now().format("%-d %B %Y"),
            income,
            study
        );
    }

    /// `e`: enroll in the highlighted course
    pub fn enroll_selected(&mut self) {
        let selected = self.course_state.selected().unwrap_or(0);
        let Some(course_id) = self
            .education
            .enrollable_courses(&self.player)
            .get(selected)
            .map(|c| c.id().to_string())
        else {
            self.message = "No course selected.".to_string();
            return;
        };

        self.message = match self.education.enroll(&mut self.player, &course_id, &self.clock) {
            Ok(receipt) => receipt.to_string(),
            Err(e) => e.to_string(),
        };
    }

    /// `r`: pay toward the oldest loan
    pub fn repay_first_loan(&mut self) {
        let owed = match self.player.ledger.loans().first() {
            Some(loan) => loan.principal_remaining,
            None => {
                self.message = "You have no loans.".to_string();
                return;
            }
        };
        let amount = owed.min(Decimal::from(REPAYMENT_STEP));

        self.message = match self.player.ledger.repay_loan(0, amount, &self.clock) {
            Ok(repayment) => repayment.to_string(),
            Err(e) => e.to_string(),
        };
    }

    /// `c`: cash out the oldest investment
    pub fn collect_first_investment(&mut self) {
        self.message = match self.player.ledger.collect_investment_returns(0, &self.clock) {
            Ok(returns) => format!("Collected {} gold from investment.", format_gold(returns)),
            Err(e) => e.to_string(),
        };
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('w') => app.work(),
                KeyCode::Char('n') => app.next_day(),
                KeyCode::Char('e') if app.current_page == Page::Education => app.enroll_selected(),
                KeyCode::Char('r') if app.current_page == Page::Finances => app.repay_first_loan(),
                KeyCode::Char('c') if app.current_page == Page::Finances => {
                    app.collect_first_investment()
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Message line
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Ledger => render_ledger(f, chunks[1], app),
        Page::Finances => render_finances(f, chunks[1], app),
        Page::Education => render_education(f, chunks[1], app),
    }

    let message = Paragraph::new(app.message.as_str())
        .block(Block::default().borders(Borders::ALL).title(" News "));
    f.render_widget(message, chunks[2]);

    render_status_bar(f, chunks[3], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Ledger, Page::Finances, Page::Education];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        app.clock.now().format("%-d %B %Y").to_string(),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("{} gold", format_gold(app.player.money())),
        Style::default().fg(Color::Yellow),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("{} ({})", app.player.name, app.player.social_class),
        Style::default().fg(Color::Cyan),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn render_ledger(f: &mut Frame, area: Rect, app: &mut App) {
    // Newest first
    let rows = app.player.ledger.transactions().iter().rev().map(|tx| {
        let color = match tx.kind {
            TransactionKind::Spend | TransactionKind::Investment | TransactionKind::LoanRepayment => Color::Red,
            TransactionKind::Loan => Color::Yellow,
            _ => Color::Green,
        };
        let sign = if tx.kind.is_credit() { "+" } else { "-" };

        Row::new(vec![
            Cell::from(tx.timestamp.format("%Y-%m-%d").to_string()),
            Cell::from(tx.kind.as_str()).style(Style::default().fg(color)),
            Cell::from(format!("{}{}", sign, format_gold(tx.amount))).style(Style::default().fg(color)),
            Cell::from(truncate(tx.memo.as_deref().unwrap_or(""), 40)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(18),
            Constraint::Length(12),
            Constraint::Min(20),
        ],
    )
    .header(header_row(&["Date", "Kind", "Amount", "Memo"]))
    .block(Block::default().borders(Borders::ALL).title(" Transactions "))
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.ledger_state);
}

fn render_finances(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(34),
            Constraint::Percentage(33),
            Constraint::Percentage(33),
        ])
        .split(area);
    let ledger = &app.player.ledger;

    let income_rows = ledger.income_sources().iter().map(|(name, source)| {
        Row::new(vec![
            Cell::from(name.clone()),
            Cell::from(format_gold(source.amount)),
            Cell::from(source.frequency.as_str()),
        ])
    });
    let income = Table::new(
        income_rows,
        [Constraint::Min(20), Constraint::Length(12), Constraint::Length(10)],
    )
    .header(header_row(&["Source", "Amount", "Every"]))
    .block(Block::default().borders(Borders::ALL).title(format!(
        " Income - {} gold / 30 days after tax ",
        ledger
            .calculate_total_income(30)
            .map_or_else(|_| "too much".to_string(), format_gold)
    )));
    f.render_widget(income, chunks[0]);

    let loan_rows = ledger.loan_summary(&app.clock).into_iter().map(|loan| {
        let days_style = if loan.remaining_days < 0 {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };
        Row::new(vec![
            Cell::from(format_gold(loan.principal_remaining)),
            Cell::from(format!("{}%", loan.interest_rate_pct.normalize())),
            Cell::from(loan.remaining_days.to_string()).style(days_style),
        ])
    });
    let loans = Table::new(
        loan_rows,
        [Constraint::Length(12), Constraint::Length(10), Constraint::Length(16)],
    )
    .header(header_row(&["Principal", "Rate", "Days left"]))
    .block(Block::default().borders(Borders::ALL).title(" Loans (r repay) "));
    f.render_widget(loans, chunks[1]);

    let investment_rows = ledger.investment_summary(&app.clock).into_iter().map(|inv| {
        Row::new(vec![
            Cell::from(format_gold(inv.amount)),
            Cell::from(format!("{}%", inv.expected_return_pct.normalize())),
            Cell::from(inv.risk_level.as_str()),
            Cell::from(inv.days_invested.to_string()),
            Cell::from(inv.projected_payout.map_or_else(|| "-".to_string(), format_gold)),
        ])
    });
    let investments = Table::new(
        investment_rows,
        [
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(12),
        ],
    )
    .header(header_row(&["Amount", "Return", "Risk", "Days", "Payout"]))
    .block(Block::default().borders(Borders::ALL).title(format!(
        " Investments (c collect) - net worth {} ",
        format_gold(ledger.net_worth())
    )));
    f.render_widget(investments, chunks[2]);
}

fn render_education(f: &mut Frame, area: Rect, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let (label, percent) = match &app.player.current_course {
        Some(current) => (
            format!("{} - ends {}", current.course_id, current.end_date.format("%-d %B %Y")),
            u16::from(current.progress),
        ),
        None => ("Not enrolled".to_string(), 0),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Studies "))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(percent)
        .label(label);
    f.render_widget(gauge, chunks[0]);

    let courses = app.education.enrollable_courses(&app.player);
    let rows = courses.iter().map(|course| {
        let affordable = course.cost <= app.player.money();
        Row::new(vec![
            Cell::from(course.title.clone()),
            Cell::from(format_gold(course.cost)).style(if affordable {
                Style::default()
            } else {
                Style::default().fg(Color::Red)
            }),
            Cell::from(format!("{} mo", course.duration_months)),
            Cell::from(truncate(&course.description, 50)),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Length(26),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Min(20),
        ],
    )
    .header(header_row(&["Course", "Cost", "Length", "Description"]))
    .block(Block::default().borders(Borders::ALL).title(" Courses (e enroll) "))
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");
    f.render_stateful_widget(table, chunks[1], &mut app.course_state);

    let completed: Vec<&str> = app.player.completed_courses.iter().map(String::as_str).collect();
    let careers: Vec<&str> = app.player.opportunities.iter().map(String::as_str).collect();
    let summary = Paragraph::new(format!(
        "Completed: {}  |  Careers: {}",
        if completed.is_empty() { "none".to_string() } else { completed.join(", ") },
        if careers.is_empty() { "none".to_string() } else { careers.join(", ") },
    ))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(summary, chunks[2]);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let mut status_spans = vec![
        Span::styled(
            format!(" {} ", app.current_page.title()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        key("w"),
        Span::raw(" Work | "),
        key("n"),
        Span::raw(" Next day | "),
        key("Tab"),
        Span::raw(" Page | "),
        key("↑/↓"),
        Span::raw(" Nav | "),
    ];
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Save & quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use florence::{CourseCatalogue, Ledger, SocialClass};

    fn test_app() -> App {
        let player = Player::new("Giovanni", SocialClass::Commoner, Ledger::new(Decimal::from(100)));
        let education = EducationSystem::new(CourseCatalogue::florentine().unwrap());
        let clock = ManualClock::at_date(NaiveDate::from_ymd_opt(1480, 3, 1).unwrap());
        App::new(player, education, clock)
    }

    #[test]
    fn test_page_cycle() {
        assert_eq!(Page::Ledger.next().next().next(), Page::Ledger);
        assert_eq!(Page::Ledger.previous(), Page::Education);
    }

    #[test]
    fn test_work_and_next_day() {
        let mut app = test_app();

        app.work();
        assert_eq!(app.player.money(), Decimal::from(109));

        app.next_day();
        assert!(app.message.starts_with("2 March 1480"));
    }

    #[test]
    fn test_quiet_days_advance_saved_game_date() {
        let mut app = test_app();
        app.current_page = Page::Education;
        app.enroll_selected();

        // No income sources: these days leave no transaction behind
        for _ in 0..30 {
            app.next_day();
        }

        let expected = NaiveDate::from_ymd_opt(1480, 3, 31).unwrap();
        let saved = app.player.game_date.unwrap();
        assert_eq!(saved.date_naive(), expected);
        assert_eq!(app.player.resume_date(saved - chrono::Duration::days(365)), saved);
        assert!(app.player.current_course.as_ref().unwrap().progress > 0);
    }

    #[test]
    fn test_enroll_selected_course() {
        let mut app = test_app();
        app.current_page = Page::Education;

        app.enroll_selected();

        assert!(app.player.is_enrolled());
        assert!(app.message.starts_with("You have enrolled in"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Trivium", 10), "Trivium");
        assert_eq!(truncate("Quadrivium Studies", 10), "Quadriv...");
    }
}
