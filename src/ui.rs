use apartment_finder::db::{self, ApartmentTrade, TrendPoint};
use apartment_finder::format::{format_price, manwon_to_won, to_pyeong};
use apartment_finder::recommend::{recommend_from_db, BudgetRange, Recommendations, DEFAULT_TOP_N};
use apartment_finder::trends::{lookback_start, monthly_average, summarize, MonthlyAverage, TrendSummary, DEFAULT_LOOKBACK_YEARS};
use anyhow::Result;
use chrono::{Local, NaiveDate};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::io;

/// Budget input is in 만원; twelve digits is far beyond any listing
const MAX_BUDGET_DIGITS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    EditingBudget,
    Browsing,
    Detail,
}

/// Price history of the selected trade's apartment and size
pub struct TrendDetail {
    pub trade: ApartmentTrade,
    pub points: Vec<TrendPoint>,
    pub monthly: Vec<MonthlyAverage>,
    pub summary: Option<TrendSummary>,
}

pub struct App {
    conn: Connection,
    pub mode: Mode,
    pub budget_input: String,
    pub recommendations: Recommendations,
    pub grade_index: usize,
    pub state: TableState,
    pub detail: Option<TrendDetail>,
    pub status: String,
    today: NaiveDate,
}

impl App {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            mode: Mode::EditingBudget,
            budget_input: String::new(),
            recommendations: Recommendations::new(),
            grade_index: 0,
            state: TableState::default(),
            detail: None,
            status: "예산을 만원 단위로 입력하고 Enter를 누르세요".to_string(),
            today: Local::now().date_naive(),
        }
    }

    pub fn grade_names(&self) -> Vec<&str> {
        self.recommendations.keys().map(String::as_str).collect()
    }

    pub fn focused_trades(&self) -> &[ApartmentTrade] {
        self.recommendations
            .values()
            .nth(self.grade_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn selected_trade(&self) -> Option<&ApartmentTrade> {
        self.state.selected().and_then(|i| self.focused_trades().get(i))
    }

    fn reset_selection(&mut self) {
        let select = if self.focused_trades().is_empty() { None } else { Some(0) };
        self.state.select(select);
    }

    /// Returns true when the app should exit
    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match self.mode {
            Mode::EditingBudget => match code {
                KeyCode::Char(c) if c.is_ascii_digit() => {
                    if self.budget_input.len() < MAX_BUDGET_DIGITS {
                        self.budget_input.push(c);
                    }
                }
                KeyCode::Backspace => {
                    self.budget_input.pop();
                }
                KeyCode::Enter => self.submit_budget()?,
                KeyCode::Esc if !self.recommendations.is_empty() => self.mode = Mode::Browsing,
                KeyCode::Esc | KeyCode::Char('q') => return Ok(true),
                _ => {}
            },
            Mode::Browsing => match code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
                KeyCode::Char('b') | KeyCode::Char('/') => self.mode = Mode::EditingBudget,
                KeyCode::Tab | KeyCode::Right => self.next_grade(),
                KeyCode::BackTab | KeyCode::Left => self.previous_grade(),
                KeyCode::Down | KeyCode::Char('j') => self.next(),
                KeyCode::Up | KeyCode::Char('k') => self.previous(),
                KeyCode::Enter => self.open_detail()?,
                _ => {}
            },
            Mode::Detail => match code {
                KeyCode::Esc | KeyCode::Char('q') | KeyCode::Enter => {
                    self.detail = None;
                    self.mode = Mode::Browsing;
                }
                _ => {}
            },
        }
        Ok(false)
    }

    /// Budget (만원) → won → per-grade recommendations
    pub fn submit_budget(&mut self) -> Result<()> {
        let Ok(manwon) = self.budget_input.parse::<i64>() else {
            self.status = "예산을 입력하세요".to_string();
            return Ok(());
        };

        let won = manwon_to_won(manwon);
        let range = match BudgetRange::from_params(Some(won.to_string().as_str()), None, None) {
            Ok(range) => range,
            Err(e) => {
                self.status = e.to_string();
                return Ok(());
            }
        };

        self.recommendations = recommend_from_db(&self.conn, range, DEFAULT_TOP_N)?;
        let found: usize = self.recommendations.values().map(Vec::len).sum();
        self.status = format!(
            "{} ~ {} 범위에서 {}건 추천",
            format_price(range.min),
            format_price(range.max),
            found
        );
        self.grade_index = 0;
        self.reset_selection();
        self.mode = Mode::Browsing;
        Ok(())
    }

    pub fn open_detail(&mut self) -> Result<()> {
        let Some(trade) = self.selected_trade().cloned() else {
            return Ok(());
        };

        let since = lookback_start(self.today, DEFAULT_LOOKBACK_YEARS);
        let points = db::trade_trend(&self.conn, &trade.apt_name, &trade.sgg_cd, trade.exclu_use_ar, since)?;
        self.detail = Some(TrendDetail {
            monthly: monthly_average(&points),
            summary: summarize(&points),
            points,
            trade,
        });
        self.mode = Mode::Detail;
        Ok(())
    }

    pub fn next_grade(&mut self) {
        let len = self.recommendations.len();
        if len > 0 {
            self.grade_index = (self.grade_index + 1) % len;
            self.reset_selection();
        }
    }

    pub fn previous_grade(&mut self) {
        let len = self.recommendations.len();
        if len > 0 {
            self.grade_index = (self.grade_index + len - 1) % len;
            self.reset_selection();
        }
    }

    pub fn next(&mut self) {
        let len = self.focused_trades().len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.focused_trades().len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press && app.handle_key(key.code)? {
                return Ok(());
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Budget input
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.mode {
        Mode::Detail => render_detail(f, chunks[1], app),
        _ => render_grades(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let editing = app.mode == Mode::EditingBudget;
    let input_style = if editing {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };

    let mut spans = vec![
        Span::styled(" 예산: ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled(app.budget_input.clone(), input_style),
    ];
    if editing {
        spans.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    }
    spans.push(Span::raw(" 만원"));
    if let Ok(manwon) = app.budget_input.parse::<i64>() {
        spans.push(Span::styled(
            format!("  ({})", format_price(manwon_to_won(manwon))),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" 아파트 추천 "),
    );
    f.render_widget(header, area);
}

fn grade_color(index: usize) -> Color {
    match index {
        0 => Color::Red,
        1 => Color::Yellow,
        2 => Color::Green,
        _ => Color::Cyan,
    }
}

fn render_grades(f: &mut Frame, area: Rect, app: &mut App) {
    if app.recommendations.is_empty() {
        let empty = Paragraph::new("  추천 결과가 없습니다").block(Block::default().borders(Borders::ALL));
        f.render_widget(empty, area);
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let cells: Vec<Rect> = rows
        .iter()
        .flat_map(|row| {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(*row)
                .to_vec()
        })
        .collect();

    let grades: Vec<(String, Vec<ApartmentTrade>)> = app
        .recommendations
        .iter()
        .map(|(name, trades)| (name.clone(), trades.clone()))
        .collect();

    for (i, ((name, trades), cell)) in grades.iter().zip(cells.iter()).enumerate() {
        let focused = i == app.grade_index && app.mode == Mode::Browsing;
        let table = trade_table(name, trades, grade_color(i), focused);
        if i == app.grade_index {
            f.render_stateful_widget(table, *cell, &mut app.state);
        } else {
            f.render_stateful_widget(table, *cell, &mut TableState::default());
        }
    }
}

fn trade_table<'a>(name: &str, trades: &[ApartmentTrade], color: Color, focused: bool) -> Table<'a> {
    let header_cells = ["아파트", "지역", "평형", "층", "거래가", "거래일"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows: Vec<Row> = trades
        .iter()
        .map(|t| {
            Row::new(vec![
                Cell::from(truncate(&t.apt_name, 14)),
                Cell::from(truncate(&t.umd_nm, 8)),
                Cell::from(format!("{}평", to_pyeong(t.exclu_use_ar))),
                Cell::from(t.floor.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string())),
                Cell::from(format_price(t.deal_amount)).style(Style::default().fg(color)),
                Cell::from(t.deal_date.format("%Y-%m-%d").to_string()),
            ])
        })
        .collect();

    let border = if focused { Color::Yellow } else { Color::White };
    let title = if trades.is_empty() {
        format!(" {} (해당 없음) ", name)
    } else {
        format!(" {} ", name)
    };

    Table::new(
        rows,
        [
            Constraint::Min(14),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Length(4),
            Constraint::Length(16),
            Constraint::Length(11),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(Span::styled(title, Style::default().fg(color).add_modifier(Modifier::BOLD))),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ")
}

fn label(name: &str) -> Span<'static> {
    Span::styled(
        format!("  {}: ", name),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )
}

fn render_detail(f: &mut Frame, area: Rect, app: &App) {
    let Some(detail) = app.detail.as_ref() else {
        return;
    };
    let t = &detail.trade;

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let mut content = vec![
        Line::from(""),
        Line::from(vec![label("아파트"), Span::raw(t.apt_name.clone())]),
        Line::from(vec![label("위치"), Span::raw(format!("{} {} {}", t.sgg_nm, t.umd_nm, t.jibun))]),
        Line::from(vec![
            label("면적"),
            Span::raw(format!("{:.2}㎡ ({}평)", t.exclu_use_ar, to_pyeong(t.exclu_use_ar))),
        ]),
        Line::from(vec![
            label("층 / 준공"),
            Span::raw(format!(
                "{} / {}",
                t.floor.map(|f| format!("{}층", f)).unwrap_or_else(|| "-".to_string()),
                t.build_year.map(|y| format!("{}년", y)).unwrap_or_else(|| "-".to_string())
            )),
        ]),
        Line::from(vec![
            label("거래가"),
            Span::styled(format_price(t.deal_amount), Style::default().fg(Color::Green)),
        ]),
        Line::from(vec![label("거래일"), Span::raw(t.deal_date.format("%Y-%m-%d").to_string())]),
        Line::from(""),
        Line::from("  ─────────────────────────────"),
        Line::from(""),
    ];

    match &detail.summary {
        Some(s) => {
            let change_color = if s.change_rate >= 0.0 { Color::Red } else { Color::Blue };
            content.extend([
                Line::from(vec![label("거래 건수"), Span::raw(format!("{}건", s.count))]),
                Line::from(vec![
                    label("기간"),
                    Span::raw(format!("{} ~ {}", s.first_date, s.last_date)),
                ]),
                Line::from(vec![label("최저"), Span::raw(format_price(s.min_amount))]),
                Line::from(vec![label("최고"), Span::raw(format_price(s.max_amount))]),
                Line::from(vec![
                    label("변동률"),
                    Span::styled(format!("{:+.2}%", s.change_rate), Style::default().fg(change_color)),
                ]),
            ]);
        }
        None => content.push(Line::from("  최근 거래 내역이 없습니다")),
    }

    let info = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" 거래 상세 "),
    );
    f.render_widget(info, chunks[0]);

    render_trend_chart(f, chunks[1], &detail.monthly);
}

/// Monthly average price in 억
fn render_trend_chart(f: &mut Frame, area: Rect, monthly: &[MonthlyAverage]) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(format!(" 최근 {}년 월평균 실거래가 ", DEFAULT_LOOKBACK_YEARS));

    if monthly.is_empty() {
        f.render_widget(Paragraph::new("  데이터 없음").block(block), area);
        return;
    }

    let data: Vec<(f64, f64)> = monthly
        .iter()
        .enumerate()
        .map(|(i, m)| (i as f64, m.average_amount as f64 / 100_000_000.0))
        .collect();

    let (mut y_min, mut y_max) = data
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &(_, y)| (lo.min(y), hi.max(y)));
    let pad = ((y_max - y_min) * 0.1).max(0.5);
    y_min = (y_min - pad).max(0.0);
    y_max += pad;
    let x_max = (data.len().saturating_sub(1)).max(1) as f64;

    let x_labels = match (monthly.first(), monthly.last()) {
        (Some(first), Some(last)) => vec![Span::raw(first.month.clone()), Span::raw(last.month.clone())],
        _ => Vec::new(),
    };
    let y_labels = vec![
        Span::raw(format!("{:.1}억", y_min)),
        Span::raw(format!("{:.1}억", (y_min + y_max) / 2.0)),
        Span::raw(format!("{:.1}억", y_max)),
    ];

    let datasets = vec![Dataset::default()
        .name("월평균")
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([0.0, x_max])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([y_min, y_max])
                .labels(y_labels),
        );

    f.render_widget(chart, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let mut spans = vec![Span::styled(format!(" {} ", app.status), Style::default().fg(Color::Cyan))];
    spans.push(Span::raw("| "));
    match app.mode {
        Mode::EditingBudget => {
            spans.extend([key("0-9"), Span::raw(" 입력 | "), key("Enter"), Span::raw(" 검색 | ")]);
        }
        Mode::Browsing => {
            spans.extend([
                key("Tab"),
                Span::raw(" 급지 | "),
                key("↑/↓"),
                Span::raw(" 이동 | "),
                key("Enter"),
                Span::raw(" 시세 | "),
                key("b"),
                Span::raw(" 예산 | "),
            ]);
        }
        Mode::Detail => spans.extend([key("Esc"), Span::raw(" 뒤로 | ")]),
    }
    spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    spans.push(Span::raw(" 종료"));

    let status_bar = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );
    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
