use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::Parser;
use humansize::{format_size, DECIMAL};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use recsched::{
    config::{RecorderConfig, RecordingsDirProvider},
    discovery::discover_stores,
    store::JobStore,
    InteractiveController, JobRecord, JobStatus, RecorderFactory, StopReport, StreamContext,
};
use std::io::stdout;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const REFRESH_EVERY: Duration = Duration::from_secs(2);
const TOAST_FOR: Duration = Duration::from_secs(6);

/// Messages posted back to the UI thread
enum UiEvent {
    RecordingStopped(StopReport),
}

impl From<StopReport> for UiEvent {
    fn from(report: StopReport) -> Self {
        UiEvent::RecordingStopped(report)
    }
}

/// A job row together with the store it came from
struct JobRow {
    store: PathBuf,
    profile_id: String,
    job: JobRecord,
}

struct App {
    rows: Vec<JobRow>,
    unreadable: usize,
    table_state: TableState,
    should_quit: bool,
    store_dir: PathBuf,
    controller: InteractiveController<RecorderFactory>,
    events_tx: UnboundedSender<UiEvent>,
    events_rx: UnboundedReceiver<UiEvent>,
    recording_to: Option<PathBuf>,
    toast: Option<(String, Instant)>,
    last_refresh: Option<Instant>,
}

impl App {
    fn new(cfg: &RecorderConfig, stream: Option<StreamContext>) -> Self {
        let mut controller = InteractiveController::new(
            RecorderFactory::from_config(cfg),
            cfg.recordings_dir(),
            cfg.container.clone(),
        );
        if let Some(stream) = stream {
            controller.set_stream(stream);
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            rows: Vec::new(),
            unreadable: 0,
            table_state: TableState::default(),
            should_quit: false,
            store_dir: cfg.store_dir.clone(),
            controller,
            events_tx,
            events_rx,
            recording_to: None,
            toast: None,
            last_refresh: None,
        }
    }

    fn refresh(&mut self) {
        let mut rows = Vec::new();
        let mut unreadable = 0;
        for location in discover_stores(&self.store_dir) {
            // An unreadable profile only hides its own rows
            match JobStore::open(&location.path).and_then(|s| s.list_all()) {
                Ok(jobs) => rows.extend(jobs.into_iter().map(|job| JobRow {
                    store: location.path.clone(),
                    profile_id: location.profile_id.clone(),
                    job,
                })),
                Err(_) => unreadable += 1,
            }
        }
        rows.sort_by(|a, b| b.job.start_time.cmp(&a.job.start_time));
        self.rows = rows;
        self.unreadable = unreadable;

        match self.table_state.selected() {
            Some(i) if i >= self.rows.len() => {
                self.table_state.select(self.rows.len().checked_sub(1));
            }
            None if !self.rows.is_empty() => self.table_state.select(Some(0)),
            _ => {}
        }
        self.last_refresh = Some(Instant::now());
    }

    fn refresh_due(&self) -> bool {
        self.last_refresh.map_or(true, |t| t.elapsed() >= REFRESH_EVERY)
    }

    fn toast(&mut self, msg: impl Into<String>) {
        self.toast = Some((msg.into(), Instant::now()));
    }

    fn count_by_status(&self, status: JobStatus) -> usize {
        self.rows.iter().filter(|r| r.job.status == status).count()
    }

    fn toggle_recording(&mut self, rt: &Runtime) {
        if self.controller.is_stopping() {
            // Stop affordance is disabled until the pending stop reports back
            return;
        }
        if self.controller.can_stop() {
            match self.controller.request_stop(self.events_tx.clone()) {
                Ok(()) => self.toast("Stopping recording..."),
                Err(e) => self.toast(format!("Cannot stop: {}", e)),
            }
            return;
        }
        match rt.block_on(self.controller.start()) {
            Ok(path) => {
                self.toast(format!("Recording to {}", path.display()));
                self.recording_to = Some(path);
            }
            Err(e) => self.toast(format!("Cannot record: {}", e)),
        }
    }

    fn handle_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                UiEvent::RecordingStopped(report) => {
                    self.controller.finish_stop(&report);
                    self.recording_to = None;
                    let msg = if report.success {
                        format!(
                            "Saved {} ({})",
                            report.output.display(),
                            format_size(report.output_bytes.unwrap_or(0), DECIMAL)
                        )
                    } else {
                        format!("Recording failed: {}", report.output.display())
                    };
                    self.toast(msg);
                }
            }
        }
    }

    fn delete_selected(&mut self) {
        let Some(row) = self.table_state.selected().and_then(|i| self.rows.get(i)) else {
            return;
        };
        let (store, id, profile) = (row.store.clone(), row.job.id, row.profile_id.clone());
        let recording = row.job.status == JobStatus::Recording;

        match JobStore::open(&store).and_then(|s| s.delete(id)) {
            // The daemon stops the capture on its next cycle
            Ok(()) if recording => self.toast(format!("Deleted recording job {}; capture stops next cycle", id)),
            Ok(()) => self.toast(format!("Deleted job {} from profile {}", id, profile)),
            Err(e) => self.toast(format!("Delete failed: {}", e)),
        }
        self.refresh();
    }

    fn select(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, self.rows.len() as isize - 1);
        self.table_state.select(Some(next as usize));
    }

    /// Give an active manual recording its graceful stop before exiting
    fn drain(&mut self, rt: &Runtime) {
        if self.controller.can_stop() && self.controller.request_stop(self.events_tx.clone()).is_err() {
            return;
        }
        if self.controller.is_stopping() {
            if let Some(UiEvent::RecordingStopped(report)) = rt.block_on(self.events_rx.recv()) {
                self.controller.finish_stop(&report);
            }
        }
    }
}

/// Scheduled recordings monitor and manual recorder
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream to record manually with `r`
    #[arg(long)]
    url: Option<String>,

    /// Channel name for the manual stream
    #[arg(long, default_value = "manual")]
    channel: String,

    /// Program name for the manual stream
    #[arg(long)]
    program: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = RecorderConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Stops run on the runtime's workers; this thread stays the UI thread
    let rt = Runtime::new().context("Failed to start async runtime")?;
    let _guard = rt.enter();

    let stream = args.url.map(|url| StreamContext {
        channel_name: args.channel.clone(),
        url,
        program_name: args.program.clone(),
    });
    let mut app = App::new(&cfg, stream);

    // Setup terminal
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &mut app, &rt);

    app.drain(&rt);

    // Restore terminal
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;

    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
    rt: &Runtime,
) -> Result<()> {
    loop {
        app.handle_events();
        if app.refresh_due() {
            app.refresh();
        }

        terminal.draw(|f| ui(f, app))?;

        if crossterm::event::poll(Duration::from_millis(100))? {
            if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                if key.kind != crossterm::event::KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    crossterm::event::KeyCode::Char('q') => app.should_quit = true,
                    crossterm::event::KeyCode::Char('r') => app.toggle_recording(rt),
                    crossterm::event::KeyCode::Char('d') => app.delete_selected(),
                    crossterm::event::KeyCode::Up => app.select(-1),
                    crossterm::event::KeyCode::Down => app.select(1),
                    _ => {}
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let size = f.size();

    if size.height < 10 || size.width < 60 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 60x10.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(size);

    render_manual_bar(f, app, chunks[0]);
    render_job_table(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);
}

fn render_manual_bar(f: &mut Frame, app: &App, area: Rect) {
    let (text, color) = match (app.controller.stream(), app.recording_to.as_ref()) {
        (None, _) => ("No stream selected (start with --url)".to_string(), Color::DarkGray),
        (Some(_), _) if app.controller.is_stopping() => {
            ("Stopping... [r] disabled".to_string(), Color::Yellow)
        }
        (Some(stream), Some(path)) => (
            format!("REC {} -> {}  [r] stop", stream.channel_name, path.display()),
            Color::Red,
        ),
        (Some(stream), None) => (format!("{}  [r] record", stream.channel_name), Color::Green),
    };

    let paragraph = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Manual recording"))
        .style(Style::default().fg(color));
    f.render_widget(paragraph, area);
}

fn render_job_table(f: &mut Frame, app: &mut App, area: Rect) {
    let header = Row::new(vec!["ST", "PROFILE", "CHANNEL", "PROGRAM", "START", "END"])
        .style(Style::default().add_modifier(Modifier::BOLD))
        .height(1);

    let rows: Vec<Row> = if app.rows.is_empty() {
        vec![Row::new(vec![
            "-".to_string(),
            format!("No jobs in {}", app.store_dir.display()),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ])]
    } else {
        app.rows
            .iter()
            .map(|row| {
                let (status, color) = match row.job.status {
                    JobStatus::Pending => ("PEND", Color::Gray),
                    JobStatus::Recording => ("REC", Color::Red),
                    JobStatus::Completed => ("OK", Color::Green),
                    JobStatus::Failed => ("FAIL", Color::Magenta),
                };
                Row::new(vec![
                    status.to_string(),
                    truncate_string(&row.profile_id, 12),
                    truncate_string(&row.job.channel_name, 24),
                    truncate_string(row.job.program_name.as_deref().unwrap_or("-"), 30),
                    format_ts(row.job.start_time),
                    format_ts(row.job.end_time),
                ])
                .style(Style::default().fg(color))
            })
            .collect()
    };

    let widths = [
        Constraint::Length(5),
        Constraint::Length(13),
        Constraint::Percentage(25),
        Constraint::Percentage(30),
        Constraint::Length(16),
        Constraint::Length(16),
    ];

    let title = if app.unreadable > 0 {
        format!("Scheduled recordings ({}, {} profile(s) unreadable)", app.rows.len(), app.unreadable)
    } else {
        format!("Scheduled recordings ({})", app.rows.len())
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_spacing(1);

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let text = match &app.toast {
        Some((msg, at)) if at.elapsed() < TOAST_FOR => msg.clone(),
        _ => format!(
            "Pending: {} | Recording: {} | Completed: {} | Failed: {} | r=record/stop d=delete q=quit",
            app.count_by_status(JobStatus::Pending),
            app.count_by_status(JobStatus::Recording),
            app.count_by_status(JobStatus::Completed),
            app.count_by_status(JobStatus::Failed),
        ),
    };

    let paragraph = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(ratatui::widgets::Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn format_ts(ts: i64) -> String {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
