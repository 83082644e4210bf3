use crate::chart::{
    apply_drill, breakdown_series, monthly_bar_series, report_groups, ChartSeries,
    ReportDimension,
};
use crate::client::BillingSource;
use crate::config::{data_dir, db_path, AppConfig};
use crate::error::AppError;
use crate::export::{
    detail_table, overview_table, report_table, to_csv, to_printable, ExportFormat,
    ExportSelection,
};
use crate::forecast::{forecast_overlay, forecast_scope, forecast_trend, ForecastScope};
use crate::insights::{
    month_over_month, period_total, service_breakdown, top_project, year_over_year,
    year_over_year_total,
};
use crate::models::{Anomaly, ForecastPoint, Month, Period};
use crate::normalize::{format_currency, normalize_number};
use crate::service::{
    acknowledge_anomaly, load_anomalies, load_forecast, load_snapshot, load_yearly,
    BillingService, DataVersion, FetchKey, LoadedBilling, RequestGeneration,
};
use crate::storage::Storage;
use crate::table::{derive_table, SortDirection, SortKey};
use crate::ui::app::{AppState, ConfirmAction, Screen, Tab};
use crate::ui::theme::Palette;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Bar, BarChart, BarGroup, Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs, Wrap,
};
use ratatui::Terminal;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::task::JoinHandle;

const POLL_INTERVAL: StdDuration = StdDuration::from_millis(200);
const SHARE_BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Refresh,
    Acknowledge(i64),
    Export { printable: bool },
}

struct FetchJob {
    generation: u64,
    key: FetchKey,
    handle: JoinHandle<(LoadedBilling, Vec<Anomaly>)>,
}

struct ForecastJob {
    generation: u64,
    handle: JoinHandle<Vec<ForecastPoint>>,
}

struct AckJob {
    id: i64,
    handle: JoinHandle<Result<u64, AppError>>,
}

struct Jobs {
    source: Option<Arc<dyn BillingSource>>,
    version: Arc<DataVersion>,
    generation: RequestGeneration,
    forecast_generation: RequestGeneration,
    fetches: Vec<FetchJob>,
    forecasts: Vec<ForecastJob>,
    ack: Option<AckJob>,
    last_key: Option<FetchKey>,
    last_forecast: Option<(ForecastScope, i32, u64)>,
}

pub async fn run_tui(cfg: AppConfig) -> Result<(), AppError> {
    let dark = cfg.theme.is_dark();
    let storage = Storage::open(&db_path()?)?;
    let service = BillingService::new()?;
    let source: Option<Arc<dyn BillingSource>> = match service.source(&cfg) {
        Ok(api) => Some(Arc::new(api)),
        Err(e) => {
            tracing::warn!(error = %e, "no live billing source, reading stored snapshot");
            None
        }
    };
    let start_version = storage
        .snapshot_info(cfg.platform)?
        .map_or(0, |info| info.data_version);

    let mut state = AppState::new(cfg.platform, cfg.effective_year(), dark, cfg.top_n);
    state.offline = source.is_none();
    let mut jobs = Jobs {
        source,
        version: Arc::new(DataVersion::new(start_version)),
        generation: RequestGeneration::default(),
        forecast_generation: RequestGeneration::default(),
        fetches: Vec::new(),
        forecasts: Vec::new(),
        ack: None,
        last_key: None,
        last_forecast: None,
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let loop_result = run_loop(&mut terminal, &cfg, &storage, &mut state, &mut jobs).await;

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    loop_result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    cfg: &AppConfig,
    storage: &Storage,
    state: &mut AppState,
    jobs: &mut Jobs,
) -> Result<(), AppError> {
    let refresh_every = StdDuration::from_secs(cfg.refresh_seconds.max(10));
    let mut last_tick = Instant::now();

    while state.running {
        sync_fetches(state, storage, jobs);
        sync_forecast(state, jobs);
        process_fetch_jobs(state, jobs).await;
        process_forecast_jobs(state, jobs).await;
        process_ack_job(state, jobs).await;

        terminal.draw(|f| render(f, state))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(command) = handle_key(key.code, key.modifiers, state) {
                    run_command(command, state, jobs);
                }
            }
        }

        if last_tick.elapsed() >= refresh_every {
            jobs.version.bump();
            last_tick = Instant::now();
        }
    }

    Ok(())
}

fn sync_fetches(state: &mut AppState, storage: &Storage, jobs: &mut Jobs) {
    let key = state.fetch_key(jobs.version.current());
    if jobs.last_key == Some(key) {
        return;
    }
    jobs.last_key = Some(key);
    let generation = jobs.generation.issue();

    let Some(source) = jobs.source.clone() else {
        match load_snapshot(storage, key.platform, key.year) {
            Ok(loaded) => {
                apply_fetch_result(state, &jobs.generation, generation, loaded, Vec::new());
            }
            Err(e) => {
                tracing::error!(error = %e, "snapshot load failed");
                apply_fetch_result(
                    state,
                    &jobs.generation,
                    generation,
                    LoadedBilling::default(),
                    Vec::new(),
                );
            }
        }
        return;
    };

    state.loading = true;
    state.status = format!("loading {} {}...", key.platform, key.year);
    let handle = tokio::spawn(async move {
        let loaded = load_yearly(&*source, key.platform, key.year).await;
        let anomalies = load_anomalies(&*source, key.platform).await;
        (loaded, anomalies)
    });
    jobs.fetches.push(FetchJob {
        generation,
        key,
        handle,
    });
}

fn sync_forecast(state: &mut AppState, jobs: &mut Jobs) {
    let Some(source) = jobs.source.clone() else {
        return;
    };
    let scope = forecast_scope(&state.filter.projects, &state.data.billing.current);
    let forecast_key = (scope.clone(), state.year, jobs.version.current());
    if jobs.last_forecast.as_ref() == Some(&forecast_key) {
        return;
    }
    jobs.last_forecast = Some(forecast_key);

    let generation = jobs.forecast_generation.issue();
    if scope == ForecastScope::Suppressed {
        state.forecast.clear();
        return;
    }
    let year = state.year;
    let handle = tokio::spawn(async move { load_forecast(&*source, &scope, year).await });
    jobs.forecasts.push(ForecastJob { generation, handle });
}

/// Apply a fetch payload only when its generation is still the latest issued.
fn apply_fetch_result(
    state: &mut AppState,
    generation: &RequestGeneration,
    job_generation: u64,
    loaded: LoadedBilling,
    anomalies: Vec<Anomaly>,
) -> bool {
    if !generation.is_current(job_generation) {
        tracing::debug!(generation = job_generation, "discarding stale billing response");
        return false;
    }
    let projects = loaded.billing.current.len();
    state.data = loaded;
    state.anomalies = anomalies;
    state.anomaly_selected = state.anomaly_selected.min(state.anomalies.len().saturating_sub(1));
    let rows = state.visible_projects().len();
    state.clamp_cursor(rows);
    state.last_refresh = chrono::Local::now().format("%H:%M:%S").to_string();
    state.status = if state.data.billing.is_empty() {
        "no billing data".into()
    } else if state.offline {
        format!("{projects} projects (stored snapshot)")
    } else {
        format!("{projects} projects")
    };
    true
}

async fn process_fetch_jobs(state: &mut AppState, jobs: &mut Jobs) {
    let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut jobs.fetches)
        .into_iter()
        .partition(|job| job.handle.is_finished());
    jobs.fetches = pending;

    for job in finished {
        match job.handle.await {
            Ok((loaded, anomalies)) => {
                apply_fetch_result(state, &jobs.generation, job.generation, loaded, anomalies);
            }
            Err(e) => {
                tracing::error!(platform = %job.key.platform, year = job.key.year, error = %e, "fetch task failed");
                if jobs.generation.is_current(job.generation) {
                    state.status = format!("fetch failed: {e}");
                }
            }
        }
    }
    state.loading = !jobs.fetches.is_empty();
}

async fn process_forecast_jobs(state: &mut AppState, jobs: &mut Jobs) {
    let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut jobs.forecasts)
        .into_iter()
        .partition(|job| job.handle.is_finished());
    jobs.forecasts = pending;

    for job in finished {
        match job.handle.await {
            Ok(points) if jobs.forecast_generation.is_current(job.generation) => {
                state.forecast = points;
            }
            Ok(_) => tracing::debug!(generation = job.generation, "discarding stale forecast"),
            Err(e) => tracing::error!(error = %e, "forecast task failed"),
        }
    }
}

async fn process_ack_job(state: &mut AppState, jobs: &mut Jobs) {
    if !jobs.ack.as_ref().is_some_and(|job| job.handle.is_finished()) {
        return;
    }
    let Some(job) = jobs.ack.take() else {
        return;
    };
    match job.handle.await {
        Ok(Ok(version)) => {
            state.status = format!("anomaly {} acknowledged (data version {version})", job.id);
        }
        Ok(Err(e)) => show_error(state, format!("Failed to acknowledge anomaly: {e}")),
        Err(e) => show_error(state, format!("Background task failed: {e}")),
    }
}

fn run_command(command: Command, state: &mut AppState, jobs: &mut Jobs) {
    match command {
        Command::Refresh => {
            let version = jobs.version.bump();
            state.status = format!("refreshing (data version {version})...");
        }
        Command::Acknowledge(id) => {
            let Some(source) = jobs.source.clone() else {
                show_error(state, "Acknowledging needs a live connection and access token.".into());
                return;
            };
            if jobs.ack.is_some() {
                state.status = "An acknowledgement is already running.".into();
                return;
            }
            let version = Arc::clone(&jobs.version);
            let handle =
                tokio::spawn(async move { acknowledge_anomaly(&*source, id, &version).await });
            jobs.ack = Some(AckJob { id, handle });
            state.status = format!("acknowledging anomaly {id}...");
        }
        Command::Export { printable } => match export_view(state, printable) {
            Ok(path) => show_info(state, format!("Exported to {}", path.display())),
            Err(e) => show_error(state, format!("Export failed: {e}")),
        },
    }
}

fn export_view(state: &AppState, printable: bool) -> Result<PathBuf, AppError> {
    let visible = state.visible_projects();
    let selection = ExportSelection::default();
    let table = match state.tab {
        Tab::Billing => overview_table(&derive_table(visible, state.sort), &selection, state.year),
        Tab::Dashboard => detail_table(&visible, &state.data.meta, &selection, state.period, state.year),
        Tab::Reports => {
            let groups = report_groups(
                &visible,
                &state.data.meta,
                state.report_dimension,
                state.period,
            );
            report_table(&groups, state.report_dimension, state.period, state.year)
        }
    };

    let (format, payload) = if printable {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        (ExportFormat::Print, to_printable(&table, &today))
    } else {
        (ExportFormat::Csv, to_csv(&table))
    };

    let dir = data_dir()?.join("exports");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(table.file_name(format));
    std::fs::write(&path, payload)?;
    tracing::info!(rows = table.body.len(), path = %path.display(), "export written");
    Ok(path)
}

fn show_error(state: &mut AppState, message: String) {
    state.error_message = message;
    state.open(Screen::ErrorDialog);
}

fn show_info(state: &mut AppState, message: String) {
    state.info_message = message;
    state.open(Screen::InfoDialog);
}

fn confirm_quit(state: &mut AppState) {
    state.open(Screen::Confirm(ConfirmAction::Quit));
    state.confirm_selected = 0;
}

fn table_row_names(state: &AppState) -> Vec<String> {
    derive_table(state.visible_projects(), state.sort)
        .rows
        .iter()
        .map(|row| row.project_name.to_string())
        .collect()
}

fn breakdown_for(state: &AppState) -> ChartSeries {
    let visible = state.visible_projects();
    breakdown_series(&visible, &state.filter, state.period, state.top_n)
}

fn picker_names(state: &AppState) -> Vec<String> {
    let mut names: Vec<String> = state
        .data
        .billing
        .current
        .iter()
        .map(|p| p.project_name.clone())
        .collect();
    names.sort();
    names
}

fn handle_key(code: KeyCode, modifiers: KeyModifiers, state: &mut AppState) -> Option<Command> {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        confirm_quit(state);
        return None;
    }

    match state.screen.clone() {
        Screen::Main => handle_main_key(code, state),
        Screen::ServiceBreakdown { .. } => {
            if matches!(code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')) {
                state.screen = Screen::Main;
            }
            None
        }
        Screen::ProjectPicker => {
            let names = picker_names(state);
            match code {
                KeyCode::Up => state.picker_selected = state.picker_selected.saturating_sub(1),
                KeyCode::Down => {
                    if state.picker_selected + 1 < names.len() {
                        state.picker_selected += 1;
                    }
                }
                KeyCode::Char(' ') => {
                    if let Some(name) = names.get(state.picker_selected) {
                        state.filter.toggle_project(name);
                        state.cursor_row = 0;
                        state.segment_selected = 0;
                    }
                }
                KeyCode::Enter | KeyCode::Esc => state.screen = Screen::Main,
                _ => {}
            }
            None
        }
        Screen::Search => {
            match code {
                KeyCode::Enter => {
                    state.filter.search = state.search_draft.trim().to_string();
                    state.cursor_row = 0;
                    state.screen = Screen::Main;
                }
                KeyCode::Esc => state.screen = Screen::Main,
                KeyCode::Backspace => {
                    state.search_draft.pop();
                }
                KeyCode::Char(c) => state.search_draft.push(c),
                _ => {}
            }
            None
        }
        Screen::Confirm(action) => match code {
            KeyCode::Esc => {
                state.screen = Screen::Main;
                None
            }
            KeyCode::Left => {
                state.confirm_selected = 0;
                None
            }
            KeyCode::Right => {
                state.confirm_selected = 1;
                None
            }
            KeyCode::Enter => {
                state.screen = Screen::Main;
                if state.confirm_selected == 0 {
                    return None;
                }
                match action {
                    ConfirmAction::Quit => {
                        state.running = false;
                        None
                    }
                    ConfirmAction::AcknowledgeAnomaly { id, .. } => Some(Command::Acknowledge(id)),
                }
            }
            _ => None,
        },
        Screen::ErrorDialog | Screen::InfoDialog => {
            if matches!(code, KeyCode::Enter | KeyCode::Esc) {
                state.screen = state.previous_screen.clone();
            }
            None
        }
    }
}

fn handle_main_key(code: KeyCode, state: &mut AppState) -> Option<Command> {
    match code {
        KeyCode::Char('q') => confirm_quit(state),
        KeyCode::Tab => state.tab = state.tab.next(),
        KeyCode::BackTab => state.tab = state.tab.previous(),
        KeyCode::Char('1') => state.tab = Tab::Billing,
        KeyCode::Char('2') => state.tab = Tab::Dashboard,
        KeyCode::Char('3') => state.tab = Tab::Reports,
        KeyCode::Char('p') => state.change_platform(),
        KeyCode::Char('[') => state.change_year(-1),
        KeyCode::Char(']') => state.change_year(1),
        KeyCode::Char('m') => state.cycle_period(),
        KeyCode::Char('t') => state.dark = !state.dark,
        KeyCode::Char('v') => state.cycle_environment(),
        KeyCode::Char('c') => {
            state.clear_filters();
            state.status = "filters cleared".into();
        }
        KeyCode::Char('/') => {
            state.search_draft = state.filter.search.clone();
            state.open(Screen::Search);
        }
        KeyCode::Char('f') => {
            state.picker_selected = 0;
            state.open(Screen::ProjectPicker);
        }
        KeyCode::Char('r') => return Some(Command::Refresh),
        KeyCode::Char('e') => return Some(Command::Export { printable: false }),
        KeyCode::Char('P') => return Some(Command::Export { printable: true }),
        _ => match state.tab {
            Tab::Billing => handle_billing_key(code, state),
            Tab::Dashboard => handle_dashboard_key(code, state),
            Tab::Reports => {
                if code == KeyCode::Char('g') {
                    state.report_dimension = match state.report_dimension {
                        ReportDimension::Team => ReportDimension::Owner,
                        ReportDimension::Owner => ReportDimension::Team,
                    };
                }
            }
        },
    }
    None
}

fn handle_billing_key(code: KeyCode, state: &mut AppState) {
    let names = table_row_names(state);
    match code {
        KeyCode::Up => state.cursor_row = state.cursor_row.saturating_sub(1),
        KeyCode::Down => {
            if state.cursor_row + 1 < names.len() {
                state.cursor_row += 1;
            }
        }
        KeyCode::Left => state.cursor_col = state.cursor_col.saturating_sub(1),
        KeyCode::Right => state.cursor_col = (state.cursor_col + 1).min(13),
        KeyCode::Char('s') => {
            state.sort = state.sort.request(state.sort_key_at_cursor());
            state.cursor_row = 0;
        }
        KeyCode::Enter => {
            let Some(project) = names.get(state.cursor_row).cloned() else {
                return;
            };
            match state.month_at_cursor() {
                Some(month) => state.open(Screen::ServiceBreakdown { project, month }),
                None => {
                    state.filter.toggle_project(&project);
                    state.cursor_row = 0;
                }
            }
        }
        _ => {}
    }
}

fn handle_dashboard_key(code: KeyCode, state: &mut AppState) {
    match code {
        KeyCode::Up => state.segment_selected = state.segment_selected.saturating_sub(1),
        KeyCode::Down => {
            if state.segment_selected + 1 < breakdown_for(state).labels.len() {
                state.segment_selected += 1;
            }
        }
        KeyCode::Enter => {
            if state.filter.projects.len() == 1 {
                state.status = "already showing a single project".into();
                return;
            }
            let series = breakdown_for(state);
            if let Some(label) = series.labels.get(state.segment_selected) {
                if apply_drill(&mut state.filter, label) {
                    state.segment_selected = 0;
                    state.status = format!("drilled into '{label}'");
                } else {
                    state.status = "'Other' groups several projects".into();
                }
            }
        }
        KeyCode::Char('n') => {
            if !state.anomalies.is_empty() {
                state.anomaly_selected = (state.anomaly_selected + 1) % state.anomalies.len();
            }
        }
        KeyCode::Char('k') => {
            if let Some(anomaly) = state.anomalies.get(state.anomaly_selected) {
                let action = ConfirmAction::AcknowledgeAnomaly {
                    id: anomaly.id,
                    project: anomaly.project_name.clone(),
                };
                state.open(Screen::Confirm(action));
                state.confirm_selected = 0;
            }
        }
        _ => {}
    }
}

fn short_money(value: f64) -> String {
    let abs = value.abs();
    let sign = if value < 0.0 { "-" } else { "" };
    if abs == 0.0 {
        "-".to_string()
    } else if abs >= 1_000_000.0 {
        format!("{sign}${:.1}M", abs / 1_000_000.0)
    } else if abs >= 10_000.0 {
        format!("{sign}${:.1}k", abs / 1_000.0)
    } else {
        format!("{sign}${abs:.2}")
    }
}

fn signed_percent(value: f64) -> String {
    if value > 0.0 {
        format!("+{value:.1}%")
    } else {
        format!("{value:.1}%")
    }
}

fn render(f: &mut ratatui::Frame, state: &AppState) {
    let palette = Palette::new(state.dark);
    let size = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(8),
            Constraint::Length(2),
        ])
        .split(size);

    let mut filters = Vec::new();
    if !state.filter.projects.is_empty() {
        filters.push(format!("{} selected", state.filter.projects.len()));
    }
    if !state.filter.search.is_empty() {
        filters.push(format!("search '{}'", state.filter.search));
    }
    if let Some(env) = &state.filter.environment {
        filters.push(format!("env {env}"));
    }
    let filters = if filters.is_empty() {
        "all projects".to_string()
    } else {
        filters.join(", ")
    };

    let header = Paragraph::new(format!(
        " billing-lens  ·  {}  ·  {}  ·  {}  ·  {}  ·  {}{}  ·  {} ",
        state.platform,
        state.year,
        state.period.label(),
        filters,
        state.status,
        if state.loading { " ⟳" } else { "" },
        state.last_refresh
    ))
    .block(Block::default().borders(Borders::ALL).title(" Billing "))
    .style(Style::default().fg(palette.text()));
    f.render_widget(header, root[0]);

    let tabs = Tabs::new(
        Tab::ALL
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} {}", i + 1, t.title())),
    )
    .select(state.tab.index())
    .style(Style::default().fg(palette.muted()))
    .highlight_style(
        Style::default()
            .fg(palette.accent())
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(tabs, root[1]);

    match state.tab {
        Tab::Billing => render_billing(f, root[2], state, palette),
        Tab::Dashboard => render_dashboard(f, root[2], state, palette),
        Tab::Reports => render_reports(f, root[2], state, palette),
    }

    let footer = Paragraph::new(footer_text(state))
        .block(Block::default().borders(Borders::TOP))
        .style(Style::default().fg(palette.muted()));
    f.render_widget(footer, root[3]);

    match &state.screen {
        Screen::Main => {}
        Screen::ServiceBreakdown { project, month } => {
            render_service_breakdown(f, state, palette, project, *month);
        }
        Screen::ProjectPicker => render_project_picker(f, state, palette),
        Screen::Search => render_search(f, state, palette),
        Screen::Confirm(action) => render_confirm(f, state, action),
        Screen::ErrorDialog => render_error(f, state),
        Screen::InfoDialog => render_info(f, state),
    }
}

fn footer_text(state: &AppState) -> &'static str {
    match (&state.screen, state.tab) {
        (Screen::Main, Tab::Billing) => {
            "arrows move | s sort | Enter services/select | f projects | / search | v env | m period | p platform | [ ] year | e csv | P print | q quit"
        }
        (Screen::Main, Tab::Dashboard) => {
            "Up/Down segment | Enter drill | n next anomaly | k acknowledge | m period | c clear | r refresh | t theme | q quit"
        }
        (Screen::Main, Tab::Reports) => {
            "g team/owner | m period | e csv | P print | f projects | c clear | Tab switch | q quit"
        }
        (Screen::ProjectPicker, _) => "Up/Down move | Space toggle | Enter/Esc close",
        (Screen::Search, _) => "type to search | Enter apply | Esc cancel",
        (Screen::Confirm(_), _) => "Left/Right choose | Enter confirm | Esc cancel",
        _ => "Enter/Esc close",
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn sort_marker(state: &AppState, key: SortKey) -> &'static str {
    if state.sort.key != key {
        return "";
    }
    match state.sort.direction {
        SortDirection::Ascending => " ▲",
        SortDirection::Descending => " ▼",
    }
}

fn render_billing(f: &mut ratatui::Frame, area: Rect, state: &AppState, palette: Palette) {
    let table = derive_table(state.visible_projects(), state.sort);

    let header = Row::new(SortKey::columns().into_iter().map(|key| {
        let label = match key {
            SortKey::ProjectName => "Project".to_string(),
            SortKey::Month(m) => m.header(),
            SortKey::Total => "Total".to_string(),
        };
        Cell::from(format!("{label}{}", sort_marker(state, key)))
    }))
    .style(
        Style::default()
            .fg(palette.header())
            .add_modifier(Modifier::BOLD),
    );

    // borders, header and grand-total row
    let body_height = usize::from(area.height.saturating_sub(4)).max(1);
    let offset = (state.cursor_row + 1).saturating_sub(body_height);

    let mut rows: Vec<Row> = table
        .rows
        .iter()
        .enumerate()
        .skip(offset)
        .take(body_height)
        .map(|(idx, row)| {
            let selected_row = idx == state.cursor_row;
            let mut cells = Vec::with_capacity(14);
            let mut name_style = Style::default().fg(palette.text());
            if state.filter.projects.contains(row.project_name) {
                name_style = name_style.fg(palette.accent());
            }
            if selected_row && state.cursor_col == 0 {
                name_style = name_style.add_modifier(Modifier::REVERSED);
            }
            cells.push(Cell::from(row.project_name.to_string()).style(name_style));

            for (i, cost) in row.monthly_costs.iter().enumerate() {
                let (bg, fg) = palette.heat(*cost, table.min_cost, table.max_cost);
                let mut style = Style::default().bg(bg).fg(fg);
                if selected_row && state.cursor_col == i + 1 {
                    style = style.add_modifier(Modifier::REVERSED | Modifier::BOLD);
                }
                cells.push(Cell::from(short_money(*cost)).style(style));
            }

            let mut total_style = Style::default()
                .fg(palette.text())
                .add_modifier(Modifier::BOLD);
            if selected_row && state.cursor_col == 13 {
                total_style = total_style.add_modifier(Modifier::REVERSED);
            }
            cells.push(Cell::from(short_money(row.total_cost)).style(total_style));
            Row::new(cells)
        })
        .collect();

    let mut total_cells = vec![Cell::from(crate::table::GRAND_TOTAL_LABEL)];
    total_cells.extend(
        table
            .grand_total
            .monthly_costs
            .iter()
            .map(|c| Cell::from(short_money(*c))),
    );
    total_cells.push(Cell::from(short_money(table.grand_total.total_cost)));
    rows.push(
        Row::new(total_cells).style(
            Style::default()
                .fg(palette.header())
                .add_modifier(Modifier::BOLD),
        ),
    );

    let mut widths = vec![Constraint::Min(18)];
    widths.extend(std::iter::repeat(Constraint::Length(9)).take(12));
    widths.push(Constraint::Length(10));

    let title = format!(
        " Monthly Billing {} ({} projects) ",
        state.year,
        table.rows.len()
    );
    let widget = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(Style::default().bg(palette.neutral()));
    f.render_widget(widget, area);
}

fn render_dashboard(f: &mut ratatui::Frame, area: Rect, state: &AppState, palette: Palette) {
    let visible = state.visible_projects();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(8),
            Constraint::Length(7),
        ])
        .split(area);

    let kpis = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25); 4])
        .split(layout[0]);

    let total = period_total(&visible, state.period);
    f.render_widget(
        Paragraph::new(format_currency(total))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" Spend · {} ", state.period.label())),
            )
            .style(
                Style::default()
                    .fg(palette.accent())
                    .add_modifier(Modifier::BOLD),
            ),
        kpis[0],
    );

    let mom = match month_over_month(&visible, state.period) {
        Some(trend) => {
            let arrow = if trend.is_increase { "▲" } else { "▼" };
            let color = if trend.is_increase {
                palette.increase()
            } else {
                palette.decrease()
            };
            Line::from(Span::styled(
                format!(
                    "{arrow} {}% vs {}",
                    trend.percentage.abs(),
                    format_currency(trend.previous_cost)
                ),
                Style::default().fg(color),
            ))
        }
        None => Line::from(Span::styled(
            "select a month after Jan",
            Style::default().fg(palette.muted()),
        )),
    };
    f.render_widget(
        Paragraph::new(mom).block(Block::default().borders(Borders::ALL).title(" Month over Month ")),
        kpis[1],
    );

    let top = match top_project(&visible, state.period) {
        Some(top) => format!(
            "{}{} · {}",
            top.name,
            top.code.map(|c| format!(" ({c})")).unwrap_or_default(),
            format_currency(top.cost)
        ),
        None => "no spend".to_string(),
    };
    f.render_widget(
        Paragraph::new(top).block(Block::default().borders(Borders::ALL).title(" Top Project ")),
        kpis[2],
    );

    let yoy = match year_over_year_total(&visible, &state.visible_previous_projects()) {
        Some(pct) => signed_percent(pct),
        None => format!("no {} spend", state.year - 1),
    };
    f.render_widget(
        Paragraph::new(yoy).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" vs {} ", state.year - 1)),
        ),
        kpis[3],
    );

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(58), Constraint::Percentage(42)])
        .split(layout[1]);
    render_monthly_chart(f, middle[0], state, palette, &visible);
    render_breakdown(f, middle[1], state, palette);
    render_anomalies(f, layout[2], state, palette);
}

fn render_monthly_chart(
    f: &mut ratatui::Frame,
    area: Rect,
    state: &AppState,
    palette: Palette,
    visible: &[&crate::models::ProjectYearlyAggregate],
) {
    let series = monthly_bar_series(visible);
    let mut actual = [0.0; 12];
    for (slot, value) in actual.iter_mut().zip(&series.data) {
        *slot = *value;
    }
    let overlay = forecast_overlay(&actual, &state.forecast, state.year);
    let anchor = actual.iter().rposition(|c| *c != 0.0);

    let bars: Vec<Bar> = Month::ALL
        .into_iter()
        .map(|month| {
            let i = month.index();
            let forecast_only = anchor.map_or(true, |a| i > a) && overlay[i].is_some();
            let (value, color) = if forecast_only {
                (overlay[i].unwrap_or_default(), palette.forecast())
            } else {
                (actual[i], palette.bar())
            };
            Bar::default()
                .value(value.max(0.0).round() as u64)
                .text_value(short_money(value))
                .label(Line::from(month.label()))
                .style(Style::default().fg(color))
        })
        .collect();

    let scope = forecast_scope(&state.filter.projects, &state.data.billing.current);
    let trend = match (scope, forecast_trend(&actual, &state.forecast, state.year)) {
        (ForecastScope::Suppressed, _) => " · no forecast for multiple projects".to_string(),
        (_, Some(t)) => format!(
            " · forecast {} {} vs {}",
            t.to_month.label(),
            signed_percent(t.percentage),
            t.from_month.label()
        ),
        (_, None) => String::new(),
    };

    let chart = BarChart::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Monthly Spend {}{trend} ", state.year)),
        )
        .data(BarGroup::default().bars(&bars))
        .bar_width(6)
        .bar_gap(1);
    f.render_widget(chart, area);
}

fn share_bar(share: f64) -> String {
    let filled = (share.clamp(0.0, 1.0) * SHARE_BAR_WIDTH as f64).round() as usize;
    "█".repeat(filled)
}

fn render_breakdown(f: &mut ratatui::Frame, area: Rect, state: &AppState, palette: Palette) {
    let series = breakdown_for(state);
    let total = series.total();
    let rows: Vec<Row> = series
        .iter()
        .enumerate()
        .map(|(idx, (label, value))| {
            let share = if total != 0.0 { value / total } else { 0.0 };
            let style = if idx == state.segment_selected {
                Style::default()
                    .fg(palette.accent())
                    .add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else {
                Style::default().fg(palette.text())
            };
            Row::new(vec![
                Cell::from(label.to_string()),
                Cell::from(short_money(value)),
                Cell::from(format!("{:.1}%", share * 100.0)),
                Cell::from(share_bar(share)).style(Style::default().fg(palette.bar())),
            ])
            .style(style)
        })
        .collect();

    let title = match state.filter.projects.iter().next() {
        Some(project) if state.filter.projects.len() == 1 => format!(" Services · {project} "),
        _ => " Cost by Project ".to_string(),
    };
    let widget = Table::new(
        rows,
        [
            Constraint::Min(14),
            Constraint::Length(10),
            Constraint::Length(7),
            Constraint::Length(SHARE_BAR_WIDTH as u16),
        ],
    )
    .header(
        Row::new(vec!["Name", "Cost", "Share", ""]).style(
            Style::default()
                .fg(palette.header())
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn render_anomalies(f: &mut ratatui::Frame, area: Rect, state: &AppState, palette: Palette) {
    let rows: Vec<Row> = state
        .anomalies
        .iter()
        .enumerate()
        .map(|(idx, a)| {
            let style = if idx == state.anomaly_selected {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(a.project_name.clone()),
                Cell::from(a.month.clone()),
                Cell::from(format_currency(normalize_number(a.anomalous_cost.as_ref()))),
                Cell::from(format_currency(normalize_number(a.average_cost.as_ref()))),
                Cell::from(format!("+{:.0}%", a.percent_over_average()))
                    .style(Style::default().fg(palette.increase())),
            ])
            .style(style)
        })
        .collect();

    let title = if state.offline {
        " Anomalies (offline) ".to_string()
    } else {
        format!(" Unread Anomalies ({}) ", state.anomalies.len())
    };
    let widget = Table::new(
        rows,
        [
            Constraint::Min(16),
            Constraint::Length(8),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(8),
        ],
    )
    .header(
        Row::new(vec!["Project", "Month", "Cost", "Average", "Over"]).style(
            Style::default()
                .fg(palette.header())
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn render_reports(f: &mut ratatui::Frame, area: Rect, state: &AppState, palette: Palette) {
    let visible = state.visible_projects();
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    let groups = report_groups(
        &visible,
        &state.data.meta,
        state.report_dimension,
        state.period,
    );
    let total: f64 = groups.iter().map(|g| g.total_cost).sum();
    let mut rows: Vec<Row> = groups
        .iter()
        .map(|g| {
            let share = if total != 0.0 { g.total_cost / total } else { 0.0 };
            Row::new(vec![
                Cell::from(g.name.clone()),
                Cell::from(format_currency(g.total_cost)),
                Cell::from(format!("{:.1}%", share * 100.0)),
            ])
        })
        .collect();
    rows.push(
        Row::new(vec![
            Cell::from(crate::table::GRAND_TOTAL_LABEL),
            Cell::from(format_currency(total)),
            Cell::from(""),
        ])
        .style(
            Style::default()
                .fg(palette.header())
                .add_modifier(Modifier::BOLD),
        ),
    );

    let quarter = match state.period {
        Period::All => String::new(),
        other => format!(" - {}", other.label()),
    };
    let grouped = Table::new(
        rows,
        [
            Constraint::Min(16),
            Constraint::Length(16),
            Constraint::Length(8),
        ],
    )
    .header(
        Row::new(vec![state.report_dimension.title(), "Cost", "Share"]).style(
            Style::default()
                .fg(palette.header())
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(Block::default().borders(Borders::ALL).title(format!(
        " Cost Report by {} for {}{quarter} ",
        state.report_dimension.title(),
        state.year
    )));
    f.render_widget(grouped, body[0]);

    let yoy_rows: Vec<Row> = year_over_year(&visible, &state.visible_previous_projects())
        .into_iter()
        .map(|y| {
            let (label, color) = match y.percentage {
                Some(p) if p > 0.0 => (signed_percent(p), palette.increase()),
                Some(p) => (signed_percent(p), palette.decrease()),
                None => ("new".to_string(), palette.muted()),
            };
            Row::new(vec![
                Cell::from(y.project_name),
                Cell::from(format_currency(y.current_total)),
                Cell::from(format_currency(y.previous_total)),
                Cell::from(label).style(Style::default().fg(color)),
            ])
        })
        .collect();
    let yoy = Table::new(
        yoy_rows,
        [
            Constraint::Min(16),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(9),
        ],
    )
    .header(
        Row::new(vec![
            "Project".to_string(),
            state.year.to_string(),
            (state.year - 1).to_string(),
            "Change".to_string(),
        ])
        .style(
            Style::default()
                .fg(palette.header())
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(Block::default().borders(Borders::ALL).title(" Year over Year "));
    f.render_widget(yoy, body[1]);
}

fn render_service_breakdown(
    f: &mut ratatui::Frame,
    state: &AppState,
    palette: Palette,
    project: &str,
    month: Month,
) {
    let area = centered_rect(70, 70, f.area());
    f.render_widget(Clear, area);

    let services = state
        .data
        .billing
        .current
        .iter()
        .find(|p| p.project_name == project)
        .map(|p| service_breakdown(&p.service_breakdown, month))
        .unwrap_or_default();

    let mut lines = Vec::new();
    if services.is_empty() {
        lines.push(Line::from(Span::styled(
            "No costs recorded for this month.",
            Style::default().fg(palette.muted()),
        )));
    }
    for service in &services {
        lines.push(Line::from(vec![
            Span::styled(
                service.service.clone(),
                Style::default()
                    .fg(palette.accent())
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(
                format_currency(service.total_cost),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]));
        for sku in &service.skus {
            lines.push(Line::from(vec![
                Span::styled(format!("    {}", sku.sku), Style::default().fg(palette.muted())),
                Span::raw("  "),
                Span::raw(format_currency(sku.cost)),
            ]));
        }
    }

    let content = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {project} · {} {} ", month.label(), state.year)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(content, area);
}

fn render_project_picker(f: &mut ratatui::Frame, state: &AppState, palette: Palette) {
    let area = centered_rect(50, 70, f.area());
    f.render_widget(Clear, area);

    let names = picker_names(state);
    let height = usize::from(area.height.saturating_sub(2)).max(1);
    let offset = (state.picker_selected + 1).saturating_sub(height);
    let lines: Vec<Line> = names
        .iter()
        .enumerate()
        .skip(offset)
        .take(height)
        .map(|(idx, name)| {
            let mark = if state.filter.projects.contains(name) {
                "[x]"
            } else {
                "[ ]"
            };
            let style = if idx == state.picker_selected {
                Style::default()
                    .fg(palette.accent())
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(Span::styled(format!("{mark} {name}"), style))
        })
        .collect();

    let content = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Projects ({} selected) ", state.filter.projects.len())),
    );
    f.render_widget(content, area);
}

fn render_search(f: &mut ratatui::Frame, state: &AppState, palette: Palette) {
    let area = centered_rect(50, 20, f.area());
    f.render_widget(Clear, area);
    let content = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("> ", Style::default().fg(palette.accent())),
            Span::raw(format!("{}_", state.search_draft)),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "Matches project names, case-insensitive",
            Style::default().fg(palette.muted()),
        )),
    ])
    .block(Block::default().borders(Borders::ALL).title(" Search Projects "));
    f.render_widget(content, area);
}

fn render_confirm(f: &mut ratatui::Frame, state: &AppState, action: &ConfirmAction) {
    let area = centered_rect(56, 34, f.area());
    f.render_widget(Clear, area);

    let (title, message, target, consequence): (&str, &str, String, String) = match action {
        ConfirmAction::Quit => (
            "Confirm Quit",
            "Do you want to exit billing-lens?",
            "Target: application session".to_string(),
            "Consequence: closes TUI and returns to shell.".to_string(),
        ),
        ConfirmAction::AcknowledgeAnomaly { id, project } => (
            "Acknowledge Anomaly",
            "Mark this anomaly as read?",
            format!("Project: {project} (#{id})"),
            "Consequence: it leaves the unread list and billing data reloads.".to_string(),
        ),
    };

    let cancel_style = if state.confirm_selected == 0 {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let confirm_style = if state.confirm_selected == 1 {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Red)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };

    let content = Paragraph::new(vec![
        Line::from(message),
        Line::from(target),
        Line::from(Span::styled(consequence, Style::default().fg(Color::DarkGray))),
        Line::from(""),
        Line::from(vec![
            Span::styled("[Cancel (Esc)]", cancel_style),
            Span::raw("   "),
            Span::styled("[Confirm (Enter)]", confirm_style),
        ]),
        Line::from("Use Left/Right to choose"),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", title)),
    )
    .alignment(Alignment::Center);

    f.render_widget(content, area);
}

fn render_error(f: &mut ratatui::Frame, state: &AppState) {
    let area = centered_rect(60, 30, f.area());
    f.render_widget(Clear, area);
    let content = Paragraph::new(vec![
        Line::from(state.error_message.clone()),
        Line::from(""),
        Line::from("Press Enter or Esc"),
    ])
    .block(Block::default().borders(Borders::ALL).title(" Error "))
    .style(Style::default().fg(Color::Red))
    .wrap(Wrap { trim: true });
    f.render_widget(content, area);
}

fn render_info(f: &mut ratatui::Frame, state: &AppState) {
    let area = centered_rect(70, 30, f.area());
    f.render_widget(Clear, area);
    let content = Paragraph::new(vec![
        Line::from(state.info_message.clone()),
        Line::from(""),
        Line::from("Press Enter or Esc"),
    ])
    .block(Block::default().borders(Borders::ALL).title(" Details "))
    .style(Style::default().fg(Color::Yellow))
    .wrap(Wrap { trim: true });
    f.render_widget(content, area);
}
