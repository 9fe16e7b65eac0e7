use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    fs::OpenOptions,
    io,
    time::{Duration, Instant},
};
use water_dashboard::api::{ApiClient, TelemetryApi};
use water_dashboard::app::{App, Mode, Screen};
use water_dashboard::config::Config;
use water_dashboard::period::TimeFilter;
use water_dashboard::session::SessionStore;
use water_dashboard::ui;

/// Command-line arguments for the water usage dashboard
#[derive(Parser)]
#[command(name = "water-dashboard")]
#[command(about = "Terminal dashboard for water meter telemetry")]
struct Args {
    /// Path to configuration file (.env format)
    #[arg(short, long, default_value = "config.env")]
    config: String,
    /// Base URL of the telemetry API, overrides WATER_API_URL
    #[arg(long)]
    api_url: Option<String>,
    /// Session database file, overrides WATER_SESSION_DB
    #[arg(long)]
    session_db: Option<String>,
    /// Log output file, overrides WATER_LOG_FILE
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(api_url) = args.api_url {
        config.api_url = api_url.trim_end_matches('/').to_string();
    }
    if let Some(session_db) = args.session_db {
        config.session_db = session_db;
    }
    if let Some(log_file) = args.log_file {
        config.log_file = log_file;
    }

    // The terminal belongs to the UI, so log output goes to a file.
    let log_target = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("Failed to open log file {}", config.log_file))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_target)))
        .init();

    log::info!("Starting water dashboard against {}", config.api_url);

    let api = ApiClient::new(&config.api_url, config.request_timeout, config.accept_invalid_certs)
        .context("Failed to create HTTP client")?;
    let store = SessionStore::open(&config.session_db)?;

    let mut app = App::new(api, store, config);

    enable_raw_mode()?;
    let restore = RestoreGuard::new(restore_terminal);
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    app.mount();
    let res = run_app(&mut terminal, &mut app).await;

    drop(restore);
    terminal.show_cursor()?;

    if let Err(err) = res {
        log::error!("Terminal error: {}", err);
        println!("{:?}", err)
    }

    log::info!("Water dashboard stopped");
    Ok(())
}

/// Runs `restore` when dropped, so an early `?` still leaves the terminal usable.
struct RestoreGuard<F: FnMut()> {
    restore: F,
}

impl<F: FnMut()> RestoreGuard<F> {
    fn new(restore: F) -> Self {
        Self { restore }
    }
}

impl<F: FnMut()> Drop for RestoreGuard<F> {
    fn drop(&mut self) {
        (self.restore)();
    }
}

fn restore_terminal() {
    if let Err(e) = disable_raw_mode() {
        log::error!("Failed to disable raw mode: {}", e);
    }
    if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture) {
        log::error!("Failed to leave alternate screen: {}", e);
    }
}

/// Runs the main application event loop for the terminal UI.
///
/// The loop draws every 250ms tick, applies request results as they complete,
/// expires notifications and fires the optional auto-refresh.
///
/// # Keyboard Controls
///
/// **Login:**
/// - `Esc` / `Ctrl-C` - Quit application
/// - `Tab` / `Up` / `Down` - Switch between Device ID and PIN
/// - `Enter` - Log in
///
/// **Dashboard:**
/// - `q` - Quit application
/// - `Tab` / `Shift-Tab` - Cycle time range, `d` / `m` / `y` to pick one
/// - `Left` / `Right` - Previous/next day, month or year
/// - `t` - Jump to today
/// - `g` - Go to a typed date
/// - `Up` / `Down` - Navigate status history, `Enter` for details
/// - `r` - Manual refresh
/// - `a` - Toggle auto-refresh
/// - `x` - Log out
async fn run_app<B: Backend, A: TelemetryApi>(
    terminal: &mut Terminal<B>,
    app: &mut App<A>,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(250);

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        let timeout_duration = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout_duration)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_key(app, key) {
                    return Ok(());
                }
            }
        }

        app.drain_events();

        if last_tick.elapsed() >= tick_rate {
            app.expire_notification();
            if app.should_refresh() {
                app.refresh();
            }
            last_tick = Instant::now();
        }
    }
}

/// Applies one key press. Returns `true` when the user asked to quit.
fn handle_key<A: TelemetryApi>(app: &mut App<A>, key: KeyEvent) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match app.screen {
        Screen::Login => match key.code {
            KeyCode::Esc => return true,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => app.toggle_login_focus(),
            KeyCode::Enter => app.submit_login(),
            KeyCode::Char(c) => app.handle_input_char(c),
            KeyCode::Backspace => app.handle_backspace(),
            _ => {}
        },
        Screen::Dashboard => match app.mode {
            Mode::Normal => match key.code {
                KeyCode::Char('q') => return true,
                KeyCode::Tab => app.next_time_filter(),
                KeyCode::BackTab => app.previous_time_filter(),
                KeyCode::Char('d') => app.set_time_filter(TimeFilter::Day),
                KeyCode::Char('m') => app.set_time_filter(TimeFilter::Month),
                KeyCode::Char('y') => app.set_time_filter(TimeFilter::Year),
                KeyCode::Left => app.step_period(-1),
                KeyCode::Right => app.step_period(1),
                KeyCode::Char('t') => app.jump_to_today(),
                KeyCode::Char('g') => app.enter_goto_mode(),
                KeyCode::Up => app.move_selection_up(),
                KeyCode::Down => app.move_selection_down(),
                KeyCode::Enter => app.enter_details_mode(),
                KeyCode::Char('r') => app.refresh(),
                KeyCode::Char('a') => app.toggle_auto_refresh(),
                KeyCode::Char('x') => app.logout(),
                _ => {}
            },
            Mode::GotoDate => match key.code {
                KeyCode::Enter => app.execute_input(),
                KeyCode::Esc => app.exit_mode(),
                KeyCode::Char(c) => app.handle_input_char(c),
                KeyCode::Backspace => app.handle_backspace(),
                _ => {}
            },
            Mode::StatusDetails => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
                    app.exit_mode();
                }
            }
        },
    }

    false
}
