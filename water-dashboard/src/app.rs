use crate::api::{
    fetch_dashboard, DashboardData, LoginRequest, LoginResponse, ReadingQuery, StatusEntry, TelemetryApi,
    WaterSeries,
};
use crate::config::Config;
use crate::error::ApiResult;
use crate::period::{self, TimeFilter};
use crate::session::{Session, SessionStore};
use crate::stats::Summary;
use chrono::{Local, NaiveDate};
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const LOGIN_FAILED: &str = "Login failed. Please try again.";
pub const LOGIN_UNREACHABLE: &str = "An error occurred. Please try again later.";
pub const FETCH_FAILED: &str = "Failed to fetch data";
pub const LOGOUT_FAILED: &str = "Could not clear the stored session";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Screen {
    Login,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    Normal,
    GotoDate,
    StatusDetails,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoginField {
    DeviceId,
    Pin,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    pub expires_at: Instant,
}

/// Completion of a request spawned by the app.
#[derive(Debug)]
pub enum AppEvent {
    LoginFinished {
        request: LoginRequest,
        result: ApiResult<LoginResponse>,
    },
    DashboardLoaded {
        generation: u64,
        result: ApiResult<DashboardData>,
    },
}

#[derive(Debug, Clone)]
pub struct LoginForm {
    pub device_id: String,
    pub pin: String,
    pub focus: LoginField,
    pub message: Option<String>,
    pub loading: bool,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            pin: String::new(),
            focus: LoginField::DeviceId,
            message: None,
            loading: false,
        }
    }
}

pub struct App<A: TelemetryApi> {
    pub screen: Screen,
    pub mode: Mode,
    pub login: LoginForm,
    pub session: Option<Session>,
    pub time_filter: TimeFilter,
    pub selected_date: NaiveDate,
    pub series: WaterSeries,
    pub statuses: Vec<StatusEntry>,
    pub summary: Summary,
    pub selected_status: usize,
    pub input_buffer: String,
    pub loading: bool,
    pub auto_refresh: bool,
    pub last_refresh: Instant,
    pub notification: Option<Notification>,
    generation: u64,
    api: A,
    store: SessionStore,
    config: Config,
    events_tx: UnboundedSender<AppEvent>,
    events_rx: UnboundedReceiver<AppEvent>,
}

impl<A: TelemetryApi> App<A> {
    pub fn new(api: A, store: SessionStore, config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let screen = match store.token() {
            Ok(Some(_)) => Screen::Dashboard,
            Ok(None) => Screen::Login,
            Err(e) => {
                log::error!("Failed to read stored session: {}", e);
                Screen::Login
            }
        };

        Self {
            screen,
            mode: Mode::Normal,
            login: LoginForm::default(),
            session: None,
            time_filter: TimeFilter::default(),
            selected_date: Local::now().date_naive(),
            series: WaterSeries::default(),
            statuses: Vec::new(),
            summary: Summary::default(),
            selected_status: 0,
            input_buffer: String::new(),
            loading: false,
            auto_refresh: config.auto_refresh,
            last_refresh: Instant::now(),
            notification: None,
            generation: 0,
            api,
            store,
            config,
            events_tx,
            events_rx,
        }
    }

    /// Loads the first screen: the dashboard fetches right away when a
    /// session is already stored.
    pub fn mount(&mut self) {
        if self.screen == Screen::Dashboard {
            self.refresh();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn date_label(&self) -> String {
        period::describe(self.time_filter, self.selected_date)
    }

    // ---- session guard ------------------------------------------------------

    /// Returns whether a session token is stored, redirecting to login when not.
    pub fn guard_session(&mut self) -> bool {
        match self.store.load() {
            Ok(Some(session)) => {
                self.api.set_token(Some(session.token.clone()));
                self.session = Some(session);
                true
            }
            Ok(None) => {
                log::info!("No stored session, redirecting to login");
                self.redirect_to_login();
                false
            }
            Err(e) => {
                log::error!("Failed to read stored session: {}", e);
                self.notify(Severity::Error, "Could not read the stored session");
                self.redirect_to_login();
                false
            }
        }
    }

    fn redirect_to_login(&mut self) {
        self.api.set_token(None);
        self.session = None;
        self.screen = Screen::Login;
        self.mode = Mode::Normal;
        self.input_buffer.clear();
        self.clear_dashboard();
    }

    fn clear_dashboard(&mut self) {
        // Invalidate anything still in flight.
        self.generation = self.generation.wrapping_add(1);
        self.loading = false;
        self.series = WaterSeries::default();
        self.statuses.clear();
        self.summary = Summary::default();
        self.selected_status = 0;
    }

    pub fn logout(&mut self) {
        let cleared = self.store.clear();

        self.redirect_to_login();
        self.login = LoginForm::default();
        match cleared {
            Ok(()) => {
                log::info!("Logged out");
                self.notify(Severity::Info, "Logged out");
            }
            Err(e) => {
                log::error!("Failed to clear stored session: {}", e);
                self.notify(Severity::Error, LOGOUT_FAILED);
            }
        }
    }

    // ---- login --------------------------------------------------------------

    pub fn handle_input_char(&mut self, c: char) {
        match self.screen {
            Screen::Login => match self.login.focus {
                LoginField::DeviceId => self.login.device_id.push(c),
                LoginField::Pin => self.login.pin.push(c),
            },
            Screen::Dashboard => self.input_buffer.push(c),
        }
    }

    pub fn handle_backspace(&mut self) {
        match self.screen {
            Screen::Login => match self.login.focus {
                LoginField::DeviceId => {
                    self.login.device_id.pop();
                }
                LoginField::Pin => {
                    self.login.pin.pop();
                }
            },
            Screen::Dashboard => {
                self.input_buffer.pop();
            }
        }
    }

    pub fn toggle_login_focus(&mut self) {
        self.login.focus = match self.login.focus {
            LoginField::DeviceId => LoginField::Pin,
            LoginField::Pin => LoginField::DeviceId,
        };
    }

    pub fn get_masked_pin(&self) -> String {
        "*".repeat(self.login.pin.chars().count())
    }

    /// Validates the form and spawns the login request.
    pub fn submit_login(&mut self) {
        if self.login.loading {
            return;
        }

        let device_id = self.login.device_id.trim().to_string();
        if device_id.is_empty() {
            self.login.message = Some("Device ID is required".to_string());
            self.login.focus = LoginField::DeviceId;
            return;
        }
        if self.login.pin.is_empty() {
            self.login.message = Some("Device PIN is required".to_string());
            self.login.focus = LoginField::Pin;
            return;
        }

        self.login.loading = true;
        self.login.message = None;

        let request = LoginRequest {
            device_id,
            initial_pin: self.login.pin.clone(),
        };
        log::info!("Logging in device {}", request.device_id);

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = api.login(request.clone()).await;
            let _ = tx.send(AppEvent::LoginFinished { request, result });
        });
    }

    fn finish_login(&mut self, request: LoginRequest, result: ApiResult<LoginResponse>) {
        self.login.loading = false;
        if self.screen != Screen::Login {
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log::error!("Login request failed: {}", e);
                self.login.message = Some(LOGIN_UNREACHABLE.to_string());
                self.notify(Severity::Error, LOGIN_UNREACHABLE);
                return;
            }
        };

        let token = match response.jwt.filter(|jwt| !jwt.is_empty()) {
            Some(token) => token,
            None => {
                let message = response.error.unwrap_or_else(|| LOGIN_FAILED.to_string());
                log::warn!("Login rejected for device {}: {}", request.device_id, message);
                self.login.message = Some(message.clone());
                self.notify(Severity::Error, message);
                return;
            }
        };

        let session = Session {
            token,
            device_id: request.device_id,
            initial_pin: request.initial_pin,
        };
        if let Err(e) = self.store.save(&session) {
            log::error!("Failed to persist session: {}", e);
            self.login.message = Some(LOGIN_UNREACHABLE.to_string());
            self.notify(Severity::Error, LOGIN_UNREACHABLE);
            return;
        }

        log::info!("Login successful for device {}", session.device_id);
        self.api.set_token(Some(session.token.clone()));
        self.session = Some(session);
        self.login = LoginForm::default();
        self.screen = Screen::Dashboard;
        self.mode = Mode::Normal;
        self.notify(Severity::Success, "Login successful");
        self.refresh();
    }

    // ---- dashboard ----------------------------------------------------------

    pub fn should_refresh(&self) -> bool {
        self.auto_refresh
            && self.screen == Screen::Dashboard
            && !self.loading
            && self.last_refresh.elapsed() >= self.config.refresh_interval
    }

    /// Spawns a fetch for the current filter and date. Only the response of the
    /// latest refresh is applied.
    pub fn refresh(&mut self) {
        if !self.guard_session() {
            return;
        }
        let Some(ref session) = self.session else {
            return;
        };

        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let query = ReadingQuery::new(&session.device_id, self.time_filter, self.selected_date);
        log::debug!(
            "Refreshing {} view for {} (request {})",
            query.time_filter.label(),
            query.target_date,
            generation
        );

        self.loading = true;
        self.last_refresh = Instant::now();

        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let with_status = self.config.fetch_status;
        tokio::spawn(async move {
            let result = fetch_dashboard(&api, query, with_status).await;
            let _ = tx.send(AppEvent::DashboardLoaded { generation, result });
        });
    }

    fn finish_refresh(&mut self, generation: u64, result: ApiResult<DashboardData>) {
        if generation != self.generation {
            log::warn!(
                "Discarding stale response for request {} (current {})",
                generation,
                self.generation
            );
            return;
        }

        self.loading = false;
        match result {
            Ok(data) => {
                log::info!(
                    "Loaded {} readings and {} status entries",
                    data.series.data.len(),
                    data.statuses.len()
                );
                self.summary = Summary::from_values(&data.series.data);
                self.series = data.series;
                self.statuses = data.statuses;
                if self.selected_status >= self.statuses.len() {
                    self.selected_status = self.statuses.len().saturating_sub(1);
                }
            }
            Err(e) => {
                log::error!("Error fetching data: {}", e);
                self.notify(Severity::Error, FETCH_FAILED);
            }
        }
    }

    pub fn set_time_filter(&mut self, filter: TimeFilter) {
        if self.time_filter != filter {
            self.time_filter = filter;
            self.refresh();
        }
    }

    pub fn next_time_filter(&mut self) {
        self.set_time_filter(self.time_filter.next());
    }

    pub fn previous_time_filter(&mut self) {
        self.set_time_filter(self.time_filter.previous());
    }

    pub fn step_period(&mut self, steps: i32) {
        self.set_date(period::step_date(self.time_filter, self.selected_date, steps));
    }

    pub fn jump_to_today(&mut self) {
        self.set_date(Local::now().date_naive());
    }

    pub fn set_date(&mut self, date: NaiveDate) {
        if self.selected_date != date {
            self.selected_date = date;
            self.refresh();
        }
    }

    pub fn toggle_auto_refresh(&mut self) {
        self.auto_refresh = !self.auto_refresh;
    }

    pub fn move_selection_up(&mut self) {
        self.selected_status = self.selected_status.saturating_sub(1);
    }

    pub fn move_selection_down(&mut self) {
        if self.selected_status + 1 < self.statuses.len() {
            self.selected_status += 1;
        }
    }

    pub fn get_selected_status(&self) -> Option<&StatusEntry> {
        self.statuses.get(self.selected_status)
    }

    pub fn enter_goto_mode(&mut self) {
        self.mode = Mode::GotoDate;
        self.input_buffer = period::target_date(self.selected_date);
    }

    pub fn enter_details_mode(&mut self) {
        if !self.statuses.is_empty() {
            self.mode = Mode::StatusDetails;
        }
    }

    pub fn exit_mode(&mut self) {
        self.mode = Mode::Normal;
        self.input_buffer.clear();
    }

    pub fn execute_input(&mut self) {
        if self.mode != Mode::GotoDate {
            return;
        }

        let input = std::mem::take(&mut self.input_buffer);
        self.mode = Mode::Normal;
        match period::parse_date_input(&input) {
            Some(date) => self.set_date(date),
            None => self.notify(Severity::Error, format!("Invalid date: {}", input.trim())),
        }
    }

    // ---- events & notifications ---------------------------------------------

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::LoginFinished { request, result } => self.finish_login(request, result),
            AppEvent::DashboardLoaded { generation, result } => self.finish_refresh(generation, result),
        }
    }

    /// Applies every request that has completed since the last call.
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    /// Waits for the next completed request. The app keeps a sender, so this
    /// only returns `None` if the channel is closed.
    pub async fn next_event(&mut self) -> Option<AppEvent> {
        self.events_rx.recv().await
    }

    pub fn notify(&mut self, severity: Severity, message: impl Into<String>) {
        self.notification = Some(Notification {
            message: message.into(),
            severity,
            expires_at: Instant::now() + self.config.notification_ttl,
        });
    }

    pub fn expire_notification(&mut self) {
        if self
            .notification
            .as_ref()
            .is_some_and(|n| Instant::now() >= n.expires_at)
        {
            self.notification = None;
        }
    }
}
