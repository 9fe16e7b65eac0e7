//! Terminal dashboard for a networked water meter: device login, a session
//! kept in local storage, and time-filtered consumption charts fetched from
//! the telemetry API.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod period;
pub mod session;
pub mod stats;
pub mod ui;
