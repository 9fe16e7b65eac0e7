use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for the dashboard.
/// Loads settings from environment variables with sensible defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the telemetry API (default: "https://localhost:8443")
    pub api_url: String,
    /// SQLite file holding the persisted session (default: "water-session.db")
    pub session_db: String,
    /// File the log output is written to (default: "water-dashboard.log")
    pub log_file: String,
    /// Per-request timeout (default: 30s)
    pub request_timeout: Duration,
    /// Accept self-signed TLS certificates (default: false)
    pub accept_invalid_certs: bool,
    /// Also request the device status history on refresh (default: true)
    pub fetch_status: bool,
    /// Start with periodic refresh enabled (default: false)
    pub auto_refresh: bool,
    /// Period of the automatic refresh (default: 30s)
    pub refresh_interval: Duration,
    /// How long a notification stays on screen (default: 4s)
    pub notification_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "https://localhost:8443".to_string(),
            session_db: "water-session.db".to_string(),
            log_file: "water-dashboard.log".to_string(),
            request_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
            fetch_status: true,
            auto_refresh: false,
            refresh_interval: Duration::from_secs(30),
            notification_ttl: Duration::from_secs(4),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Arguments
    /// * `config_path` - Path to .env file to load (falls back to default .env)
    ///
    /// # Environment Variables
    /// * `WATER_API_URL` - Base URL of the telemetry API
    /// * `WATER_SESSION_DB` - Session database file
    /// * `WATER_LOG_FILE` - Log output file
    /// * `WATER_REQUEST_TIMEOUT_SECS` - Request timeout in seconds
    /// * `WATER_ACCEPT_INVALID_CERTS` - `true` to accept self-signed certificates
    /// * `WATER_FETCH_STATUS` - `false` to skip the status history request
    /// * `WATER_AUTO_REFRESH` - `true` to start with auto-refresh on
    /// * `WATER_REFRESH_SECS` - Auto-refresh period in seconds
    /// * `WATER_NOTIFICATION_SECS` - Notification lifetime in seconds
    pub fn load(config_path: &str) -> Result<Self> {
        if Path::new(config_path).exists() {
            dotenvy::from_filename(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path))?;
        } else {
            dotenv().ok();
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            api_url: lookup("WATER_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            session_db: lookup("WATER_SESSION_DB").unwrap_or(defaults.session_db),
            log_file: lookup("WATER_LOG_FILE").unwrap_or(defaults.log_file),
            request_timeout: parse_secs(&lookup, "WATER_REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.request_timeout),
            accept_invalid_certs: parse_var(&lookup, "WATER_ACCEPT_INVALID_CERTS")?
                .unwrap_or(defaults.accept_invalid_certs),
            fetch_status: parse_var(&lookup, "WATER_FETCH_STATUS")?.unwrap_or(defaults.fetch_status),
            auto_refresh: parse_var(&lookup, "WATER_AUTO_REFRESH")?.unwrap_or(defaults.auto_refresh),
            refresh_interval: parse_secs(&lookup, "WATER_REFRESH_SECS")?
                .unwrap_or(defaults.refresh_interval),
            notification_ttl: parse_secs(&lookup, "WATER_NOTIFICATION_SECS")?
                .unwrap_or(defaults.notification_ttl),
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("{} has an invalid value: {:?}", key, raw))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<F, u64>(lookup, key)?.map(Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api_url, "https://localhost:8443");
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("WATER_API_URL", "http://telemetry.local:8080/"),
            ("WATER_FETCH_STATUS", "false"),
            ("WATER_AUTO_REFRESH", "true"),
            ("WATER_REFRESH_SECS", "10"),
            ("WATER_ACCEPT_INVALID_CERTS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "http://telemetry.local:8080");
        assert!(!config.fetch_status);
        assert!(config.auto_refresh);
        assert!(config.accept_invalid_certs);
        assert_eq!(config.refresh_interval, Duration::from_secs(10));
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = Config::from_lookup(lookup_from(&[("WATER_REQUEST_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("WATER_REQUEST_TIMEOUT_SECS"));

        assert!(Config::from_lookup(lookup_from(&[("WATER_FETCH_STATUS", "yes")])).is_err());
    }
}
