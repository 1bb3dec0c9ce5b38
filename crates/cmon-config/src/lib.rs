//! Shared configuration for the controller client.
//!
//! Values are layered by `ortho_config`: built-in defaults, then the
//! configuration file, then `CMON_*` environment variables, then command-line
//! flags. Every field is optional so that each layer only overrides what it
//! names; the accessors apply the defaults from [`defaults`].

mod controller;
pub mod defaults;
mod logging;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use controller::{ControllerUrl, ControllerUrlError};
pub use defaults::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_CONTROLLER, DEFAULT_LOG_FILTER,
    DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BACKOFF_MS, default_log_filter,
    default_log_format, default_state_file,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Client configuration shared by the library and the `cmonctl` binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CMON")]
pub struct Config {
    /// Controller address, for example `https://cmon.example:9501`.
    pub controller: Option<String>,
    /// Seconds allowed for connecting and for each blocking read or write.
    pub connect_timeout: Option<u64>,
    /// Verify the controller certificate against the web PKI roots.
    pub verify_tls: Option<bool>,
    /// File holding persisted client state such as failover records.
    pub state_file: Option<Utf8PathBuf>,
    /// User name for password authentication.
    pub user: Option<String>,
    /// Password for password authentication.
    pub password: Option<String>,
    /// Consecutive reconnect attempts a subscription makes before giving up.
    pub reconnect_attempts: Option<u32>,
    /// Pause between subscription reconnect attempts, in milliseconds.
    pub reconnect_backoff_ms: Option<u64>,
    /// Log filter expression in `tracing_subscriber::EnvFilter` syntax.
    pub log_filter: Option<String>,
    /// Log output format.
    pub log_format: Option<LogFormat>,
}

impl Config {
    /// The configured controller address text.
    #[must_use]
    pub fn controller(&self) -> &str {
        self.controller.as_deref().unwrap_or(DEFAULT_CONTROLLER)
    }

    /// Parses the configured controller address.
    pub fn controller_url(&self) -> Result<ControllerUrl, ControllerUrlError> {
        self.controller().parse()
    }

    /// Timeout applied to connect, read, and write.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    /// Whether the controller certificate is verified.
    #[must_use]
    pub fn verify_tls(&self) -> bool {
        self.verify_tls.unwrap_or(false)
    }

    /// Location of the persisted client state.
    #[must_use]
    pub fn state_file(&self) -> Utf8PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_file)
    }

    /// User name and password, when both are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.user.as_deref().zip(self.password.as_deref())
    }

    /// Reconnect budget for subscriptions.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.unwrap_or(DEFAULT_RECONNECT_ATTEMPTS)
    }

    /// Pause between subscription reconnect attempts.
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(
            self.reconnect_backoff_ms
                .unwrap_or(DEFAULT_RECONNECT_BACKOFF_MS),
        )
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_applies_defaults() {
        let config = Config::default();
        assert_eq!(config.controller(), DEFAULT_CONTROLLER);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(!config.verify_tls());
        assert_eq!(config.reconnect_attempts(), 5);
        assert_eq!(config.reconnect_backoff(), Duration::from_millis(1_000));
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert!(config.state_file().ends_with(".cmon/cmon.state"));
    }

    #[test]
    fn credentials_need_both_halves() {
        let mut config = Config {
            user: Some(String::from("admin")),
            ..Config::default()
        };
        assert_eq!(config.credentials(), None);
        config.password = Some(String::from("secret"));
        assert_eq!(config.credentials(), Some(("admin", "secret")));
    }

    #[test]
    fn controller_url_reflects_override() {
        let config = Config {
            controller: Some(String::from("http://10.1.1.1:9500/base")),
            ..Config::default()
        };
        let controller = config.controller_url().expect("controller should parse");
        assert!(!controller.use_tls());
        assert_eq!(controller.base_path(), "/base");
    }
}
