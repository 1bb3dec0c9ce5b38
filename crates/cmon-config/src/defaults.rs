//! Built-in default values applied when no configuration layer sets a field.

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default controller port for TLS connections.
pub const DEFAULT_TLS_PORT: u16 = 9501;

/// Default controller port for plain TCP connections.
pub const DEFAULT_PLAIN_PORT: u16 = 9500;

/// Controller address used when none is configured.
pub const DEFAULT_CONTROLLER: &str = "https://localhost:9501";

/// Seconds allowed for connecting and for each blocking read or write.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Consecutive reconnect attempts a subscription makes before giving up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Pause between subscription reconnect attempts, in milliseconds.
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Computes the default location of the client state file.
///
/// Falls back to a relative path when the home directory is unknown.
#[must_use]
pub fn default_state_file() -> Utf8PathBuf {
    let base = dirs::home_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."));
    base.join(".cmon").join("cmon.state")
}
