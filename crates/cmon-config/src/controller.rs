use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::defaults::{DEFAULT_PLAIN_PORT, DEFAULT_TLS_PORT};

/// Parsed form of the configured controller address.
///
/// The original text is retained because it keys the persisted failover
/// record: two spellings of the same address are distinct records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerUrl {
    configured: String,
    host: String,
    port: u16,
    use_tls: bool,
    base_path: String,
}

impl ControllerUrl {
    /// Builds a controller address from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool) -> Self {
        let host = host.into();
        let scheme = if use_tls { "https" } else { "http" };
        Self {
            configured: format!("{scheme}://{host}:{port}"),
            host,
            port,
            use_tls,
            base_path: String::new(),
        }
    }

    /// The address exactly as it was configured.
    #[must_use]
    pub fn configured(&self) -> &str {
        &self.configured
    }

    /// Host name or IP literal of the controller.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port of the controller.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Whether connections negotiate TLS.
    #[must_use]
    pub const fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Path prefix prepended to every request URI; empty when the address
    /// has no path.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

impl fmt::Display for ControllerUrl {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.configured)
    }
}

impl FromStr for ControllerUrl {
    type Err = ControllerUrlError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        let use_tls = match url.scheme() {
            "https" | "tls" => true,
            "http" | "tcp" => false,
            other => return Err(ControllerUrlError::UnsupportedScheme(other.to_owned())),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ControllerUrlError::MissingHost(input.to_owned()))?;
        // IPv6 literals come back bracketed; the resolver wants them bare.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let default_port = if use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        };
        let port = url.port().unwrap_or(default_port);
        let base_path = url.path().trim_end_matches('/').to_owned();

        Ok(Self {
            configured: input.to_owned(),
            host: host.to_owned(),
            port,
            use_tls,
            base_path,
        })
    }
}

/// Errors encountered while parsing a [`ControllerUrl`] from text.
#[derive(Debug, Error)]
pub enum ControllerUrlError {
    /// Scheme was not recognised.
    #[error("unsupported controller scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host name was missing.
    #[error("missing controller host in '{0}'")]
    MissingHost(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
