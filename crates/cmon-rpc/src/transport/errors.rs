//! Error types for transport channel operations.

use std::io;

use thiserror::Error;

use crate::errors::ErrorKind;

/// Errors raised while connecting to, reading from, or writing to a controller.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Name resolution yielded no usable address.
    #[error("failed to resolve {endpoint}: {reason}")]
    HostNotFound {
        /// Endpoint being resolved, as `host:port`.
        endpoint: String,
        /// Resolver message.
        reason: String,
    },
    /// The connect attempt did not complete within the timeout.
    #[error("timed out connecting to {endpoint}")]
    ConnectTimeout {
        /// Endpoint being connected.
        endpoint: String,
    },
    /// The connect attempt was refused or failed otherwise.
    #[error("failed to connect to {endpoint}: {source}")]
    ConnectRefused {
        /// Endpoint being connected.
        endpoint: String,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },
    /// The TLS client configuration could not be built.
    #[error("failed to prepare TLS client: {source}")]
    TlsConfig {
        /// Underlying rustls failure.
        #[source]
        source: rustls::Error,
    },
    /// The TLS handshake failed.
    #[error("TLS handshake with {endpoint} failed: {reason}")]
    TlsHandshake {
        /// Endpoint being connected.
        endpoint: String,
        /// Handshake failure description.
        reason: String,
    },
    /// Writing to the socket failed.
    #[error("failed to write to {endpoint}: {source}")]
    Write {
        /// Connected endpoint.
        endpoint: String,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },
    /// Reading from the socket failed.
    #[error("failed to read from {endpoint}: {source}")]
    Read {
        /// Connected endpoint.
        endpoint: String,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },
    /// No bytes arrived within the read timeout.
    #[error("timed out reading from {endpoint}")]
    ReadTimeout {
        /// Connected endpoint.
        endpoint: String,
    },
    /// The channel has no open socket.
    #[error("channel is not connected")]
    NotConnected,
}

impl TransportError {
    /// Maps the error onto the coarse [`ErrorKind`] taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HostNotFound { .. } => ErrorKind::HostNotFound,
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::ConnectRefused { .. } | Self::NotConnected => ErrorKind::ConnectRefusedOrOther,
            Self::TlsConfig { .. } | Self::TlsHandshake { .. } => ErrorKind::TlsHandshakeFailed,
            Self::Write { .. } => ErrorKind::WriteFailed,
            Self::Read { .. } | Self::ReadTimeout { .. } => ErrorKind::ReadFailed,
        }
    }

    /// Whether another controller endpoint may succeed where this one failed.
    #[must_use]
    pub fn is_failover_candidate(&self) -> bool {
        matches!(
            self,
            Self::HostNotFound { .. }
                | Self::ConnectTimeout { .. }
                | Self::ConnectRefused { .. }
                | Self::TlsHandshake { .. }
        )
    }
}
