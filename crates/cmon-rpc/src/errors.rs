//! Error types surfaced by the RPC client.

use thiserror::Error;

use crate::buffer::BufferError;
use crate::state::StateError;
use crate::transport::TransportError;

/// Coarse classification of every client failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// DNS resolution produced no address.
    HostNotFound,
    /// The connect attempt timed out.
    ConnectTimeout,
    /// The connect attempt was refused or failed for another reason.
    ConnectRefusedOrOther,
    /// The TLS handshake failed.
    TlsHandshakeFailed,
    /// Sending the request failed.
    WriteFailed,
    /// Receiving the reply failed.
    ReadFailed,
    /// The reply could not be decoded.
    MalformedReply,
    /// The controller demands authentication.
    AuthRequired,
    /// The contacted controller is not the leader.
    Redirect,
    /// Persisted client state could not be read or written.
    State,
    /// The caller supplied an unusable request.
    Usage,
}

/// Errors returned by [`crate::RpcClient`].
#[derive(Debug, Error)]
pub enum RpcError {
    /// Socket or TLS failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The receive buffer could not grow.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// Persisted state could not be accessed.
    #[error(transparent)]
    State(#[from] StateError),
    /// The request payload could not be serialised.
    #[error("failed to serialise request payload: {0}")]
    SerialiseRequest(#[source] serde_json::Error),
    /// The reply was not a JSON object behind a valid header block.
    #[error("malformed reply from controller: {reason}")]
    MalformedReply {
        /// Description of what was wrong.
        reason: String,
    },
    /// The controller requires authentication that could not be provided.
    #[error("authentication required: {message}")]
    AuthRequired {
        /// Message reported by the controller.
        message: String,
    },
    /// The controller redirected the request again after one redirect.
    #[error("controller is not the leader, redirected to {leader}")]
    Redirect {
        /// Leader advertised by the latest redirect.
        leader: String,
    },
    /// Every known controller endpoint failed to connect.
    #[error("no reachable controller for {url}: {reason}")]
    EndpointsExhausted {
        /// Configured controller address.
        url: String,
        /// Failure seen on the last endpoint tried.
        reason: String,
        /// Classification of that failure.
        last_kind: ErrorKind,
    },
    /// A subscription gave up after repeated reconnect failures.
    #[error("subscription gave up after {attempts} reconnect attempts: {last}")]
    ReconnectsExhausted {
        /// Consecutive attempts made.
        attempts: u32,
        /// Failure seen on the final attempt.
        last: String,
    },
}

impl RpcError {
    /// Maps the error onto the coarse [`ErrorKind`] taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(error) => error.kind(),
            Self::Buffer(_) => ErrorKind::ReadFailed,
            Self::State(_) => ErrorKind::State,
            Self::SerialiseRequest(_) => ErrorKind::Usage,
            Self::MalformedReply { .. } => ErrorKind::MalformedReply,
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::Redirect { .. } => ErrorKind::Redirect,
            Self::EndpointsExhausted { last_kind, .. } => *last_kind,
            Self::ReconnectsExhausted { .. } => ErrorKind::ConnectRefusedOrOther,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedReply {
            reason: reason.into(),
        }
    }
}
