//! Client transport for the cmon controller RPC interface.
//!
//! The controller speaks JSON over an HTTP/1.0-style exchange on plain TCP or
//! TLS. It may run as a leader with followers, answering requests sent to a
//! follower with a redirect that names the current leader. This crate covers
//! the layer between a caller holding a JSON payload and the socket:
//!
//! - [`buffer`]: growable receive buffer with record boundary detection.
//! - [`transport`]: one socket, plain or TLS, with timeouts and interrupt
//!   handling.
//! - [`directory`]: known controller endpoints, failover selection, and the
//!   persisted failover record.
//! - [`session`]: cookies and server identity of a connection.
//! - [`framing`]: request rendering and reply parsing.
//! - [`stream`]: record framing for event subscriptions.
//! - [`RpcClient`]: the façade tying these together for one-shot calls and
//!   subscriptions.
//!
//! State that must outlive the process goes through a [`StateStore`];
//! [`FileStateStore`] keeps it in a JSON file.

pub mod buffer;
mod client;
pub mod directory;
mod errors;
pub mod framing;
mod reply;
pub mod session;
mod state;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod tests;

pub use client::{
    AUTH_URI, ClientOptions, Credentials, MAX_AUTH_ATTEMPTS, RpcClient, SubscriptionEnd,
    SubscriptionRequest,
};
pub use directory::{ControllerDirectory, ControllerEndpoint, REDIRECTS_KEY};
pub use errors::{ErrorKind, RpcError};
pub use reply::{
    RedirectTarget, RedirectTargets, RpcReply, STATUS_AUTH_REQUIRED, STATUS_OK, STATUS_REDIRECT,
};
pub use state::{FileStateStore, MemoryStateStore, StateError, StateStore};
pub use stream::{EVENT_DISCRIMINATOR, Record};
pub use transport::{Connector, TcpConnector, TransportError};
