//! Transport channel to a single controller endpoint.
//!
//! A [`Connector`] dials an endpoint and returns a [`Transport`], either a
//! plain TCP stream or a TLS session over one. [`Channel`] owns at most one
//! transport at a time and layers the interrupt and timeout handling the
//! client relies on.

mod channel;
mod connector;
mod errors;
mod tls;

use std::io::{Read, Write};
use std::time::Duration;

pub use self::channel::{Channel, ChannelState};
pub use self::connector::{Connector, TcpConnector};
#[cfg(test)]
pub(crate) use self::connector::MockConnector;
pub use self::errors::TransportError;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Socket options applied when dialling an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Connect timeout, also applied to every blocking read and write.
    pub timeout: Duration,
    /// Wrap the socket in TLS.
    pub use_tls: bool,
    /// Verify the peer certificate when `use_tls` is set.
    pub verify_tls: bool,
}

/// A connected byte stream to a controller.
pub trait Transport: Read + Write + Send {
    /// Whether the stream is TLS protected.
    fn is_tls(&self) -> bool;

    /// Tears the stream down, ignoring failures.
    fn shutdown(&mut self);
}
