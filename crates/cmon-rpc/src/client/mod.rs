//! Public RPC client.
//!
//! [`RpcClient`] owns one channel, one connection handle, and the controller
//! directory. Every request carries `Connection: close`, so the socket is
//! re-dialled per call while the handle (endpoint, cookies, authentication)
//! survives until the client moves to another endpoint or is closed.
//!
//! The client is synchronous and not internally synchronised. Callers that
//! share one client between threads must serialise access themselves, for
//! example behind a `Mutex`.

mod subscribe;

use std::fmt;
use std::time::Duration;

use cmon_config::{Config, ControllerUrl, ControllerUrlError};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::buffer::ReceiveBuffer;
use crate::directory::{ControllerDirectory, ControllerEndpoint};
use crate::errors::{ErrorKind, RpcError};
use crate::framing::{READ_CHUNK, RequestFrame, build_request, parse_response, response_complete};
use crate::reply::{RedirectTargets, RpcReply};
use crate::session::Session;
use crate::state::StateStore;
use crate::transport::{
    Channel, Connector, TcpConnector, TransportError, TransportSettings,
};

pub use self::subscribe::{MAX_AUTH_ATTEMPTS, SubscriptionEnd, SubscriptionRequest};

/// URI of the password authentication call.
pub const AUTH_URI: &str = "/v2/auth";

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// User name and password for password authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings for an [`RpcClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Configured controller address.
    pub controller: ControllerUrl,
    /// Connect, read, and write timeout.
    pub timeout: Duration,
    /// Verify the controller certificate.
    pub verify_tls: bool,
    /// Credentials used when the controller demands authentication.
    pub credentials: Option<Credentials>,
    /// Consecutive reconnect attempts a subscription makes.
    pub reconnect_attempts: u32,
    /// Pause between subscription reconnect attempts.
    pub reconnect_backoff: Duration,
}

impl ClientOptions {
    /// Options for `controller` with the built-in defaults.
    #[must_use]
    pub fn new(controller: ControllerUrl) -> Self {
        let defaults = Config::default();
        Self {
            controller,
            timeout: defaults.connect_timeout(),
            verify_tls: defaults.verify_tls(),
            credentials: None,
            reconnect_attempts: defaults.reconnect_attempts(),
            reconnect_backoff: defaults.reconnect_backoff(),
        }
    }

    /// Options resolved from layered configuration.
    pub fn from_config(config: &Config) -> Result<Self, ControllerUrlError> {
        Ok(Self {
            controller: config.controller_url()?,
            timeout: config.connect_timeout(),
            verify_tls: config.verify_tls(),
            credentials: config.credentials().map(|(user, password)| Credentials {
                user: user.to_owned(),
                password: password.to_owned(),
            }),
            reconnect_attempts: config.reconnect_attempts(),
            reconnect_backoff: config.reconnect_backoff(),
        })
    }

    fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            timeout: self.timeout,
            use_tls: self.controller.use_tls(),
            verify_tls: self.verify_tls,
        }
    }
}

/// Endpoint and session state of the current connection.
#[derive(Debug)]
struct ConnectionHandle {
    host_name: String,
    port: u16,
    session: Session,
}

impl ConnectionHandle {
    fn new(host_name: &str, port: u16) -> Self {
        Self {
            host_name: host_name.to_owned(),
            port,
            session: Session::new(),
        }
    }

    fn is_at(&self, host_name: &str, port: u16) -> bool {
        self.port == port && self.host_name == host_name
    }
}

/// Synchronous client for the controller RPC interface.
pub struct RpcClient<S, C = TcpConnector> {
    options: ClientOptions,
    connector: C,
    directory: ControllerDirectory<S>,
    channel: Channel,
    handle: Option<ConnectionHandle>,
    last_error: Option<String>,
}

impl<S, C> fmt::Debug for RpcClient<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("options", &self.options)
            .field("channel", &self.channel)
            .field("handle", &self.handle)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl<S: StateStore> RpcClient<S> {
    /// Creates a client that dials real sockets.
    pub fn new(options: ClientOptions, store: S) -> Self {
        Self::with_connector(options, store, TcpConnector)
    }
}

impl<S: StateStore, C: Connector> RpcClient<S, C> {
    /// Creates a client that opens transports through `connector`.
    pub fn with_connector(options: ClientOptions, store: S, connector: C) -> Self {
        let directory = ControllerDirectory::new(store, &options.controller);
        Self {
            options,
            connector,
            directory,
            channel: Channel::new(),
            handle: None,
            last_error: None,
        }
    }

    /// Connection settings.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Known controller endpoints.
    #[must_use]
    pub fn directory(&self) -> &ControllerDirectory<S> {
        &self.directory
    }

    /// Session state of the current connection handle.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.handle.as_ref().map(|handle| &handle.session)
    }

    /// Endpoint of the current connection handle as `(host, port)`.
    #[must_use]
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        self.handle
            .as_ref()
            .map(|handle| (handle.host_name.as_str(), handle.port))
    }

    /// Whether a socket is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Human-readable text of the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Opens a socket to the controller.
    ///
    /// With `use_redirect` set, unreachable endpoints are marked failed and
    /// the next untried endpoint from the directory is dialled until one
    /// answers or none remain. Without it only the current endpoint is tried.
    pub fn connect(&mut self, use_redirect: bool) -> Result<(), RpcError> {
        let result = self.connect_inner(use_redirect);
        self.record(result)
    }

    /// Drops the connection handle and connects afresh.
    pub fn reconnect(&mut self, use_redirect: bool) -> Result<(), RpcError> {
        self.close();
        self.connect(use_redirect)
    }

    /// Closes the socket and discards the connection handle.
    pub fn close(&mut self) {
        self.channel.close();
        self.handle = None;
    }

    /// Sends `payload` to `uri` and returns the decoded reply.
    ///
    /// A redirect reply is followed once when `allow_redirect` is set; a
    /// second redirect in a row fails with [`RpcError::Redirect`]. An
    /// authentication challenge is answered once when credentials are
    /// configured.
    pub fn call(
        &mut self,
        uri: &str,
        payload: &Value,
        allow_redirect: bool,
    ) -> Result<RpcReply, RpcError> {
        let result = self.call_inner(uri, payload, allow_redirect);
        self.record(result)
    }

    /// Authenticates the current connection handle with the configured
    /// credentials, following a redirect of the login call.
    pub fn authenticate(&mut self) -> Result<(), RpcError> {
        let result = self.authenticate_inner(true);
        self.record(result)
    }

    fn record<T>(&mut self, result: Result<T, RpcError>) -> Result<T, RpcError> {
        if let Err(error) = &result {
            warn!(
                target: CLIENT_TARGET,
                kind = ?error.kind(),
                %error,
                "controller request failed"
            );
            self.last_error = Some(error.to_string());
        }
        result
    }

    fn is_authenticated(&self) -> bool {
        self.session().is_some_and(Session::is_authenticated)
    }

    fn preferred_endpoint(&self) -> (String, u16) {
        match &self.handle {
            Some(handle) => (handle.host_name.clone(), handle.port),
            None => {
                let configured = self.directory.configured();
                (configured.host_name.clone(), configured.port)
            }
        }
    }

    fn connect_inner(&mut self, use_redirect: bool) -> Result<(), RpcError> {
        if self.channel.is_connected() {
            return Ok(());
        }
        let (host_name, port) = self.preferred_endpoint();
        if !use_redirect {
            return self.dial(&host_name, port).map_err(RpcError::from);
        }

        let mut candidate = if self.directory.is_failed(&host_name, port) {
            self.directory.next_untried()
        } else {
            Some(ControllerEndpoint::new(host_name, port))
        };
        let mut last_failure: Option<TransportError> = None;
        while let Some(endpoint) = candidate {
            match self.dial(&endpoint.host_name, endpoint.port) {
                Ok(()) => return Ok(()),
                Err(error) if error.is_failover_candidate() => {
                    warn!(
                        target: CLIENT_TARGET,
                        host = %endpoint.host_name,
                        port = endpoint.port,
                        %error,
                        "controller unreachable, trying next endpoint"
                    );
                    self.last_error = Some(error.to_string());
                    self.directory.mark_failed(&endpoint.host_name, endpoint.port);
                    last_failure = Some(error);
                }
                Err(error) => return Err(error.into()),
            }
            candidate = self.directory.next_untried();
        }

        Err(RpcError::EndpointsExhausted {
            url: self.directory.configured_url().to_owned(),
            reason: last_failure
                .as_ref()
                .map_or_else(|| String::from("every known endpoint has failed"), ToString::to_string),
            last_kind: last_failure
                .as_ref()
                .map_or(ErrorKind::ConnectRefusedOrOther, TransportError::kind),
        })
    }

    fn dial(&mut self, host_name: &str, port: u16) -> Result<(), TransportError> {
        info!(target: CLIENT_TARGET, host = host_name, port, "connecting to controller");
        let settings = self.options.transport_settings();
        self.channel
            .connect(&self.connector, host_name, port, &settings)?;
        if !self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.is_at(host_name, port))
        {
            self.handle = Some(ConnectionHandle::new(host_name, port));
        }
        Ok(())
    }

    fn request_uri(&self, uri: &str) -> String {
        let base = self.options.controller.base_path();
        if uri.starts_with('/') {
            format!("{base}{uri}")
        } else {
            format!("{base}/{uri}")
        }
    }

    fn frame(&self, uri: &str, body: &[u8]) -> Result<RequestFrame, RpcError> {
        let handle = self.handle.as_ref().ok_or(TransportError::NotConnected)?;
        Ok(build_request(
            &self.request_uri(uri),
            body,
            &handle.host_name,
            handle.port,
            &handle.session,
        ))
    }

    fn send(&mut self, frame: &RequestFrame) -> Result<(), RpcError> {
        debug!(
            target: CLIENT_TARGET,
            head = frame.head.len(),
            body = frame.body.len(),
            "sending request"
        );
        let written = self
            .channel
            .write_all(&frame.head)
            .and_then(|()| self.channel.write_all(&frame.body));
        if let Err(error) = written {
            self.channel.close();
            return Err(error.into());
        }
        Ok(())
    }

    fn call_inner(
        &mut self,
        uri: &str,
        payload: &Value,
        allow_redirect: bool,
    ) -> Result<RpcReply, RpcError> {
        let body = serde_json::to_vec(payload).map_err(RpcError::SerialiseRequest)?;
        let mut redirected = false;
        let mut reauthenticated = false;
        loop {
            let reply = self.exchange(uri, &body, allow_redirect)?;
            if reply.is_redirect() && allow_redirect {
                let targets = reply
                    .redirect_targets()
                    .ok_or_else(|| RpcError::malformed("redirect reply names no leader"))?;
                if redirected {
                    return Err(RpcError::Redirect {
                        leader: format!("{}:{}", targets.leader.host_name, targets.leader.port),
                    });
                }
                redirected = true;
                self.follow_redirect(&targets);
                continue;
            }
            if reply.is_auth_required() && uri != AUTH_URI {
                if self.options.credentials.is_none() || reauthenticated {
                    return Err(RpcError::AuthRequired {
                        message: reply.error_string(),
                    });
                }
                reauthenticated = true;
                self.authenticate_inner(allow_redirect)?;
                continue;
            }
            return Ok(reply);
        }
    }

    fn exchange(&mut self, uri: &str, body: &[u8], use_redirect: bool) -> Result<RpcReply, RpcError> {
        self.connect_inner(use_redirect)?;
        let frame = self.frame(uri, body)?;
        self.send(&frame)?;
        let received = self.receive();
        self.channel.close();
        let raw = received?;
        let handle = self.handle.as_mut().ok_or(TransportError::NotConnected)?;
        let reply = parse_response(raw.as_bytes(), &mut handle.session)?;
        debug!(
            target: CLIENT_TARGET,
            uri,
            status = reply.request_status().unwrap_or_default(),
            "received reply"
        );
        Ok(reply)
    }

    fn receive(&mut self) -> Result<ReceiveBuffer, RpcError> {
        let mut raw = ReceiveBuffer::new();
        raw.ensure_capacity(READ_CHUNK)?;
        let mut chunk = [0_u8; READ_CHUNK];
        while !response_complete(raw.as_bytes()) {
            let count = self.channel.read(&mut chunk)?;
            if count == 0 {
                break;
            }
            raw.append(chunk.get(..count).unwrap_or_default())?;
        }
        Ok(raw)
    }

    fn follow_redirect(&mut self, targets: &RedirectTargets) {
        if let Err(error) = self.directory.remember_redirect(targets) {
            warn!(
                target: CLIENT_TARGET,
                %error,
                "could not persist failover record, following redirect anyway"
            );
        }
        self.channel.close();
        let leader = &targets.leader;
        info!(
            target: CLIENT_TARGET,
            host = %leader.host_name,
            port = leader.port,
            "following redirect to leader"
        );
        if !self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.is_at(&leader.host_name, leader.port))
        {
            self.handle = Some(ConnectionHandle::new(&leader.host_name, leader.port));
        }
    }

    fn authenticate_inner(&mut self, allow_redirect: bool) -> Result<(), RpcError> {
        let Some(credentials) = self.options.credentials.clone() else {
            return Err(RpcError::AuthRequired {
                message: String::from("no credentials configured"),
            });
        };
        let payload = json!({
            "operation": "authenticateWithPassword",
            "user_name": credentials.user,
            "password": credentials.password,
        });
        let reply = self.call_inner(AUTH_URI, &payload, allow_redirect)?;
        if !reply.is_ok() {
            return Err(RpcError::AuthRequired {
                message: reply.error_string(),
            });
        }
        if let Some(handle) = self.handle.as_mut() {
            handle.session.set_authenticated(true);
        }
        info!(target: CLIENT_TARGET, user = %credentials.user, "authenticated");
        Ok(())
    }
}
