//! Long-lived event subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{CLIENT_TARGET, RpcClient};
use crate::errors::{ErrorKind, RpcError};
use crate::reply::{RedirectTargets, RpcReply};
use crate::state::StateStore;
use crate::stream::{Record, RecordStream};
use crate::transport::{Connector, TransportError};

/// Authentication challenges answered in a row before a subscription fails.
pub const MAX_AUTH_ATTEMPTS: u32 = 3;

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// URI and payload that open a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    /// Request URI, relative to the controller base path.
    pub uri: String,
    /// Request payload.
    pub payload: Value,
}

impl SubscriptionRequest {
    /// Creates a subscription request.
    #[must_use]
    pub fn new(uri: impl Into<String>, payload: Value) -> Self {
        Self {
            uri: uri.into(),
            payload,
        }
    }

    /// The cluster event subscription.
    #[must_use]
    pub fn events() -> Self {
        Self::new("/v2/clusters/", json!({"operation": "subscribeEvents"}))
    }
}

/// Why a subscription returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The caller raised the cancellation flag.
    Cancelled,
}

enum StreamOutcome {
    Cancelled,
    Closed,
    Redirected(RedirectTargets),
}

impl<S: StateStore, C: Connector> RpcClient<S, C> {
    /// Streams records from `request` until `cancel` is raised.
    ///
    /// Events go to `on_event`, every other record to `on_reply`. Dropped
    /// connections are re-established up to the configured number of
    /// consecutive attempts, pausing for the configured backoff in between;
    /// any received event resets the count. Every attempt walks the
    /// directory afresh, so endpoints that refused earlier are dialled
    /// again once no untried endpoint is left. A read timeout only re-checks
    /// `cancel`. Authentication challenges are answered at most
    /// [`MAX_AUTH_ATTEMPTS`] times in a row.
    pub fn subscribe<E, R>(
        &mut self,
        request: &SubscriptionRequest,
        cancel: &AtomicBool,
        mut on_event: E,
        mut on_reply: R,
    ) -> Result<SubscriptionEnd, RpcError>
    where
        E: FnMut(Map<String, Value>),
        R: FnMut(&RpcReply),
    {
        let result = self.subscribe_inner(request, cancel, &mut on_event, &mut on_reply);
        self.record(result)
    }

    fn subscribe_inner(
        &mut self,
        request: &SubscriptionRequest,
        cancel: &AtomicBool,
        on_event: &mut dyn FnMut(Map<String, Value>),
        on_reply: &mut dyn FnMut(&RpcReply),
    ) -> Result<SubscriptionEnd, RpcError> {
        let body = serde_json::to_vec(&request.payload).map_err(RpcError::SerialiseRequest)?;
        let mut failures = 0_u32;
        let mut auth_attempts = 0_u32;
        let mut redirects = 0_u32;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Ok(SubscriptionEnd::Cancelled);
            }
            let mut progressed = false;
            let outcome =
                self.run_stream(&request.uri, &body, cancel, on_event, on_reply, &mut progressed);
            if progressed {
                failures = 0;
                auth_attempts = 0;
                redirects = 0;
            }
            let failure = match outcome {
                Ok(StreamOutcome::Cancelled) => return Ok(SubscriptionEnd::Cancelled),
                Ok(StreamOutcome::Redirected(targets)) => {
                    redirects += 1;
                    if redirects > 1 {
                        return Err(RpcError::Redirect {
                            leader: format!("{}:{}", targets.leader.host_name, targets.leader.port),
                        });
                    }
                    self.follow_redirect(&targets);
                    continue;
                }
                Ok(StreamOutcome::Closed) => String::from("controller closed the subscription"),
                Err(error) if error.kind() == ErrorKind::AuthRequired => {
                    auth_attempts += 1;
                    if self.options.credentials.is_none() || auth_attempts > MAX_AUTH_ATTEMPTS {
                        return Err(error);
                    }
                    if let Some(handle) = self.handle.as_mut() {
                        handle.session.set_authenticated(false);
                    }
                    continue;
                }
                Err(error) if is_reconnectable(&error) => error.to_string(),
                Err(error) => return Err(error),
            };

            failures += 1;
            if failures > self.options.reconnect_attempts {
                return Err(RpcError::ReconnectsExhausted {
                    attempts: self.options.reconnect_attempts,
                    last: failure,
                });
            }
            warn!(
                target: CLIENT_TARGET,
                attempt = failures,
                limit = self.options.reconnect_attempts,
                reason = %failure,
                "subscription interrupted, reconnecting"
            );
            if !pause(self.options.reconnect_backoff, cancel) {
                return Ok(SubscriptionEnd::Cancelled);
            }
            if self.directory.next_untried().is_none() {
                self.directory.reset_failures();
            }
        }
    }

    fn run_stream(
        &mut self,
        uri: &str,
        body: &[u8],
        cancel: &AtomicBool,
        on_event: &mut dyn FnMut(Map<String, Value>),
        on_reply: &mut dyn FnMut(&RpcReply),
        progressed: &mut bool,
    ) -> Result<StreamOutcome, RpcError> {
        if self.options.credentials.is_some() && !self.is_authenticated() {
            self.authenticate_inner(true)?;
        }
        self.connect_inner(true)?;
        let frame = self.frame(uri, body)?;
        self.send(&frame)?;
        info!(target: CLIENT_TARGET, uri, "subscription started");

        let outcome = self.pump(cancel, on_event, on_reply, progressed);
        self.channel.close();
        outcome
    }

    fn pump(
        &mut self,
        cancel: &AtomicBool,
        on_event: &mut dyn FnMut(Map<String, Value>),
        on_reply: &mut dyn FnMut(&RpcReply),
        progressed: &mut bool,
    ) -> Result<StreamOutcome, RpcError> {
        let mut stream = RecordStream::new();
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Ok(StreamOutcome::Cancelled);
            }
            match stream.fill_from(&mut self.channel) {
                Ok(0) => return Ok(StreamOutcome::Closed),
                Ok(_) => {}
                Err(RpcError::Transport(TransportError::ReadTimeout { .. })) => continue,
                Err(error) => return Err(error),
            }

            let handle = self.handle.as_mut().ok_or(TransportError::NotConnected)?;
            while let Some(record) = stream.next_record(&mut handle.session)? {
                match record {
                    Record::Event(fields) => {
                        *progressed = true;
                        on_event(fields);
                    }
                    Record::Reply(reply) => {
                        debug!(
                            target: CLIENT_TARGET,
                            status = reply.request_status().unwrap_or_default(),
                            "subscription reply"
                        );
                        on_reply(&reply);
                        if reply.is_redirect()
                            && let Some(targets) = reply.redirect_targets()
                        {
                            return Ok(StreamOutcome::Redirected(targets));
                        }
                        if reply.is_auth_required() {
                            return Err(RpcError::AuthRequired {
                                message: reply.error_string(),
                            });
                        }
                    }
                }
                if cancel.load(Ordering::SeqCst) {
                    return Ok(StreamOutcome::Cancelled);
                }
            }
        }
    }
}

fn is_reconnectable(error: &RpcError) -> bool {
    matches!(
        error,
        RpcError::Transport(_) | RpcError::EndpointsExhausted { .. }
    )
}

/// Sleeps for `duration` in short slices. Returns `false` when cancelled.
fn pause(duration: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}
