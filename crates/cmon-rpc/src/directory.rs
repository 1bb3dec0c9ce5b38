//! Known controller endpoints and failover selection.
//!
//! Each configured controller address owns one failover record in the state
//! store under [`REDIRECTS_KEY`]. The record lists the leader and followers
//! from the latest redirect reply and is loaded lazily, at most once per
//! directory. Failure flags live only in memory for the current process.

use cmon_config::ControllerUrl;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::reply::{RedirectTarget, RedirectTargets};
use crate::state::{StateError, StateStore};

/// State key holding every failover record.
pub const REDIRECTS_KEY: &str = "redirects";

const CONTROLLER_CLASS: &str = "CmonController";
const DIRECTORY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::directory");

/// One node of a replicated controller set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    /// Host name or address.
    pub host_name: String,
    /// RPC port.
    pub port: u16,
    /// Set once a connect attempt to this endpoint failed in this process.
    pub last_connect_failed: bool,
}

impl ControllerEndpoint {
    /// Creates an endpoint that has not failed yet.
    #[must_use]
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
            last_connect_failed: false,
        }
    }

    fn matches(&self, host_name: &str, port: u16) -> bool {
        self.port == port && self.host_name.eq_ignore_ascii_case(host_name)
    }

    fn from_record(value: &Value) -> Option<Self> {
        RedirectTarget::from_value(value).map(|target| Self::new(target.host_name, target.port))
    }
}

/// Ordered endpoints known for one configured controller address.
#[derive(Debug)]
pub struct ControllerDirectory<S> {
    store: S,
    configured_url: String,
    configured: ControllerEndpoint,
    endpoints: Vec<ControllerEndpoint>,
    loaded: bool,
}

impl<S: StateStore> ControllerDirectory<S> {
    /// Creates a directory for `controller`, backed by `store`.
    pub fn new(store: S, controller: &ControllerUrl) -> Self {
        Self {
            store,
            configured_url: controller.configured().to_owned(),
            configured: ControllerEndpoint::new(controller.host(), controller.port()),
            endpoints: Vec::new(),
            loaded: false,
        }
    }

    /// Configured controller address, the key of the failover record.
    #[must_use]
    pub fn configured_url(&self) -> &str {
        &self.configured_url
    }

    /// The explicitly configured endpoint.
    #[must_use]
    pub fn configured(&self) -> &ControllerEndpoint {
        &self.configured
    }

    /// Endpoints from the failover record, in preference order.
    #[must_use]
    pub fn endpoints(&self) -> &[ControllerEndpoint] {
        &self.endpoints
    }

    /// The backing state store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the persisted failover record once.
    ///
    /// A missing record leaves the list empty. Later calls do nothing.
    pub fn load(&mut self) -> Result<(), StateError> {
        if self.loaded {
            return Ok(());
        }
        self.loaded = true;
        let redirects = self.store.get_state(REDIRECTS_KEY)?;
        let record = redirects
            .as_ref()
            .and_then(Value::as_array)
            .and_then(|records| {
                records
                    .iter()
                    .find(|record| record_url(record) == Some(self.configured_url.as_str()))
            });
        if let Some(controllers) = record
            .and_then(|record| record.get("controllers"))
            .and_then(Value::as_array)
        {
            self.endpoints = controllers
                .iter()
                .filter_map(ControllerEndpoint::from_record)
                .collect();
            info!(
                target: DIRECTORY_TARGET,
                url = %self.configured_url,
                endpoints = self.endpoints.len(),
                "loaded failover record"
            );
        }
        Ok(())
    }

    fn ensure_loaded(&mut self) {
        if let Err(error) = self.load() {
            warn!(
                target: DIRECTORY_TARGET,
                url = %self.configured_url,
                %error,
                "ignoring unreadable failover record"
            );
        }
    }

    /// First endpoint that has not failed in this process.
    ///
    /// With no failover record the configured endpoint is the only
    /// candidate. Returns `None` once every candidate has failed.
    pub fn next_untried(&mut self) -> Option<ControllerEndpoint> {
        self.ensure_loaded();
        if self.endpoints.is_empty() {
            return (!self.configured.last_connect_failed).then(|| self.configured.clone());
        }
        self.endpoints
            .iter()
            .find(|endpoint| !endpoint.last_connect_failed)
            .cloned()
    }

    /// Whether `host_name:port` has failed in this process.
    #[must_use]
    pub fn is_failed(&self, host_name: &str, port: u16) -> bool {
        self.endpoints
            .iter()
            .chain(std::iter::once(&self.configured))
            .any(|endpoint| endpoint.matches(host_name, port) && endpoint.last_connect_failed)
    }

    /// Flags `host_name:port` as failed.
    pub fn mark_failed(&mut self, host_name: &str, port: u16) {
        self.ensure_loaded();
        for endpoint in self
            .endpoints
            .iter_mut()
            .chain(std::iter::once(&mut self.configured))
        {
            if endpoint.matches(host_name, port) {
                endpoint.last_connect_failed = true;
            }
        }
        info!(
            target: DIRECTORY_TARGET,
            host = host_name,
            port,
            "marked controller endpoint failed"
        );
    }

    /// Clears every failure flag so the next walk dials each endpoint again.
    pub fn reset_failures(&mut self) {
        for endpoint in self
            .endpoints
            .iter_mut()
            .chain(std::iter::once(&mut self.configured))
        {
            endpoint.last_connect_failed = false;
        }
        info!(
            target: DIRECTORY_TARGET,
            url = %self.configured_url,
            "cleared controller failure flags"
        );
    }

    /// Replaces the endpoint list with the leader and followers of a
    /// redirect and persists the failover record.
    ///
    /// Failure flags already raised in this process are kept.
    pub fn remember_redirect(&mut self, targets: &RedirectTargets) -> Result<(), StateError> {
        self.ensure_loaded();
        let previous = std::mem::take(&mut self.endpoints);
        self.endpoints = std::iter::once(&targets.leader)
            .chain(&targets.followers)
            .map(|target| {
                let mut endpoint = ControllerEndpoint::new(target.host_name.clone(), target.port);
                endpoint.last_connect_failed = previous.iter().any(|known| {
                    known.last_connect_failed && known.matches(&target.host_name, target.port)
                });
                endpoint
            })
            .collect();
        info!(
            target: DIRECTORY_TARGET,
            url = %self.configured_url,
            leader = %targets.leader.host_name,
            followers = targets.followers.len(),
            "remembering redirect"
        );
        self.persist(targets)
    }

    fn persist(&mut self, targets: &RedirectTargets) -> Result<(), StateError> {
        let controllers: Vec<Value> = std::iter::once(&targets.leader)
            .chain(&targets.followers)
            .map(|target| {
                json!({
                    "hostname": target.host_name,
                    "ip": target.ip.clone().unwrap_or_else(|| target.host_name.clone()),
                    "port": target.port,
                    "class_name": CONTROLLER_CLASS,
                })
            })
            .collect();
        let mut record = Map::new();
        record.insert(String::from("url"), Value::String(self.configured_url.clone()));
        record.insert(String::from("controllers"), Value::Array(controllers));

        let mut records = match self.store.get_state(REDIRECTS_KEY)? {
            Some(Value::Array(records)) => records,
            _ => Vec::new(),
        };
        let existing = records
            .iter()
            .position(|entry| record_url(entry) == Some(self.configured_url.as_str()));
        match existing {
            Some(index) => {
                if let Some(slot) = records.get_mut(index) {
                    *slot = Value::Object(record);
                }
            }
            None => records.push(Value::Object(record)),
        }
        self.store.set_state(REDIRECTS_KEY, Value::Array(records))
    }
}

fn record_url(record: &Value) -> Option<&str> {
    record.get("url").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use rstest::{fixture, rstest};

    const URL: &str = "https://node-a:9501";

    fn target(host_name: &str, port: u16) -> RedirectTarget {
        RedirectTarget {
            host_name: host_name.to_owned(),
            ip: None,
            port,
        }
    }

    fn targets() -> RedirectTargets {
        RedirectTargets {
            leader: target("node-x", 9501),
            followers: vec![target("node-y", 9501), target("node-z", 9502)],
        }
    }

    #[fixture]
    fn store() -> MemoryStateStore {
        MemoryStateStore::new()
    }

    fn directory(store: &MemoryStateStore) -> ControllerDirectory<MemoryStateStore> {
        let url: ControllerUrl = URL.parse().expect("valid controller url");
        ControllerDirectory::new(store.clone(), &url)
    }

    fn names(directory: &ControllerDirectory<MemoryStateStore>) -> Vec<(String, u16)> {
        directory
            .endpoints()
            .iter()
            .map(|endpoint| (endpoint.host_name.clone(), endpoint.port))
            .collect()
    }

    #[rstest]
    fn configured_endpoint_is_the_only_candidate_without_record(store: MemoryStateStore) {
        let mut directory = directory(&store);
        let first = directory.next_untried().expect("configured endpoint");
        assert_eq!(first, ControllerEndpoint::new("node-a", 9501));

        directory.mark_failed("node-a", 9501);

        assert_eq!(directory.next_untried(), None);
        assert!(directory.is_failed("node-a", 9501));
    }

    #[rstest]
    fn redirect_round_trips_through_a_fresh_directory(store: MemoryStateStore) {
        directory(&store)
            .remember_redirect(&targets())
            .expect("persist redirect");

        let mut reloaded = directory(&store);
        reloaded.load().expect("load record");

        assert_eq!(
            names(&reloaded),
            [
                (String::from("node-x"), 9501),
                (String::from("node-y"), 9501),
                (String::from("node-z"), 9502),
            ]
        );
    }

    #[rstest]
    fn redirect_replaces_only_its_own_record(mut store: MemoryStateStore) {
        store
            .set_state(
                REDIRECTS_KEY,
                json!([
                    {"url": "https://other:9501", "controllers": [{"hostname": "o", "port": 1}]},
                    {"url": URL, "controllers": [{"hostname": "stale", "port": 2}]}
                ]),
            )
            .expect("seed state");

        directory(&store)
            .remember_redirect(&targets())
            .expect("persist redirect");

        let records = store
            .get_state(REDIRECTS_KEY)
            .expect("read")
            .expect("records present");
        let records = records.as_array().expect("array");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["url"], "https://other:9501");
        assert_eq!(records[1]["controllers"][0]["hostname"], "node-x");
        assert_eq!(records[1]["controllers"][0]["class_name"], "CmonController");
        assert_eq!(records[1]["controllers"][0]["ip"], "node-x");
    }

    #[rstest]
    fn exhausted_directory_returns_none(store: MemoryStateStore) {
        directory(&store)
            .remember_redirect(&targets())
            .expect("persist redirect");
        let mut directory = directory(&store);
        for (host, port) in [("node-x", 9501), ("node-y", 9501), ("node-z", 9502)] {
            directory.mark_failed(host, port);
        }
        assert_eq!(directory.next_untried(), None);
    }

    #[rstest]
    fn untried_endpoints_keep_redirect_order(store: MemoryStateStore) {
        directory(&store)
            .remember_redirect(&targets())
            .expect("persist redirect");
        let mut directory = directory(&store);

        directory.mark_failed("node-x", 9501);

        let next = directory.next_untried().expect("follower available");
        assert_eq!(next.host_name, "node-y");
    }

    #[rstest]
    fn reset_makes_every_endpoint_a_candidate_again(store: MemoryStateStore) {
        directory(&store)
            .remember_redirect(&targets())
            .expect("persist redirect");
        let mut directory = directory(&store);
        for (host, port) in [("node-x", 9501), ("node-y", 9501), ("node-z", 9502)] {
            directory.mark_failed(host, port);
        }

        directory.reset_failures();

        assert_eq!(
            directory.next_untried().map(|endpoint| endpoint.host_name),
            Some(String::from("node-x"))
        );
        assert!(!directory.is_failed("node-z", 9502));
    }

    #[rstest]
    fn failure_flags_survive_a_new_redirect(store: MemoryStateStore) {
        let mut directory = directory(&store);
        directory
            .remember_redirect(&targets())
            .expect("persist redirect");
        directory.mark_failed("node-y", 9501);

        directory
            .remember_redirect(&targets())
            .expect("persist redirect");

        assert!(directory.is_failed("node-y", 9501));
        assert!(!directory.is_failed("node-x", 9501));
    }
}
