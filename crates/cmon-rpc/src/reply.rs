//! Decoded controller replies.

use serde::Serialize;
use serde_json::{Map, Value};

const REQUEST_STATUS: &str = "requestStatus";
const ERROR_STRING: &str = "errorString";

/// `requestStatus` of a successful reply.
pub const STATUS_OK: &str = "ok";
/// `requestStatus` of a reply from a controller that is not the leader.
pub const STATUS_REDIRECT: &str = "Redirect";
/// `requestStatus` of a reply that demands authentication.
pub const STATUS_AUTH_REQUIRED: &str = "AuthRequired";

/// Address of one controller advertised in a redirect reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Host name, or the IP address when no host name was sent.
    pub host_name: String,
    /// IP address as reported by the controller.
    pub ip: Option<String>,
    /// RPC port.
    pub port: u16,
}

/// Leader and followers advertised by a redirect reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTargets {
    /// Current leader.
    pub leader: RedirectTarget,
    /// Followers, in the order the controller sent them.
    pub followers: Vec<RedirectTarget>,
}

/// One decoded JSON object received from the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RpcReply(Map<String, Value>);

impl RpcReply {
    /// Wraps a decoded JSON object.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// The reply fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the reply, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Looks up one field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `requestStatus` field.
    #[must_use]
    pub fn request_status(&self) -> Option<&str> {
        self.0.get(REQUEST_STATUS).and_then(Value::as_str)
    }

    /// Whether the request succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.request_status() == Some(STATUS_OK)
    }

    /// Whether the contacted controller is not the leader.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.request_status() == Some(STATUS_REDIRECT)
    }

    /// Whether the controller demands authentication.
    #[must_use]
    pub fn is_auth_required(&self) -> bool {
        self.request_status() == Some(STATUS_AUTH_REQUIRED)
    }

    /// The `errorString` field, falling back to the request status.
    #[must_use]
    pub fn error_string(&self) -> String {
        self.0
            .get(ERROR_STRING)
            .and_then(Value::as_str)
            .or_else(|| self.request_status())
            .unwrap_or_default()
            .to_owned()
    }

    /// Leader and followers of a redirect reply.
    ///
    /// Returns `None` when the reply carries no usable `leader` object.
    /// Followers without an address or port are skipped.
    #[must_use]
    pub fn redirect_targets(&self) -> Option<RedirectTargets> {
        let leader = self.0.get("leader").and_then(RedirectTarget::from_value)?;
        let followers = self
            .0
            .get("followers")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(RedirectTarget::from_value).collect())
            .unwrap_or_default();
        Some(RedirectTargets { leader, followers })
    }
}

impl From<Map<String, Value>> for RpcReply {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl RedirectTarget {
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_owned)
        };
        let ip = text("ip");
        let host_name = text("hostname").or_else(|| ip.clone())?;
        let port = match object.get("port")? {
            Value::Number(number) => number.as_u64().and_then(|port| u16::try_from(port).ok()),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }?;
        Some(Self {
            host_name,
            ip,
            port,
        })
    }
}
