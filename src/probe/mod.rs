//! Gateway Probe Clients
//!
//! Two stateless request/response wrappers over the gateway under test:
//!
//! - [`ControlPlane`]: read-only listing of declarative configuration
//!   (plugins, consumers) from the admin API.
//! - [`DataPlane`]: live requests against application routes, optionally
//!   carrying a consumer API key.
//!
//! Neither retries. A transport failure or timeout surfaces as
//! [`ProbeError`](crate::error::ProbeError) and the calling check becomes
//! ERROR. Status codes from the data plane (200/401/429) are observations,
//! not errors.

mod control_plane;
mod data_plane;

pub use control_plane::KonnectClient;
pub use data_plane::{HttpDataPlane, API_KEY_HEADER};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Credential;
use crate::error::{ProbeError, ProbeResult};

/// Response headers a gateway uses to forward the resolved consumer
pub const IDENTITY_HEADERS: [&str; 3] = [
    "x-consumer-id",
    "x-consumer-username",
    "x-consumer-custom-id",
];

/// Read-only access to the gateway's declarative configuration
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// All plugins configured on the control plane
    async fn plugins(&self) -> ProbeResult<Vec<Plugin>>;

    /// All registered consumers
    async fn consumers(&self) -> ProbeResult<Vec<Consumer>>;

    /// Plugins with the given name
    async fn plugins_named(&self, name: &str) -> ProbeResult<Vec<Plugin>> {
        Ok(self
            .plugins()
            .await?
            .into_iter()
            .filter(|p| p.name == name)
            .collect())
    }
}

/// Live traffic against the gateway's data plane
#[async_trait]
pub trait DataPlane: Send + Sync {
    /// Issue a GET to `path`, sending `api_key` in the key header when given
    async fn get(&self, path: &str, api_key: Option<&Credential>) -> ProbeResult<ProbeResponse>;
}

/// Stands in for a client that could not be built. Every call fails with
/// the construction error, so each check that needs it records ERROR and the
/// rest of the run still executes.
#[derive(Debug, Clone)]
pub struct UnavailableProbe {
    reason: String,
}

impl UnavailableProbe {
    /// Wrap the construction failure
    pub fn new(err: &ProbeError) -> Self {
        let reason = match err {
            ProbeError::Client(message) => message.clone(),
            other => other.to_string(),
        };
        Self { reason }
    }

    fn fail<T>(&self) -> ProbeResult<T> {
        Err(ProbeError::Client(self.reason.clone()))
    }
}

#[async_trait]
impl ControlPlane for UnavailableProbe {
    async fn plugins(&self) -> ProbeResult<Vec<Plugin>> {
        self.fail()
    }

    async fn consumers(&self) -> ProbeResult<Vec<Consumer>> {
        self.fail()
    }
}

#[async_trait]
impl DataPlane for UnavailableProbe {
    async fn get(&self, _path: &str, _api_key: Option<&Credential>) -> ProbeResult<ProbeResponse> {
        self.fail()
    }
}

/// Reference to another gateway entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity id
    pub id: String,
}

/// A plugin instance as listed by the admin API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    /// Plugin instance id
    pub id: String,
    /// Plugin name, e.g. "key-auth"
    pub name: String,
    /// Whether the plugin is active
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Plugin configuration
    #[serde(default)]
    pub config: serde_json::Value,
    /// Consumer scope
    #[serde(default)]
    pub consumer: Option<EntityRef>,
    /// Service scope
    #[serde(default)]
    pub service: Option<EntityRef>,
    /// Route scope
    #[serde(default)]
    pub route: Option<EntityRef>,
}

fn default_enabled() -> bool {
    true
}

impl Plugin {
    /// Consumer id this plugin is scoped to, if any
    pub fn consumer_id(&self) -> Option<&str> {
        self.consumer.as_ref().map(|c| c.id.as_str())
    }

    /// Where the plugin applies
    pub fn scope(&self) -> PluginScope {
        match (&self.consumer, &self.route, &self.service) {
            (Some(_), _, _) => PluginScope::Consumer,
            (None, Some(_), _) => PluginScope::Route,
            (None, None, Some(_)) => PluginScope::Service,
            (None, None, None) => PluginScope::Global,
        }
    }

    /// Summary suitable for evidence; configuration values are limited to
    /// the rate-limit settings so secrets in other plugin configs never leak
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "enabled": self.enabled,
            "scope": self.scope().as_str(),
            "consumer_id": self.consumer_id(),
            "service_id": self.service.as_ref().map(|s| &s.id),
            "route_id": self.route.as_ref().map(|r| &r.id),
            "config": {
                "second": self.config.get("second"),
                "minute": self.config.get("minute"),
                "hour": self.config.get("hour"),
                "policy": self.config.get("policy"),
            },
        })
    }
}

/// Plugin attachment level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginScope {
    /// Applies to all traffic
    Global,
    /// Applies to one service
    Service,
    /// Applies to one route
    Route,
    /// Applies to one consumer
    Consumer,
}

impl PluginScope {
    /// Scope name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Service => "service",
            Self::Route => "route",
            Self::Consumer => "consumer",
        }
    }
}

/// A registered consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    /// Consumer id
    pub id: String,
    /// Username
    #[serde(default)]
    pub username: Option<String>,
    /// Custom id
    #[serde(default)]
    pub custom_id: Option<String>,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl Consumer {
    /// Name used when reporting this consumer: username, falling back to id
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.id)
    }
}

/// What the data plane said about a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers, lowercased names
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, when the body was JSON
    pub body: Option<serde_json::Value>,
    /// Leading part of the raw body
    pub body_snippet: String,
}

/// Consumer identity the gateway attached to a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerIdentity {
    /// Consumer id
    pub id: Option<String>,
    /// Consumer username
    pub username: Option<String>,
    /// Consumer custom id
    pub custom_id: Option<String>,
}

impl ConsumerIdentity {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.username.is_none() && self.custom_id.is_none()
    }

    /// Fill fields this identity lacks from `other`
    fn or(self, other: Self) -> Self {
        Self {
            id: self.id.or(other.id),
            username: self.username.or(other.username),
            custom_id: self.custom_id.or(other.custom_id),
        }
    }
}

impl ProbeResponse {
    /// Consumer identity echoed back by the gateway.
    ///
    /// Gateways split the identity across the `x-consumer-*` headers and the
    /// `consumer` object of a JSON body; each field is taken from the header
    /// when present, otherwise from the body.
    pub fn consumer_identity(&self) -> Option<ConsumerIdentity> {
        let header = |name: &str| {
            self.headers
                .get(name)
                .filter(|v| !v.trim().is_empty())
                .cloned()
        };
        let from_headers = ConsumerIdentity {
            id: header("x-consumer-id"),
            username: header("x-consumer-username"),
            custom_id: header("x-consumer-custom-id"),
        };

        let consumer = self
            .body
            .as_ref()
            .and_then(|b| b.get("consumer"))
            .and_then(|c| c.as_object());
        let field = |name: &str| {
            consumer
                .and_then(|c| c.get(name))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let from_body = ConsumerIdentity {
            id: field("id"),
            username: field("username"),
            custom_id: field("custom_id"),
        };

        let merged = from_headers.or(from_body);
        (!merged.is_empty()).then_some(merged)
    }

    /// Status and headers, for evidence artifacts
    pub fn artifact(&self) -> serde_json::Value {
        serde_json::json!({
            "status_code": self.status,
            "headers": self.headers,
            "body": self.body_snippet,
        })
    }
}

/// Longest body prefix kept on a [`ProbeResponse`]
pub const BODY_SNIPPET_LIMIT: usize = 512;

pub(crate) fn snippet(body: &str) -> String {
    match body.char_indices().nth(BODY_SNIPPET_LIMIT) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

pub(crate) fn http_client(
    timeout: Duration,
    default_headers: reqwest::header::HeaderMap,
) -> ProbeResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .user_agent(concat!("gatecheck/", env!("CARGO_PKG_VERSION")))
        .default_headers(default_headers)
        .build()
        .map_err(|e| ProbeError::Client(e.to_string()))
}
