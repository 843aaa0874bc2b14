// ── Runtime environment configuration ──
//
// Describes *how* to reach one broker. Carries credentials and tuning but
// never touches disk. The CLI builds an `EnvironmentConfig` from a stored
// profile and hands it to the registry.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::model::PropertyPath;

/// MQTT wildcard used when an environment has no namespace of its own.
pub const WILDCARD_NAMESPACE: &str = "+";

/// Root used for outbound `set` topics when the namespace is a wildcard.
pub const DEFAULT_BROKER_ROOT: &str = "homie";

/// Homie protocol major version segment.
pub const PROTOCOL_VERSION: &str = "5";

/// Exponential backoff between reconnection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Configuration for connecting to a single broker environment.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Stable environment identifier (registry key).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Broker URL: `mqtt://`, `mqtts://`, `tcp://`, `ssl://`, `ws://` or `wss://`.
    pub broker_url: Url,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Topic root devices publish under. `None` or empty subscribes to all.
    pub homie_namespace: Option<String>,
    /// Grace period between the last release of a device and its
    /// broker unsubscribe.
    pub teardown_delay: Duration,
    /// Prefix of the generated MQTT client id.
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub reconnect: ReconnectConfig,
}

impl EnvironmentConfig {
    pub fn new(id: impl Into<String>, broker_url: Url) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            broker_url,
            username: None,
            password: None,
            homie_namespace: None,
            teardown_delay: Duration::from_millis(1000),
            client_id_prefix: "homie-browser".into(),
            keep_alive: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Namespace used in subscription filters, `+` when unset.
    pub fn namespace(&self) -> &str {
        match self.homie_namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => WILDCARD_NAMESPACE,
        }
    }

    /// Concrete topic root for publishing. A wildcard can't be published
    /// to, so it falls back to `homie`.
    pub fn broker_root(&self) -> &str {
        match self.namespace() {
            WILDCARD_NAMESPACE => DEFAULT_BROKER_ROOT,
            ns => ns,
        }
    }

    /// `<ns>/5/+/$state`
    pub fn state_filter(&self) -> String {
        format!("{}/{PROTOCOL_VERSION}/+/$state", self.namespace())
    }

    /// `<ns>/5/<device>/#`
    pub fn device_filter(&self, device_id: &str) -> String {
        format!("{}/{PROTOCOL_VERSION}/{device_id}/#", self.namespace())
    }

    /// `<root>/5/<device>/<node>/<property>/set`
    pub fn set_topic(&self, path: &PropertyPath) -> String {
        format!("{}/{PROTOCOL_VERSION}/{path}/set", self.broker_root())
    }

    /// A fresh client id: `<prefix>-<uuid>`.
    pub fn client_id(&self) -> String {
        format!("{}-{}", self.client_id_prefix, uuid::Uuid::new_v4().simple())
    }
}
