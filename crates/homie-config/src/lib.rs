//! Persistent broker environments for Homie tools.
//!
//! TOML profiles, a small CRUD store with change notifications, credential
//! resolution (env + keyring + plaintext), and translation to
//! `homie_core::EnvironmentConfig`. Core never sees these types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use homie_core::EnvironmentConfig;

/// Env var that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "HOMIE_BROWSER_CONFIG";

/// Env var consulted first when resolving a broker password.
pub const PASSWORD_ENV: &str = "HOMIE_PASSWORD";

const ENV_PREFIX: &str = "HOMIE_BROWSER_";
const KEYRING_SERVICE: &str = "homie-browser";
const BROKER_SCHEMES: &[&str] = &["mqtt", "mqtts", "tcp", "ssl", "ws", "wss"];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("environment '{id}' not found")]
    NotFound { id: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Environment used when none is named on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Environments keyed by their generated ID.
    #[serde(default)]
    pub environments: IndexMap<String, Profile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Grace period before a released device topic is unsubscribed.
    #[serde(default = "default_teardown_delay_ms")]
    pub teardown_delay_ms: u64,

    /// How long to wait for a device description.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            teardown_delay_ms: default_teardown_delay_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_teardown_delay_ms() -> u64 {
    1000
}
fn default_ready_timeout_secs() -> u64 {
    10
}
fn default_client_id_prefix() -> String {
    "homie-browser".into()
}

/// One broker connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Display name.
    pub name: String,

    /// Broker URL (e.g., "mqtt://broker.local:1883").
    pub broker_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext password. Prefer the keyring or `HOMIE_PASSWORD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Topic root devices publish under. Empty or absent means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homie_namespace: Option<String>,
}

impl Profile {
    pub fn new(name: impl Into<String>, broker_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            broker_url: broker_url.into(),
            username: None,
            password: None,
            homie_namespace: None,
        }
    }

    /// Check the profile and return its parsed broker URL.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }

        let url: Url = self
            .broker_url
            .parse()
            .map_err(|e| invalid("broker_url", format!("{}: {e}", self.broker_url)))?;
        if !BROKER_SCHEMES.contains(&url.scheme()) {
            return Err(invalid(
                "broker_url",
                format!(
                    "unsupported scheme '{}', expected one of {}",
                    url.scheme(),
                    BROKER_SCHEMES.join(", ")
                ),
            ));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("broker_url", "missing host"));
        }

        if let Some(ns) = &self.homie_namespace {
            if ns.contains(['/', '#']) {
                return Err(invalid(
                    "homie_namespace",
                    format!("'{ns}' must be a single topic level"),
                ));
            }
        }

        Ok(url)
    }

    /// Namespace, with blank values treated as absent.
    pub fn namespace(&self) -> Option<&str> {
        self.homie_namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `HOMIE_BROWSER_CONFIG`, then platform
/// conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("com", "homie-browser", "homie-browser")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        })
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("homie-browser");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config at `path`, layered under `HOMIE_BROWSER_*` env vars.
/// A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config"]));

    Ok(figment.extract()?)
}

/// Write `cfg` as pretty TOML, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile store ───────────────────────────────────────────────────

/// In-memory view of the config file with CRUD over environments.
///
/// Mutations are validated before they touch the store and bump a version
/// counter observable through [`subscribe`](Self::subscribe). Nothing is
/// written until [`save`](Self::save).
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    config: Config,
    version: watch::Sender<u64>,
}

impl ProfileStore {
    /// Load from the default [`config_path`].
    pub fn open() -> Result<Self, ConfigError> {
        Self::load(config_path())
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = load_config_from(&path)?;
        debug!(path = %path.display(), environments = config.environments.len(), "loaded profiles");
        Ok(Self::with_config(path, config))
    }

    pub fn with_config(path: impl Into<PathBuf>, config: Config) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            path: path.into(),
            config,
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn defaults(&self) -> &Defaults {
        &self.config.defaults
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &Profile)> {
        self.config
            .environments
            .iter()
            .map(|(id, profile)| (id.as_str(), profile))
    }

    pub fn len(&self) -> usize {
        self.config.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.config.environments.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.config.environments.get(id)
    }

    /// Look up by ID first, then by exact name.
    pub fn find(&self, id_or_name: &str) -> Option<(&str, &Profile)> {
        if let Some((id, profile)) = self.config.environments.get_key_value(id_or_name) {
            return Some((id.as_str(), profile));
        }
        self.list().find(|(_, p)| p.name == id_or_name)
    }

    /// The configured default environment, or the only one there is.
    pub fn default_environment(&self) -> Option<(&str, &Profile)> {
        if let Some(id) = &self.config.default_environment {
            return self.find(id);
        }
        match self.len() {
            1 => self.list().next(),
            _ => None,
        }
    }

    pub fn set_default(&mut self, id: &str) -> Result<(), ConfigError> {
        if !self.config.environments.contains_key(id) {
            return Err(ConfigError::NotFound { id: id.into() });
        }
        self.config.default_environment = Some(id.into());
        self.bump();
        Ok(())
    }

    /// Insert a new environment under a fresh UUID and return the ID.
    pub fn add(&mut self, profile: Profile) -> Result<String, ConfigError> {
        profile.validate()?;
        let id = uuid::Uuid::new_v4().to_string();
        debug!(environment = %id, name = %profile.name, "adding environment");
        self.config.environments.insert(id.clone(), profile);
        self.bump();
        Ok(id)
    }

    /// Replace the environment stored under `id`.
    pub fn set(&mut self, id: &str, profile: Profile) -> Result<(), ConfigError> {
        profile.validate()?;
        let slot = self
            .config
            .environments
            .get_mut(id)
            .ok_or_else(|| ConfigError::NotFound { id: id.into() })?;
        if *slot != profile {
            *slot = profile;
            self.bump();
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Profile, ConfigError> {
        let removed = self
            .config
            .environments
            .shift_remove(id)
            .ok_or_else(|| ConfigError::NotFound { id: id.into() })?;
        if self.config.default_environment.as_deref() == Some(id) {
            self.config.default_environment = None;
        }
        debug!(environment = %id, "removed environment");
        self.bump();
        Ok(removed)
    }

    /// Observe mutations. The value is a counter that grows on each change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        save_config_to(&self.config, &self.path)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

// ── Credentials ─────────────────────────────────────────────────────

fn keyring_entry(id: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(KEYRING_SERVICE, &format!("{id}/password"))?)
}

/// Resolve the broker password: `HOMIE_PASSWORD`, the system keyring,
/// then the plaintext value in the profile.
pub fn resolve_password(id: &str, profile: &Profile) -> Option<SecretString> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Some(SecretString::from(pw));
    }

    if let Ok(entry) = keyring_entry(id) {
        if let Ok(pw) = entry.get_password() {
            return Some(SecretString::from(pw));
        }
    }

    profile.password.clone().map(SecretString::from)
}

pub fn store_password(id: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(id)?.set_password(password)?;
    Ok(())
}

/// Remove a stored keyring password. Missing entries are not an error.
pub fn delete_password(id: &str) -> Result<(), ConfigError> {
    match keyring_entry(id)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Build the runtime config for a profile with an already-resolved password.
pub fn profile_to_environment_config(
    id: &str,
    profile: &Profile,
    defaults: &Defaults,
    password: Option<SecretString>,
) -> Result<EnvironmentConfig, ConfigError> {
    let url = profile.validate()?;

    let mut config = EnvironmentConfig::new(id, url);
    config.name.clone_from(&profile.name);
    config.username.clone_from(&profile.username);
    config.password = password;
    config.homie_namespace = profile.namespace().map(str::to_owned);
    config.teardown_delay = Duration::from_millis(defaults.teardown_delay_ms);
    config.client_id_prefix.clone_from(&defaults.client_id_prefix);
    Ok(config)
}

/// Build the runtime config, resolving the password when a username is set.
pub fn resolve_environment(
    id: &str,
    profile: &Profile,
    defaults: &Defaults,
) -> Result<EnvironmentConfig, ConfigError> {
    let password = profile
        .username
        .as_ref()
        .and_then(|_| resolve_password(id, profile));
    profile_to_environment_config(id, profile, defaults, password)
}
