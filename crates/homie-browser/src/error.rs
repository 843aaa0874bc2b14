//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use homie_config::ConfigError;
use homie_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to broker at {url}")]
    #[diagnostic(
        code(homie::connection_failed),
        help(
            "{reason}\n\
             Check that the broker is running and reachable, and that the\n\
             credentials of the environment are right."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Environments ─────────────────────────────────────────────────
    #[error("No broker environment configured")]
    #[diagnostic(
        code(homie::no_environment),
        help(
            "Add one with: homie-browser env add <name> <broker-url>\n\
             Or pass a broker directly: --broker mqtt://host:1883\n\
             Config file: {path}"
        )
    )]
    NoEnvironment { path: String },

    #[error("Several environments are configured and none is the default")]
    #[diagnostic(
        code(homie::environment_required),
        help(
            "Pick one with --env, or run: homie-browser env default <ENV>\n\
             Available: {available}"
        )
    )]
    EnvironmentRequired { available: String },

    #[error("Environment '{name}' not found")]
    #[diagnostic(
        code(homie::environment_not_found),
        help("Available: {available}\nRun: homie-browser env list")
    )]
    EnvironmentNotFound { name: String, available: String },

    // ── Devices ──────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(homie::not_found),
        help("Run: homie-browser {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Property {path} is not settable")]
    #[diagnostic(
        code(homie::not_settable),
        help("The device description marks this property read-only.")
    )]
    NotSettable { path: String },

    #[error("Timed out after {timeout_ms}ms waiting for device '{device_id}'")]
    #[diagnostic(
        code(homie::timeout),
        help(
            "The device has not published a $description.\n\
             Increase the wait with --timeout, or check: homie-browser devices"
        )
    )]
    Timeout { device_id: String, timeout_ms: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(homie::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(homie::config))]
    ConfigLoad(Box<figment::Error>),

    #[error("Configuration error: {message}")]
    #[diagnostic(code(homie::config))]
    Config { message: String },

    #[error("Keyring error: {message}")]
    #[diagnostic(
        code(homie::keyring),
        help("Use --password to keep the password in the config file instead.")
    )]
    Keyring { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } | Self::EnvironmentNotFound { .. } => exit_code::NOT_FOUND,
            Self::NotSettable { .. } => exit_code::PERMISSION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::EnvironmentRequired { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NotFound { id } => CliError::EnvironmentNotFound {
                name: id,
                available: String::new(),
            },
            ConfigError::Figment(err) => CliError::ConfigLoad(err),
            ConfigError::Keyring(err) => CliError::Keyring {
                message: err.to_string(),
            },
            ConfigError::Io(err) => CliError::Io(err),
            ConfigError::Serialization(err) => CliError::Config {
                message: err.to_string(),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::InvalidBrokerUrl { url, reason } => CliError::Validation {
                field: "broker".into(),
                reason: format!("{url}: {reason}"),
            },

            CoreError::UnsupportedScheme { scheme } => CliError::Validation {
                field: "broker".into(),
                reason: format!("unsupported scheme '{scheme}'"),
            },

            CoreError::Transport { message } => CliError::ConnectionFailed {
                url: "(broker)".into(),
                reason: message,
            },

            CoreError::Disposed => CliError::ConnectionFailed {
                url: "(closed)".into(),
                reason: "The broker session was already closed".into(),
            },

            CoreError::Timeout {
                device_id,
                timeout_ms,
            } => CliError::Timeout {
                device_id,
                timeout_ms,
            },

            CoreError::EnvironmentNotFound { id } => CliError::EnvironmentNotFound {
                name: id,
                available: String::new(),
            },

            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
                list_command: "devices".into(),
            },

            CoreError::PropertyNotFound { path } => {
                let device = path.split('/').next().unwrap_or_default().to_owned();
                CliError::NotFound {
                    resource_type: "property".into(),
                    identifier: path,
                    list_command: format!("device {device}"),
                }
            }

            CoreError::NotSettable { path } => CliError::NotSettable { path },

            CoreError::ValidationFailed(err) => CliError::Validation {
                field: "value".into(),
                reason: err.to_string(),
            },

            CoreError::Config { message } => CliError::Config { message },
        }
    }
}
