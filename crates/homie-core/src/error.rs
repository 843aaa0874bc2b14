// ── Core error types ──
//
// Only the manager, transport and registry return errors. Decoding and
// folding report problems as `HomieEvent::Error` values instead.

use thiserror::Error;

use crate::model::ValueError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to broker at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },

    #[error("Unsupported broker URL scheme '{scheme}' (expected mqtt, mqtts, tcp, ssl, ws or wss)")]
    UnsupportedScheme { scheme: String },

    #[error("MQTT request failed: {message}")]
    Transport { message: String },

    #[error("Environment manager has been disposed")]
    Disposed,

    #[error("Timed out after {timeout_ms}ms waiting for device {device_id}")]
    Timeout { device_id: String, timeout_ms: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Environment not found: {id}")]
    EnvironmentNotFound { id: String },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Property not found: {path}")]
    PropertyNotFound { path: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Property {path} is not settable")]
    NotSettable { path: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValueError),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<rumqttc::ClientError> for CoreError {
    fn from(err: rumqttc::ClientError) -> Self {
        CoreError::Transport {
            message: err.to_string(),
        }
    }
}
