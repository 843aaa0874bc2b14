//! Shared helpers for command handlers.

use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use serde::Serialize;

use homie_core::{ConnectionState, Device, DeviceState, EnvironmentManager};

use crate::error::CliError;

/// A device together with its ID, as rendered by `devices` and `device`.
#[derive(Debug, Serialize)]
pub struct DeviceEntry {
    pub id: String,
    #[serde(flatten)]
    pub device: Arc<Device>,
}

/// Wait until the broker session is up, or fail after `timeout`.
pub async fn wait_connected(
    manager: &EnvironmentManager,
    timeout: Duration,
) -> Result<(), CliError> {
    let mut changes = manager.connection_changes();
    let settled = tokio::time::timeout(
        timeout,
        changes.wait_for(|state| {
            matches!(
                state,
                ConnectionState::Connected | ConnectionState::Disconnected
            )
        }),
    )
    .await;

    let reason = match settled {
        Ok(Ok(state)) if *state == ConnectionState::Connected => return Ok(()),
        Ok(_) => "the session was closed".to_owned(),
        Err(_) => format!(
            "no connection within {}",
            humantime::format_duration(timeout)
        ),
    };
    Err(CliError::ConnectionFailed {
        url: manager.config().broker_url.to_string(),
        reason,
    })
}

/// Device state, colored by severity when `color` is set.
pub fn state_label(state: DeviceState, color: bool) -> String {
    let text = state.to_string();
    if !color {
        return text;
    }
    match state {
        DeviceState::Ready => text.green().to_string(),
        DeviceState::Init | DeviceState::Sleeping => text.yellow().to_string(),
        DeviceState::Disconnected | DeviceState::Lost => text.red().to_string(),
    }
}

/// "N properties in M nodes", or `-` before the description is in.
pub fn contents_summary(device: &Device) -> String {
    if !device.has_loaded_initial_description {
        return "-".into();
    }
    let properties = device.property_count();
    let nodes = device.node_count();
    format!(
        "{properties} {} in {nodes} {}",
        if properties == 1 { "property" } else { "properties" },
        if nodes == 1 { "node" } else { "nodes" },
    )
}
