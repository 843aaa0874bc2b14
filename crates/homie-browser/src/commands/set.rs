//! `set <device>/<node>/<property> <value>`: validate, then publish.

use homie_core::{CoreError, EnvironmentManager};

use crate::cli::SetArgs;
use crate::config::Settings;
use crate::error::CliError;

use super::util;

pub async fn handle(
    manager: &EnvironmentManager,
    args: SetArgs,
    settings: &Settings,
) -> Result<(), CliError> {
    let SetArgs { path, value, force } = args;
    util::wait_connected(manager, settings.timeout).await?;

    if !force {
        match manager.ready_timeout(&path.device_id, settings.timeout).await {
            Ok(()) => {
                if manager.snapshot().property(&path).is_none() {
                    return Err(CoreError::PropertyNotFound {
                        path: path.to_string(),
                    }
                    .into());
                }
                manager.validate_set(&path, &value)?;
            }
            Err(CoreError::Timeout { .. }) => {
                tracing::warn!(
                    device_id = %path.device_id,
                    "no description received, publishing without validation"
                );
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(device) = manager.device(&path.device_id) {
            if device.state.is_offline() {
                tracing::warn!(device_id = %path.device_id, state = %device.state, "device is offline");
            }
        }
    }

    manager.set_property(&path, &value)?;
    if !settings.quiet {
        eprintln!("✓ Sent {value} to {path}");
    }
    Ok(())
}
