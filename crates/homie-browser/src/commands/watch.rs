//! `watch`: print state and value changes until interrupted.

use std::sync::Arc;

use chrono::Local;
use owo_colors::OwoColorize;
use serde::Serialize;

use homie_core::{ConnectionState, Device, DeviceState, DeviceTree, EnvironmentManager};

use crate::cli::{OutputFormat, WatchArgs};
use crate::config::Settings;
use crate::error::CliError;
use crate::output;

use super::util;

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent {
    Connection { state: ConnectionState },
    State { device: String, state: DeviceState },
    Described { device: String, name: String },
    Value { path: String, value: String },
}

impl WatchEvent {
    fn line(&self, color: bool) -> String {
        match self {
            Self::Connection { state } => {
                let text = format!("broker {state}");
                if color { text.dimmed().to_string() } else { text }
            }
            Self::State { device, state } => {
                format!("{device} {}", util::state_label(*state, color))
            }
            Self::Described { device, name } => format!("{device} described as \"{name}\""),
            Self::Value { path, value } => format!("{path} = {value}"),
        }
    }
}

/// Changes between two snapshots. Unchanged devices and nodes are skipped
/// by identity.
fn diff(before: &DeviceTree, after: &DeviceTree, only: Option<&str>) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    for (id, device) in after.iter() {
        if only.is_some_and(|wanted| wanted != id) {
            continue;
        }
        let old = before.get(id);
        if old.is_some_and(|old| Arc::ptr_eq(old, device)) {
            continue;
        }
        device_changes(id, old.map(Arc::as_ref), device, &mut events);
    }
    events
}

fn device_changes(id: &str, old: Option<&Device>, device: &Device, events: &mut Vec<WatchEvent>) {
    if old.is_none_or(|old| old.state != device.state) {
        events.push(WatchEvent::State {
            device: id.to_owned(),
            state: device.state,
        });
    }
    if device.has_loaded_initial_description
        && !old.is_some_and(|old| old.has_loaded_initial_description)
    {
        events.push(WatchEvent::Described {
            device: id.to_owned(),
            name: device.display_name(id).to_owned(),
        });
    }

    for (node_id, node) in &device.nodes {
        let old_node = old.and_then(|old| old.node(node_id));
        if old_node.is_some_and(|old_node| Arc::ptr_eq(old_node, node)) {
            continue;
        }
        for (property_id, property) in &node.properties {
            let Some(value) = &property.value else {
                continue;
            };
            let previous = old_node
                .and_then(|n| n.property(property_id))
                .and_then(|p| p.value.as_ref());
            if previous != Some(value) {
                events.push(WatchEvent::Value {
                    path: format!("{id}/{node_id}/{property_id}"),
                    value: value.clone(),
                });
            }
        }
    }
}

fn emit(event: &WatchEvent, settings: &Settings) -> Result<(), CliError> {
    let out = match settings.output {
        OutputFormat::Table | OutputFormat::Plain => {
            format!("{} {}", Local::now().format("%H:%M:%S"), event.line(settings.color))
        }
        // One document per event so the stream can be consumed line by line.
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
        OutputFormat::Yaml => format!("---\n{}", serde_yaml::to_string(event)?.trim_end()),
    };
    output::print_output(&out, settings.quiet);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    manager: &EnvironmentManager,
    args: WatchArgs,
    settings: &Settings,
) -> Result<(), CliError> {
    let _listener = manager.add_listener(|| {});
    let _subscription = args
        .device
        .as_deref()
        .map(|device| manager.subscribe_to_device(device));
    util::wait_connected(manager, settings.timeout).await?;

    let mut stream = manager.stream();
    let mut connection = manager.connection_changes();
    let mut previous = stream.current().clone();
    connection.mark_unchanged();

    emit(
        &WatchEvent::Connection {
            state: manager.connection_state(),
        },
        settings,
    )?;
    for event in diff(&DeviceTree::new(), &previous, args.device.as_deref()) {
        emit(&event, settings)?;
    }

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                emit(&WatchEvent::Connection { state }, settings)?;
                if state == ConnectionState::Disconnected {
                    break;
                }
            }
            tree = stream.changed() => {
                let Some(tree) = tree else { break };
                for event in diff(&previous, &tree, args.device.as_deref()) {
                    emit(&event, settings)?;
                }
                previous = tree;
            }
        }
    }
    Ok(())
}
