//! `device <id>`: wait for the description, then show everything about it.

use tabled::Tabled;

use homie_core::{EnvironmentManager, Property};

use crate::cli::DeviceArgs;
use crate::config::Settings;
use crate::error::CliError;
use crate::output;

use super::util::{self, DeviceEntry};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct PropertyRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Property")]
    property: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    datatype: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

fn property_row(node_id: &str, property_id: &str, p: &Property) -> PropertyRow {
    let datatype = match &p.format {
        Some(format) => format!("{} ({format})", p.datatype),
        None => p.datatype.to_string(),
    };
    let mut flags = Vec::new();
    if p.settable {
        flags.push("settable");
    }
    if !p.retained {
        flags.push("non-retained");
    }
    PropertyRow {
        node: node_id.to_owned(),
        property: property_id.to_owned(),
        name: p.name.clone().unwrap_or_default(),
        datatype,
        value: value_text(p),
        flags: flags.join(", "),
    }
}

/// Current value with unit, plus the target while one is pending.
fn value_text(p: &Property) -> String {
    let with_unit = |v: &str| match &p.unit {
        Some(unit) => format!("{v} {unit}"),
        None => v.to_owned(),
    };
    let value = p.value.as_deref().map_or_else(|| "-".to_owned(), with_unit);
    match p.target.as_deref() {
        Some(target) if p.value.as_deref() != Some(target) => {
            format!("{value} → {}", with_unit(target))
        }
        _ => value,
    }
}

fn detail(entry: &DeviceEntry, color: bool) -> String {
    let d = &entry.device;
    let mut lines = vec![
        format!("ID:         {}", entry.id),
        format!("Name:       {}", d.display_name(&entry.id)),
        format!("State:      {}", util::state_label(d.state, color)),
        format!("Homie:      {} (description v{})", d.homie, d.version),
        format!("Type:       {}", d.device_type.as_deref().unwrap_or("-")),
    ];
    if let Some(root) = &d.root {
        lines.push(format!("Root:       {root}"));
    }
    if let Some(parent) = &d.parent {
        lines.push(format!("Parent:     {parent}"));
    }
    if !d.children.is_empty() {
        lines.push(format!("Children:   {}", d.children.join(", ")));
    }
    if let Some(extensions) = d.extensions.as_ref().filter(|e| !e.is_empty()) {
        lines.push(format!("Extensions: {}", extensions.join(", ")));
    }
    lines.push(format!("Contents:   {}", util::contents_summary(d)));

    let rows: Vec<PropertyRow> = d
        .nodes
        .iter()
        .flat_map(|(node_id, node)| {
            node.properties
                .iter()
                .map(move |(property_id, p)| property_row(node_id, property_id, p))
        })
        .collect();
    if !rows.is_empty() {
        lines.push(String::new());
        lines.push(output::render_table(&rows));
    }
    lines.join("\n")
}

/// `node/property=value`, one per line.
fn plain(entry: &DeviceEntry) -> String {
    entry
        .device
        .nodes
        .iter()
        .flat_map(|(node_id, node)| {
            node.properties.iter().map(move |(property_id, p)| {
                format!(
                    "{node_id}/{property_id}={}",
                    p.value.as_deref().unwrap_or_default()
                )
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    manager: &EnvironmentManager,
    args: DeviceArgs,
    settings: &Settings,
) -> Result<(), CliError> {
    util::wait_connected(manager, settings.timeout).await?;
    manager.ready_timeout(&args.device, settings.timeout).await?;

    let device = manager
        .device(&args.device)
        .ok_or_else(|| CliError::NotFound {
            resource_type: "device".into(),
            identifier: args.device.clone(),
            list_command: "devices".into(),
        })?;
    let entry = DeviceEntry {
        id: args.device,
        device,
    };

    let color = settings.color;
    let out = output::render_single(settings.output, &entry, |e| detail(e, color), plain)?;
    output::print_output(&out, settings.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use homie_core::{DeviceTree, decode};

    use super::*;

    const DESCRIPTION: &str = r#"{"homie":"5.0","version":3,"name":"Lamp","children":["bulb"],"nodes":{"light":{"name":"Light","properties":{"level":{"datatype":"integer","format":"0:100","settable":true,"unit":"%"},"on":{"datatype":"boolean"}}}}}"#;

    fn lamp() -> DeviceEntry {
        let tree = [
            ("homie/5/lamp/$description", DESCRIPTION),
            ("homie/5/lamp/light/level", "40"),
            ("homie/5/lamp/light/level/$target", "80"),
            ("homie/5/lamp/light/on", "true"),
        ]
        .into_iter()
        .filter_map(|(topic, payload)| decode(topic, payload.as_bytes()))
        .fold(DeviceTree::new(), |tree, event| tree.apply(&event));

        DeviceEntry {
            id: "lamp".into(),
            device: tree.get("lamp").unwrap().clone(),
        }
    }

    #[test]
    fn value_shows_unit_and_pending_target() {
        let entry = lamp();
        let level = entry.device.property("light", "level").unwrap();
        assert_eq!(value_text(level), "40 % → 80 %");
    }

    #[test]
    fn detail_lists_attributes_and_properties() {
        let text = detail(&lamp(), false);
        assert!(text.contains("Name:       Lamp"));
        assert!(text.contains("Children:   bulb"));
        assert!(text.contains("2 properties in 1 node"));
        assert!(text.contains("integer (0:100)"));
        assert!(text.contains("settable"));
    }

    #[test]
    fn plain_lines() {
        assert_eq!(plain(&lamp()), "light/level=40\nlight/on=true");
    }
}
