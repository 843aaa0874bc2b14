//! `devices`: collect `$state` announcements for a moment, then list.

use std::sync::Arc;

use tabled::Tabled;

use homie_core::{DeviceTree, EnvironmentManager};

use crate::cli::DevicesArgs;
use crate::config::Settings;
use crate::error::CliError;
use crate::output;

use super::util::{self, DeviceEntry};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "Children")]
    children: usize,
    #[tabled(rename = "Contents")]
    contents: String,
}

impl From<&DeviceEntry> for DeviceRow {
    fn from(e: &DeviceEntry) -> Self {
        let d = &e.device;
        Self {
            id: e.id.clone(),
            name: d.display_name(&e.id).to_owned(),
            state: d.state.to_string(),
            device_type: d.device_type.clone().unwrap_or_default(),
            children: d.children.len(),
            contents: util::contents_summary(d),
        }
    }
}

fn collect(tree: &DeviceTree, args: &DevicesArgs) -> Vec<DeviceEntry> {
    let mut entries: Vec<DeviceEntry> = tree
        .iter()
        .filter(|(_, device)| args.state.is_none_or(|state| device.state == state))
        .map(|(id, device)| DeviceEntry {
            id: id.clone(),
            device: Arc::clone(device),
        })
        .collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    manager: &EnvironmentManager,
    args: DevicesArgs,
    settings: &Settings,
) -> Result<(), CliError> {
    // The first listener brings up the `$state` subscription.
    let _listener = manager.add_listener(|| {});
    util::wait_connected(manager, settings.timeout).await?;

    tracing::debug!(settle = %humantime::format_duration(args.settle), "collecting device states");
    tokio::time::sleep(args.settle).await;

    let entries = collect(&manager.snapshot(), &args);
    let out = output::render_list(
        settings.output,
        &entries,
        |e| DeviceRow::from(e),
        |e| e.id.clone(),
    )?;
    output::print_output(&out, settings.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use homie_core::{DeviceState, decode};

    use super::*;

    #[test]
    fn filters_by_state_and_sorts() {
        let tree = [
            ("homie/5/zeta/$state", "ready"),
            ("homie/5/alpha/$state", "lost"),
            ("homie/5/mid/$state", "ready"),
        ]
        .into_iter()
        .filter_map(|(topic, payload)| decode(topic, payload.as_bytes()))
        .fold(DeviceTree::new(), |tree, event| tree.apply(&event));

        let mut args = DevicesArgs {
            settle: Duration::ZERO,
            state: None,
        };
        let ids: Vec<String> = collect(&tree, &args).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);

        args.state = Some(DeviceState::Ready);
        let ids: Vec<String> = collect(&tree, &args).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["mid", "zeta"]);
    }
}
