//! Environment selection and CLI overrides on top of `homie-config`.
//!
//! Core never sees these types -- it receives a pre-built `EnvironmentConfig`.

use std::time::Duration;

use clap::ValueEnum;

use homie_config::{Defaults, Profile, ProfileStore};
use homie_core::EnvironmentConfig;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// ID used for a broker given with `--broker` instead of a stored profile.
const ADHOC_ENVIRONMENT: &str = "cli";

/// Resolved presentation and timing settings for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub output: OutputFormat,
    pub color: bool,
    pub quiet: bool,
    /// Upper bound for reaching the broker and for device descriptions.
    pub timeout: Duration,
}

impl Settings {
    pub fn resolve(global: &GlobalOpts, defaults: &Defaults) -> Result<Self, CliError> {
        let output = match global.output {
            Some(format) => format,
            None => OutputFormat::from_str(&defaults.output, true).map_err(|reason| {
                CliError::Validation {
                    field: "defaults.output".into(),
                    reason,
                }
            })?,
        };

        Ok(Self {
            output,
            color: output::should_color(global.color),
            quiet: global.quiet,
            timeout: global
                .timeout
                .unwrap_or_else(|| Duration::from_secs(defaults.ready_timeout_secs)),
        })
    }
}

/// Comma-separated environment names for help text.
pub fn available(store: &ProfileStore) -> String {
    let names: Vec<&str> = store.list().map(|(_, p)| p.name.as_str()).collect();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

/// Look up a stored environment by ID or name.
pub fn find_environment<'a>(
    store: &'a ProfileStore,
    id_or_name: &str,
) -> Result<(&'a str, &'a Profile), CliError> {
    store
        .find(id_or_name)
        .ok_or_else(|| CliError::EnvironmentNotFound {
            name: id_or_name.into(),
            available: available(store),
        })
}

/// Pick the environment for this invocation: `--broker`, then `--env`,
/// then the default. Global overrides are applied to the copy returned.
pub fn select_environment(
    global: &GlobalOpts,
    store: &ProfileStore,
) -> Result<(String, Profile), CliError> {
    let (id, mut profile) = if let Some(url) = &global.broker {
        (ADHOC_ENVIRONMENT.to_owned(), Profile::new(url.clone(), url.clone()))
    } else if let Some(name) = &global.env {
        let (id, profile) = find_environment(store, name)?;
        (id.to_owned(), profile.clone())
    } else if let Some((id, profile)) = store.default_environment() {
        (id.to_owned(), profile.clone())
    } else if store.is_empty() {
        return Err(CliError::NoEnvironment {
            path: store.path().display().to_string(),
        });
    } else {
        return Err(CliError::EnvironmentRequired {
            available: available(store),
        });
    };

    if let Some(namespace) = &global.namespace {
        profile.homie_namespace = Some(namespace.clone());
    }
    if let Some(username) = &global.username {
        profile.username = Some(username.clone());
    }
    Ok((id, profile))
}

/// Translate the selected environment into a core `EnvironmentConfig`.
pub fn resolve_environment(
    global: &GlobalOpts,
    store: &ProfileStore,
) -> Result<EnvironmentConfig, CliError> {
    let (id, profile) = select_environment(global, store)?;
    tracing::debug!(environment = %id, broker = %profile.broker_url, "resolved environment");
    Ok(homie_config::resolve_environment(
        &id,
        &profile,
        store.defaults(),
    )?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use homie_config::Config;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["homie-browser"];
        argv.extend_from_slice(args);
        argv.push("devices");
        Cli::try_parse_from(argv).unwrap().global
    }

    fn store(names: &[&str]) -> ProfileStore {
        let mut store = ProfileStore::with_config("/nonexistent/config.toml", Config::default());
        for name in names {
            store
                .add(Profile::new(*name, format!("mqtt://{name}.local")))
                .unwrap();
        }
        store
    }

    #[test]
    fn single_environment_is_implicit_default() {
        let (_, profile) = select_environment(&global(&[]), &store(&["home"])).unwrap();
        assert_eq!(profile.name, "home");
    }

    #[test]
    fn several_environments_need_a_choice() {
        let store = store(&["home", "lab"]);
        assert!(matches!(
            select_environment(&global(&[]), &store),
            Err(CliError::EnvironmentRequired { available }) if available == "home, lab"
        ));

        let (_, profile) = select_environment(&global(&["--env", "lab"]), &store).unwrap();
        assert_eq!(profile.broker_url, "mqtt://lab.local");
    }

    #[test]
    fn empty_store_points_at_config_file() {
        assert!(matches!(
            select_environment(&global(&[]), &store(&[])),
            Err(CliError::NoEnvironment { path }) if path.contains("config.toml")
        ));
    }

    #[test]
    fn broker_flag_bypasses_store_and_applies_overrides() {
        let (id, profile) = select_environment(
            &global(&["--broker", "ws://b:9001/mqtt", "-n", "lab", "-u", "me"]),
            &store(&[]),
        )
        .unwrap();
        assert_eq!(id, "cli");
        assert_eq!(profile.homie_namespace.as_deref(), Some("lab"));
        assert_eq!(profile.username.as_deref(), Some("me"));
    }

    #[test]
    fn settings_fall_back_to_config_defaults() {
        let defaults = Defaults {
            output: "yaml".into(),
            ready_timeout_secs: 3,
            ..Defaults::default()
        };
        let settings = Settings::resolve(&global(&[]), &defaults).unwrap();
        assert_eq!(settings.output, OutputFormat::Yaml);
        assert_eq!(settings.timeout, Duration::from_secs(3));

        let settings = Settings::resolve(&global(&["-o", "plain", "-t", "500ms"]), &defaults).unwrap();
        assert_eq!(settings.output, OutputFormat::Plain);
        assert_eq!(settings.timeout, Duration::from_millis(500));
    }
}
