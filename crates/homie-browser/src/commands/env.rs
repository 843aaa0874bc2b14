//! Environment subcommand handlers.

use serde::Serialize;
use tabled::Tabled;

use homie_config::{Profile, ProfileStore};

use crate::cli::{EnvArgs, EnvCommand, EnvFields};
use crate::config::{self, Settings};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

/// Profile as shown to the user. Passwords never leave the store.
#[derive(Debug, Serialize)]
struct EnvEntry {
    id: String,
    name: String,
    broker_url: String,
    username: Option<String>,
    homie_namespace: Option<String>,
    default: bool,
}

impl EnvEntry {
    fn new(id: &str, profile: &Profile, default_id: Option<&str>) -> Self {
        Self {
            id: id.to_owned(),
            name: profile.name.clone(),
            broker_url: profile.broker_url.clone(),
            username: profile.username.clone(),
            homie_namespace: profile.namespace().map(str::to_owned),
            default: default_id == Some(id),
        }
    }
}

#[derive(Tabled)]
struct EnvRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Broker")]
    broker: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&EnvEntry> for EnvRow {
    fn from(e: &EnvEntry) -> Self {
        Self {
            marker: if e.default { "*" } else { "" },
            name: e.name.clone(),
            broker: e.broker_url.clone(),
            namespace: e.homie_namespace.clone().unwrap_or_else(|| "+".into()),
            id: e.id.clone(),
        }
    }
}

fn detail(e: &EnvEntry) -> String {
    [
        format!("ID:        {}", e.id),
        format!("Name:      {}", e.name),
        format!("Broker:    {}", e.broker_url),
        format!("Username:  {}", e.username.as_deref().unwrap_or("-")),
        format!("Namespace: {}", e.homie_namespace.as_deref().unwrap_or("+ (all)")),
        format!("Default:   {}", if e.default { "yes" } else { "no" }),
    ]
    .join("\n")
}

fn entries(store: &ProfileStore) -> Vec<EnvEntry> {
    let default_id = store.default_environment().map(|(id, _)| id);
    let mut entries: Vec<EnvEntry> = store
        .list()
        .map(|(id, profile)| EnvEntry::new(id, profile, default_id))
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    entries
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Apply the optional fields of `add`/`edit` to a profile. Returns whether
/// a password should be prompted for.
fn apply_fields(profile: &mut Profile, fields: EnvFields) -> bool {
    if let Some(user) = fields.user {
        profile.username = Some(user).filter(|u| !u.is_empty());
    }
    if let Some(ns) = fields.homie_namespace {
        profile.homie_namespace = Some(ns).filter(|ns| !ns.trim().is_empty());
    }
    if let Some(password) = fields.password {
        profile.password = Some(password).filter(|p| !p.is_empty());
    }
    fields.ask_password
}

fn prompt_password(id: &str) -> Result<(), CliError> {
    let password = rpassword::prompt_password("Broker password: ")?;
    if password.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }
    homie_config::store_password(id, &password)?;
    eprintln!("✓ Password stored in system keyring");
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(
    args: EnvArgs,
    store: &mut ProfileStore,
    settings: &Settings,
) -> Result<(), CliError> {
    match args.command {
        EnvCommand::List => {
            let entries = entries(store);
            let out = output::render_list(
                settings.output,
                &entries,
                |e| EnvRow::from(e),
                |e| e.id.clone(),
            )?;
            output::print_output(&out, settings.quiet);
            Ok(())
        }

        EnvCommand::Show { environment } => {
            let default_id = store.default_environment().map(|(id, _)| id);
            let (id, profile) = config::find_environment(store, &environment)?;
            let entry = EnvEntry::new(id, profile, default_id);
            let out = output::render_single(settings.output, &entry, detail, |e| e.id.clone())?;
            output::print_output(&out, settings.quiet);
            Ok(())
        }

        EnvCommand::Add {
            name,
            broker_url,
            fields,
            default,
        } => {
            let mut profile = Profile::new(name, broker_url);
            let ask_password = apply_fields(&mut profile, fields);

            let id = store.add(profile)?;
            if ask_password {
                prompt_password(&id)?;
            }
            if default {
                store.set_default(&id)?;
            }
            store.save()?;

            tracing::info!(environment = %id, "environment added");
            if !settings.quiet {
                eprintln!("✓ Environment added to {}", store.path().display());
            }
            output::print_output(&id, settings.quiet);
            Ok(())
        }

        EnvCommand::Edit {
            environment,
            name,
            broker_url,
            fields,
            default,
        } => {
            let (id, mut profile) = {
                let (id, profile) = config::find_environment(store, &environment)?;
                (id.to_owned(), profile.clone())
            };
            if let Some(name) = name {
                profile.name = name;
            }
            if let Some(url) = broker_url {
                profile.broker_url = url;
            }
            let ask_password = apply_fields(&mut profile, fields);

            store.set(&id, profile)?;
            if ask_password {
                prompt_password(&id)?;
            }
            if default {
                store.set_default(&id)?;
            }
            store.save()?;

            if !settings.quiet {
                eprintln!("✓ Environment '{id}' updated");
            }
            Ok(())
        }

        EnvCommand::Remove { environment } => {
            let id = config::find_environment(store, &environment)?.0.to_owned();
            let removed = store.remove(&id)?;
            if removed.username.is_some() {
                if let Err(e) = homie_config::delete_password(&id) {
                    tracing::warn!(environment = %id, error = %e, "could not remove keyring entry");
                }
            }
            store.save()?;

            if !settings.quiet {
                eprintln!("✓ Environment '{}' removed", removed.name);
            }
            Ok(())
        }

        EnvCommand::Default { environment } => {
            let id = config::find_environment(store, &environment)?.0.to_owned();
            store.set_default(&id)?;
            store.save()?;

            if !settings.quiet {
                eprintln!("✓ Default environment set to '{id}'");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use homie_config::Config;

    use super::*;

    #[test]
    fn entries_hide_passwords_and_mark_default() {
        let mut store = ProfileStore::with_config("unused.toml", Config::default());
        let id = store
            .add(Profile {
                password: Some("secret".into()),
                ..Profile::new("Home", "mqtt://home")
            })
            .unwrap();
        store.add(Profile::new("Attic", "mqtt://attic")).unwrap();
        store.set_default(&id).unwrap();

        let entries = entries(&store);
        assert_eq!(entries[0].name, "Attic");
        assert!(entries[1].default);

        let json = serde_json::to_string(&entries).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn blank_fields_clear_values() {
        let mut profile = Profile {
            username: Some("old".into()),
            homie_namespace: Some("lab".into()),
            ..Profile::new("n", "mqtt://h")
        };
        let ask = apply_fields(
            &mut profile,
            EnvFields {
                user: Some(String::new()),
                homie_namespace: Some(" ".into()),
                password: None,
                ask_password: false,
            },
        );
        assert!(!ask);
        assert_eq!(profile.username, None);
        assert_eq!(profile.homie_namespace, None);
    }
}
