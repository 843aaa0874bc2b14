//! Clap derive structures for the `homie-browser` CLI.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use homie_core::{DeviceState, PropertyPath};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// homie-browser -- explore and control Homie v5 devices over MQTT
#[derive(Debug, Parser)]
#[command(
    name = "homie-browser",
    version,
    about = "Browse Homie v5 devices on an MQTT broker",
    long_about = "Discovers Homie v5 devices from retained broker topics, shows their\n\
        nodes and properties, follows live updates and sends set commands.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Environment to use (ID or name)
    #[arg(long, short = 'e', env = "HOMIE_BROWSER_ENV", global = true)]
    pub env: Option<String>,

    /// Broker URL (bypasses stored environments)
    #[arg(long, short = 'b', env = "HOMIE_BROWSER_BROKER", global = true)]
    pub broker: Option<String>,

    /// Homie topic root (overrides the environment)
    #[arg(long, short = 'n', env = "HOMIE_BROWSER_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Broker username (overrides the environment)
    #[arg(long, short = 'u', env = "HOMIE_BROWSER_USERNAME", global = true)]
    pub username: Option<String>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "HOMIE_BROWSER_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// How long to wait for the broker and device descriptions (e.g. 10s)
    #[arg(long, short = 't', value_parser = humantime::parse_duration, global = true)]
    pub timeout: Option<Duration>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage stored broker environments
    #[command(alias = "environments")]
    Env(EnvArgs),

    /// List devices announced on the broker
    #[command(alias = "ls")]
    Devices(DevicesArgs),

    /// Show one device with its nodes and properties
    #[command(alias = "get")]
    Device(DeviceArgs),

    /// Follow device states and property values as they change
    Watch(WatchArgs),

    /// Send a value to a settable property
    Set(SetArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Environments ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct EnvArgs {
    #[command(subcommand)]
    pub command: EnvCommand,
}

#[derive(Debug, Subcommand)]
pub enum EnvCommand {
    /// List stored environments
    #[command(alias = "ls")]
    List,

    /// Show one environment
    Show {
        /// Environment ID or name
        #[arg(value_name = "ENV")]
        environment: String,
    },

    /// Add a new environment
    Add {
        /// Display name
        name: String,

        /// Broker URL (mqtt, mqtts, tcp, ssl, ws or wss)
        broker_url: String,

        #[command(flatten)]
        fields: EnvFields,

        /// Make this the default environment
        #[arg(long)]
        default: bool,
    },

    /// Change an existing environment
    Edit {
        /// Environment ID or name
        #[arg(value_name = "ENV")]
        environment: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New broker URL
        #[arg(long)]
        broker_url: Option<String>,

        #[command(flatten)]
        fields: EnvFields,

        /// Make this the default environment
        #[arg(long)]
        default: bool,
    },

    /// Remove an environment
    #[command(alias = "rm")]
    Remove {
        /// Environment ID or name
        #[arg(value_name = "ENV")]
        environment: String,
    },

    /// Set the default environment
    Default {
        /// Environment ID or name
        #[arg(value_name = "ENV")]
        environment: String,
    },
}

/// Optional profile fields shared by `add` and `edit`.
#[derive(Debug, Args)]
pub struct EnvFields {
    /// Broker username
    #[arg(long = "user")]
    pub user: Option<String>,

    /// Homie topic root; empty matches every root
    #[arg(long = "homie-namespace")]
    pub homie_namespace: Option<String>,

    /// Store this password in the config file (plaintext)
    #[arg(long, conflicts_with = "ask_password")]
    pub password: Option<String>,

    /// Prompt for a password and keep it in the system keyring
    #[arg(long, requires = "user")]
    pub ask_password: bool,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// How long to collect `$state` announcements before listing
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    pub settle: Duration,

    /// Only list devices in this state
    #[arg(long)]
    pub state: Option<DeviceState>,
}

#[derive(Debug, Args)]
pub struct DeviceArgs {
    /// Device ID
    pub device: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Follow one device in detail (property values); otherwise states only
    pub device: Option<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Property address: <device>/<node>/<property>
    pub path: PropertyPath,

    /// Value to send
    pub value: String,

    /// Publish without checking the value against the description
    #[arg(long, short = 'f')]
    pub force: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
