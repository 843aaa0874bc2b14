mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use homie_config::ProfileStore;
use homie_core::EnvironmentRegistry;

use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::error::CliError;

/// Time allowed for queued requests to reach the broker on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Command::Completions(args) = &cli.command {
        use clap::CommandFactory;
        use clap_complete::generate;

        let mut cmd = Cli::command();
        generate(args.shell, &mut cmd, "homie-browser", &mut std::io::stdout());
        return Ok(());
    }

    let mut store = ProfileStore::open()?;
    let settings = Settings::resolve(&cli.global, store.defaults())?;

    match cli.command {
        // Environment management never touches the broker
        Command::Env(args) => commands::env::handle(args, &mut store, &settings),

        cmd => {
            let environment = config::resolve_environment(&cli.global, &store)?;
            let registry = EnvironmentRegistry::default();
            let manager = registry.get_or_connect(&environment)?;

            tracing::debug!(command = ?cmd, environment = %environment.id, "dispatching command");
            let result = commands::dispatch(cmd, &manager, &settings).await;

            registry.shutdown(SHUTDOWN_GRACE).await;
            result
        }
    }
}
