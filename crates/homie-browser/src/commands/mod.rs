//! Command dispatch: bridges CLI args -> manager operations -> output formatting.

pub mod device;
pub mod devices;
pub mod env;
pub mod set;
pub mod util;
pub mod watch;

use homie_core::EnvironmentManager;

use crate::cli::Command;
use crate::config::Settings;
use crate::error::CliError;

/// Dispatch a broker-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    manager: &EnvironmentManager,
    settings: &Settings,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(manager, args, settings).await,
        Command::Device(args) => device::handle(manager, args, settings).await,
        Command::Watch(args) => watch::handle(manager, args, settings).await,
        Command::Set(args) => set::handle(manager, args, settings).await,
        // Env and Completions are handled before dispatch
        Command::Env(_) | Command::Completions(_) => unreachable!(),
    }
}
