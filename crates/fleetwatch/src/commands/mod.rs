//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod devices;
pub mod markers;
pub mod summary;
pub mod watch;

mod util;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Route a backend-facing command to its handler.
pub async fn dispatch(cmd: Command, resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(args, &resolved, global).await,
        Command::Summary => summary::handle(&resolved, global).await,
        Command::Markers => markers::handle(&resolved, global).await,
        Command::Watch(args) => watch::handle(args, resolved, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "local command routed to backend dispatch".into(),
        )),
    }
}
