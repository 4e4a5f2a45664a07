//! Handles RESTART_PIPED commands

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use controlplane_api::{CommandStatus, CommandType};

use crate::store::CommandStore;

/// Acknowledge the first restart command, then cancel `root` so the
/// supervisor restarts the process.
pub async fn watch_restart_commands(
    commands: Arc<CommandStore>,
    interval: Duration,
    root: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = root.cancelled() => return,
            _ = ticker.tick() => {
                if handle_restart(&commands).await {
                    info!("Restarting piped as requested");
                    root.cancel();
                    return;
                }
            }
        }
    }
}

/// Report every pending restart command, returning whether there was one
pub async fn handle_restart(commands: &CommandStore) -> bool {
    let mut restart = false;
    for command in commands.list_piped_commands() {
        if command.command.command_type != CommandType::RestartPiped {
            continue;
        }
        restart = true;
        if let Err(e) = command
            .report(CommandStatus::CommandSucceeded, BTreeMap::new(), Vec::new())
            .await
        {
            error!(command_id = %command.command.id, "Failed to report restart command: {}", e);
        }
    }
    restart
}
