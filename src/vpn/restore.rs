//! Re-apply the saved mode after boot
//!
//! tailscaled often comes up after this daemon, so the exit node list is
//! polled until it is non-empty before the saved mode is re-driven.

use crate::vpn::mode::Mode;
use crate::vpn::state::RouterState;
use std::time::Duration;
use tracing::{error, info, warn};

/// Polling budget for the exit node directory
#[derive(Debug, Clone, Copy)]
pub struct RestorePolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RestorePolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The saved mode was applied
    Restored(Mode),
    /// No exit nodes appeared within the polling budget
    NoExitNodes,
    /// The saved mode could not be applied
    Failed(String),
}

/// Wait for exit nodes, then re-apply the mode loaded at startup
pub async fn restore_previous_mode(state: &RouterState, policy: RestorePolicy) -> RestoreOutcome {
    info!("Checking saved mode on startup...");

    let mut found = false;
    for attempt in 1..=policy.attempts {
        match state.directory().list().await {
            Ok(nodes) if !nodes.is_empty() => {
                info!("{} exit nodes available", nodes.len());
                state.update_exit_nodes(nodes).await;
                found = true;
                break;
            }
            Ok(_) => info!("Waiting for exit nodes to become available ({}/{})", attempt, policy.attempts),
            Err(e) => warn!("Exit node list not ready ({}/{}): {}", attempt, policy.attempts, e),
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    if !found {
        error!("No exit nodes detected! Cannot restore previous mode.");
        return RestoreOutcome::NoExitNodes;
    }

    let mode = state.current_mode().await;
    info!("Restoring mode: {}", mode);
    match state.set_mode(mode).await {
        Ok(mode) => {
            info!("Successfully restored mode: {}", mode);
            RestoreOutcome::Restored(mode)
        }
        Err(e) => {
            error!("Failed to restore mode: {}", e);
            RestoreOutcome::Failed(e.to_string())
        }
    }
}
