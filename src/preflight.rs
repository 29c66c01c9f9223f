//! Startup precondition checks

use crate::platform::{args, CommandRunner};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("This program must be run as root. Try using: sudo tailscale-router")]
    NotRoot,
    #[error("Tailscale is not installed. Please install it using: sudo apt install tailscale")]
    TailscaleNotInstalled,
    #[error("Tailscale is not running. Start it using: sudo systemctl start tailscaled && sudo tailscale up")]
    TailscaleNotRunning,
}

/// Fail unless running with an effective UID of 0
pub fn ensure_root() -> Result<(), PreflightError> {
    #[cfg(unix)]
    {
        if nix::unistd::Uid::effective().is_root() {
            return Ok(());
        }
    }
    Err(PreflightError::NotRoot)
}

/// Fail unless `tailscale` is installed and `tailscale status` succeeds
pub async fn ensure_tailscale(runner: &dyn CommandRunner) -> Result<(), PreflightError> {
    match runner.run("tailscale", &args(["status"])).await {
        Ok(output) if output.success() => {
            info!("Tailscale is installed and running.");
            Ok(())
        }
        Ok(_) => Err(PreflightError::TailscaleNotRunning),
        Err(e) if e.is_not_found() => Err(PreflightError::TailscaleNotInstalled),
        Err(_) => Err(PreflightError::TailscaleNotRunning),
    }
}
