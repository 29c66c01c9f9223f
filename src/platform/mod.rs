//! Platform command execution
//!
//! Everything this daemon does to the host goes through a [`CommandRunner`]:
//! `tailscale`, `iptables`, `sysctl`, `modprobe`, `ip`, `arping` and `ping`
//! are invoked as external programs, never reimplemented.

pub mod linux;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("{program} exited with status {status:?}: {stderr}")]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl PlatformError {
    /// True when the program itself could not be found on `PATH`
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Narrow capability for running privileged system tools
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// A non-zero exit is not an error here; use [`check`] for that.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, PlatformError>;
}

/// Run a command and treat a non-zero exit status as an error
pub async fn check(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, PlatformError> {
    let output = runner.run(program, args).await?;
    if !output.success() {
        return Err(PlatformError::CommandFailed {
            program: program.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Convenience for building argument vectors from string literals
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Get the command runner for the host system
pub fn system_runner(timeout: Duration) -> Arc<dyn CommandRunner> {
    Arc::new(linux::SystemCommandRunner::new(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::FakeRunner;

    #[test]
    fn test_platform_error_display() {
        let err = PlatformError::Timeout {
            program: "iptables".to_string(),
            secs: 30,
        };
        assert_eq!(err.to_string(), "iptables timed out after 30s");

        let err = PlatformError::CommandFailed {
            program: "tailscale".to_string(),
            status: Some(1),
            stderr: "not logged in".to_string(),
        };
        assert!(err.to_string().contains("tailscale"));
        assert!(err.to_string().contains("not logged in"));
    }

    #[test]
    fn test_is_not_found() {
        let err = PlatformError::Spawn {
            program: "tailscale".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.is_not_found());

        let err = PlatformError::Spawn {
            program: "tailscale".to_string(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            status: Some(0),
            ..Default::default()
        };
        assert!(ok.success());

        let killed = CommandOutput::default();
        assert!(!killed.success());
    }

    #[tokio::test]
    async fn test_check_rejects_nonzero_exit() {
        let runner = FakeRunner::new();
        runner.respond("iptables -t nat -F", 1, "", "permission denied");

        let result = check(&runner, "iptables", &args(["-t", "nat", "-F"])).await;
        match result {
            Err(PlatformError::CommandFailed { status, stderr, .. }) => {
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "permission denied");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }
}
