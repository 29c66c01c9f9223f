//! Linux command runner backed by `tokio::process`

use super::{CommandOutput, CommandRunner, PlatformError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, PlatformError> {
        debug!("Running: {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| PlatformError::Timeout {
                program: program.to_string(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| PlatformError::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::args;

    #[test]
    fn test_system_runner_creation() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5));
        assert_eq!(runner.timeout, Duration::from_secs(5));

        let runner = SystemCommandRunner::default();
        assert_eq!(runner.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = SystemCommandRunner::default();
        let result = runner
            .run("this-program-definitely-does-not-exist-12345", &[])
            .await;
        match result {
            Err(e) => assert!(e.is_not_found()),
            Ok(_) => panic!("Expected spawn failure"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let runner = SystemCommandRunner::default();
        let output = runner.run("sh", &args(["-c", "echo hello; exit 3"])).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.status, Some(3));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_slow_command() {
        let runner = SystemCommandRunner::new(Duration::from_millis(100));
        let result = runner.run("sleep", &args(["5"])).await;
        assert!(matches!(result, Err(PlatformError::Timeout { .. })));
    }
}
