//! Scripted command runner for tests
//!
//! Commands are matched on their full command line (`program arg1 arg2`).
//! Queued one-shot responses are used first, then the standing script.
//! Unscripted commands succeed with empty output. Every invocation is
//! recorded in order.

use super::{CommandOutput, CommandRunner, PlatformError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

#[derive(Clone)]
enum Scripted {
    Output(CommandOutput),
    SpawnError(io::ErrorKind),
}

#[derive(Default)]
pub(crate) struct FakeRunner {
    scripts: Mutex<HashMap<String, Scripted>>,
    queued: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, command_line: &str, status: i32, stdout: &str, stderr: &str) {
        self.scripts.lock().insert(
            command_line.to_string(),
            Scripted::Output(CommandOutput {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
        );
    }

    /// Answer the next call of `command_line` once, ahead of any script
    pub(crate) fn queue(&self, command_line: &str, status: i32, stdout: &str, stderr: &str) {
        self.queued
            .lock()
            .entry(command_line.to_string())
            .or_default()
            .push_back(CommandOutput {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
    }

    pub(crate) fn succeed_with(&self, command_line: &str, stdout: &str) {
        self.respond(command_line, 0, stdout, "");
    }

    pub(crate) fn fail_spawn(&self, command_line: &str, kind: io::ErrorKind) {
        self.scripts
            .lock()
            .insert(command_line.to_string(), Scripted::SpawnError(kind));
    }

    pub(crate) fn delay(&self, command_line: &str, delay: Duration) {
        self.delays.lock().insert(command_line.to_string(), delay);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub(crate) fn count(&self, command_line: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == command_line).count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, PlatformError> {
        let command_line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        self.calls.lock().push(command_line.clone());

        let delay = self.delays.lock().get(&command_line).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(&command_line)
            .and_then(VecDeque::pop_front);
        if let Some(output) = queued {
            return Ok(output);
        }

        let scripted = self.scripts.lock().get(&command_line).cloned();
        match scripted {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::SpawnError(kind)) => Err(PlatformError::Spawn {
                program: program.to_string(),
                source: io::Error::from(kind),
            }),
            None => Ok(CommandOutput {
                status: Some(0),
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::args;

    #[tokio::test]
    async fn test_queued_responses_precede_script() {
        let runner = FakeRunner::new();
        runner.succeed_with("tailscale exit-node list", "steady");
        runner.queue("tailscale exit-node list", 1, "", "starting");
        runner.queue("tailscale exit-node list", 0, "", "");

        let list = args(["exit-node", "list"]);
        assert_eq!(runner.run("tailscale", &list).await.unwrap().status, Some(1));
        assert_eq!(runner.run("tailscale", &list).await.unwrap().stdout, "");
        assert_eq!(runner.run("tailscale", &list).await.unwrap().stdout, "steady");
        assert_eq!(runner.count("tailscale exit-node list"), 3);
    }
}
