//! Detached best-effort side effects
//!
//! Liveness probes and cache/ARP refreshes after a mode change must neither
//! block the caller nor report errors back. They run here on a small bounded
//! pool and only ever log.

use crate::platform::CommandRunner;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One command to run in the background
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundJob {
    pub description: String,
    pub program: String,
    pub args: Vec<String>,
}

impl BackgroundJob {
    pub fn new(description: impl Into<String>, program: &str, args: Vec<String>) -> Self {
        Self {
            description: description.into(),
            program: program.to_string(),
            args,
        }
    }
}

#[derive(Clone)]
pub struct BackgroundTasks {
    runner: Arc<dyn CommandRunner>,
    permits: Arc<Semaphore>,
}

impl BackgroundTasks {
    pub fn new(runner: Arc<dyn CommandRunner>, workers: usize) -> Self {
        Self {
            runner,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run `jobs` in order on a detached task.
    ///
    /// The returned handle exists for tests; production callers drop it.
    pub fn spawn(&self, jobs: Vec<BackgroundJob>) -> JoinHandle<()> {
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            for job in jobs {
                match runner.run(&job.program, &job.args).await {
                    Ok(output) if output.success() => {
                        debug!("{} done", job.description);
                    }
                    Ok(output) => {
                        warn!(
                            "{} failed ({:?}): {}{}",
                            job.description,
                            output.status,
                            output.stdout.trim(),
                            output.stderr.trim()
                        );
                    }
                    Err(e) => warn!("{} failed: {}", job.description, e),
                }
            }
        })
    }
}
