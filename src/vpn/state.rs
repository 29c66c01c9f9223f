//! Process-wide routing state
//!
//! [`RouterState`] is the only place the current mode changes. Every
//! transition holds one async mutex across rule installation and the mode
//! file write, so two requests can never interleave their iptables commands.
//! Status reads take the same lock to see a consistent snapshot.

use crate::vpn::exit_nodes::{ExitNodeDirectory, ExitNodeMap};
use crate::vpn::mode::{Mode, ModeStore};
use crate::vpn::routing::{RoutingConfigurator, RoutingError};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub mode: Mode,
    #[serde(rename = "exitNodes")]
    pub exit_nodes: ExitNodeMap,
}

struct Inner {
    mode: Mode,
    exit_nodes: ExitNodeMap,
}

pub struct RouterState {
    configurator: RoutingConfigurator,
    store: ModeStore,
    inner: Mutex<Inner>,
}

impl RouterState {
    /// Create the state with the mode loaded from `store`.
    ///
    /// The loaded mode is not applied to the network; see
    /// [`crate::vpn::restore`].
    pub fn new(configurator: RoutingConfigurator, store: ModeStore) -> Self {
        let mode = store.load();
        info!("Loaded saved mode: {}", mode);
        Self {
            configurator,
            store,
            inner: Mutex::new(Inner {
                mode,
                exit_nodes: ExitNodeMap::new(),
            }),
        }
    }

    pub fn directory(&self) -> &ExitNodeDirectory {
        self.configurator.directory()
    }

    pub fn configurator(&self) -> &RoutingConfigurator {
        &self.configurator
    }

    pub async fn current_mode(&self) -> Mode {
        self.inner.lock().await.mode.clone()
    }

    /// Replace the cached exit node snapshot
    pub async fn update_exit_nodes(&self, nodes: ExitNodeMap) {
        self.inner.lock().await.exit_nodes = nodes;
    }

    /// Current mode plus a refreshed exit node list.
    ///
    /// If the directory cannot be queried the previous snapshot is returned.
    pub async fn status(&self) -> StatusSnapshot {
        let mut inner = self.inner.lock().await;
        match self.directory().list().await {
            Ok(nodes) => inner.exit_nodes = nodes,
            Err(e) => warn!("Keeping previous exit node list: {}", e),
        }
        StatusSnapshot {
            mode: inner.mode.clone(),
            exit_nodes: inner.exit_nodes.clone(),
        }
    }

    pub async fn set_direct(&self) -> Result<Mode, RoutingError> {
        self.transition(Mode::Direct).await
    }

    pub async fn set_exit_node(&self, name: &str) -> Result<Mode, RoutingError> {
        self.transition(Mode::ExitNode(name.to_string())).await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<Mode, RoutingError> {
        match mode {
            Mode::Direct => self.set_direct().await,
            Mode::ExitNode(name) => self.set_exit_node(&name).await,
        }
    }

    async fn transition(&self, target: Mode) -> Result<Mode, RoutingError> {
        let jobs = {
            let mut inner = self.inner.lock().await;
            let jobs = match self.configurator.apply(&target).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("Switch to {} failed, staying in {}: {}", target, inner.mode, e);
                    return Err(e);
                }
            };

            inner.mode = target.clone();
            if let Err(e) = self.store.save(&target) {
                error!(
                    "Failed to save mode to {}: {}",
                    self.store.path().display(),
                    e
                );
            }
            jobs
        };

        self.configurator.background().spawn(jobs);
        info!("Switched to mode: {}", target);
        Ok(target)
    }
}
