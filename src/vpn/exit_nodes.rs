//! Exit node discovery from `tailscale exit-node list`
//!
//! The listing is a whitespace-separated table:
//!
//! ```text
//!  IP                  HOSTNAME                          COUNTRY     CITY        STATUS
//!  100.64.0.7          homeserver                        -           -           -
//!  100.80.12.3         se-sto-wg-001.mullvad.ts.net      Sweden      Stockholm   -
//!
//!  # To (have) a node ...
//! ```
//!
//! Rows without geo fields are self-hosted ("private") nodes keyed by hostname.
//! Rows with geo fields come from an exit node provider and are keyed as
//! `"hostname (country, city)"`.
//!
//! # Limitations
//!
//! Columns are split on whitespace, so a multi-word country or city
//! (`New York`) shifts the later fields: the key gets the first word of the
//! city and the status column is read from the next word.

use crate::platform::{args, CommandRunner, PlatformError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Address prefix of the Tailscale CGNAT range
const TAILSCALE_PREFIX: &str = "100.";

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Tailscale exit node list unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl From<PlatformError> for DirectoryError {
    fn from(e: PlatformError) -> Self {
        DirectoryError::DirectoryUnavailable(e.to_string())
    }
}

/// A peer offering exit node service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitNode {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Hostname")]
    pub display_name: String,
    #[serde(rename = "Active")]
    pub active: bool,
}

/// Snapshot of the available exit nodes, keyed by display name
pub type ExitNodeMap = BTreeMap<String, ExitNode>;

/// How a listing row was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Self-hosted node without location metadata
    Private,
    /// Provider node tagged with country and city
    Provider,
}

/// Parse one listing row, returning `None` for headers and malformed lines
pub fn parse_row(line: &str) -> Option<(NodeClass, ExitNode)> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    if fields.len() < 5 || line.contains("HOSTNAME") || line.contains("To (have") {
        return None;
    }

    let (ip, hostname, country, city, status) =
        (fields[0], fields[1], fields[2], fields[3], fields[4]);

    if !ip.contains(TAILSCALE_PREFIX) {
        return None;
    }

    let active = !status.contains("offline");

    if country == "-" && city == "-" {
        Some((
            NodeClass::Private,
            ExitNode {
                ip: ip.to_string(),
                display_name: hostname.to_string(),
                active,
            },
        ))
    } else {
        Some((
            NodeClass::Provider,
            ExitNode {
                ip: ip.to_string(),
                display_name: format!("{} ({}, {})", hostname, country, city),
                active,
            },
        ))
    }
}

/// Parse the full listing into a merged directory
///
/// Private nodes are inserted first, so a provider node that produces the
/// same key replaces the private one.
pub fn parse_exit_node_list(output: &str) -> ExitNodeMap {
    let mut private = Vec::new();
    let mut provider = Vec::new();

    for line in output.lines() {
        match parse_row(line) {
            Some((NodeClass::Private, node)) => private.push(node),
            Some((NodeClass::Provider, node)) => provider.push(node),
            None => continue,
        }
    }

    let mut nodes = ExitNodeMap::new();
    for node in private {
        nodes.insert(node.display_name.clone(), node);
    }
    for node in provider {
        if let Some(replaced) = nodes.insert(node.display_name.clone(), node) {
            warn!(
                "Provider exit node shadows private node {} ({})",
                replaced.display_name, replaced.ip
            );
        }
    }
    nodes
}

/// Queries the Tailscale client for exit nodes
#[derive(Clone)]
pub struct ExitNodeDirectory {
    runner: Arc<dyn CommandRunner>,
}

impl ExitNodeDirectory {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// List all exit nodes currently advertised to this host
    pub async fn list(&self) -> Result<ExitNodeMap, DirectoryError> {
        let output = self
            .runner
            .run("tailscale", &args(["exit-node", "list"]))
            .await?;

        if !output.success() {
            return Err(DirectoryError::DirectoryUnavailable(format!(
                "tailscale exit-node list exited with {:?}: {}",
                output.status,
                output.stderr.trim()
            )));
        }

        let nodes = parse_exit_node_list(&output.stdout);
        debug!("Found {} exit nodes", nodes.len());
        Ok(nodes)
    }

    /// Look up a single node by display name from a fresh listing
    pub async fn get(&self, name: &str) -> Result<Option<ExitNode>, DirectoryError> {
        Ok(self.list().await?.remove(name))
    }

    /// Whether the Tailscale daemon answers `tailscale status`
    pub async fn is_running(&self) -> bool {
        match self.runner.run("tailscale", &args(["status"])).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("tailscale status failed: {}", e);
                false
            }
        }
    }
}
