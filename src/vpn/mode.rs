//! Routing mode and its on-disk form
//!
//! The mode file holds a single JSON object, `{"mode": "direct"}` or
//! `{"mode": "tailscale:<exit node name>"}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

const DIRECT: &str = "direct";
const EXIT_NODE_PREFIX: &str = "tailscale:";

/// Default location of the persisted mode
pub const DEFAULT_MODE_FILE: &str = "/etc/tailscale-mode.json";

#[derive(Error, Debug)]
pub enum ModeError {
    #[error("Unknown mode: {0}")]
    UnknownMode(String),
    #[error("Failed to access mode file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize mode: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where outbound traffic leaves this host
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    /// Straight out of the WAN interface
    #[default]
    Direct,
    /// Through the named Tailscale exit node
    ExitNode(String),
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Direct => f.write_str(DIRECT),
            Mode::ExitNode(name) => write!(f, "{}{}", EXIT_NODE_PREFIX, name),
        }
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == DIRECT {
            return Ok(Mode::Direct);
        }
        match s.strip_prefix(EXIT_NODE_PREFIX) {
            Some(name) if !name.is_empty() => Ok(Mode::ExitNode(name.to_string())),
            _ => Err(ModeError::UnknownMode(s.to_string())),
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serialized form of the mode file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedModeState {
    pub mode: Mode,
}

/// Reads and writes the persisted mode
#[derive(Debug, Clone)]
pub struct ModeStore {
    path: PathBuf,
}

impl ModeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved mode, falling back to [`Mode::Direct`] on any problem
    pub fn load(&self) -> Mode {
        match self.try_load() {
            Ok(Some(mode)) => mode,
            Ok(None) => {
                info!("No previous mode found, defaulting to direct");
                Mode::Direct
            }
            Err(e) => {
                warn!("Error reading mode file {}: {}, defaulting to direct", self.path.display(), e);
                Mode::Direct
            }
        }
    }

    /// Load the saved mode, `Ok(None)` when no file exists
    pub fn try_load(&self) -> Result<Option<Mode>, ModeError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: PersistedModeState = serde_json::from_str(&content)?;
        Ok(Some(state.mode))
    }

    /// Persist `mode`, replacing the file atomically
    pub fn save(&self, mode: &Mode) -> Result<(), ModeError> {
        let state = PersistedModeState { mode: mode.clone() };
        let content = serde_json::to_string(&state)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Default for ModeStore {
    fn default() -> Self {
        Self::new(DEFAULT_MODE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(temp_dir: &TempDir) -> ModeStore {
        ModeStore::new(temp_dir.path().join("tailscale-mode.json"))
    }

    #[test]
    fn test_mode_string_forms() {
        assert_eq!(Mode::Direct.to_string(), "direct");
        assert_eq!(
            Mode::ExitNode("nodeA (US, NYC)".to_string()).to_string(),
            "tailscale:nodeA (US, NYC)"
        );

        assert_eq!("direct".parse::<Mode>().unwrap(), Mode::Direct);
        assert_eq!(
            "tailscale:homeserver".parse::<Mode>().unwrap(),
            Mode::ExitNode("homeserver".to_string())
        );
    }

    #[test]
    fn test_unknown_modes_rejected() {
        assert!(matches!("".parse::<Mode>(), Err(ModeError::UnknownMode(_))));
        assert!("tailscale:".parse::<Mode>().is_err());
        assert!("Direct".parse::<Mode>().is_err());
        assert!("wireguard:foo".parse::<Mode>().is_err());
    }

    #[test]
    fn test_persisted_json_shape() {
        let state = PersistedModeState {
            mode: Mode::ExitNode("nodeA (US, NYC)".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&state).unwrap(),
            r#"{"mode":"tailscale:nodeA (US, NYC)"}"#
        );
    }

    #[test]
    fn test_missing_file_is_direct() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        assert!(store.try_load().unwrap().is_none());
        assert_eq!(store.load(), Mode::Direct);
    }

    #[test]
    fn test_corrupt_file_is_direct() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        fs::write(store.path(), "{not json").unwrap();
        assert!(store.try_load().is_err());
        assert_eq!(store.load(), Mode::Direct);

        fs::write(store.path(), r#"{"mode":"bogus"}"#).unwrap();
        assert_eq!(store.load(), Mode::Direct);
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let mode = Mode::ExitNode("homeserver".to_string());

        store.save(&mode).unwrap();
        assert_eq!(store.load(), mode);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"mode":"tailscale:homeserver"}"#);

        store.save(&Mode::Direct).unwrap();
        assert_eq!(store.load(), Mode::Direct);
    }

    #[test]
    fn test_loads_direct_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        fs::write(store.path(), r#"{"mode":"direct"}"#).unwrap();
        assert_eq!(store.try_load().unwrap(), Some(Mode::Direct));
    }
}
