//! Tailscale Router - exit node routing for a Linux LAN gateway
//!
//! This crate turns a Linux host (typically a Raspberry Pi) into a router
//! whose LAN clients reach the internet either directly through the host's
//! WAN link or through a chosen Tailscale exit node. It drives `tailscale`,
//! `iptables`, `sysctl` and `ip` and exposes a small authenticated HTTP API
//! for switching between the two.
//!
//! # Architecture
//!
//! - `platform`: External command execution behind the `CommandRunner` trait
//! - `vpn`: Exit node discovery, interface detection, rule installation and
//!   the mode state machine
//! - `api`: HTTP control API with session-cookie auth
//! - `config`: Configuration file handling (TOML)
//! - `preflight`: Root and Tailscale checks before the daemon starts
//!
//! # Usage
//!
//! ```bash
//! sudo tailscale-router serve --config /etc/tailscale-router.toml
//! ```

pub mod api;
pub mod config;
pub mod platform;
pub mod preflight;
pub mod vpn;

pub use config::Config;
pub use vpn::{Mode, RouterState};
