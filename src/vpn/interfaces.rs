//! Network interface detection
//!
//! Nothing here is cached: interfaces come and go (USB ethernet, wifi
//! reconnects) so every call re-reads live state from `ip`.

use crate::platform::{args, check, CommandRunner};
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("No default route found: {0}")]
    NoDefaultRoute(String),
    #[error("Failed to list interfaces: {0}")]
    ListFailed(String),
}

/// Extract the device of the first default route from `ip route show default`
pub fn parse_default_route(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("default"))
        .find_map(|line| {
            let mut tokens = line.split_whitespace();
            while let Some(token) = tokens.next() {
                if token == "dev" {
                    return tokens.next().map(str::to_string);
                }
            }
            None
        })
}

/// Extract interface names from `ip -o link show`
///
/// Lines look like `3: eth0.10@eth0: <BROADCAST,...> mtu 1500 ...`.
pub fn parse_link_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|name| name.trim_end_matches(':'))
        .map(|name| name.split('@').next().unwrap_or(name))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract the first IPv4 address from `ip -o -4 addr show dev <iface>`
pub fn parse_ipv4_address(output: &str) -> Option<Ipv4Addr> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "inet" {
            return tokens
                .next()
                .and_then(|cidr| cidr.split('/').next())
                .and_then(|addr| addr.parse().ok());
        }
    }
    None
}

#[derive(Clone)]
pub struct InterfaceDetector {
    runner: Arc<dyn CommandRunner>,
    vpn_interface: String,
}

impl InterfaceDetector {
    pub fn new(runner: Arc<dyn CommandRunner>, vpn_interface: impl Into<String>) -> Self {
        Self {
            runner,
            vpn_interface: vpn_interface.into(),
        }
    }

    /// Interface carrying the default route
    pub async fn active_wan(&self) -> Result<String, InterfaceError> {
        let output = check(
            self.runner.as_ref(),
            "ip",
            &args(["route", "show", "default"]),
        )
        .await
        .map_err(|e| InterfaceError::NoDefaultRoute(e.to_string()))?;

        let iface = parse_default_route(&output.stdout).ok_or_else(|| {
            InterfaceError::NoDefaultRoute("no default route with a device".to_string())
        })?;

        info!("Detected active internet interface: {}", iface);
        Ok(iface)
    }

    /// Every interface except loopback, the WAN and the VPN interface
    pub async fn lan_interfaces(&self) -> Result<Vec<String>, InterfaceError> {
        let wan = self.active_wan().await?;
        self.lan_interfaces_for(&wan).await
    }

    /// LAN interfaces given an already detected WAN interface
    pub async fn lan_interfaces_for(&self, wan: &str) -> Result<Vec<String>, InterfaceError> {
        let output = check(self.runner.as_ref(), "ip", &args(["-o", "link", "show"]))
            .await
            .map_err(|e| InterfaceError::ListFailed(e.to_string()))?;

        let lans: Vec<String> = parse_link_names(&output.stdout)
            .into_iter()
            .filter(|name| name != "lo" && name != wan && *name != self.vpn_interface)
            .collect();

        debug!("LAN interfaces: {:?}", lans);
        Ok(lans)
    }

    /// First IPv4 address on an interface, if any
    pub async fn ipv4_address(&self, iface: &str) -> Option<Ipv4Addr> {
        let output = check(
            self.runner.as_ref(),
            "ip",
            &args(["-o", "-4", "addr", "show", "dev", iface]),
        )
        .await
        .ok()?;
        parse_ipv4_address(&output.stdout)
    }
}
