//! NAT and forwarding configuration for a routing mode
//!
//! `iptables` has no multi-rule transaction, so every apply flushes the NAT
//! table and FORWARD chain and rebuilds them from scratch. Re-applying the
//! same mode converges to the same rule set even after a partial failure.
//!
//! An apply is built as a [`RoutingPlan`]: an ordered list of [`Step`]s, each
//! tagged with a [`FailurePolicy`], plus follow-up [`BackgroundJob`]s that
//! run detached once the rules are in place.

use crate::platform::{args, check, CommandRunner};
use crate::vpn::background::{BackgroundJob, BackgroundTasks};
use crate::vpn::exit_nodes::{DirectoryError, ExitNodeDirectory};
use crate::vpn::interfaces::{InterfaceDetector, InterfaceError};
use crate::vpn::mode::Mode;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("exit node not found: {0}")]
    NodeNotFound(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("Tailscale refused exit node change: {0}")]
    ClientConfigFailed(String),
    #[error("Failed to install firewall rule: {0}")]
    RuleInstallFailed(String),
}

impl RoutingError {
    /// HTTP status code for API responses
    pub fn http_status(&self) -> u16 {
        match self {
            RoutingError::NodeNotFound(_) => 400,
            RoutingError::Directory(_) => 503,
            RoutingError::ClientConfigFailed(_) => 500,
            RoutingError::RuleInstallFailed(_) => 500,
        }
    }
}

/// What happens when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the apply and report the error
    Fatal,
    /// Log and keep going
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Clears previously installed rules
    Flush,
    /// Kernel forwarding and conntrack tuning
    Kernel,
    /// Tailscale exit node selection
    ClientConfig,
    /// Adds a NAT or FORWARD rule
    Rule,
}

/// A single command in a routing plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub description: String,
    pub program: String,
    pub args: Vec<String>,
    pub policy: FailurePolicy,
}

impl Step {
    fn new(kind: StepKind, description: impl Into<String>, program: &str, args: Vec<String>) -> Self {
        let policy = match kind {
            StepKind::Flush | StepKind::Kernel => FailurePolicy::BestEffort,
            StepKind::ClientConfig | StepKind::Rule => FailurePolicy::Fatal,
        };
        Self {
            kind,
            description: description.into(),
            program: program.to_string(),
            args,
            policy,
        }
    }

    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Everything an apply will do, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingPlan {
    pub steps: Vec<Step>,
    pub background: Vec<BackgroundJob>,
}

impl RoutingPlan {
    /// Command lines of the rules this plan installs
    pub fn rules(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Rule)
            .map(Step::command_line)
            .collect()
    }
}

/// Tunables for rule generation
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    pub vpn_interface: String,
    pub fallback_wan_interface: String,
    pub direct_probe_address: String,
    pub conntrack_tcp_established_secs: u32,
    pub conntrack_udp_stream_secs: u32,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            vpn_interface: "tailscale0".to_string(),
            fallback_wan_interface: "eth0".to_string(),
            direct_probe_address: "1.1.1.1".to_string(),
            conntrack_tcp_established_secs: 7440,
            conntrack_udp_stream_secs: 300,
        }
    }
}

pub struct RoutingConfigurator {
    runner: Arc<dyn CommandRunner>,
    directory: ExitNodeDirectory,
    detector: InterfaceDetector,
    background: BackgroundTasks,
    settings: RoutingSettings,
    installed: Mutex<Vec<String>>,
}

impl RoutingConfigurator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        directory: ExitNodeDirectory,
        detector: InterfaceDetector,
        background: BackgroundTasks,
        settings: RoutingSettings,
    ) -> Self {
        Self {
            runner,
            directory,
            detector,
            background,
            settings,
            installed: Mutex::new(Vec::new()),
        }
    }

    pub fn directory(&self) -> &ExitNodeDirectory {
        &self.directory
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Rules added by this configurator and not flushed since
    pub fn installed_rules(&self) -> Vec<String> {
        self.installed.lock().clone()
    }

    /// Configure the host for `mode`.
    ///
    /// Returns the follow-up jobs instead of launching them, so a caller
    /// holding a lock can hand them to [`BackgroundTasks::spawn`] after
    /// releasing it.
    pub async fn apply(&self, mode: &Mode) -> Result<Vec<BackgroundJob>, RoutingError> {
        let plan = self.plan(mode).await?;
        self.execute(&plan.steps).await?;
        info!("Routing configured for mode {}", mode);
        Ok(plan.background)
    }

    /// Build the plan for `mode` from live system state
    pub async fn plan(&self, mode: &Mode) -> Result<RoutingPlan, RoutingError> {
        match mode {
            Mode::ExitNode(name) => self.plan_exit_node(name).await,
            Mode::Direct => self.plan_direct().await,
        }
    }

    async fn plan_exit_node(&self, name: &str) -> Result<RoutingPlan, RoutingError> {
        let node = self
            .directory
            .get(name)
            .await?
            .ok_or_else(|| RoutingError::NodeNotFound(name.to_string()))?;

        let lans = match self.detector.lan_interfaces().await {
            Ok(lans) => Some(lans),
            Err(e) => {
                warn!("LAN interface detection failed: {}", e);
                None
            }
        };

        let vpn = self.settings.vpn_interface.clone();
        let mut steps = self.preparation_steps();
        steps.push(Step::new(
            StepKind::ClientConfig,
            format!("set exit node {}", node.display_name),
            "tailscale",
            vec!["set".to_string(), format!("--exit-node={}", node.ip)],
        ));
        steps.push(masquerade(&vpn));
        steps.extend(forward_rules(lans.as_deref(), &vpn));

        let mut background = vec![probe(&node.ip)];
        background.extend(self.announce_jobs(lans.as_deref()).await);

        info!("Using interface for NAT: {}", vpn);
        Ok(RoutingPlan { steps, background })
    }

    async fn plan_direct(&self) -> Result<RoutingPlan, RoutingError> {
        let wan = match self.detector.active_wan().await {
            Ok(wan) => Some(wan),
            Err(e) => {
                warn!(
                    "{}, defaulting to {}",
                    e, self.settings.fallback_wan_interface
                );
                None
            }
        };

        let lans = match &wan {
            Some(wan) => self.detector.lan_interfaces_for(wan).await,
            None => Err(InterfaceError::NoDefaultRoute("WAN detection failed".to_string())),
        };
        let lans = match lans {
            Ok(lans) => Some(lans),
            Err(e) => {
                warn!("LAN interface detection failed: {}", e);
                None
            }
        };

        let wan = wan.unwrap_or_else(|| self.settings.fallback_wan_interface.clone());

        let mut steps = self.preparation_steps();
        steps.push(Step::new(
            StepKind::ClientConfig,
            "clear exit node",
            "tailscale",
            args(["set", "--exit-node="]),
        ));
        steps.push(masquerade(&wan));
        steps.extend(forward_rules(lans.as_deref(), &wan));

        let mut background = vec![probe(&self.settings.direct_probe_address)];
        background.extend(self.announce_jobs(lans.as_deref()).await);

        info!("Using interface for NAT: {}", wan);
        Ok(RoutingPlan { steps, background })
    }

    /// Flush, forwarding and conntrack steps shared by every mode
    fn preparation_steps(&self) -> Vec<Step> {
        vec![
            Step::new(StepKind::Flush, "flush NAT table", "iptables", args(["-t", "nat", "-F"])),
            Step::new(StepKind::Flush, "flush FORWARD chain", "iptables", args(["-F", "FORWARD"])),
            Step::new(
                StepKind::Kernel,
                "enable IP forwarding",
                "sysctl",
                args(["-w", "net.ipv4.ip_forward=1"]),
            ),
            Step::new(
                StepKind::Kernel,
                "load conntrack module",
                "modprobe",
                args(["nf_conntrack"]),
            ),
            Step::new(
                StepKind::Kernel,
                "raise TCP conntrack timeout",
                "sysctl",
                vec![
                    "-w".to_string(),
                    format!(
                        "net.netfilter.nf_conntrack_tcp_timeout_established={}",
                        self.settings.conntrack_tcp_established_secs
                    ),
                ],
            ),
            Step::new(
                StepKind::Kernel,
                "raise UDP conntrack timeout",
                "sysctl",
                vec![
                    "-w".to_string(),
                    format!(
                        "net.netfilter.nf_conntrack_udp_timeout_stream={}",
                        self.settings.conntrack_udp_stream_secs
                    ),
                ],
            ),
        ]
    }

    /// Neighbour/route cache flush and gratuitous ARP on each LAN
    async fn announce_jobs(&self, lans: Option<&[String]>) -> Vec<BackgroundJob> {
        let mut jobs = vec![
            BackgroundJob::new("flush ARP cache", "ip", args(["neigh", "flush", "all"])),
            BackgroundJob::new("flush route cache", "ip", args(["route", "flush", "cache"])),
        ];

        for lan in lans.unwrap_or_default() {
            match self.detector.ipv4_address(lan).await {
                Some(addr) => jobs.push(BackgroundJob::new(
                    format!("ARP announce on {}", lan),
                    "arping",
                    vec![
                        "-U".to_string(),
                        "-c".to_string(),
                        "1".to_string(),
                        "-I".to_string(),
                        lan.clone(),
                        addr.to_string(),
                    ],
                )),
                None => debug!("No IPv4 address on {}, skipping ARP announce", lan),
            }
        }
        jobs
    }

    async fn execute(&self, steps: &[Step]) -> Result<(), RoutingError> {
        for step in steps {
            match check(self.runner.as_ref(), &step.program, &step.args).await {
                Ok(_) => {
                    debug!("{}: ok", step.description);
                    self.track(step);
                }
                Err(e) => match step.policy {
                    FailurePolicy::BestEffort => {
                        warn!("{} failed (continuing): {}", step.description, e);
                    }
                    FailurePolicy::Fatal => {
                        error!("{} failed: {}", step.description, e);
                        return Err(match step.kind {
                            StepKind::ClientConfig => RoutingError::ClientConfigFailed(e.to_string()),
                            _ => RoutingError::RuleInstallFailed(e.to_string()),
                        });
                    }
                },
            }
        }
        Ok(())
    }

    fn track(&self, step: &Step) {
        let mut installed = self.installed.lock();
        match step.kind {
            StepKind::Flush => {
                let flushed = iptables_table(&step.args);
                installed.retain(|rule| rule_table(rule) != flushed);
            }
            StepKind::Rule => installed.push(step.command_line()),
            StepKind::Kernel | StepKind::ClientConfig => {}
        }
    }
}

/// Table an iptables invocation targets, `filter` unless `-t` says otherwise
fn iptables_table(args: &[String]) -> &str {
    args.iter()
        .position(|a| a == "-t")
        .and_then(|i| args.get(i + 1))
        .map_or("filter", String::as_str)
}

fn rule_table(command_line: &str) -> &str {
    let mut tokens = command_line.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "-t" {
            return tokens.next().unwrap_or("filter");
        }
    }
    "filter"
}

fn masquerade(out_interface: &str) -> Step {
    Step::new(
        StepKind::Rule,
        format!("masquerade on {}", out_interface),
        "iptables",
        args(["-t", "nat", "-A", "POSTROUTING", "-o", out_interface, "-j", "MASQUERADE"]),
    )
}

/// Stateful forwarding between each LAN and `egress`.
///
/// Without LAN information a single permissive rule keeps traffic flowing.
fn forward_rules(lans: Option<&[String]>, egress: &str) -> Vec<Step> {
    let Some(lans) = lans else {
        warn!("Degraded mode: accepting all forwarded traffic");
        return vec![Step::new(
            StepKind::Rule,
            "permissive forward",
            "iptables",
            args(["-A", "FORWARD", "-j", "ACCEPT"]),
        )];
    };

    let mut steps = Vec::with_capacity(lans.len() * 2);
    for lan in lans {
        steps.push(Step::new(
            StepKind::Rule,
            format!("forward {} -> {}", lan, egress),
            "iptables",
            args([
                "-A", "FORWARD", "-i", lan.as_str(), "-o", egress, "-m", "conntrack", "--ctstate",
                "NEW,ESTABLISHED,RELATED", "-j", "ACCEPT",
            ]),
        ));
        steps.push(Step::new(
            StepKind::Rule,
            format!("forward {} -> {}", egress, lan),
            "iptables",
            args([
                "-A", "FORWARD", "-i", egress, "-o", lan.as_str(), "-m", "conntrack", "--ctstate",
                "ESTABLISHED,RELATED", "-j", "ACCEPT",
            ]),
        ));
    }
    steps
}

fn probe(address: &str) -> BackgroundJob {
    BackgroundJob::new(
        format!("liveness probe {}", address),
        "ping",
        args(["-c", "2", "-W", "1", address]),
    )
}
