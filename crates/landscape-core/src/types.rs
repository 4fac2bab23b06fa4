//! Domain types for the replica-set landscape.
//!
//! These types are snapshots of cloud resources as observed at query time.
//! They are plain values: mutating a resource always goes through a
//! [`CloudLandscape`](crate::provider::CloudLandscape) call, never through
//! these structs.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::configuration::ApplicationConfiguration;

/// Cloud instance identifier.
pub type HostId = String;

/// Cloud region identifier (e.g. `eu-west-1`).
pub type Region = String;

// ── Release ───────────────────────────────────────────────────────

/// A named build of the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
}

impl Release {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Which release an operation should install.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseSelector {
    /// The most recent master build.
    #[default]
    Latest,
    Named(String),
}

impl ReleaseSelector {
    /// Parse a command-line style release argument; `latest` (any case) selects the newest build.
    pub fn from_arg(arg: &str) -> Self {
        if arg.eq_ignore_ascii_case("latest") {
            Self::Latest
        } else {
            Self::Named(arg.to_string())
        }
    }
}

// ── Host ──────────────────────────────────────────────────────────

/// A (port, directory) pair occupied by one application process on a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessSlot {
    pub port: u16,
    pub directory: String,
    /// Replica-set name of the process occupying the slot.
    pub server_name: String,
}

/// Lifecycle state of a cloud instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Pending,
    Running,
    Stopping,
    Terminated,
}

/// A cloud compute instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub region: Region,
    pub availability_zone: String,
    pub instance_type: String,
    pub tags: HashMap<String, String>,
    /// Name of the auto-scaling group that launched this host, if any.
    pub auto_scaling_group: Option<String>,
    /// Slots in use at the time of the snapshot.
    pub slots: Vec<ProcessSlot>,
}

impl Host {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn is_managed_by_auto_scaling_group(&self) -> bool {
        self.auto_scaling_group.is_some()
    }

    /// Whether the host was launched by the named auto-scaling group.
    pub fn is_managed_by(&self, auto_scaling_group: &str) -> bool {
        self.auto_scaling_group.as_deref() == Some(auto_scaling_group)
    }

    pub fn port_in_use(&self, port: u16) -> bool {
        self.slots.iter().any(|s| s.port == port)
    }

    pub fn directory_in_use(&self, directory: &str) -> bool {
        self.slots.iter().any(|s| s.directory == directory)
    }

    /// Whether a process of the named replica set already runs here.
    pub fn runs_server(&self, server_name: &str) -> bool {
        self.slots.iter().any(|s| s.server_name == server_name)
    }
}

/// Parameters for launching a new instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLaunchRequest {
    pub region: Region,
    pub instance_type: String,
    /// Machine image; `None` lets the landscape pick the latest application image.
    pub image: Option<MachineImage>,
    pub availability_zone: Option<String>,
    pub key_name: Option<String>,
    pub name: String,
    pub tags: HashMap<String, String>,
}

/// A bootable machine image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineImage {
    pub id: String,
    pub image_type: String,
    /// Unix timestamp (seconds) of image creation.
    pub created_at: u64,
}

// ── Process ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    Master,
    Replica,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Replica => f.write_str("replica"),
        }
    }
}

/// Replication status as reported by a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReplicationState {
    /// Write-authoritative; not replicating from anyone.
    Primary,
    Replicating { master_hostname: String },
    Stopped,
}

/// One running application instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub host: Host,
    pub port: u16,
    pub directory: String,
    pub server_name: String,
    pub release: Release,
    pub role: ProcessRole,
    pub replication: ReplicationState,
}

impl Process {
    /// `host:port` identity; at most one process occupies it.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host.id, self.port)
    }

    /// Two snapshots describe the same process when they share host and port.
    pub fn same_process(&self, other: &Process) -> bool {
        self.host.id == other.host.id && self.port == other.port
    }

    pub fn is_master(&self) -> bool {
        self.role == ProcessRole::Master
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.role, self.server_name, self.endpoint())
    }
}

// ── Target groups ─────────────────────────────────────────────────

/// A load-balancer target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub name: String,
    pub arn: String,
    pub region: Region,
    pub port: u16,
    pub targets: Vec<HostId>,
}

impl TargetGroup {
    pub fn contains(&self, host_id: &str) -> bool {
        self.targets.iter().any(|t| t == host_id)
    }
}

// ── Auto-scaling ──────────────────────────────────────────────────

/// Template from which an auto-scaling group launches replica hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfiguration {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    /// Configuration of the replica process each launched host runs.
    pub replica_configuration: ApplicationConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    pub name: String,
    pub region: Region,
    pub launch_configuration: LaunchConfiguration,
    pub min_size: u32,
    pub max_size: u32,
    /// Name of the public target group launched instances register with.
    pub target_group: String,
    pub tags: HashMap<String, String>,
}

// ── Load balancers ────────────────────────────────────────────────

/// Redirect target of a listener rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub path: String,
    pub query: Option<String>,
}

impl Redirect {
    pub fn to_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: None,
        }
    }
}

impl Default for Redirect {
    fn default() -> Self {
        Self::to_path("/")
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Some(q) => write!(f, "{}?{}", self.path, q),
            None => f.write_str(&self.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    HostHeader { host: String },
    PathPattern { pattern: String },
    HttpHeader { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Forward { target_group: String },
    Redirect(Redirect),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRule {
    /// Assigned by the landscape on creation; empty for rules not yet created.
    pub arn: String,
    /// `None` marks the listener's default rule.
    pub priority: Option<u32>,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
}

impl ListenerRule {
    pub fn is_default(&self) -> bool {
        self.priority.is_none()
    }

    pub fn matches_host(&self, hostname: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| matches!(c, RuleCondition::HostHeader { host } if host == hostname))
    }

    pub fn forwards_to(&self, target_group: &str) -> bool {
        matches!(&self.action, RuleAction::Forward { target_group: tg } if tg == target_group)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    pub arn: String,
    pub region: Region,
    pub dns_name: String,
    pub rules: Vec<ListenerRule>,
}

impl LoadBalancer {
    /// True when nothing but (at most) the default rule remains.
    pub fn has_only_default_rules(&self) -> bool {
        self.rules.iter().all(ListenerRule::is_default)
    }
}

/// A CNAME record mapping a hostname to a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub hosted_zone_id: String,
    pub hostname: String,
    pub value: String,
}

// ── Replica set ───────────────────────────────────────────────────

/// Snapshot of one application replica set, assembled per orchestration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSet {
    pub name: String,
    /// Public hostname served by the load balancer.
    pub hostname: String,
    pub master: Process,
    pub replicas: Vec<Process>,
    pub master_target_group: TargetGroup,
    pub public_target_group: TargetGroup,
    pub auto_scaling_group: Option<AutoScalingGroup>,
    pub load_balancer: LoadBalancer,
    /// Listener rules routing this replica set's hostname.
    pub rules: Vec<ListenerRule>,
    pub dns_record: Option<DnsRecord>,
}

impl ReplicaSet {
    /// Port shared by master and replicas.
    pub fn port(&self) -> u16 {
        self.master.port
    }

    pub fn release(&self) -> &Release {
        &self.master.release
    }

    /// Redirect installed for requests to the bare hostname.
    pub fn default_redirect(&self) -> Option<&Redirect> {
        self.rules.iter().find_map(|r| match &r.action {
            RuleAction::Redirect(redirect) if r.matches_host(&self.hostname) => Some(redirect),
            _ => None,
        })
    }

    /// Whether a replica's host was launched by this replica set's auto-scaling group.
    pub fn is_auto_scaled(&self, replica: &Process) -> bool {
        self.auto_scaling_group
            .as_ref()
            .is_some_and(|asg| replica.host.is_managed_by(&asg.name))
    }

    /// Replicas launched explicitly rather than by the auto-scaling group.
    pub fn unmanaged_replicas(&self) -> impl Iterator<Item = &Process> {
        self.replicas.iter().filter(|r| !self.is_auto_scaled(r))
    }

    /// Whether the hostname is CNAME-mapped to this replica set's load balancer.
    pub fn is_dns_mapped(&self) -> bool {
        self.dns_record
            .as_ref()
            .is_some_and(|r| r.value.trim_end_matches('.') == self.load_balancer.dns_name)
    }
}

impl fmt::Display for ReplicaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, master {}, {} replica(s))",
            self.name,
            self.hostname,
            self.master.endpoint(),
            self.replicas.len()
        )
    }
}
