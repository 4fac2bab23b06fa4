//! Host eligibility predicate.
//!
//! A host can take a new process of replica set `S` when:
//! - the required port and directory are free,
//! - no process of `S` runs there yet,
//! - it is not launched by an auto-scaling group (if an unmanaged process is requested),
//! - it sits in a different availability zone than the master (if anti-affinity is requested).

use std::fmt;

use landscape_core::{Host, MachineImage};

/// What the new process needs from its host.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityConstraints {
    pub server_name: String,
    pub port: u16,
    pub directory: String,
    /// Reject hosts managed by an auto-scaling group.
    pub require_unmanaged: bool,
    /// Anti-affinity: reject hosts in this availability zone.
    pub avoid_availability_zone: Option<String>,
    /// Tried first; re-fetched before the check so the snapshot is current.
    pub preferred_host: Option<Host>,
    /// Instance type of a host launched when nothing eligible exists.
    pub instance_type: Option<String>,
    pub image: Option<MachineImage>,
    pub key_name: Option<String>,
}

impl EligibilityConstraints {
    pub fn new(server_name: &str, port: u16, directory: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            port,
            directory: directory.to_string(),
            require_unmanaged: false,
            avoid_availability_zone: None,
            preferred_host: None,
            instance_type: None,
            image: None,
            key_name: None,
        }
    }

    pub fn unmanaged(mut self) -> Self {
        self.require_unmanaged = true;
        self
    }

    pub fn away_from(mut self, availability_zone: &str) -> Self {
        self.avoid_availability_zone = Some(availability_zone.to_string());
        self
    }

    pub fn preferring(mut self, host: Option<Host>) -> Self {
        self.preferred_host = host;
        self
    }

    pub fn with_instance_type(mut self, instance_type: Option<String>) -> Self {
        self.instance_type = instance_type;
        self
    }

    pub fn with_key_name(mut self, key_name: Option<String>) -> Self {
        self.key_name = key_name;
        self
    }

    pub fn with_image(mut self, image: Option<MachineImage>) -> Self {
        self.image = image;
        self
    }
}

/// Why a host was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    PortInUse(u16),
    DirectoryInUse(String),
    AlreadyRunsServer(String),
    ManagedByAutoScalingGroup(String),
    SameAvailabilityZone(String),
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortInUse(port) => write!(f, "port {port} in use"),
            Self::DirectoryInUse(dir) => write!(f, "directory {dir} in use"),
            Self::AlreadyRunsServer(name) => write!(f, "already runs {name}"),
            Self::ManagedByAutoScalingGroup(asg) => write!(f, "managed by auto-scaling group {asg}"),
            Self::SameAvailabilityZone(az) => write!(f, "in master's availability zone {az}"),
        }
    }
}

/// First reason the host cannot take the process, or `None` if it can.
pub fn check_host(host: &Host, constraints: &EligibilityConstraints) -> Option<Ineligibility> {
    if constraints.require_unmanaged {
        if let Some(asg) = &host.auto_scaling_group {
            return Some(Ineligibility::ManagedByAutoScalingGroup(asg.clone()));
        }
    }
    if host.port_in_use(constraints.port) {
        return Some(Ineligibility::PortInUse(constraints.port));
    }
    if host.directory_in_use(&constraints.directory) {
        return Some(Ineligibility::DirectoryInUse(constraints.directory.clone()));
    }
    if host.runs_server(&constraints.server_name) {
        return Some(Ineligibility::AlreadyRunsServer(
            constraints.server_name.clone(),
        ));
    }
    if let Some(az) = &constraints.avoid_availability_zone {
        if host.availability_zone == *az {
            return Some(Ineligibility::SameAvailabilityZone(az.clone()));
        }
    }
    None
}

pub fn is_eligible(host: &Host, constraints: &EligibilityConstraints) -> bool {
    check_host(host, constraints).is_none()
}
