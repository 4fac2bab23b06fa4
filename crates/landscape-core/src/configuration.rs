//! Application configurations handed to deployment procedures.
//!
//! Plain immutable values built by [`ApplicationConfiguration::master`] and
//! [`ApplicationConfiguration::replica`]. Optional settings are explicit
//! `Option`s and enums rather than sentinel values.

use serde::{Deserialize, Serialize};

use crate::types::{ProcessRole, Region, Release};

/// How much memory the application process may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MemorySizing {
    /// Let the process take the usual large share of the host's RAM.
    #[default]
    Default,
    Megabytes(u32),
    /// Divide the host's RAM by this factor.
    TotalSizeFactor(u32),
}

impl MemorySizing {
    /// An explicit megabyte value wins over a size factor.
    pub fn from_options(megabytes: Option<u32>, total_size_factor: Option<u32>) -> Self {
        match (megabytes, total_size_factor) {
            (Some(mb), _) => Self::Megabytes(mb),
            (None, Some(factor)) => Self::TotalSizeFactor(factor),
            (None, None) => Self::Default,
        }
    }
}

/// Inbound replication settings of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSettings {
    pub bearer_token: String,
    /// Hostname to replicate from; `None` for a master.
    pub master_hostname: Option<String>,
}

/// Everything a deployment procedure needs to install one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfiguration {
    pub server_name: String,
    pub region: Region,
    pub release: Release,
    pub role: ProcessRole,
    /// Fixed port; `None` lets the procedure pick a free one on the host.
    pub port: Option<u16>,
    pub replication: ReplicationSettings,
    pub memory: MemorySizing,
}

impl ApplicationConfiguration {
    pub fn master(
        server_name: &str,
        region: &str,
        release: Release,
        bearer_token: &str,
        memory: MemorySizing,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            region: region.to_string(),
            release,
            role: ProcessRole::Master,
            port: None,
            replication: ReplicationSettings {
                bearer_token: bearer_token.to_string(),
                master_hostname: None,
            },
            memory,
        }
    }

    /// Replicas run on the master's port so both fit the same target groups,
    /// and replicate through the public hostname rather than the master's port.
    pub fn replica(
        server_name: &str,
        region: &str,
        release: Release,
        master_port: u16,
        master_hostname: &str,
        bearer_token: &str,
        memory: MemorySizing,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            region: region.to_string(),
            release,
            role: ProcessRole::Replica,
            port: Some(master_port),
            replication: ReplicationSettings {
                bearer_token: bearer_token.to_string(),
                master_hostname: Some(master_hostname.to_string()),
            },
            memory,
        }
    }

    /// Same configuration pinned to a concrete port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_release(mut self, release: Release) -> Self {
        self.release = release;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_megabytes_win_over_factor() {
        assert_eq!(
            MemorySizing::from_options(Some(4096), Some(3)),
            MemorySizing::Megabytes(4096)
        );
        assert_eq!(
            MemorySizing::from_options(None, Some(3)),
            MemorySizing::TotalSizeFactor(3)
        );
        assert_eq!(MemorySizing::from_options(None, None), MemorySizing::Default);
    }

    #[test]
    fn replica_pins_master_port_and_hostname() {
        let cfg = ApplicationConfiguration::replica(
            "regatta42",
            "eu-west-1",
            Release::new("build-1"),
            8888,
            "regatta42.example.com",
            "token",
            MemorySizing::Default,
        );
        assert_eq!(cfg.role, ProcessRole::Replica);
        assert_eq!(cfg.port, Some(8888));
        assert_eq!(
            cfg.replication.master_hostname.as_deref(),
            Some("regatta42.example.com")
        );
    }

    #[test]
    fn master_leaves_port_open() {
        let cfg = ApplicationConfiguration::master(
            "regatta42",
            "eu-west-1",
            Release::new("build-1"),
            "token",
            MemorySizing::Megabytes(2048),
        );
        assert_eq!(cfg.role, ProcessRole::Master);
        assert!(cfg.port.is_none());
        assert!(cfg.replication.master_hostname.is_none());
        assert_eq!(cfg.with_port(8890).port, Some(8890));
    }
}
