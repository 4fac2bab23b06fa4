//! landscape.toml configuration parser.
//!
//! Every field has a default, so an empty file yields the same result as
//! [`LandscapeConfig::default`]. Durations are written as strings like
//! `"5s"`, `"500ms"`, `"10m"` or `"24h"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LandscapeError, LandscapeResult};
use crate::types::Release;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    pub timeouts: Timeouts,
    pub landscape: NamingConfig,
    pub ports: PortsConfig,
}

/// Bounds for every polling wait the orchestrator performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Host boot plus first process start.
    #[serde(with = "duration_string")]
    pub wait_for_host: Duration,
    /// Process readiness on an already running host.
    #[serde(with = "duration_string")]
    pub wait_for_process: Duration,
    /// Master readiness after an in-place upgrade; data reload can be slow.
    #[serde(with = "duration_string")]
    pub master_upgrade: Duration,
    #[serde(with = "duration_string")]
    pub master_data_import: Duration,
    #[serde(with = "duration_string")]
    pub master_data_import_poll: Duration,
    #[serde(with = "duration_string")]
    pub health_poll: Duration,
    #[serde(with = "duration_string")]
    pub auto_scaling_replica_poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            wait_for_host: Duration::from_secs(30 * 60),
            wait_for_process: Duration::from_secs(10 * 60),
            master_upgrade: Duration::from_secs(24 * 60 * 60),
            master_data_import: Duration::from_secs(6 * 60 * 60),
            master_data_import_poll: Duration::from_secs(15),
            health_poll: Duration::from_secs(5),
            auto_scaling_replica_poll: Duration::from_secs(5),
        }
    }
}

/// Tag keys, naming prefixes and defaults of the landscape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub default_domain_name: String,
    /// The only region in which dynamic (path-based) load-balancer mapping is allowed.
    pub dynamic_mapping_region: String,
    /// Load balancer carrying dynamic mappings in `dynamic_mapping_region`.
    pub default_load_balancer_name: String,
    /// Name prefix of load balancers reached through DNS CNAME records.
    pub dns_load_balancer_prefix: String,
    pub max_rules_per_load_balancer: usize,
    /// Tag key marking application hosts; its value names the replica set.
    pub application_host_tag: String,
    /// Tag value marking shared multi-process hosts.
    pub shared_host_tag_value: String,
    /// Tag value marking the archive replica set's hosts.
    pub archive_tag_value: String,
    pub target_group_prefix: String,
    pub default_shared_instance_type: String,
    pub default_dedicated_instance_type: String,
    /// Image type looked up when no explicit machine image is given.
    pub image_type: String,
    /// Header used by listener rules to pin a request to master or replicas.
    pub forward_header_name: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            default_domain_name: "example.com".to_string(),
            dynamic_mapping_region: "eu-west-1".to_string(),
            default_load_balancer_name: "DefDynLB".to_string(),
            dns_load_balancer_prefix: "DNSMapped-".to_string(),
            max_rules_per_load_balancer: 100,
            application_host_tag: "application-host".to_string(),
            shared_host_tag_value: "___multi___".to_string(),
            archive_tag_value: "ARCHIVE".to_string(),
            target_group_prefix: "S-".to_string(),
            default_shared_instance_type: "i3.2xlarge".to_string(),
            default_dedicated_instance_type: "c5.2xlarge".to_string(),
            image_type: "application-server".to_string(),
            forward_header_name: "X-Forward-Request-To".to_string(),
        }
    }
}

impl NamingConfig {
    /// Target group serving live traffic: master plus healthy replicas.
    pub fn public_target_group_name(&self, replica_set: &str) -> String {
        format!("{}{}", self.target_group_prefix, replica_set)
    }

    pub fn master_target_group_name(&self, replica_set: &str) -> String {
        format!("{}{}-m", self.target_group_prefix, replica_set)
    }

    pub fn auto_scaling_group_name(&self, replica_set: &str) -> String {
        format!("{}{}", self.target_group_prefix, replica_set)
    }

    pub fn launch_configuration_name(&self, replica_set: &str, release: &Release) -> String {
        format!("{}{}-{}", self.target_group_prefix, replica_set, release)
    }
}

/// Port range and directory layout for processes on multi-process hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub first_port: u16,
    pub last_port: u16,
    pub servers_directory: String,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            first_port: 8888,
            last_port: 8999,
            servers_directory: "/home/app/servers".to_string(),
        }
    }
}

impl PortsConfig {
    /// Directory a process of the named replica set is installed into.
    pub fn server_directory(&self, server_name: &str) -> String {
        format!("{}/{}", self.servers_directory.trim_end_matches('/'), server_name)
    }
}

impl LandscapeConfig {
    pub fn from_file(path: &Path) -> LandscapeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LandscapeError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> LandscapeResult<Self> {
        let config: LandscapeConfig = toml::from_str(content)
            .map_err(|e| LandscapeError::Configuration(format!("invalid landscape.toml: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> LandscapeResult<String> {
        toml::to_string_pretty(self).map_err(|e| LandscapeError::Configuration(e.to_string()))
    }

    fn validate(&self) -> LandscapeResult<()> {
        if self.ports.first_port > self.ports.last_port {
            return Err(LandscapeError::Configuration(format!(
                "port range {}..={} is empty",
                self.ports.first_port, self.ports.last_port
            )));
        }
        if self.timeouts.health_poll.is_zero() {
            return Err(LandscapeError::Configuration(
                "health_poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// `name.domain`, falling back to the configured default domain.
    pub fn fully_qualified_hostname(&self, name: &str, domain: Option<&str>) -> String {
        format!(
            "{}.{}",
            name,
            domain.unwrap_or(&self.landscape.default_domain_name)
        )
    }
}

/// Parse a duration string like "5s", "500ms", "1m", "24h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        let m = mins.parse::<u64>().ok()?;
        m.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        let h = hours.parse::<u64>().ok()?;
        h.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

mod duration_string {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = d.as_millis();
        let s = if millis % 1000 != 0 {
            format!("{millis}ms")
        } else {
            format!("{}s", d.as_secs())
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {s:?}")))
    }
}
