//! Load-balancing setup for a freshly deployed master.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use landscape_core::{
    ApplicationConfiguration, AutoScalingGroup, CloudLandscape, DnsRecord, LandscapeConfig,
    LandscapeError, LandscapeResult, LaunchConfiguration, ListenerRule, LoadBalancer,
    MachineImage, Process, Redirect, TargetGroup,
};
use landscape_deploy::DeploymentProcedure;

use crate::rules::hostname_rules;

/// How the hostname reaches the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerMapping {
    /// CNAME record pointing at a DNS-mapped load balancer; any region.
    #[default]
    Dns,
    /// Rules on the region's default load balancer behind the wildcard
    /// record; only in the designated region.
    Dynamic,
}

/// Auto-scaling group to create for the replica set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaBaseline {
    pub replica_configuration: ApplicationConfiguration,
    pub min_size: u32,
    pub max_size: u32,
    pub instance_type: String,
    /// Latest image of the configured image type when `None`.
    pub image: Option<MachineImage>,
    pub key_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancingOptions {
    pub hostname: String,
    pub mapping: LoadBalancerMapping,
    pub redirect: Redirect,
    pub baseline: Option<ReplicaBaseline>,
}

/// Resources a replica set ends up wired to.
#[derive(Debug, Clone, PartialEq)]
pub struct WiredLoadBalancing {
    pub master_target_group: TargetGroup,
    pub public_target_group: TargetGroup,
    pub load_balancer: LoadBalancer,
    pub rules: Vec<ListenerRule>,
    pub dns_record: Option<DnsRecord>,
    pub auto_scaling_group: Option<AutoScalingGroup>,
}

pub struct LoadBalancingSetup {
    cloud: Arc<dyn CloudLandscape>,
    procedure: Arc<DeploymentProcedure>,
    config: LandscapeConfig,
}

impl LoadBalancingSetup {
    pub fn new(
        cloud: Arc<dyn CloudLandscape>,
        procedure: Arc<DeploymentProcedure>,
        config: LandscapeConfig,
    ) -> Self {
        Self {
            cloud,
            procedure,
            config,
        }
    }

    /// Fails with a configuration error before touching anything when
    /// dynamic mapping is requested outside the designated region.
    pub fn validate(&self, region: &str, mapping: LoadBalancerMapping) -> LandscapeResult<()> {
        let designated = &self.config.landscape.dynamic_mapping_region;
        if mapping == LoadBalancerMapping::Dynamic && region != designated {
            return Err(LandscapeError::Configuration(format!(
                "dynamic load balancer mapping is only supported in {designated}, not in {region}"
            )));
        }
        Ok(())
    }

    pub async fn wire(
        &self,
        replica_set: &str,
        master: &Process,
        options: &LoadBalancingOptions,
    ) -> LandscapeResult<WiredLoadBalancing> {
        let region = master.host.region.as_str();
        self.validate(region, options.mapping)?;
        let naming = &self.config.landscape;

        let mut public_target_group = self
            .cloud
            .create_target_group(region, &naming.public_target_group_name(replica_set), master.port)
            .await?;
        let mut master_target_group = self
            .cloud
            .create_target_group(region, &naming.master_target_group_name(replica_set), master.port)
            .await?;
        for target_group in [&mut master_target_group, &mut public_target_group] {
            self.cloud.register_target(target_group, &master.host).await?;
            if !target_group.contains(&master.host.id) {
                target_group.targets.push(master.host.id.clone());
            }
        }
        info!(
            replica_set,
            master = %master.host.id,
            public = %public_target_group.name,
            master_tg = %master_target_group.name,
            "registered master in target groups"
        );

        let rules = hostname_rules(
            &options.hostname,
            &naming.forward_header_name,
            &master_target_group.name,
            &public_target_group.name,
            &options.redirect,
        );
        let (load_balancer, dns_record) = match options.mapping {
            LoadBalancerMapping::Dns => {
                let lb = self.dns_mapped_load_balancer(region, rules.len()).await?;
                let record = self.map_hostname(&options.hostname, &lb).await?;
                (lb, Some(record))
            }
            LoadBalancerMapping::Dynamic => (self.dynamic_load_balancer(region).await?, None),
        };
        let rules = self.cloud.add_listener_rules(&load_balancer, rules).await?;
        info!(
            replica_set,
            hostname = %options.hostname,
            load_balancer = %load_balancer.name,
            rules = rules.len(),
            "added listener rules"
        );

        let auto_scaling_group = match &options.baseline {
            Some(baseline) => Some(
                self.create_auto_scaling_group(replica_set, master, &public_target_group, baseline)
                    .await?,
            ),
            None => None,
        };

        Ok(WiredLoadBalancing {
            master_target_group,
            public_target_group,
            load_balancer,
            rules,
            dns_record,
            auto_scaling_group,
        })
    }

    /// First DNS-mapped load balancer with room for `rule_count` more rules,
    /// or a new one.
    async fn dns_mapped_load_balancer(
        &self,
        region: &str,
        rule_count: usize,
    ) -> LandscapeResult<LoadBalancer> {
        let naming = &self.config.landscape;
        let dns_mapped: Vec<LoadBalancer> = self
            .cloud
            .load_balancers(region)
            .await?
            .into_iter()
            .filter(|lb| lb.name.starts_with(&naming.dns_load_balancer_prefix))
            .collect();
        if let Some(lb) = dns_mapped
            .iter()
            .find(|lb| lb.rules.len() + rule_count <= naming.max_rules_per_load_balancer)
        {
            debug!(load_balancer = %lb.name, rules = lb.rules.len(), "reusing DNS-mapped load balancer");
            return Ok(lb.clone());
        }
        let name = (1..)
            .map(|n| format!("{}{n}", naming.dns_load_balancer_prefix))
            .find(|candidate| dns_mapped.iter().all(|lb| lb.name != *candidate))
            .unwrap_or_else(|| naming.dns_load_balancer_prefix.clone());
        info!(region, load_balancer = %name, "creating DNS-mapped load balancer");
        self.cloud.create_load_balancer(region, &name).await
    }

    async fn dynamic_load_balancer(&self, region: &str) -> LandscapeResult<LoadBalancer> {
        let name = &self.config.landscape.default_load_balancer_name;
        let existing = self
            .cloud
            .load_balancers(region)
            .await?
            .into_iter()
            .find(|lb| lb.name == *name);
        match existing {
            Some(lb) => Ok(lb),
            None => {
                info!(region, load_balancer = %name, "creating default load balancer for dynamic mapping");
                self.cloud.create_load_balancer(region, name).await
            }
        }
    }

    async fn map_hostname(&self, hostname: &str, lb: &LoadBalancer) -> LandscapeResult<DnsRecord> {
        let domain = hostname
            .split_once('.')
            .map(|(_, domain)| domain)
            .unwrap_or(&self.config.landscape.default_domain_name);
        let record = DnsRecord {
            hosted_zone_id: self.cloud.hosted_zone_id(domain).await?,
            hostname: hostname.to_string(),
            value: lb.dns_name.clone(),
        };
        self.cloud.upsert_dns_record(&record).await?;
        info!(hostname, target = %lb.dns_name, "mapped hostname to load balancer");
        Ok(record)
    }

    /// Waits for the master first so new replicas do not start replicating
    /// from a master that is still loading.
    async fn create_auto_scaling_group(
        &self,
        replica_set: &str,
        master: &Process,
        public_target_group: &TargetGroup,
        baseline: &ReplicaBaseline,
    ) -> LandscapeResult<AutoScalingGroup> {
        self.procedure
            .wait_until_ready(master, self.config.timeouts.wait_for_process)
            .await?;

        let naming = &self.config.landscape;
        let region = master.host.region.as_str();
        let image = match &baseline.image {
            Some(image) => image.clone(),
            None => self.cloud.latest_image(region, &naming.image_type).await?,
        };
        let group = AutoScalingGroup {
            name: naming.auto_scaling_group_name(replica_set),
            region: region.to_string(),
            launch_configuration: LaunchConfiguration {
                name: naming.launch_configuration_name(
                    replica_set,
                    &baseline.replica_configuration.release,
                ),
                image_id: image.id,
                instance_type: baseline.instance_type.clone(),
                key_name: baseline.key_name.clone(),
                replica_configuration: baseline.replica_configuration.clone(),
            },
            min_size: baseline.min_size,
            max_size: baseline.max_size,
            target_group: public_target_group.name.clone(),
            tags: HashMap::from([(naming.application_host_tag.clone(), replica_set.to_string())]),
        };
        let group = self
            .cloud
            .create_auto_scaling_group(&group)
            .await
            .inspect_err(|e| error!(replica_set, error = %e, "auto-scaling group creation failed"))?;
        info!(
            replica_set,
            group = %group.name,
            min = group.min_size,
            max = group.max_size,
            "created auto-scaling group"
        );
        Ok(group)
    }
}
