//! Replica set snapshots.
//!
//! A [`ReplicaSet`] is reconstituted from the cloud on every call and
//! never cached. Target groups, load balancers, auto-scaling groups and
//! tagged hosts are queried concurrently and joined before composing.

use std::sync::Arc;

use tracing::{debug, warn};

use landscape_core::{
    CloudLandscape, Host, LandscapeConfig, LandscapeError, LandscapeResult, Process,
    ProcessAgent, ProcessRole, ReplicaSet, RuleCondition,
};

pub struct ReplicaSetRepository {
    cloud: Arc<dyn CloudLandscape>,
    agent: Arc<dyn ProcessAgent>,
    config: LandscapeConfig,
}

impl ReplicaSetRepository {
    pub fn new(
        cloud: Arc<dyn CloudLandscape>,
        agent: Arc<dyn ProcessAgent>,
        config: LandscapeConfig,
    ) -> Self {
        Self {
            cloud,
            agent,
            config,
        }
    }

    /// Snapshot of `name`, or `None` when it has no master target group.
    pub async fn replica_set(&self, region: &str, name: &str) -> LandscapeResult<Option<ReplicaSet>> {
        let naming = &self.config.landscape;
        let (target_groups, load_balancers, auto_scaling_groups, hosts) = tokio::try_join!(
            self.cloud.target_groups(region),
            self.cloud.load_balancers(region),
            self.cloud.auto_scaling_groups(region),
            self.cloud
                .running_hosts_with_tag(region, &naming.application_host_tag, None),
        )?;

        let master_tg_name = naming.master_target_group_name(name);
        let Some(master_target_group) = target_groups
            .iter()
            .find(|tg| tg.name == master_tg_name)
            .cloned()
        else {
            debug!(region, replica_set = name, "no master target group");
            return Ok(None);
        };
        let public_tg_name = naming.public_target_group_name(name);
        let public_target_group = target_groups
            .into_iter()
            .find(|tg| tg.name == public_tg_name)
            .ok_or_else(|| LandscapeError::NotFound(format!("target group {public_tg_name}")))?;

        let processes = self.processes_of(&hosts, name).await?;
        let mut master = None;
        let mut replicas = Vec::new();
        for process in processes {
            match process.role {
                ProcessRole::Master if master.is_none() => master = Some(process),
                ProcessRole::Master => {
                    warn!(replica_set = name, process = %process, "ignoring second master");
                }
                ProcessRole::Replica => replicas.push(process),
            }
        }
        let master =
            master.ok_or_else(|| LandscapeError::NotFound(format!("master of replica set {name}")))?;

        // The load balancer is the one forwarding the hostname to the public target group.
        let (load_balancer, hostname) = load_balancers
            .into_iter()
            .find_map(|lb| {
                let hostname = lb.rules.iter().find_map(|rule| {
                    if !rule.forwards_to(&public_target_group.name) {
                        return None;
                    }
                    rule.conditions.iter().find_map(|c| match c {
                        RuleCondition::HostHeader { host } => Some(host.clone()),
                        _ => None,
                    })
                })?;
                Some((lb, hostname))
            })
            .ok_or_else(|| LandscapeError::NotFound(format!("load balancer rules of {name}")))?;
        let rules = load_balancer
            .rules
            .iter()
            .filter(|r| r.matches_host(&hostname))
            .cloned()
            .collect();

        let asg_name = naming.auto_scaling_group_name(name);
        let auto_scaling_group = auto_scaling_groups.into_iter().find(|g| g.name == asg_name);
        let dns_record = self.cloud.dns_record(&hostname).await?;

        let replica_set = ReplicaSet {
            name: name.to_string(),
            hostname,
            master,
            replicas,
            master_target_group,
            public_target_group,
            auto_scaling_group,
            load_balancer,
            rules,
            dns_record,
        };
        debug!(region, replica_set = %replica_set, "assembled replica set");
        Ok(Some(replica_set))
    }

    /// Like [`Self::replica_set`] but absence is an error.
    pub async fn require(&self, region: &str, name: &str) -> LandscapeResult<ReplicaSet> {
        self.replica_set(region, name)
            .await?
            .ok_or_else(|| LandscapeError::NotFound(format!("replica set {name} in {region}")))
    }

    /// The replica set whose master runs on a host tagged with `tag_value`.
    pub async fn replica_set_by_tag(
        &self,
        region: &str,
        tag_value: &str,
    ) -> LandscapeResult<Option<ReplicaSet>> {
        let hosts = self
            .cloud
            .running_hosts_with_tag(region, &self.config.landscape.application_host_tag, Some(tag_value))
            .await?;
        for host in &hosts {
            let processes = self.agent.processes_on(host).await?;
            if let Some(master) = processes.into_iter().find(Process::is_master) {
                return self.replica_set(region, &master.server_name).await;
            }
        }
        debug!(region, tag = tag_value, hosts = hosts.len(), "no master on tagged hosts");
        Ok(None)
    }

    async fn processes_of(&self, hosts: &[Host], name: &str) -> LandscapeResult<Vec<Process>> {
        let mut processes = Vec::new();
        for host in hosts.iter().filter(|h| h.runs_server(name)) {
            let on_host = self.agent.processes_on(host).await?;
            processes.extend(on_host.into_iter().filter(|p| p.server_name == name));
        }
        Ok(processes)
    }
}
