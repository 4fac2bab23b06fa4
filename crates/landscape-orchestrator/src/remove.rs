//! Ordered teardown of a replica set.
//!
//! Unmanaged replicas go first, then the auto-scaling group with the hosts
//! it launched, then the master. Routing goes last: rules, target groups,
//! and finally the load balancer and DNS record when nothing else uses
//! them.

use serde::Serialize;
use tracing::{debug, error, info};

use landscape_core::{HostId, LandscapeResult, ReplicaSet};

use crate::orchestrator::ReplicaSetOrchestrator;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub replica_set: String,
    pub terminated_hosts: Vec<HostId>,
    pub auto_scaling_group_deleted: bool,
    pub rules_deleted: usize,
    pub load_balancer_deleted: bool,
    pub dns_record_removed: bool,
}

impl ReplicaSetOrchestrator {
    pub async fn remove(&self, region: &str, name: &str) -> LandscapeResult<RemovalReport> {
        let _guard = self.locks.lock(region, name).await;
        async {
            let replica_set = self.repository.require(region, name).await?;
            self.remove_replica_set(&replica_set).await
        }
        .await
        .inspect_err(|e| error!(replica_set = name, region, error = %e, "removing replica set failed"))
    }

    /// Teardown of an already assembled snapshot. The caller holds the lock.
    pub(crate) async fn remove_replica_set(
        &self,
        replica_set: &ReplicaSet,
    ) -> LandscapeResult<RemovalReport> {
        let cloud = &self.collaborators.cloud;
        let mut report = RemovalReport {
            replica_set: replica_set.name.clone(),
            ..RemovalReport::default()
        };
        info!(replica_set = %replica_set, "removing replica set");

        for replica in replica_set.unmanaged_replicas() {
            cloud
                .deregister_target(&replica_set.public_target_group, &replica.host)
                .await?;
            if self.procedure.stop_and_terminate_if_last(replica).await? {
                report.terminated_hosts.push(replica.host.id.clone());
            }
        }

        if let Some(group) = &replica_set.auto_scaling_group {
            cloud.delete_auto_scaling_group(group).await?;
            report.auto_scaling_group_deleted = true;
            info!(auto_scaling_group = %group.name, "deleted auto-scaling group and its hosts");
        }

        let master = &replica_set.master;
        for target_group in [&replica_set.public_target_group, &replica_set.master_target_group] {
            cloud.deregister_target(target_group, &master.host).await?;
        }
        if self.procedure.stop_and_terminate_if_last(master).await? {
            report.terminated_hosts.push(master.host.id.clone());
        }

        let load_balancer = &replica_set.load_balancer;
        let rules: Vec<_> = replica_set
            .rules
            .iter()
            .filter(|r| !r.is_default())
            .cloned()
            .collect();
        cloud.delete_listener_rules(load_balancer, &rules).await?;
        report.rules_deleted = rules.len();

        cloud
            .delete_target_group(&replica_set.public_target_group)
            .await?;
        cloud
            .delete_target_group(&replica_set.master_target_group)
            .await?;

        if replica_set.is_dns_mapped() {
            if let Some(record) = &replica_set.dns_record {
                cloud.remove_dns_record(record).await?;
                report.dns_record_removed = true;
            }
            let remaining = cloud
                .load_balancers(&load_balancer.region)
                .await?
                .into_iter()
                .find(|lb| lb.arn == load_balancer.arn);
            match remaining {
                Some(lb) if lb.has_only_default_rules() => {
                    cloud.delete_load_balancer(&lb).await?;
                    report.load_balancer_deleted = true;
                    info!(load_balancer = %lb.name, "deleted load balancer");
                }
                Some(lb) => {
                    debug!(load_balancer = %lb.name, rules = lb.rules.len(), "load balancer still in use");
                }
                None => {}
            }
        }

        info!(
            replica_set = %replica_set.name,
            hosts = report.terminated_hosts.len(),
            load_balancer_deleted = report.load_balancer_deleted,
            "replica set removed"
        );
        Ok(report)
    }
}
