//! Release upgrade.
//!
//! Reads stay available throughout: a ready replica serves from the public
//! target group before the master leaves it. There is no compensating
//! rollback. A failure leaves the replica set in the phase it reached and
//! the error log names that phase.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use landscape_core::{
    AutoScalingGroup, HostLaunchRequest, LandscapeError, LandscapeResult, LaunchConfiguration,
    MemorySizing, Process, ProcessRole, Release, ReleaseSelector, ReplicaSet,
};
use landscape_placement::launch_running_host;
use landscape_wait::{WaitPolicy, wait};

use crate::orchestrator::ReplicaSetOrchestrator;

/// Phase an upgrade has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    /// Serving normally, before or after the upgrade.
    Stable,
    /// Making sure a ready replica serves reads.
    EnsuringReplicaExists,
    /// Replicas no longer follow the master.
    ReplicationStopped,
    /// Master removed from both target groups.
    MasterOutOfRotation,
    /// Master restarting on the new release.
    MasterRefreshing,
    /// Master ready on the new release.
    MasterHealthy,
    /// Replicas replaced or refreshed.
    ReplicasReconciled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpgradeRequest {
    pub release: ReleaseSelector,
    pub replication_bearer_token: Option<String>,
    /// Memory sizing of a bootstrap replica, if one is needed.
    pub memory: MemorySizing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeReport {
    pub replica_set: ReplicaSet,
    pub from: Release,
    pub to: Release,
    pub phases: Vec<UpgradePhase>,
    /// Endpoint of the replica launched only to keep reads available.
    pub bootstrap_replica: Option<String>,
    pub refreshed_replicas: usize,
    pub terminated_replicas: usize,
}

struct UpgradeTracker<'a> {
    replica_set: &'a str,
    phase: UpgradePhase,
    history: Vec<UpgradePhase>,
}

impl<'a> UpgradeTracker<'a> {
    fn new(replica_set: &'a str) -> Self {
        Self {
            replica_set,
            phase: UpgradePhase::Stable,
            history: vec![UpgradePhase::Stable],
        }
    }

    fn enter(&mut self, next: UpgradePhase) {
        info!(replica_set = self.replica_set, from = ?self.phase, to = ?next, "upgrade phase");
        self.phase = next;
        self.history.push(next);
    }
}

/// What "ensure a replica" changed and must undo later.
#[derive(Default)]
struct ReadAvailability {
    bootstrap: Option<Process>,
    raised_min_size: Option<(AutoScalingGroup, u32)>,
}

impl ReplicaSetOrchestrator {
    /// Move master and replicas of `name` to a new release.
    pub async fn upgrade(
        &self,
        region: &str,
        name: &str,
        request: &UpgradeRequest,
    ) -> LandscapeResult<UpgradeReport> {
        let _guard = self.locks.lock(region, name).await;
        let mut tracker = UpgradeTracker::new(name);
        let result = self.upgrade_locked(region, name, request, &mut tracker).await;
        if let Err(e) = &result {
            error!(
                replica_set = name,
                region,
                phase = ?tracker.phase,
                error = %e,
                "upgrade failed, replica set left in its current phase"
            );
        }
        result
    }

    async fn upgrade_locked(
        &self,
        region: &str,
        name: &str,
        request: &UpgradeRequest,
        tracker: &mut UpgradeTracker<'_>,
    ) -> LandscapeResult<UpgradeReport> {
        let cloud = &self.collaborators.cloud;
        let timeouts = &self.config.timeouts;
        let token = self.bearer_token(request.replication_bearer_token.as_deref())?;
        let release = self.collaborators.releases.resolve(&request.release).await?;
        let before = self.repository.require(region, name).await?;
        let from = before.release().clone();
        info!(replica_set = %before, %from, to = %release, "upgrading replica set");

        tracker.enter(UpgradePhase::EnsuringReplicaExists);
        let availability = self
            .ensure_ready_replica(&before, &token, request.memory)
            .await?;
        let replica_set = self.repository.require(region, name).await?;

        for replica in &replica_set.replicas {
            self.collaborators
                .agent
                .stop_replication(replica, &token)
                .await?;
        }
        tracker.enter(UpgradePhase::ReplicationStopped);

        let master = &replica_set.master;
        cloud
            .deregister_target(&replica_set.public_target_group, &master.host)
            .await?;
        cloud
            .deregister_target(&replica_set.master_target_group, &master.host)
            .await?;
        tracker.enter(UpgradePhase::MasterOutOfRotation);

        if let Some(group) = &replica_set.auto_scaling_group {
            let current = &group.launch_configuration;
            let launch_configuration = LaunchConfiguration {
                name: self.config.landscape.launch_configuration_name(name, &release),
                replica_configuration: current
                    .replica_configuration
                    .clone()
                    .with_release(release.clone()),
                ..current.clone()
            };
            cloud
                .update_launch_configuration(group, launch_configuration)
                .await?;
        }

        tracker.enter(UpgradePhase::MasterRefreshing);
        let master = self
            .procedure
            .refresh(master, &release, timeouts.master_upgrade)
            .await?;
        tracker.enter(UpgradePhase::MasterHealthy);
        cloud
            .register_target(&replica_set.master_target_group, &master.host)
            .await?;
        cloud
            .register_target(&replica_set.public_target_group, &master.host)
            .await?;

        let mut refreshed_replicas = 0;
        let mut terminated_replicas = 0;
        for replica in &replica_set.replicas {
            let is_bootstrap = availability
                .bootstrap
                .as_ref()
                .is_some_and(|b| b.same_process(replica));
            cloud
                .deregister_target(&replica_set.public_target_group, &replica.host)
                .await?;
            if is_bootstrap || replica_set.is_auto_scaled(replica) {
                self.procedure.stop_and_terminate_if_last(replica).await?;
                terminated_replicas += 1;
            } else {
                let refreshed = self
                    .procedure
                    .refresh(replica, &release, timeouts.wait_for_process)
                    .await?;
                cloud
                    .register_target(&replica_set.public_target_group, &refreshed.host)
                    .await?;
                refreshed_replicas += 1;
            }
        }
        tracker.enter(UpgradePhase::ReplicasReconciled);

        if let Some((group, min_size)) = &availability.raised_min_size {
            cloud
                .update_auto_scaling_group_min_size(group, *min_size)
                .await?;
            info!(replica_set = name, min_size, "restored auto-scaling floor");
        }
        tracker.enter(UpgradePhase::Stable);

        let replica_set = self.repository.require(region, name).await?;
        info!(replica_set = %replica_set, release = %release, "upgrade complete");
        Ok(UpgradeReport {
            replica_set,
            from,
            to: release,
            phases: tracker.history.clone(),
            bootstrap_replica: availability.bootstrap.map(|b| b.endpoint()),
            refreshed_replicas,
            terminated_replicas,
        })
    }

    /// A ready replica in the public target group, launching one if needed.
    async fn ensure_ready_replica(
        &self,
        replica_set: &ReplicaSet,
        token: &str,
        memory: MemorySizing,
    ) -> LandscapeResult<ReadAvailability> {
        let cloud = &self.collaborators.cloud;
        for replica in &replica_set.replicas {
            if replica_set.public_target_group.contains(&replica.host.id)
                && matches!(self.collaborators.agent.is_ready(replica).await, Ok(true))
            {
                info!(replica = %replica, "ready replica already in rotation");
                return Ok(ReadAvailability::default());
            }
        }

        if let Some(group) = &replica_set.auto_scaling_group {
            let raised_min_size = if group.min_size < 1 {
                cloud.update_auto_scaling_group_min_size(group, 1).await?;
                info!(
                    replica_set = %replica_set.name,
                    from = group.min_size,
                    "raised auto-scaling floor to 1"
                );
                Some((group.clone(), group.min_size))
            } else {
                None
            };
            let timeouts = &self.config.timeouts;
            let policy =
                WaitPolicy::new(timeouts.wait_for_host, timeouts.auto_scaling_replica_poll)
                    .retry_on_error();
            let label = format!("auto-scaled replica of {}", replica_set.name);
            let replica = wait(
                &label,
                &policy,
                || self.ready_auto_scaled_replica(replica_set, group),
                Option::is_some,
            )
            .await?
            .ok_or_else(|| LandscapeError::NotFound(label.clone()))?;
            if !replica_set.public_target_group.contains(&replica.host.id) {
                cloud
                    .register_target(&replica_set.public_target_group, &replica.host)
                    .await?;
            }
            info!(replica = %replica, "auto-scaled replica ready");
            return Ok(ReadAvailability {
                bootstrap: None,
                raised_min_size,
            });
        }

        warn!(replica_set = %replica_set.name, "no ready replica, launching a bootstrap replica");
        let naming = &self.config.landscape;
        let launch = HostLaunchRequest {
            region: replica_set.master.host.region.clone(),
            instance_type: replica_set.master.host.instance_type.clone(),
            image: None,
            availability_zone: None,
            key_name: None,
            name: format!("{} ({})", replica_set.name, ProcessRole::Replica),
            tags: HashMap::from([(naming.application_host_tag.clone(), replica_set.name.clone())]),
        };
        let host = launch_running_host(cloud.as_ref(), &launch, &self.config.timeouts).await?;
        let configuration =
            self.replica_configuration(replica_set, replica_set.release().clone(), token, memory);
        let replica = self
            .deploy_replica_on(&host, &configuration, &replica_set.public_target_group)
            .await?;
        Ok(ReadAvailability {
            bootstrap: Some(replica),
            raised_min_size: None,
        })
    }

    async fn ready_auto_scaled_replica(
        &self,
        replica_set: &ReplicaSet,
        group: &AutoScalingGroup,
    ) -> LandscapeResult<Option<Process>> {
        let hosts = self
            .collaborators
            .cloud
            .running_hosts_with_tag(
                &group.region,
                &self.config.landscape.application_host_tag,
                Some(&replica_set.name),
            )
            .await?;
        for host in hosts.iter().filter(|h| h.is_managed_by(&group.name)) {
            for process in self.collaborators.agent.processes_on(host).await? {
                if process.server_name == replica_set.name
                    && process.role == ProcessRole::Replica
                    && self.collaborators.agent.is_ready(&process).await?
                {
                    return Ok(Some(process));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use landscape_core::{CloudLandscape, LandscapeConfig};
    use landscape_sim::SimLandscape;

    use super::*;
    use crate::orchestrator::{Collaborators, CreateReplicaSetRequest};

    fn setup() -> (Arc<SimLandscape>, ReplicaSetOrchestrator) {
        let sim = Arc::new(SimLandscape::new(LandscapeConfig::default()));
        let orchestrator = ReplicaSetOrchestrator::new(
            Collaborators::from_landscape(sim.clone()),
            LandscapeConfig::default(),
        );
        (sim, orchestrator)
    }

    fn to_release(name: &str) -> UpgradeRequest {
        UpgradeRequest {
            release: ReleaseSelector::Named(name.to_string()),
            ..UpgradeRequest::default()
        }
    }

    #[test]
    fn tracker_records_history() {
        let mut tracker = UpgradeTracker::new("regatta42");
        tracker.enter(UpgradePhase::EnsuringReplicaExists);
        tracker.enter(UpgradePhase::ReplicationStopped);

        assert_eq!(tracker.phase, UpgradePhase::ReplicationStopped);
        assert_eq!(
            tracker.history,
            vec![
                UpgradePhase::Stable,
                UpgradePhase::EnsuringReplicaExists,
                UpgradePhase::ReplicationStopped,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_scaled_replica_is_replaced_on_new_release() {
        let (sim, orchestrator) = setup();
        let request = CreateReplicaSetRequest {
            release: ReleaseSelector::Named("build-202609150000".to_string()),
            ..CreateReplicaSetRequest::new("regatta42", "eu-west-1")
        };
        let created = orchestrator.create(&request).await.unwrap();
        let old_replica = created.replicas[0].clone();

        let report = orchestrator
            .upgrade("eu-west-1", "regatta42", &to_release("build-202610010000"))
            .await
            .unwrap();

        assert_eq!(report.from, Release::new("build-202609150000"));
        assert_eq!(report.replica_set.master.release, Release::new("build-202610010000"));
        assert_eq!(report.bootstrap_replica, None);
        assert_eq!(report.terminated_replicas, 1);
        assert_eq!(report.phases.first(), Some(&UpgradePhase::Stable));
        assert_eq!(report.phases.last(), Some(&UpgradePhase::Stable));

        // The replacement comes from the updated launch configuration.
        let replicas = &report.replica_set.replicas;
        assert_eq!(replicas.len(), 1);
        assert!(!replicas[0].same_process(&old_replica));
        assert_eq!(replicas[0].release, Release::new("build-202610010000"));
        let group = report.replica_set.auto_scaling_group.as_ref().unwrap();
        assert_eq!(group.launch_configuration.name, "S-regatta42-build-202610010000");
        assert_eq!(group.min_size, 1);
        assert!(report.replica_set.master_target_group.contains(&report.replica_set.master.host.id));
        assert!(report.replica_set.public_target_group.contains(&report.replica_set.master.host.id));
        assert_eq!(sim.count("update_auto_scaling_group_min_size"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_floor_is_raised_and_restored() {
        let (sim, orchestrator) = setup();
        let created = orchestrator
            .create(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"))
            .await
            .unwrap();
        let group = created.auto_scaling_group.clone().unwrap();
        sim.update_auto_scaling_group_min_size(&group, 0).await.unwrap();
        let asg_replica = created.replicas[0].clone();
        sim.terminate_host("eu-west-1", &asg_replica.host.id).await.unwrap();
        assert!(sim.processes_of("regatta42").iter().all(|p| p.is_master()));

        orchestrator
            .upgrade("eu-west-1", "regatta42", &to_release("build-202610010000"))
            .await
            .unwrap();

        let group = sim.auto_scaling_group_snapshot("eu-west-1", "S-regatta42").unwrap();
        assert_eq!(group.min_size, 0);
        let raised = sim.position_of("update_auto_scaling_group_min_size", "S-regatta42 1").unwrap();
        let master_refreshed = sim.position("refresh_release").unwrap();
        let restored = sim.last_position("update_auto_scaling_group_min_size").unwrap();
        assert!(raised < master_refreshed);
        assert!(restored > master_refreshed);
        assert_eq!(sim.calls()[restored].subject, "S-regatta42 0");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_master_refresh_leaves_master_out_of_rotation() {
        let (sim, orchestrator) = setup();
        orchestrator
            .create(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"))
            .await
            .unwrap();
        sim.fail_next("refresh_release", "disk full");

        let err = orchestrator
            .upgrade("eu-west-1", "regatta42", &to_release("build-202610010000"))
            .await
            .unwrap_err();

        assert!(matches!(err, LandscapeError::Provisioning(_)));
        let replica_set = orchestrator.replica_set("eu-west-1", "regatta42").await.unwrap().unwrap();
        assert!(!replica_set.master_target_group.contains(&replica_set.master.host.id));
        assert!(!replica_set.public_target_group.contains(&replica_set.master.host.id));
        assert!(!replica_set.public_target_group.targets.is_empty());
    }
}
