//! Lifecycle integration tests.
//!
//! Create, upgrade and remove replica sets against the in-memory
//! landscape, asserting target-group membership and the order of cloud
//! calls. Time is paused so health polls and timeouts run instantly.

use std::sync::Arc;

use landscape_core::{
    CloudLandscape, Host, LandscapeConfig, ProcessRole, Release, ReleaseSelector,
};
use landscape_deploy::HostSpec;
use landscape_orchestrator::{
    Collaborators, CreateReplicaSetRequest, ReplicaSetOrchestrator, UpgradePhase, UpgradeRequest,
};
use landscape_sim::SimLandscape;

const REGION: &str = "eu-west-1";

fn setup() -> (Arc<SimLandscape>, ReplicaSetOrchestrator) {
    let sim = Arc::new(SimLandscape::new(LandscapeConfig::default()));
    let orchestrator = ReplicaSetOrchestrator::new(
        Collaborators::from_landscape(sim.clone()),
        LandscapeConfig::default(),
    );
    (sim, orchestrator)
}

fn upgrade_to(release: &str) -> UpgradeRequest {
    UpgradeRequest {
        release: ReleaseSelector::Named(release.to_string()),
        ..UpgradeRequest::default()
    }
}

fn on_old_release(name: &str) -> CreateReplicaSetRequest {
    CreateReplicaSetRequest {
        release: ReleaseSelector::Named("build-202609150000".to_string()),
        ..CreateReplicaSetRequest::new(name, REGION)
    }
}

// ── Creation ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn created_replica_set_serves_only_master() {
    let (sim, orchestrator) = setup();
    let replica_set = orchestrator
        .create(&CreateReplicaSetRequest::new("regatta42", REGION))
        .await
        .unwrap();

    let masters: Vec<_> = sim
        .processes_of("regatta42")
        .into_iter()
        .filter(|p| p.role == ProcessRole::Master)
        .collect();
    assert_eq!(masters.len(), 1);
    assert!(masters[0].same_process(&replica_set.master));
    assert_eq!(
        replica_set.public_target_group.targets,
        vec![replica_set.master.host.id.clone()]
    );
    assert_eq!(
        replica_set.master_target_group.targets,
        vec![replica_set.master.host.id.clone()]
    );
}

#[tokio::test(start_paused = true)]
async fn zero_floor_adds_unmanaged_replica_on_shared_host() {
    let (sim, orchestrator) = setup();
    let shared_b = sim.add_shared_host(REGION, "eu-west-1b");
    let shared_c = sim.add_shared_host(REGION, "eu-west-1c");
    let request = CreateReplicaSetRequest {
        min_replicas: 0,
        ..CreateReplicaSetRequest::new("regatta42", REGION)
    };

    let replica_set = orchestrator.create(&request).await.unwrap();

    let master_host = &replica_set.master.host.id;
    assert!(replica_set.master_target_group.contains(master_host));
    assert!(replica_set.public_target_group.contains(master_host));
    assert_eq!(replica_set.replicas.len(), 1);
    let replica = &replica_set.replicas[0];
    assert!([&shared_b.id, &shared_c.id].contains(&&replica.host.id));
    assert_ne!(replica.host.availability_zone, replica_set.master.host.availability_zone);
    assert!(!replica_set.is_auto_scaled(replica));
    assert!(replica_set.public_target_group.contains(&replica.host.id));
    assert_eq!(replica_set.auto_scaling_group.as_ref().map(|g| g.min_size), Some(0));
    // Only the master's host was launched.
    assert_eq!(sim.count("launch_host"), 1);
}

fn zero_floor_in_zone_a(preferred: &Host) -> CreateReplicaSetRequest {
    CreateReplicaSetRequest {
        min_replicas: 0,
        master_host: HostSpec {
            availability_zone: Some("eu-west-1a".to_string()),
            ..HostSpec::default()
        },
        preferred_replica_host: Some(preferred.clone()),
        ..CreateReplicaSetRequest::new("regatta42", REGION)
    }
}

#[tokio::test(start_paused = true)]
async fn preferred_replica_host_wins_over_scanned_host() {
    let (sim, orchestrator) = setup();
    sim.add_shared_host(REGION, "eu-west-1b");
    let preferred = sim.add_shared_host(REGION, "eu-west-1c");

    let replica_set = orchestrator.create(&zero_floor_in_zone_a(&preferred)).await.unwrap();

    assert_eq!(replica_set.master.host.availability_zone, "eu-west-1a");
    assert_eq!(replica_set.replicas.len(), 1);
    assert_eq!(replica_set.replicas[0].host.id, preferred.id);
    assert_eq!(sim.count("launch_host"), 1);
}

#[tokio::test(start_paused = true)]
async fn preferred_replica_host_in_master_zone_is_passed_over() {
    let (sim, orchestrator) = setup();
    let same_zone = sim.add_shared_host(REGION, "eu-west-1a");
    let other_zone = sim.add_shared_host(REGION, "eu-west-1b");

    let replica_set = orchestrator.create(&zero_floor_in_zone_a(&same_zone)).await.unwrap();

    assert_eq!(replica_set.replicas.len(), 1);
    assert_eq!(replica_set.replicas[0].host.id, other_zone.id);
}

#[tokio::test(start_paused = true)]
async fn shared_host_with_port_taken_is_never_chosen() {
    let (sim, orchestrator) = setup();
    let busy = sim.add_shared_host(REGION, "eu-west-1b");
    sim.run_foreign_process(&busy.id, "othersite", 8090);
    let free = sim.add_shared_host(REGION, "eu-west-1c");
    let request = CreateReplicaSetRequest {
        min_replicas: 0,
        master_port: Some(8090),
        ..CreateReplicaSetRequest::new("regatta42", REGION)
    };

    let replica_set = orchestrator.create(&request).await.unwrap();

    assert_eq!(replica_set.port(), 8090);
    assert_eq!(replica_set.replicas.len(), 1);
    assert_eq!(replica_set.replicas[0].host.id, free.id);
    assert!(sim.processes_of("regatta42").iter().all(|p| p.host.id != busy.id));
    assert_eq!(
        orchestrator.eligible_shared_hosts(REGION, "regatta42").await.unwrap(),
        Vec::new()
    );
}

// ── Upgrade ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn master_leaves_rotation_only_while_a_replica_serves() {
    let (sim, orchestrator) = setup();
    let created = orchestrator.create(&on_old_release("regatta42")).await.unwrap();
    let master_host = created.master.host.id.clone();

    orchestrator
        .upgrade(REGION, "regatta42", &upgrade_to("build-202610010000"))
        .await
        .unwrap();

    let master_out = sim
        .deregistrations()
        .into_iter()
        .find(|d| d.target_group == "S-regatta42" && d.host_id == master_host)
        .unwrap();
    assert!(master_out.ready_remaining >= 1);
    let stopped = sim.position("stop_replication").unwrap();
    let deregistered = sim.position_of("deregister_target", &master_host).unwrap();
    let refreshed = sim.position("refresh_release").unwrap();
    assert!(stopped < deregistered);
    assert!(deregistered < refreshed);
}

#[tokio::test(start_paused = true)]
async fn upgrade_without_replicas_uses_bootstrap_replica() {
    let (sim, orchestrator) = setup();
    let created = orchestrator.create(&on_old_release("regatta42")).await.unwrap();
    let group = created.auto_scaling_group.clone().unwrap();
    sim.delete_auto_scaling_group(&group).await.unwrap();
    let launches_before = sim.count("launch_host");

    let report = orchestrator
        .upgrade(REGION, "regatta42", &upgrade_to("build-202610010000"))
        .await
        .unwrap();

    assert_eq!(sim.count("launch_host"), launches_before + 1);
    let bootstrap = report.bootstrap_replica.clone().unwrap();
    assert_eq!(report.terminated_replicas, 1);
    assert_eq!(report.refreshed_replicas, 0);
    assert!(report.replica_set.replicas.is_empty());
    assert!(sim.processes_of("regatta42").iter().all(|p| p.endpoint() != bootstrap));
    assert_eq!(report.replica_set.master.release, Release::new("build-202610010000"));
    assert_eq!(
        report.replica_set.public_target_group.targets,
        vec![report.replica_set.master.host.id.clone()]
    );
    assert_eq!(
        report.phases,
        vec![
            UpgradePhase::Stable,
            UpgradePhase::EnsuringReplicaExists,
            UpgradePhase::ReplicationStopped,
            UpgradePhase::MasterOutOfRotation,
            UpgradePhase::MasterRefreshing,
            UpgradePhase::MasterHealthy,
            UpgradePhase::ReplicasReconciled,
            UpgradePhase::Stable,
        ]
    );
    // The bootstrap replica was serving when the master went out.
    let master_out = sim
        .deregistrations()
        .into_iter()
        .find(|d| d.target_group == "S-regatta42" && d.host_id == created.master.host.id)
        .unwrap();
    assert_eq!(master_out.ready_remaining, 1);
}

#[tokio::test(start_paused = true)]
async fn unmanaged_replica_is_refreshed_in_place() {
    let (sim, orchestrator) = setup();
    sim.add_shared_host(REGION, "eu-west-1b");
    sim.add_shared_host(REGION, "eu-west-1c");
    let request = CreateReplicaSetRequest {
        min_replicas: 0,
        ..on_old_release("regatta42")
    };
    let created = orchestrator.create(&request).await.unwrap();
    let replica = created.replicas[0].clone();

    let report = orchestrator
        .upgrade(REGION, "regatta42", &upgrade_to("build-202610010000"))
        .await
        .unwrap();

    assert_eq!(report.bootstrap_replica, None);
    assert_eq!(report.refreshed_replicas, 1);
    assert_eq!(report.terminated_replicas, 0);
    let after = &report.replica_set.replicas;
    assert_eq!(after.len(), 1);
    assert!(after[0].same_process(&replica));
    assert_eq!(after[0].release, Release::new("build-202610010000"));
    assert!(report.replica_set.public_target_group.contains(&replica.host.id));
    assert_eq!(sim.count("terminate_host"), 0);
}

// ── Removal ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn removal_deletes_auto_scaling_before_load_balancer() {
    let (sim, orchestrator) = setup();
    let created = orchestrator
        .create(&CreateReplicaSetRequest::new("regatta42", REGION))
        .await
        .unwrap();

    let report = orchestrator.remove(REGION, "regatta42").await.unwrap();

    assert!(report.auto_scaling_group_deleted);
    assert!(report.load_balancer_deleted);
    assert!(report.dns_record_removed);
    assert_eq!(report.rules_deleted, 4);
    assert_eq!(report.terminated_hosts, vec![created.master.host.id.clone()]);
    let asg_deleted = sim.position("delete_auto_scaling_group").unwrap();
    let master_stopped = sim.position_of("stop", &created.master.host.id).unwrap();
    let rules_deleted = sim.position("delete_listener_rules").unwrap();
    let lb_deleted = sim.position("delete_load_balancer").unwrap();
    assert!(asg_deleted < master_stopped);
    assert!(master_stopped < rules_deleted);
    assert!(rules_deleted < lb_deleted);

    assert!(sim.processes_of("regatta42").is_empty());
    assert!(sim.target_groups_snapshot(REGION).is_empty());
    assert!(sim.load_balancers_snapshot(REGION).is_empty());
    assert!(sim.auto_scaling_group_snapshot(REGION, "S-regatta42").is_none());
    assert!(sim.dns_record_snapshot("regatta42.example.com").is_none());
    assert!(orchestrator.replica_set(REGION, "regatta42").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn shared_load_balancer_survives_until_last_hostname() {
    let (sim, orchestrator) = setup();
    let first = orchestrator
        .create(&CreateReplicaSetRequest::new("regatta42", REGION))
        .await
        .unwrap();
    let second = orchestrator
        .create(&CreateReplicaSetRequest::new("regatta43", REGION))
        .await
        .unwrap();
    assert_eq!(first.load_balancer.name, second.load_balancer.name);

    let report = orchestrator.remove(REGION, "regatta42").await.unwrap();

    assert!(!report.load_balancer_deleted);
    assert!(report.dns_record_removed);
    assert_eq!(sim.count("delete_load_balancer"), 0);
    let lbs = sim.load_balancers_snapshot(REGION);
    assert_eq!(lbs.len(), 1);
    assert!(lbs[0].rules.iter().all(|r| !r.matches_host("regatta42.example.com")));
    assert!(sim.dns_record_snapshot("regatta43.example.com").is_some());

    let report = orchestrator.remove(REGION, "regatta43").await.unwrap();
    assert!(report.load_balancer_deleted);
    assert!(sim.load_balancers_snapshot(REGION).is_empty());
}

#[tokio::test(start_paused = true)]
async fn removal_keeps_shared_host_running() {
    let (sim, orchestrator) = setup();
    let shared = sim.add_shared_host(REGION, "eu-west-1a");
    sim.run_foreign_process(&shared.id, "othersite", 8888);
    orchestrator
        .deploy_to_existing_host(&CreateReplicaSetRequest::new("regatta42", REGION), &shared)
        .await
        .unwrap();

    let report = orchestrator.remove(REGION, "regatta42").await.unwrap();

    assert!(report.terminated_hosts.is_empty());
    assert!(sim.running_hosts(REGION).iter().any(|h| h.id == shared.id));
    assert_eq!(sim.processes_of("othersite").len(), 1);
    assert!(sim.processes_of("regatta42").is_empty());
}
