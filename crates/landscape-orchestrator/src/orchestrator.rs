//! Replica set orchestrator.
//!
//! Holds the collaborators and the per-replica-set locks. Creation,
//! deployment, replica and host operations live here; upgrade, archive and
//! removal have their own modules.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use landscape_balancer::{
    LoadBalancerMapping, LoadBalancingOptions, LoadBalancingSetup, ReplicaBaseline,
};
use landscape_core::{
    AccessTokenSource, ApplicationConfiguration, CloudLandscape, DatabaseArchiver, Host,
    HostLaunchRequest, LandscapeConfig, LandscapeResult, LaunchConfiguration, MachineImage,
    MemorySizing, Process, ProcessAgent, ProcessRole, Redirect, Region, Release,
    ReleaseRepository, ReleaseSelector, RemoteServerFactory, ReplicaSet, TargetGroup,
    resolve_bearer_token,
};
use landscape_deploy::{DeploymentProcedure, HostSpec};
use landscape_placement::{EligibilityConstraints, EligibilityStrategy, launch_running_host};

use crate::locks::ReplicaSetLocks;
use crate::repository::ReplicaSetRepository;

// ── Collaborators ─────────────────────────────────────────────────

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub cloud: Arc<dyn CloudLandscape>,
    pub agent: Arc<dyn ProcessAgent>,
    pub releases: Arc<dyn ReleaseRepository>,
    pub remote_servers: Arc<dyn RemoteServerFactory>,
    pub databases: Arc<dyn DatabaseArchiver>,
    pub tokens: Arc<dyn AccessTokenSource>,
}

impl Collaborators {
    /// All roles served by one landscape implementation.
    pub fn from_landscape<L>(landscape: Arc<L>) -> Self
    where
        L: CloudLandscape
            + ProcessAgent
            + ReleaseRepository
            + RemoteServerFactory
            + DatabaseArchiver
            + AccessTokenSource
            + 'static,
    {
        Self {
            cloud: landscape.clone(),
            agent: landscape.clone(),
            releases: landscape.clone(),
            remote_servers: landscape.clone(),
            databases: landscape.clone(),
            tokens: landscape,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CreateReplicaSetRequest {
    pub name: String,
    pub region: Region,
    pub release: ReleaseSelector,
    /// Domain of the public hostname; the configured default when `None`.
    pub domain: Option<String>,
    pub mapping: LoadBalancerMapping,
    /// Where requests for the bare hostname are sent.
    pub redirect: Redirect,
    pub master_host: HostSpec,
    pub master_port: Option<u16>,
    pub replica_instance_type: Option<String>,
    /// Auto-scaling floor. Zero adds one unmanaged replica instead.
    pub min_replicas: u32,
    /// Tried first for the unmanaged replica of a zero floor.
    pub preferred_replica_host: Option<Host>,
    pub max_replicas: u32,
    /// Falls back to the session's access token.
    pub replication_bearer_token: Option<String>,
    pub memory: MemorySizing,
}

impl CreateReplicaSetRequest {
    pub fn new(name: &str, region: &str) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
            release: ReleaseSelector::Latest,
            domain: None,
            mapping: LoadBalancerMapping::Dns,
            redirect: Redirect::default(),
            master_host: HostSpec::default(),
            master_port: None,
            replica_instance_type: None,
            min_replicas: 1,
            preferred_replica_host: None,
            max_replicas: 30,
            replication_bearer_token: None,
            memory: MemorySizing::Default,
        }
    }
}

/// A replica placed on a caller-chosen host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicaRequest {
    /// The master's release when `None`.
    pub release: Option<ReleaseSelector>,
    pub replication_bearer_token: Option<String>,
    pub memory: MemorySizing,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedHostRequest {
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    pub name: Option<String>,
    pub key_name: Option<String>,
    pub image: Option<MachineImage>,
}

/// Result of rolling one replica set to a new machine image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUpdate {
    pub replica_set: String,
    /// `None` when the replica set has no auto-scaling group.
    pub launch_configuration: Option<LaunchConfiguration>,
}

// ── Orchestrator ──────────────────────────────────────────────────

pub struct ReplicaSetOrchestrator {
    pub(crate) collaborators: Collaborators,
    pub(crate) config: LandscapeConfig,
    pub(crate) procedure: Arc<DeploymentProcedure>,
    pub(crate) balancing: LoadBalancingSetup,
    pub(crate) placement: EligibilityStrategy,
    pub(crate) repository: ReplicaSetRepository,
    pub(crate) locks: ReplicaSetLocks,
}

impl ReplicaSetOrchestrator {
    pub fn new(collaborators: Collaborators, config: LandscapeConfig) -> Self {
        let cloud = collaborators.cloud.clone();
        let agent = collaborators.agent.clone();
        let procedure = Arc::new(DeploymentProcedure::new(
            cloud.clone(),
            agent.clone(),
            config.clone(),
        ));
        Self {
            balancing: LoadBalancingSetup::new(cloud.clone(), procedure.clone(), config.clone()),
            placement: EligibilityStrategy::new(cloud.clone(), &config),
            repository: ReplicaSetRepository::new(cloud, agent, config.clone()),
            procedure,
            collaborators,
            config,
            locks: ReplicaSetLocks::new(),
        }
    }

    pub fn config(&self) -> &LandscapeConfig {
        &self.config
    }

    pub(crate) fn bearer_token(&self, explicit: Option<&str>) -> LandscapeResult<String> {
        resolve_bearer_token(explicit, self.collaborators.tokens.as_ref())
    }

    // ── Queries ───────────────────────────────────────────────────

    pub async fn replica_set(&self, region: &str, name: &str) -> LandscapeResult<Option<ReplicaSet>> {
        self.repository.replica_set(region, name).await
    }

    pub async fn replica_set_by_tag(
        &self,
        region: &str,
        tag_value: &str,
    ) -> LandscapeResult<Option<ReplicaSet>> {
        self.repository.replica_set_by_tag(region, tag_value).await
    }

    /// Shared hosts that could take another process of `name`.
    pub async fn eligible_shared_hosts(&self, region: &str, name: &str) -> LandscapeResult<Vec<Host>> {
        let replica_set = self.repository.require(region, name).await?;
        let constraints = EligibilityConstraints::new(
            name,
            replica_set.port(),
            &self.config.ports.server_directory(name),
        );
        self.placement.eligible_shared_hosts(region, &constraints).await
    }

    // ── Creation ──────────────────────────────────────────────────

    /// New replica set with its master on a freshly launched host.
    pub async fn create(&self, request: &CreateReplicaSetRequest) -> LandscapeResult<ReplicaSet> {
        self.create_with_master(request, None).await
    }

    /// New replica set with its master on an existing host.
    pub async fn deploy_to_existing_host(
        &self,
        request: &CreateReplicaSetRequest,
        host: &Host,
    ) -> LandscapeResult<ReplicaSet> {
        self.create_with_master(request, Some(host)).await
    }

    async fn create_with_master(
        &self,
        request: &CreateReplicaSetRequest,
        host: Option<&Host>,
    ) -> LandscapeResult<ReplicaSet> {
        let _guard = self.locks.lock(&request.region, &request.name).await;
        self.create_locked(request, host).await.inspect_err(|e| {
            error!(
                replica_set = %request.name,
                region = %request.region,
                error = %e,
                "creating replica set failed"
            )
        })
    }

    async fn create_locked(
        &self,
        request: &CreateReplicaSetRequest,
        host: Option<&Host>,
    ) -> LandscapeResult<ReplicaSet> {
        let name = request.name.as_str();
        let region = request.region.as_str();
        self.balancing.validate(region, request.mapping)?;
        let token = self.bearer_token(request.replication_bearer_token.as_deref())?;
        let release = self.collaborators.releases.resolve(&request.release).await?;
        let hostname = self
            .config
            .fully_qualified_hostname(name, request.domain.as_deref());
        info!(replica_set = name, region, %hostname, %release, "creating replica set");

        let mut master_configuration =
            ApplicationConfiguration::master(name, region, release.clone(), &token, request.memory);
        if let Some(port) = request.master_port {
            master_configuration = master_configuration.with_port(port);
        }
        let master = match host {
            Some(host) => {
                self.procedure
                    .deploy_to_existing_host(host, &master_configuration)
                    .await?
            }
            None => {
                self.procedure
                    .start_new_host(&master_configuration, &request.master_host)
                    .await?
            }
        };

        let replica_configuration = ApplicationConfiguration::replica(
            name,
            region,
            release,
            master.port,
            &hostname,
            &token,
            request.memory,
        );
        let options = LoadBalancingOptions {
            hostname: hostname.clone(),
            mapping: request.mapping,
            redirect: request.redirect.clone(),
            baseline: Some(ReplicaBaseline {
                replica_configuration: replica_configuration.clone(),
                min_size: request.min_replicas,
                max_size: request.max_replicas.max(request.min_replicas),
                instance_type: request
                    .replica_instance_type
                    .clone()
                    .unwrap_or_else(|| self.config.landscape.default_dedicated_instance_type.clone()),
                image: request.master_host.image.clone(),
                key_name: request.master_host.key_name.clone(),
            }),
        };
        let wired = self.balancing.wire(name, &master, &options).await?;

        if request.min_replicas == 0 {
            let constraints = EligibilityConstraints::new(
                name,
                master.port,
                &self.config.ports.server_directory(name),
            )
            .unmanaged()
            .away_from(&master.host.availability_zone)
            .preferring(request.preferred_replica_host.clone())
            .with_instance_type(Some(request.replica_instance_type.clone().unwrap_or_else(
                || self.config.landscape.default_shared_instance_type.clone(),
            )))
            .with_image(request.master_host.image.clone())
            .with_key_name(request.master_host.key_name.clone());
            let replica_host = self
                .placement
                .find_or_launch_host(region, ProcessRole::Replica, &constraints)
                .await?;
            self.deploy_replica_on(&replica_host, &replica_configuration, &wired.public_target_group)
                .await?;
        }

        let replica_set = self.repository.require(region, name).await?;
        info!(replica_set = %replica_set, "replica set created");
        Ok(replica_set)
    }

    // ── Replicas ──────────────────────────────────────────────────

    /// Deploy a replica of `name` onto `host` and put it into rotation.
    pub async fn deploy_replica_to_existing_host(
        &self,
        region: &str,
        name: &str,
        host: &Host,
        request: &ReplicaRequest,
    ) -> LandscapeResult<Process> {
        let _guard = self.locks.lock(region, name).await;
        async {
            let replica_set = self.repository.require(region, name).await?;
            let token = self.bearer_token(request.replication_bearer_token.as_deref())?;
            let release = match &request.release {
                Some(selector) => self.collaborators.releases.resolve(selector).await?,
                None => replica_set.release().clone(),
            };
            let configuration = self.replica_configuration(&replica_set, release, &token, request.memory);
            self.deploy_replica_on(host, &configuration, &replica_set.public_target_group)
                .await
        }
        .await
        .inspect_err(|e| {
            error!(replica_set = name, region, host = %host.id, error = %e, "deploying replica failed")
        })
    }

    pub(crate) fn replica_configuration(
        &self,
        replica_set: &ReplicaSet,
        release: Release,
        token: &str,
        memory: MemorySizing,
    ) -> ApplicationConfiguration {
        ApplicationConfiguration::replica(
            &replica_set.name,
            &replica_set.master.host.region,
            release,
            replica_set.port(),
            &replica_set.hostname,
            token,
            memory,
        )
    }

    /// Installs, waits for readiness, then registers in the public target group.
    pub(crate) async fn deploy_replica_on(
        &self,
        host: &Host,
        configuration: &ApplicationConfiguration,
        public_target_group: &TargetGroup,
    ) -> LandscapeResult<Process> {
        let replica = self
            .procedure
            .deploy_to_existing_host(host, configuration)
            .await?;
        self.collaborators
            .cloud
            .register_target(public_target_group, &replica.host)
            .await?;
        info!(
            replica = %replica,
            target_group = %public_target_group.name,
            "replica in rotation"
        );
        Ok(replica)
    }

    // ── Hosts and images ──────────────────────────────────────────

    /// Launch an empty shared multi-process host.
    pub async fn create_empty_shared_host(
        &self,
        region: &str,
        request: &SharedHostRequest,
    ) -> LandscapeResult<Host> {
        let naming = &self.config.landscape;
        let launch = HostLaunchRequest {
            region: region.to_string(),
            instance_type: request
                .instance_type
                .clone()
                .unwrap_or_else(|| naming.default_shared_instance_type.clone()),
            image: request.image.clone(),
            availability_zone: request.availability_zone.clone(),
            key_name: request.key_name.clone(),
            name: request
                .name
                .clone()
                .unwrap_or_else(|| "shared application host".to_string()),
            tags: HashMap::from([(
                naming.application_host_tag.clone(),
                naming.shared_host_tag_value.clone(),
            )]),
        };
        let host = launch_running_host(self.collaborators.cloud.as_ref(), &launch, &self.config.timeouts)
            .await
            .inspect_err(|e| error!(region, error = %e, "launching shared host failed"))?;
        info!(host = %host.id, zone = %host.availability_zone, "shared host running");
        Ok(host)
    }

    /// Point each replica set's launch configuration at `image`, or at the
    /// latest image of the configured type.
    pub async fn update_image(
        &self,
        region: &str,
        names: &[String],
        image: Option<MachineImage>,
    ) -> LandscapeResult<Vec<ImageUpdate>> {
        let image = match image {
            Some(image) => image,
            None => {
                self.collaborators
                    .cloud
                    .latest_image(region, &self.config.landscape.image_type)
                    .await?
            }
        };
        let mut updates = Vec::with_capacity(names.len());
        for name in names {
            let _guard = self.locks.lock(region, name).await;
            let replica_set = self.repository.require(region, name).await?;
            let Some(group) = &replica_set.auto_scaling_group else {
                info!(replica_set = %name, "no auto-scaling group, skipping image update");
                updates.push(ImageUpdate {
                    replica_set: name.clone(),
                    launch_configuration: None,
                });
                continue;
            };
            let launch_configuration = LaunchConfiguration {
                image_id: image.id.clone(),
                ..group.launch_configuration.clone()
            };
            self.collaborators
                .cloud
                .update_launch_configuration(group, launch_configuration.clone())
                .await
                .inspect_err(|e| error!(replica_set = %name, error = %e, "updating image failed"))?;
            info!(replica_set = %name, image = %image.id, "launch configuration uses new image");
            updates.push(ImageUpdate {
                replica_set: name.clone(),
                launch_configuration: Some(launch_configuration),
            });
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use landscape_core::LandscapeError;
    use landscape_sim::SimLandscape;

    use super::*;

    fn setup() -> (Arc<SimLandscape>, ReplicaSetOrchestrator) {
        let sim = Arc::new(SimLandscape::new(LandscapeConfig::default()));
        let orchestrator = ReplicaSetOrchestrator::new(
            Collaborators::from_landscape(sim.clone()),
            LandscapeConfig::default(),
        );
        (sim, orchestrator)
    }

    #[tokio::test(start_paused = true)]
    async fn create_registers_master_in_both_target_groups() {
        let (sim, orchestrator) = setup();
        let replica_set = orchestrator
            .create(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"))
            .await
            .unwrap();

        assert_eq!(replica_set.hostname, "regatta42.example.com");
        assert_eq!(replica_set.master.release, Release::new("build-202610010000"));
        assert_eq!(replica_set.master_target_group.targets, vec![replica_set.master.host.id.clone()]);
        assert_eq!(replica_set.public_target_group.targets, vec![replica_set.master.host.id.clone()]);
        assert_eq!(replica_set.auto_scaling_group.as_ref().map(|g| g.min_size), Some(1));
        assert!(replica_set.is_dns_mapped());
        assert_eq!(replica_set.default_redirect(), Some(&Redirect::default()));
        assert_eq!(sim.count("launch_host"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_mapping_outside_designated_region_touches_nothing() {
        let (sim, orchestrator) = setup();
        let request = CreateReplicaSetRequest {
            mapping: LoadBalancerMapping::Dynamic,
            ..CreateReplicaSetRequest::new("regatta42", "us-east-1")
        };
        let err = orchestrator.create(&request).await.unwrap_err();

        assert!(matches!(err, LandscapeError::Configuration(_)));
        assert!(sim.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_bearer_token_is_an_authorization_error() {
        let (sim, orchestrator) = setup();
        sim.set_session_token(None);
        let err = orchestrator
            .create(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, LandscapeError::Authorization(_)));
        assert_eq!(sim.count("launch_host"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_to_existing_host_uses_free_port() {
        let (sim, orchestrator) = setup();
        let shared = sim.add_shared_host("eu-west-1", "eu-west-1a");
        sim.run_foreign_process(&shared.id, "othersite", 8888);

        let replica_set = orchestrator
            .deploy_to_existing_host(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"), &shared)
            .await
            .unwrap();

        assert_eq!(replica_set.master.host.id, shared.id);
        assert_eq!(replica_set.port(), 8889);
        assert_eq!(sim.count("launch_host"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn replica_on_existing_host_joins_public_target_group() {
        let (sim, orchestrator) = setup();
        orchestrator
            .create(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"))
            .await
            .unwrap();
        let shared = sim.add_shared_host("eu-west-1", "eu-west-1b");

        let replica = orchestrator
            .deploy_replica_to_existing_host("eu-west-1", "regatta42", &shared, &ReplicaRequest::default())
            .await
            .unwrap();

        assert_eq!(replica.role, ProcessRole::Replica);
        assert_eq!(replica.port, 8888);
        let replica_set = orchestrator.replica_set("eu-west-1", "regatta42").await.unwrap().unwrap();
        assert!(replica_set.public_target_group.contains(&shared.id));
        assert!(!replica_set.master_target_group.contains(&shared.id));
        assert!(replica_set.replicas.iter().any(|r| r.same_process(&replica)));
    }

    #[tokio::test(start_paused = true)]
    async fn eligible_shared_hosts_skip_occupied_port() {
        let (sim, orchestrator) = setup();
        orchestrator
            .create(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"))
            .await
            .unwrap();
        let free = sim.add_shared_host("eu-west-1", "eu-west-1a");
        let busy = sim.add_shared_host("eu-west-1", "eu-west-1b");
        sim.run_foreign_process(&busy.id, "othersite", 8888);

        let hosts = orchestrator.eligible_shared_hosts("eu-west-1", "regatta42").await.unwrap();

        let ids: Vec<_> = hosts.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec![free.id.as_str()]);
    }

    #[tokio::test(start_paused = true)]
    async fn create_empty_shared_host_is_tagged_shared() {
        let (_sim, orchestrator) = setup();
        let host = orchestrator
            .create_empty_shared_host("eu-west-1", &SharedHostRequest::default())
            .await
            .unwrap();

        assert_eq!(host.tag("application-host"), Some("___multi___"));
        assert_eq!(host.instance_type, "i3.2xlarge");
        assert!(host.slots.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_image_skips_replica_sets_without_auto_scaling() {
        let (sim, orchestrator) = setup();
        orchestrator
            .create(&CreateReplicaSetRequest::new("regatta42", "eu-west-1"))
            .await
            .unwrap();
        let shared = sim.add_shared_host("eu-west-1", "eu-west-1a");
        orchestrator
            .deploy_to_existing_host(&CreateReplicaSetRequest::new("regatta43", "eu-west-1"), &shared)
            .await
            .unwrap();
        sim.add_image(MachineImage {
            id: "ami-0002".to_string(),
            image_type: "application-server".to_string(),
            created_at: 1_800_000_000,
        });
        let asg = sim.auto_scaling_group_snapshot("eu-west-1", "S-regatta43").unwrap();
        sim.delete_auto_scaling_group(&asg).await.unwrap();

        let updates = orchestrator
            .update_image("eu-west-1", &["regatta42".to_string(), "regatta43".to_string()], None)
            .await
            .unwrap();

        assert_eq!(updates[0].launch_configuration.as_ref().map(|lc| lc.image_id.as_str()), Some("ami-0002"));
        assert_eq!(updates[1].launch_configuration, None);
        let group = sim.auto_scaling_group_snapshot("eu-west-1", "S-regatta42").unwrap();
        assert_eq!(group.launch_configuration.image_id, "ami-0002");
    }
}
