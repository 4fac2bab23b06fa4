//! Collaborator traits the orchestrator is written against.
//!
//! Nothing here knows about a concrete cloud SDK, SSH mechanics or the
//! remote server's HTTP framing. Implementations live elsewhere; the
//! `landscape-sim` crate provides an in-memory one.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::ApplicationConfiguration;
use crate::error::{LandscapeError, LandscapeResult};
use crate::types::{
    AutoScalingGroup, DnsRecord, Host, HostLaunchRequest, HostState, LaunchConfiguration,
    ListenerRule, LoadBalancer, MachineImage, Process, ProcessSlot, Redirect, Release,
    ReleaseSelector, TargetGroup,
};

// ── Cloud landscape ───────────────────────────────────────────────

/// Cloud provider operations: hosts, target groups, load balancers,
/// auto-scaling, DNS, images and the central reverse proxy.
#[async_trait]
pub trait CloudLandscape: Send + Sync {
    async fn launch_host(&self, request: &HostLaunchRequest) -> LandscapeResult<Host>;

    /// Fresh snapshot of a host, `None` once it is gone.
    async fn host(&self, region: &str, id: &str) -> LandscapeResult<Option<Host>>;

    async fn host_state(&self, region: &str, id: &str) -> LandscapeResult<HostState>;

    /// Running hosts carrying tag `key`, optionally restricted to one value.
    async fn running_hosts_with_tag(
        &self,
        region: &str,
        key: &str,
        value: Option<&str>,
    ) -> LandscapeResult<Vec<Host>>;

    /// Availability zones hosts can be launched into.
    async fn availability_zones(&self, region: &str) -> LandscapeResult<Vec<String>>;

    async fn terminate_host(&self, region: &str, id: &str) -> LandscapeResult<()>;

    /// Creates the target group, or returns the existing one of that name.
    async fn create_target_group(
        &self,
        region: &str,
        name: &str,
        port: u16,
    ) -> LandscapeResult<TargetGroup>;

    async fn target_groups(&self, region: &str) -> LandscapeResult<Vec<TargetGroup>>;

    async fn register_target(&self, target_group: &TargetGroup, host: &Host)
    -> LandscapeResult<()>;

    async fn deregister_target(
        &self,
        target_group: &TargetGroup,
        host: &Host,
    ) -> LandscapeResult<()>;

    async fn delete_target_group(&self, target_group: &TargetGroup) -> LandscapeResult<()>;

    async fn load_balancers(&self, region: &str) -> LandscapeResult<Vec<LoadBalancer>>;

    async fn create_load_balancer(&self, region: &str, name: &str)
    -> LandscapeResult<LoadBalancer>;

    /// Adds rules to the load balancer's HTTPS listener, assigning ARNs and
    /// priorities. Returns the rules as created.
    async fn add_listener_rules(
        &self,
        load_balancer: &LoadBalancer,
        rules: Vec<ListenerRule>,
    ) -> LandscapeResult<Vec<ListenerRule>>;

    async fn delete_listener_rules(
        &self,
        load_balancer: &LoadBalancer,
        rules: &[ListenerRule],
    ) -> LandscapeResult<()>;

    async fn delete_load_balancer(&self, load_balancer: &LoadBalancer) -> LandscapeResult<()>;

    async fn create_auto_scaling_group(
        &self,
        group: &AutoScalingGroup,
    ) -> LandscapeResult<AutoScalingGroup>;

    async fn auto_scaling_groups(&self, region: &str) -> LandscapeResult<Vec<AutoScalingGroup>>;

    async fn update_auto_scaling_group_min_size(
        &self,
        group: &AutoScalingGroup,
        min_size: u32,
    ) -> LandscapeResult<()>;

    /// Replaces the group's launch configuration. Running instances keep
    /// their old configuration until replaced.
    async fn update_launch_configuration(
        &self,
        group: &AutoScalingGroup,
        launch_configuration: LaunchConfiguration,
    ) -> LandscapeResult<()>;

    /// Deletes the group together with its launch configuration and the
    /// hosts it launched.
    async fn delete_auto_scaling_group(&self, group: &AutoScalingGroup) -> LandscapeResult<()>;

    async fn hosted_zone_id(&self, domain: &str) -> LandscapeResult<String>;

    async fn upsert_dns_record(&self, record: &DnsRecord) -> LandscapeResult<()>;

    async fn dns_record(&self, hostname: &str) -> LandscapeResult<Option<DnsRecord>>;

    async fn remove_dns_record(&self, record: &DnsRecord) -> LandscapeResult<()>;

    async fn latest_image(&self, region: &str, image_type: &str) -> LandscapeResult<MachineImage>;

    /// Makes the central reverse proxy send `hostname` to the archive server.
    async fn install_archive_redirect(
        &self,
        region: &str,
        hostname: &str,
        redirect: &Redirect,
    ) -> LandscapeResult<()>;
}

// ── Process agent ─────────────────────────────────────────────────

/// Installs and controls application processes on hosts.
#[async_trait]
pub trait ProcessAgent: Send + Sync {
    /// Installs and starts a process in `slot`. Returns as soon as the
    /// process was started; readiness is polled separately.
    async fn install(
        &self,
        host: &Host,
        configuration: &ApplicationConfiguration,
        slot: &ProcessSlot,
    ) -> LandscapeResult<Process>;

    async fn is_ready(&self, process: &Process) -> LandscapeResult<bool>;

    /// Replaces the installed release in place and restarts the process.
    async fn refresh_release(&self, process: &Process, release: &Release)
    -> LandscapeResult<Process>;

    async fn stop_replication(&self, process: &Process, bearer_token: &str) -> LandscapeResult<()>;

    async fn stop(&self, process: &Process) -> LandscapeResult<()>;

    async fn processes_on(&self, host: &Host) -> LandscapeResult<Vec<Process>>;

    async fn database_of(&self, process: &Process) -> LandscapeResult<DatabaseEndpoint>;
}

// ── Releases ──────────────────────────────────────────────────────

#[async_trait]
pub trait ReleaseRepository: Send + Sync {
    async fn latest(&self) -> LandscapeResult<Release>;

    async fn release(&self, name: &str) -> LandscapeResult<Option<Release>>;

    async fn resolve(&self, selector: &ReleaseSelector) -> LandscapeResult<Release> {
        match selector {
            ReleaseSelector::Latest => self.latest().await,
            ReleaseSelector::Named(name) => self
                .release(name)
                .await?
                .ok_or_else(|| LandscapeError::NotFound(format!("release {name}"))),
        }
    }
}

// ── Remote server API ─────────────────────────────────────────────

/// Address and credentials of an application server's HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Base URL, e.g. `https://regatta42.example.com`.
    pub base_url: String,
    pub bearer_token: Option<String>,
}

impl ServerEndpoint {
    pub fn https(hostname: &str, bearer_token: Option<String>) -> Self {
        Self {
            base_url: format!("https://{hostname}"),
            bearer_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterDataImportRequest {
    pub leaderboard_group_ids: Vec<Uuid>,
    pub override_existing: bool,
    pub compress: bool,
    pub import_wind: bool,
    pub import_device_configurations: bool,
    pub import_tracked_races: bool,
    pub progress_id: Uuid,
}

impl MasterDataImportRequest {
    /// Settings used when moving a replica set into the archive.
    pub fn for_archive(leaderboard_group_ids: Vec<Uuid>, progress_id: Uuid) -> Self {
        Self {
            leaderboard_group_ids,
            override_existing: true,
            compress: true,
            import_wind: true,
            import_device_configurations: false,
            import_tracked_races: true,
            progress_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedLeaderboardGroup {
    pub id: Uuid,
    pub name: String,
    pub event_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MasterDataImportResult {
    pub leaderboard_groups: Vec<ImportedLeaderboardGroup>,
}

impl MasterDataImportResult {
    pub fn leaderboard_group_ids(&self) -> Vec<Uuid> {
        self.leaderboard_groups.iter().map(|g| g.id).collect()
    }

    pub fn event_ids(&self) -> Vec<Uuid> {
        self.leaderboard_groups
            .iter()
            .flat_map(|g| g.event_ids.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataImportProgress {
    pub failed: bool,
    pub error_message: Option<String>,
    /// Fraction between 0.0 and 1.0.
    pub overall_progress: f64,
    pub result: Option<MasterDataImportResult>,
}

impl DataImportProgress {
    pub fn is_finished(&self) -> bool {
        self.failed || self.result.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompareServersResult {
    /// Content only or differently present on the first server.
    pub a_diffs: Vec<String>,
    pub b_diffs: Vec<String>,
}

impl CompareServersResult {
    pub fn has_diffs(&self) -> bool {
        !self.a_diffs.is_empty() || !self.b_diffs.is_empty()
    }
}

/// Client for one application server's HTTP API. Non-success statuses
/// surface as [`LandscapeError::Remote`] or [`LandscapeError::NotFound`].
#[async_trait]
pub trait RemoteServer: Send + Sync {
    fn endpoint(&self) -> &ServerEndpoint;

    async fn leaderboard_group_ids(&self) -> LandscapeResult<Vec<Uuid>>;

    /// Starts an import of `request.leaderboard_group_ids` from `from` into this server.
    async fn import_master_data(
        &self,
        from: &ServerEndpoint,
        request: &MasterDataImportRequest,
    ) -> LandscapeResult<()>;

    async fn master_data_import_progress(
        &self,
        progress_id: Uuid,
    ) -> LandscapeResult<DataImportProgress>;

    async fn compare_servers(
        &self,
        other: &ServerEndpoint,
        leaderboard_group_ids: &[Uuid],
    ) -> LandscapeResult<CompareServersResult>;

    async fn remove_remote_server_reference(&self, base_url: &str) -> LandscapeResult<()>;

    async fn remove_remote_server_event_references(
        &self,
        base_url: &str,
        event_ids: &[Uuid],
    ) -> LandscapeResult<()>;
}

pub trait RemoteServerFactory: Send + Sync {
    fn connect(&self, endpoint: ServerEndpoint) -> Arc<dyn RemoteServer>;
}

// ── Databases ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    pub connection_uri: String,
    pub name: String,
}

impl DatabaseEndpoint {
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            connection_uri: self.connection_uri.clone(),
            name: name.into(),
        }
    }
}

#[async_trait]
pub trait DatabaseArchiver: Send + Sync {
    /// Drops `target`, copies `source` into it, compares both and on
    /// success drops `source` and every database in `also_delete`.
    async fn copy_and_compare(
        &self,
        source: &DatabaseEndpoint,
        target: &DatabaseEndpoint,
        also_delete: &[DatabaseEndpoint],
    ) -> LandscapeResult<()>;
}

// ── Credentials ───────────────────────────────────────────────────

/// Bearer token of the session running the orchestration, used when no
/// explicit replication token is passed.
pub trait AccessTokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Explicit token first, then the session token.
pub fn resolve_bearer_token(
    explicit: Option<&str>,
    source: &dyn AccessTokenSource,
) -> LandscapeResult<String> {
    explicit
        .map(str::to_string)
        .or_else(|| source.bearer_token())
        .ok_or_else(|| {
            LandscapeError::Authorization(
                "no replication bearer token given and no session token available".to_string(),
            )
        })
}
