pub mod hosts;
pub mod replica_set;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use serde::Serialize;
use tracing::info;

use landscape_core::{CloudLandscape, Host, LandscapeConfig, MemorySizing, ReleaseSelector};
use landscape_orchestrator::{Collaborators, CreateReplicaSetRequest, ReplicaSetOrchestrator};
use landscape_sim::SimLandscape;

use crate::ReplicationArgs;

/// Oldest build the in-memory release repository knows; seeded replica
/// sets run it so an upgrade to `latest` has something to do.
const SEED_RELEASE: &str = "build-202609150000";

pub struct Context {
    pub landscape: Arc<SimLandscape>,
    pub orchestrator: ReplicaSetOrchestrator,
    pub region: String,
    pub key_name: Option<String>,
    pub shared_hosts: Vec<Host>,
}

impl Context {
    pub async fn open(
        config_path: Option<&Path>,
        region: &str,
        key_name: Option<String>,
        shared_hosts: u32,
        seed_replica_sets: &[String],
    ) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => LandscapeConfig::from_file(path)?,
            None => LandscapeConfig::default(),
        };
        let landscape = Arc::new(SimLandscape::new(config.clone()));
        let orchestrator =
            ReplicaSetOrchestrator::new(Collaborators::from_landscape(landscape.clone()), config);

        let shared_hosts = (0..shared_hosts as usize)
            .map(|i| {
                let zone = format!("{region}{}", ['a', 'b', 'c'][i % 3]);
                landscape.add_shared_host(region, &zone)
            })
            .collect();

        for name in seed_replica_sets {
            let request = CreateReplicaSetRequest {
                release: ReleaseSelector::Named(SEED_RELEASE.to_string()),
                ..CreateReplicaSetRequest::new(name, region)
            };
            orchestrator
                .create(&request)
                .await
                .with_context(|| format!("seeding replica set {name}"))?;
            info!(replica_set = %name, "seeded");
        }

        Ok(Self {
            landscape,
            orchestrator,
            region: region.to_string(),
            key_name,
            shared_hosts,
        })
    }

    /// The host named `id`, or the first seeded shared host.
    pub async fn host(&self, id: Option<&str>) -> anyhow::Result<Host> {
        let id = match (id, self.shared_hosts.first()) {
            (Some(id), _) => id,
            (None, Some(host)) => host.id.as_str(),
            (None, None) => bail!("no --host given and no shared host seeded (see --shared-hosts)"),
        };
        self.landscape
            .host(&self.region, id)
            .await?
            .with_context(|| format!("host {id} not found in {}", self.region))
    }
}

impl ReplicationArgs {
    pub fn memory(&self) -> MemorySizing {
        self.memory_mb
            .map(MemorySizing::Megabytes)
            .unwrap_or_default()
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
