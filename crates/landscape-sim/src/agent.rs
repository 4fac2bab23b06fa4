//! Process agent, releases, databases and session credentials.

use async_trait::async_trait;

use landscape_core::{
    AccessTokenSource, ApplicationConfiguration, DatabaseArchiver, DatabaseEndpoint, Host,
    LandscapeError, LandscapeResult, Process, ProcessAgent, ProcessRole, ProcessSlot, Release,
    ReleaseRepository, ReplicationState,
};

use crate::state::{ArchivedDatabase, SimLandscape};

#[async_trait]
impl ProcessAgent for SimLandscape {
    async fn install(
        &self,
        host: &Host,
        configuration: &ApplicationConfiguration,
        slot: &ProcessSlot,
    ) -> LandscapeResult<Process> {
        let mut state = self.state();
        state
            .enter("install", format!("{} {}:{}", configuration.server_name, host.id, slot.port))
            .map_err(LandscapeError::Provisioning)?;
        let fresh = state
            .host_snapshot(&host.id)
            .ok_or_else(|| LandscapeError::NotFound(format!("host {}", host.id)))?;
        if fresh.port_in_use(slot.port) {
            return Err(LandscapeError::Provisioning(format!(
                "port {} already in use on host {}",
                slot.port, host.id
            )));
        }
        let replication = match (configuration.role, &configuration.replication.master_hostname) {
            (ProcessRole::Replica, Some(master_hostname)) => ReplicationState::Replicating {
                master_hostname: master_hostname.clone(),
            },
            (ProcessRole::Replica, None) => ReplicationState::Stopped,
            (ProcessRole::Master, _) => ReplicationState::Primary,
        };
        let process = Process {
            host: fresh,
            port: slot.port,
            directory: slot.directory.clone(),
            server_name: slot.server_name.clone(),
            release: configuration.release.clone(),
            role: configuration.role,
            replication,
        };
        state.add_process(process.clone(), None);
        Ok(process)
    }

    async fn is_ready(&self, process: &Process) -> LandscapeResult<bool> {
        let mut state = self.state();
        let endpoint = process.endpoint();
        state
            .enter("is_ready", endpoint.clone())
            .map_err(LandscapeError::Remote)?;
        state
            .poll_ready(&endpoint)
            .ok_or_else(|| LandscapeError::NotFound(format!("process {endpoint}")))
    }

    async fn refresh_release(
        &self,
        process: &Process,
        release: &Release,
    ) -> LandscapeResult<Process> {
        let mut state = self.state();
        let endpoint = process.endpoint();
        state
            .enter("refresh_release", format!("{endpoint} {release}"))
            .map_err(LandscapeError::Provisioning)?;
        let boot_polls = state.boot_polls;
        let sim = state
            .processes
            .get_mut(&endpoint)
            .ok_or_else(|| LandscapeError::NotFound(format!("process {endpoint}")))?;
        sim.process.release = release.clone();
        sim.polls_until_ready = boot_polls;
        Ok(sim.process.clone())
    }

    async fn stop_replication(&self, process: &Process, _bearer_token: &str) -> LandscapeResult<()> {
        let mut state = self.state();
        let endpoint = process.endpoint();
        state
            .enter("stop_replication", endpoint.clone())
            .map_err(LandscapeError::Remote)?;
        if let Some(sim) = state.processes.get_mut(&endpoint) {
            sim.process.replication = ReplicationState::Stopped;
        }
        Ok(())
    }

    async fn stop(&self, process: &Process) -> LandscapeResult<()> {
        let mut state = self.state();
        let endpoint = process.endpoint();
        state
            .enter("stop", endpoint.clone())
            .map_err(LandscapeError::Provisioning)?;
        state.processes.remove(&endpoint);
        Ok(())
    }

    async fn processes_on(&self, host: &Host) -> LandscapeResult<Vec<Process>> {
        let mut state = self.state();
        state
            .enter("processes_on", host.id.clone())
            .map_err(LandscapeError::Provisioning)?;
        Ok(state
            .processes
            .values()
            .filter(|p| p.process.host.id == host.id)
            .map(|p| p.process.clone())
            .collect())
    }

    async fn database_of(&self, process: &Process) -> LandscapeResult<DatabaseEndpoint> {
        let mut state = self.state();
        state
            .enter("database_of", process.endpoint())
            .map_err(LandscapeError::Provisioning)?;
        Ok(DatabaseEndpoint {
            connection_uri: format!("mongodb://{}:27017", process.host.id),
            name: process.server_name.clone(),
        })
    }
}

#[async_trait]
impl ReleaseRepository for SimLandscape {
    async fn latest(&self) -> LandscapeResult<Release> {
        let mut state = self.state();
        state
            .enter("latest_release", "")
            .map_err(LandscapeError::Remote)?;
        state
            .releases
            .iter()
            .max_by(|a, b| a.name.cmp(&b.name))
            .cloned()
            .ok_or_else(|| LandscapeError::NotFound("any release".to_string()))
    }

    async fn release(&self, name: &str) -> LandscapeResult<Option<Release>> {
        let mut state = self.state();
        state.enter("release", name).map_err(LandscapeError::Remote)?;
        Ok(state.releases.iter().find(|r| r.name == name).cloned())
    }
}

#[async_trait]
impl DatabaseArchiver for SimLandscape {
    async fn copy_and_compare(
        &self,
        source: &DatabaseEndpoint,
        target: &DatabaseEndpoint,
        also_delete: &[DatabaseEndpoint],
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("copy_and_compare", format!("{} -> {}", source.name, target.name))
            .map_err(LandscapeError::Provisioning)?;
        state.archived_databases.push(ArchivedDatabase {
            source: source.name.clone(),
            target: target.name.clone(),
            also_deleted: also_delete.iter().map(|d| d.name.clone()).collect(),
        });
        Ok(())
    }
}

impl AccessTokenSource for SimLandscape {
    fn bearer_token(&self) -> Option<String> {
        self.state().session_token.clone()
    }
}
