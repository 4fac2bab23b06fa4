//! Remote application servers, one per base URL.

use std::sync::{Arc, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use landscape_core::{
    CompareServersResult, DataImportProgress, LandscapeError, LandscapeResult,
    MasterDataImportRequest, MasterDataImportResult, RemoteServer, RemoteServerFactory,
    ServerEndpoint,
};

use crate::state::{ImportJob, SimLandscape, SimState};

pub struct SimRemoteServer {
    endpoint: ServerEndpoint,
    landscape: SimLandscape,
}

impl SimRemoteServer {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.landscape.state()
    }
}

impl RemoteServerFactory for SimLandscape {
    fn connect(&self, endpoint: ServerEndpoint) -> Arc<dyn RemoteServer> {
        Arc::new(SimRemoteServer {
            endpoint,
            landscape: self.clone(),
        })
    }
}

#[async_trait]
impl RemoteServer for SimRemoteServer {
    fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    async fn leaderboard_group_ids(&self) -> LandscapeResult<Vec<Uuid>> {
        let mut state = self.state();
        state
            .enter("leaderboard_group_ids", self.endpoint.base_url.clone())
            .map_err(LandscapeError::Remote)?;
        Ok(state
            .server(&self.endpoint.base_url)
            .leaderboard_groups
            .iter()
            .map(|g| g.id)
            .collect())
    }

    async fn import_master_data(
        &self,
        from: &ServerEndpoint,
        request: &MasterDataImportRequest,
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter(
                "import_master_data",
                format!("{} -> {}", from.base_url, self.endpoint.base_url),
            )
            .map_err(LandscapeError::Remote)?;
        let groups: Vec<_> = state
            .server(&from.base_url)
            .leaderboard_groups
            .iter()
            .filter(|g| request.leaderboard_group_ids.contains(&g.id))
            .cloned()
            .collect();
        let job = ImportJob {
            polls_remaining: state.import_polls,
            failure: state.import_failure.clone(),
            groups,
        };
        state
            .server(&self.endpoint.base_url)
            .imports
            .insert(request.progress_id, job);
        Ok(())
    }

    async fn master_data_import_progress(
        &self,
        progress_id: Uuid,
    ) -> LandscapeResult<DataImportProgress> {
        let mut state = self.state();
        state
            .enter("master_data_import_progress", progress_id.to_string())
            .map_err(LandscapeError::Remote)?;
        let job = state
            .server(&self.endpoint.base_url)
            .imports
            .get_mut(&progress_id)
            .ok_or_else(|| LandscapeError::NotFound(format!("import {progress_id}")))?;
        if job.polls_remaining > 0 {
            job.polls_remaining -= 1;
            return Ok(DataImportProgress {
                overall_progress: 0.5,
                ..DataImportProgress::default()
            });
        }
        Ok(match &job.failure {
            Some(message) => DataImportProgress {
                failed: true,
                error_message: Some(message.clone()),
                overall_progress: 1.0,
                result: None,
            },
            None => DataImportProgress {
                failed: false,
                error_message: None,
                overall_progress: 1.0,
                result: Some(MasterDataImportResult {
                    leaderboard_groups: job.groups.clone(),
                }),
            },
        })
    }

    async fn compare_servers(
        &self,
        other: &ServerEndpoint,
        leaderboard_group_ids: &[Uuid],
    ) -> LandscapeResult<CompareServersResult> {
        let mut state = self.state();
        state
            .enter(
                "compare_servers",
                format!(
                    "{} <> {} ({} groups)",
                    self.endpoint.base_url,
                    other.base_url,
                    leaderboard_group_ids.len()
                ),
            )
            .map_err(LandscapeError::Remote)?;
        if state.compare_diff_rounds > 0 {
            state.compare_diff_rounds -= 1;
            return Ok(CompareServersResult {
                a_diffs: leaderboard_group_ids
                    .iter()
                    .map(|id| format!("leaderboard group {id}: race count differs"))
                    .collect(),
                b_diffs: Vec::new(),
            });
        }
        Ok(CompareServersResult::default())
    }

    async fn remove_remote_server_reference(&self, base_url: &str) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("remove_remote_server_reference", base_url)
            .map_err(LandscapeError::Remote)?;
        let server = state.server(&self.endpoint.base_url);
        let before = server.references.len();
        server.references.retain(|r| r != base_url);
        if server.references.len() == before {
            return Err(LandscapeError::NotFound(format!("remote reference {base_url}")));
        }
        Ok(())
    }

    async fn remove_remote_server_event_references(
        &self,
        base_url: &str,
        event_ids: &[Uuid],
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter(
                "remove_remote_server_event_references",
                format!("{base_url} ({} events)", event_ids.len()),
            )
            .map_err(LandscapeError::Remote)?;
        state
            .server(&self.endpoint.base_url)
            .removed_event_references
            .extend_from_slice(event_ids);
        Ok(())
    }
}
