//! Archival of a replica set into the ARCHIVE server.
//!
//! Import, verify, redirect, decommission. Each step runs only after the
//! previous one succeeded: a failed import or a comparison that keeps
//! reporting differences ends the pipeline before the redirect is
//! installed or anything is torn down.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use landscape_core::{
    DatabaseEndpoint, LandscapeError, LandscapeResult, MasterDataImportRequest,
    MasterDataImportResult, RemoteServer, ReplicaSet, ServerEndpoint,
};
use landscape_wait::{WaitError, WaitPolicy, wait};

use crate::orchestrator::ReplicaSetOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivePhase {
    LocatingArchive,
    Importing,
    AwaitingImport,
    Comparing,
    Redirecting,
    Decommissioning,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRequest {
    /// Token for both servers; falls back to the session's access token.
    pub bearer_token: Option<String>,
    /// Pause before the first comparison and between comparisons.
    pub compare_delay: Duration,
    pub max_compare_attempts: u32,
    /// Tear the source down after archiving instead of only pruning
    /// archived events from the archive's reference to it.
    pub remove_source: bool,
    /// Copy the source database here after teardown.
    pub database_destination: Option<DatabaseEndpoint>,
}

impl Default for ArchiveRequest {
    fn default() -> Self {
        Self {
            bearer_token: None,
            compare_delay: Duration::from_secs(60),
            max_compare_attempts: 5,
            remove_source: false,
            database_destination: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Comparison {
    /// No differences on the given attempt.
    Clean { attempts: u32 },
    /// Nothing was imported, so nothing was compared.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decommission {
    Removed { database_archived: bool },
    EventReferencesPruned { events: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveOutcome {
    pub replica_set: String,
    pub archive: String,
    pub progress_id: Uuid,
    pub imported_leaderboard_groups: usize,
    pub comparison: Comparison,
    pub decommission: Decommission,
    pub phases: Vec<ArchivePhase>,
}

struct ArchiveTracker<'a> {
    replica_set: &'a str,
    phase: ArchivePhase,
    history: Vec<ArchivePhase>,
}

impl<'a> ArchiveTracker<'a> {
    fn new(replica_set: &'a str) -> Self {
        Self {
            replica_set,
            phase: ArchivePhase::LocatingArchive,
            history: vec![ArchivePhase::LocatingArchive],
        }
    }

    fn enter(&mut self, next: ArchivePhase) {
        info!(replica_set = self.replica_set, from = ?self.phase, to = ?next, "archive phase");
        self.phase = next;
        self.history.push(next);
    }
}

impl ReplicaSetOrchestrator {
    /// Move the content of `name` into the ARCHIVE server and retire it.
    pub async fn archive(
        &self,
        region: &str,
        name: &str,
        request: &ArchiveRequest,
    ) -> LandscapeResult<ArchiveOutcome> {
        let _guard = self.locks.lock(region, name).await;
        let mut tracker = ArchiveTracker::new(name);
        let result = self.archive_locked(region, name, request, &mut tracker).await;
        if let Err(e) = &result {
            error!(
                replica_set = name,
                region,
                phase = ?tracker.phase,
                error = %e,
                "archiving failed"
            );
        }
        result
    }

    async fn archive_locked(
        &self,
        region: &str,
        name: &str,
        request: &ArchiveRequest,
        tracker: &mut ArchiveTracker<'_>,
    ) -> LandscapeResult<ArchiveOutcome> {
        let archive_tag = &self.config.landscape.archive_tag_value;
        let archive = self
            .repository
            .replica_set_by_tag(region, archive_tag)
            .await?
            .ok_or_else(|| {
                LandscapeError::NotFound(format!("{archive_tag} replica set in {region}"))
            })?;
        let source = self.repository.require(region, name).await?;
        if source.name == archive.name {
            return Err(LandscapeError::Configuration(format!(
                "{name} is the archive itself"
            )));
        }
        let token = self.bearer_token(request.bearer_token.as_deref())?;
        let source_endpoint = ServerEndpoint::https(&source.hostname, Some(token.clone()));
        let archive_endpoint = ServerEndpoint::https(&archive.hostname, Some(token));
        let source_server = self
            .collaborators
            .remote_servers
            .connect(source_endpoint.clone());
        let archive_server = self
            .collaborators
            .remote_servers
            .connect(archive_endpoint);

        tracker.enter(ArchivePhase::Importing);
        let progress_id = Uuid::new_v4();
        let leaderboard_group_ids = source_server.leaderboard_group_ids().await?;
        info!(
            replica_set = name,
            archive = %archive.hostname,
            %progress_id,
            leaderboard_groups = leaderboard_group_ids.len(),
            "starting master data import"
        );
        let import = MasterDataImportRequest::for_archive(leaderboard_group_ids, progress_id);
        archive_server
            .import_master_data(&source_endpoint, &import)
            .await?;

        tracker.enter(ArchivePhase::AwaitingImport);
        let timeouts = &self.config.timeouts;
        let policy = WaitPolicy::new(timeouts.master_data_import, timeouts.master_data_import_poll);
        let label = format!("master data import {progress_id}");
        let progress = wait(
            &label,
            &policy,
            || archive_server.master_data_import_progress(progress_id),
            |p| p.is_finished(),
        )
        .await?;
        let imported = match (progress.failed, progress.result) {
            (false, Some(result)) => result,
            _ => {
                let reason = progress
                    .error_message
                    .unwrap_or_else(|| "import finished without a result".to_string());
                return Err(LandscapeError::DataImport {
                    from: source.hostname.clone(),
                    into: archive.hostname.clone(),
                    progress_id,
                    reason,
                });
            }
        };
        info!(
            replica_set = name,
            leaderboard_groups = imported.leaderboard_groups.len(),
            "master data import finished"
        );

        tracker.enter(ArchivePhase::Comparing);
        let comparison = self
            .compare(&source, &archive, &source_endpoint, archive_server.as_ref(), &imported, request)
            .await?;

        tracker.enter(ArchivePhase::Redirecting);
        let redirect = source.default_redirect().cloned().unwrap_or_default();
        self.collaborators
            .cloud
            .install_archive_redirect(region, &source.hostname, &redirect)
            .await?;
        info!(hostname = %source.hostname, path = %redirect.path, "archive redirect installed");

        tracker.enter(ArchivePhase::Decommissioning);
        let decommission = if request.remove_source {
            match archive_server
                .remove_remote_server_reference(&source_endpoint.base_url)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    info!(reference = %source_endpoint.base_url, "remote reference already absent");
                }
                Err(e) => return Err(e),
            }
            let database = self.collaborators.agent.database_of(&source.master).await?;
            self.remove_replica_set(&source).await?;
            let database_archived = match &request.database_destination {
                Some(destination) => {
                    let replica_database = database.with_name(format!("{}-replica", database.name));
                    self.collaborators
                        .databases
                        .copy_and_compare(&database, destination, &[replica_database])
                        .await?;
                    info!(source = %database.name, target = %destination.name, "database archived");
                    true
                }
                None => false,
            };
            Decommission::Removed { database_archived }
        } else {
            let event_ids = imported.event_ids();
            archive_server
                .remove_remote_server_event_references(&source_endpoint.base_url, &event_ids)
                .await?;
            Decommission::EventReferencesPruned {
                events: event_ids.len(),
            }
        };

        tracker.enter(ArchivePhase::Completed);
        Ok(ArchiveOutcome {
            replica_set: name.to_string(),
            archive: archive.name,
            progress_id,
            imported_leaderboard_groups: imported.leaderboard_groups.len(),
            comparison,
            decommission,
            phases: tracker.history.clone(),
        })
    }

    async fn compare(
        &self,
        source: &ReplicaSet,
        archive: &ReplicaSet,
        source_endpoint: &ServerEndpoint,
        archive_server: &dyn RemoteServer,
        imported: &MasterDataImportResult,
        request: &ArchiveRequest,
    ) -> LandscapeResult<Comparison> {
        let ids = imported.leaderboard_group_ids();
        if ids.is_empty() {
            warn!(
                replica_set = %source.name,
                archive = %archive.hostname,
                "no leaderboard groups imported, archive content was not verified"
            );
            return Ok(Comparison::Skipped);
        }

        tokio::time::sleep(request.compare_delay).await;
        let policy = WaitPolicy::attempts(request.max_compare_attempts, request.compare_delay)
            .retry_on_error();
        let label = format!("{} matches {}", archive.hostname, source.hostname);
        let mut attempts = 0;
        let result = wait(
            &label,
            &policy,
            || {
                attempts += 1;
                archive_server.compare_servers(source_endpoint, &ids)
            },
            |result| !result.has_diffs(),
        )
        .await;
        match result {
            Ok(_) => {
                info!(replica_set = %source.name, attempts, "archive content matches");
                Ok(Comparison::Clean { attempts })
            }
            Err(WaitError::Timeout {
                attempts,
                last_value,
                last_error,
                ..
            }) => {
                let diffs = last_value.unwrap_or_default();
                error!(
                    replica_set = %source.name,
                    archive = %archive.hostname,
                    attempts,
                    a_diffs = ?diffs.a_diffs,
                    b_diffs = ?diffs.b_diffs,
                    last_error = ?last_error.map(|e| e.to_string()),
                    "archive content still differs"
                );
                Err(LandscapeError::ComparisonMismatch {
                    from: source.hostname.clone(),
                    into: archive.hostname.clone(),
                    attempts,
                    a_diffs: diffs.a_diffs,
                    b_diffs: diffs.b_diffs,
                })
            }
            Err(WaitError::Supplier(e)) => Err(e),
        }
    }
}
