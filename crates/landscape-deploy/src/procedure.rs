//! Deployment procedure.
//!
//! Every variant returns only once the process reports ready. Install and
//! launch failures propagate unchanged; the readiness poll is the only
//! thing retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use landscape_core::{
    ApplicationConfiguration, CloudLandscape, Host, HostLaunchRequest, LandscapeConfig,
    LandscapeError, LandscapeResult, MachineImage, Process, ProcessAgent, Release,
};
use landscape_placement::launch_running_host;
use landscape_wait::{WaitPolicy, wait};

use crate::slot::allocate_slot;

/// Host to launch for [`DeploymentProcedure::start_new_host`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSpec {
    /// Falls back to the configured shared or dedicated default.
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    pub key_name: Option<String>,
    pub image: Option<MachineImage>,
    /// Tag the host as a shared multi-process host instead of dedicating it.
    pub shared: bool,
}

pub struct DeploymentProcedure {
    cloud: Arc<dyn CloudLandscape>,
    agent: Arc<dyn ProcessAgent>,
    config: LandscapeConfig,
}

impl DeploymentProcedure {
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

    /// Launch a host, install the process on it and wait for readiness.
    pub async fn start_new_host(
        &self,
        configuration: &ApplicationConfiguration,
        spec: &HostSpec,
    ) -> LandscapeResult<Process> {
        let naming = &self.config.landscape;
        let (tag_value, default_type) = if spec.shared {
            (
                naming.shared_host_tag_value.clone(),
                &naming.default_shared_instance_type,
            )
        } else {
            (
                configuration.server_name.clone(),
                &naming.default_dedicated_instance_type,
            )
        };
        let request = HostLaunchRequest {
            region: configuration.region.clone(),
            instance_type: spec.instance_type.clone().unwrap_or_else(|| default_type.clone()),
            image: spec.image.clone(),
            availability_zone: spec.availability_zone.clone(),
            key_name: spec.key_name.clone(),
            name: format!("{} ({})", configuration.server_name, configuration.role),
            tags: HashMap::from([(naming.application_host_tag.clone(), tag_value)]),
        };
        let host = launch_running_host(self.cloud.as_ref(), &request, &self.config.timeouts).await?;
        self.install_and_wait(&host, configuration, self.config.timeouts.wait_for_host)
            .await
    }

    /// Install on an already running host, on a free port and directory.
    pub async fn deploy_to_existing_host(
        &self,
        host: &Host,
        configuration: &ApplicationConfiguration,
    ) -> LandscapeResult<Process> {
        let fresh = self
            .cloud
            .host(&host.region, &host.id)
            .await?
            .ok_or_else(|| LandscapeError::NotFound(format!("host {}", host.id)))?;
        self.install_and_wait(&fresh, configuration, self.config.timeouts.wait_for_process)
            .await
    }

    async fn install_and_wait(
        &self,
        host: &Host,
        configuration: &ApplicationConfiguration,
        timeout: Duration,
    ) -> LandscapeResult<Process> {
        let slot = allocate_slot(host, configuration, &self.config.ports)?;
        info!(
            host = %host.id,
            server = %configuration.server_name,
            role = %configuration.role,
            port = slot.port,
            release = %configuration.release,
            "installing process"
        );
        let process = self
            .agent
            .install(host, configuration, &slot)
            .await
            .inspect_err(|e| error!(host = %host.id, server = %configuration.server_name, error = %e, "install failed"))?;
        self.wait_until_ready(&process, timeout).await?;
        Ok(process)
    }

    /// Replace the release in place, keeping host and port.
    pub async fn refresh(
        &self,
        process: &Process,
        release: &Release,
        timeout: Duration,
    ) -> LandscapeResult<Process> {
        info!(process = %process, from = %process.release, to = %release, "refreshing release");
        let refreshed = self.agent.refresh_release(process, release).await?;
        self.wait_until_ready(&refreshed, timeout).await?;
        Ok(refreshed)
    }

    pub async fn wait_until_ready(&self, process: &Process, timeout: Duration) -> LandscapeResult<()> {
        let policy = WaitPolicy::new(timeout, self.config.timeouts.health_poll).retry_on_error();
        let label = format!("{process} ready");
        wait(&label, &policy, || self.agent.is_ready(process), |ready| *ready)
            .await
            .inspect_err(|e| error!(process = %process, error = %e, "process did not become ready"))?;
        debug!(process = %process, "process ready");
        Ok(())
    }

    /// Stop the process and terminate its host if nothing else runs there.
    /// Returns whether the host was terminated.
    pub async fn stop_and_terminate_if_last(&self, process: &Process) -> LandscapeResult<bool> {
        self.agent.stop(process).await?;
        let remaining = self.agent.processes_on(&process.host).await?;
        if remaining.iter().any(|p| !p.same_process(process)) {
            info!(process = %process, remaining = remaining.len(), "stopped process, host still in use");
            return Ok(false);
        }
        self.cloud
            .terminate_host(&process.host.region, &process.host.id)
            .await?;
        info!(process = %process, "stopped process and terminated its host");
        Ok(true)
    }
}
