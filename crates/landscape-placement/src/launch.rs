//! Launch a host and block until the cloud reports it running.

use tracing::{error, info};

use landscape_core::{
    CloudLandscape, Host, HostLaunchRequest, HostState, LandscapeError, LandscapeResult, Timeouts,
};
use landscape_wait::{WaitPolicy, wait};

/// Launch errors propagate unchanged; only the state poll retries.
pub async fn launch_running_host(
    cloud: &dyn CloudLandscape,
    request: &HostLaunchRequest,
    timeouts: &Timeouts,
) -> LandscapeResult<Host> {
    let host = cloud.launch_host(request).await.inspect_err(|e| {
        error!(
            region = %request.region,
            instance_type = %request.instance_type,
            name = %request.name,
            error = %e,
            "host launch failed"
        );
    })?;
    info!(host = %host.id, instance_type = %host.instance_type, "launched host, waiting until running");

    let policy = WaitPolicy::new(timeouts.wait_for_host, timeouts.health_poll).retry_on_error();
    let label = format!("host {} running", host.id);
    wait(
        &label,
        &policy,
        || cloud.host_state(&host.region, &host.id),
        |state| *state == HostState::Running,
    )
    .await?;

    cloud
        .host(&host.region, &host.id)
        .await?
        .ok_or_else(|| LandscapeError::NotFound(format!("host {} vanished after launch", host.id)))
}
