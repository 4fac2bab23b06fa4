//! Eligibility strategy — find a host for a new process or launch one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use landscape_core::{
    CloudLandscape, Host, HostLaunchRequest, LandscapeConfig, LandscapeError, LandscapeResult,
    NamingConfig, ProcessRole, Timeouts,
};

use crate::eligibility::{EligibilityConstraints, check_host, is_eligible};
use crate::launch::launch_running_host;

pub struct EligibilityStrategy {
    cloud: Arc<dyn CloudLandscape>,
    naming: NamingConfig,
    timeouts: Timeouts,
}

impl EligibilityStrategy {
    pub fn new(cloud: Arc<dyn CloudLandscape>, config: &LandscapeConfig) -> Self {
        Self {
            cloud,
            naming: config.landscape.clone(),
            timeouts: config.timeouts.clone(),
        }
    }

    /// Preferred host, else the first eligible shared host, else a new
    /// dedicated host. With anti-affinity the new host is launched into
    /// another zone. A failed launch propagates as-is.
    pub async fn find_or_launch_host(
        &self,
        region: &str,
        role: ProcessRole,
        constraints: &EligibilityConstraints,
    ) -> LandscapeResult<Host> {
        if let Some(preferred) = &constraints.preferred_host {
            match self.cloud.host(region, &preferred.id).await? {
                Some(fresh) => match check_host(&fresh, constraints) {
                    None => {
                        info!(host = %fresh.id, %role, server = %constraints.server_name, "using preferred host");
                        return Ok(fresh);
                    }
                    Some(reason) => {
                        warn!(host = %fresh.id, %reason, "preferred host not eligible, looking elsewhere");
                    }
                },
                None => warn!(host = %preferred.id, "preferred host no longer exists"),
            }
        }

        if let Some(host) = self.eligible_shared_hosts(region, constraints).await?.into_iter().next() {
            info!(host = %host.id, %role, server = %constraints.server_name, "placing on shared host");
            return Ok(host);
        }

        let instance_type = constraints
            .instance_type
            .clone()
            .unwrap_or_else(|| self.naming.default_dedicated_instance_type.clone());
        let availability_zone = match &constraints.avoid_availability_zone {
            Some(avoid) => Some(self.zone_other_than(region, avoid).await?),
            None => None,
        };
        info!(
            %role,
            server = %constraints.server_name,
            %instance_type,
            zone = availability_zone.as_deref().unwrap_or("any"),
            "no eligible host, launching one"
        );
        let request = HostLaunchRequest {
            region: region.to_string(),
            instance_type,
            image: constraints.image.clone(),
            availability_zone,
            key_name: constraints.key_name.clone(),
            name: format!("{} ({role})", constraints.server_name),
            tags: HashMap::from([(
                self.naming.application_host_tag.clone(),
                constraints.server_name.clone(),
            )]),
        };
        let host = launch_running_host(self.cloud.as_ref(), &request, &self.timeouts).await?;
        if let Some(reason) = check_host(&host, constraints) {
            error!(host = %host.id, %reason, "launched host does not satisfy constraints, terminating");
            self.cloud.terminate_host(region, &host.id).await?;
            return Err(LandscapeError::Provisioning(format!(
                "launched host {} is not eligible: {reason}",
                host.id
            )));
        }
        Ok(host)
    }

    async fn zone_other_than(&self, region: &str, avoid: &str) -> LandscapeResult<String> {
        self.cloud
            .availability_zones(region)
            .await?
            .into_iter()
            .find(|zone| zone != avoid)
            .ok_or_else(|| {
                LandscapeError::Configuration(format!(
                    "{region} has no availability zone other than {avoid}"
                ))
            })
    }

    /// Every running shared host that could take the process, in query order.
    pub async fn eligible_shared_hosts(
        &self,
        region: &str,
        constraints: &EligibilityConstraints,
    ) -> LandscapeResult<Vec<Host>> {
        let shared = self
            .cloud
            .running_hosts_with_tag(
                region,
                &self.naming.application_host_tag,
                Some(&self.naming.shared_host_tag_value),
            )
            .await?;
        let total = shared.len();
        let eligible: Vec<Host> = shared
            .into_iter()
            .filter(|h| is_eligible(h, constraints))
            .collect();
        debug!(region, total, eligible = eligible.len(), "scanned shared hosts");
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use landscape_sim::SimLandscape;

    use super::*;

    fn setup() -> (Arc<SimLandscape>, EligibilityStrategy) {
        let sim = Arc::new(SimLandscape::new(LandscapeConfig::default()));
        let strategy = EligibilityStrategy::new(sim.clone(), &LandscapeConfig::default());
        (sim, strategy)
    }

    fn constraints(port: u16) -> EligibilityConstraints {
        EligibilityConstraints::new("regatta42", port, "/home/app/servers/regatta42")
    }

    #[tokio::test(start_paused = true)]
    async fn picks_first_eligible_shared_host() {
        let (sim, strategy) = setup();
        let busy = sim.add_shared_host("eu-west-1", "eu-west-1a");
        sim.run_foreign_process(&busy.id, "kielerwoche", 8090);
        let free = sim.add_shared_host("eu-west-1", "eu-west-1b");

        let host = strategy
            .find_or_launch_host("eu-west-1", ProcessRole::Replica, &constraints(8090))
            .await
            .unwrap();

        assert_eq!(host.id, free.id);
        assert_eq!(sim.count("launch_host"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn never_returns_host_with_port_taken() {
        let (sim, strategy) = setup();
        let busy = sim.add_shared_host("eu-west-1", "eu-west-1a");
        sim.run_foreign_process(&busy.id, "kielerwoche", 8090);

        let host = strategy
            .find_or_launch_host(
                "eu-west-1",
                ProcessRole::Replica,
                &constraints(8090).preferring(Some(busy.clone())),
            )
            .await
            .unwrap();

        assert_ne!(host.id, busy.id);
        assert_eq!(sim.count("launch_host"), 1);
        assert!(!host.port_in_use(8090));
    }

    #[tokio::test(start_paused = true)]
    async fn preferred_host_wins_when_eligible() {
        let (sim, strategy) = setup();
        sim.add_shared_host("eu-west-1", "eu-west-1a");
        let preferred = sim.add_shared_host("eu-west-1", "eu-west-1b");

        let host = strategy
            .find_or_launch_host(
                "eu-west-1",
                ProcessRole::Master,
                &constraints(8888).preferring(Some(preferred.clone())),
            )
            .await
            .unwrap();

        assert_eq!(host.id, preferred.id);
    }

    #[tokio::test(start_paused = true)]
    async fn anti_affinity_skips_master_zone() {
        let (sim, strategy) = setup();
        sim.add_shared_host("eu-west-1", "eu-west-1a");
        let other_zone = sim.add_shared_host("eu-west-1", "eu-west-1c");

        let host = strategy
            .find_or_launch_host(
                "eu-west-1",
                ProcessRole::Replica,
                &constraints(8888).away_from("eu-west-1a"),
            )
            .await
            .unwrap();

        assert_eq!(host.id, other_zone.id);
    }

    #[tokio::test(start_paused = true)]
    async fn launched_host_avoids_master_zone() {
        for zone in ["eu-west-1a", "eu-west-1b", "eu-west-1c"] {
            let (sim, strategy) = setup();

            let host = strategy
                .find_or_launch_host(
                    "eu-west-1",
                    ProcessRole::Replica,
                    &constraints(8888).unmanaged().away_from(zone),
                )
                .await
                .unwrap();

            assert_ne!(host.availability_zone, zone);
            assert_eq!(sim.count("launch_host"), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zone_lookup_failure_prevents_launch() {
        let (sim, strategy) = setup();
        sim.fail_next("availability_zones", "UnauthorizedOperation");

        let err = strategy
            .find_or_launch_host(
                "eu-west-1",
                ProcessRole::Replica,
                &constraints(8888).away_from("eu-west-1a"),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("UnauthorizedOperation"));
        assert_eq!(sim.count("launch_host"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn launches_requested_instance_type() {
        let (sim, strategy) = setup();

        let host = strategy
            .find_or_launch_host(
                "eu-west-1",
                ProcessRole::Replica,
                &constraints(8888).with_instance_type(Some("m5.large".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(host.instance_type, "m5.large");
        assert_eq!(host.tag("application-host"), Some("regatta42"));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_propagates() {
        let (sim, strategy) = setup();
        sim.fail_next("launch_host", "InsufficientInstanceCapacity");

        let err = strategy
            .find_or_launch_host("eu-west-1", ProcessRole::Replica, &constraints(8888))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("InsufficientInstanceCapacity"));
        assert_eq!(sim.count("launch_host"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lists_eligible_shared_hosts() {
        let (sim, strategy) = setup();
        let a = sim.add_shared_host("eu-west-1", "eu-west-1a");
        let b = sim.add_shared_host("eu-west-1", "eu-west-1b");
        sim.run_foreign_process(&b.id, "regatta42", 8888);
        sim.add_shared_host("us-east-1", "us-east-1a");

        let hosts = strategy
            .eligible_shared_hosts("eu-west-1", &constraints(8889))
            .await
            .unwrap();

        let ids: Vec<_> = hosts.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str()]);
    }
}
