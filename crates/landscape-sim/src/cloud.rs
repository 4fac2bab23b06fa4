//! `CloudLandscape` over the simulator state.

use async_trait::async_trait;
use tracing::debug;

use landscape_core::{
    AutoScalingGroup, CloudLandscape, DnsRecord, Host, HostLaunchRequest, HostState,
    LandscapeError, LandscapeResult, LaunchConfiguration, ListenerRule, LoadBalancer,
    MachineImage, Redirect, RuleAction, TargetGroup,
};

use crate::state::{SimLandscape, ZONE_SUFFIXES};

fn key(region: &str, name: &str) -> (String, String) {
    (region.to_string(), name.to_string())
}

#[async_trait]
impl CloudLandscape for SimLandscape {
    async fn launch_host(&self, request: &HostLaunchRequest) -> LandscapeResult<Host> {
        let mut state = self.state();
        state
            .enter("launch_host", format!("{} {}", request.region, request.instance_type))
            .map_err(LandscapeError::Provisioning)?;
        let host = state.launch(
            &request.region,
            &request.instance_type,
            request.availability_zone.as_deref(),
            request.tags.clone(),
            None,
            HostState::Pending,
        );
        debug!(host = %host.id, name = %request.name, "sim launched host");
        Ok(host)
    }

    async fn host(&self, region: &str, id: &str) -> LandscapeResult<Option<Host>> {
        let mut state = self.state();
        state.enter("host", id).map_err(LandscapeError::Provisioning)?;
        Ok(state.host_snapshot(id).filter(|h| h.region == region))
    }

    /// A launched host reports `Pending` once, then `Running`.
    async fn host_state(&self, _region: &str, id: &str) -> LandscapeResult<HostState> {
        let mut state = self.state();
        state.enter("host_state", id).map_err(LandscapeError::Provisioning)?;
        let host = state
            .hosts
            .get_mut(id)
            .ok_or_else(|| LandscapeError::NotFound(format!("host {id}")))?;
        let observed = host.state;
        if observed == HostState::Pending {
            host.state = HostState::Running;
        }
        Ok(observed)
    }

    async fn running_hosts_with_tag(
        &self,
        region: &str,
        key: &str,
        value: Option<&str>,
    ) -> LandscapeResult<Vec<Host>> {
        let mut state = self.state();
        state
            .enter("running_hosts_with_tag", format!("{key}={}", value.unwrap_or("*")))
            .map_err(LandscapeError::Provisioning)?;
        let ids: Vec<String> = state
            .hosts
            .values()
            .filter(|h| h.state == HostState::Running && h.host.region == region)
            .filter(|h| match (h.host.tag(key), value) {
                (Some(actual), Some(wanted)) => actual == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .map(|h| h.host.id.clone())
            .collect();
        Ok(ids.iter().filter_map(|id| state.host_snapshot(id)).collect())
    }

    async fn availability_zones(&self, region: &str) -> LandscapeResult<Vec<String>> {
        let mut state = self.state();
        state
            .enter("availability_zones", region)
            .map_err(LandscapeError::Provisioning)?;
        Ok(ZONE_SUFFIXES.iter().map(|s| format!("{region}{s}")).collect())
    }

    async fn terminate_host(&self, _region: &str, id: &str) -> LandscapeResult<()> {
        let mut state = self.state();
        state.enter("terminate_host", id).map_err(LandscapeError::Provisioning)?;
        state.terminate(id);
        Ok(())
    }

    async fn create_target_group(
        &self,
        region: &str,
        name: &str,
        port: u16,
    ) -> LandscapeResult<TargetGroup> {
        let mut state = self.state();
        state
            .enter("create_target_group", name)
            .map_err(LandscapeError::Provisioning)?;
        let tg = state
            .target_groups
            .entry(key(region, name))
            .or_insert_with(|| TargetGroup {
                name: name.to_string(),
                arn: format!("arn:sim:{region}:targetgroup/{name}"),
                region: region.to_string(),
                port,
                targets: Vec::new(),
            });
        Ok(tg.clone())
    }

    async fn target_groups(&self, region: &str) -> LandscapeResult<Vec<TargetGroup>> {
        let mut state = self.state();
        state
            .enter("target_groups", region)
            .map_err(LandscapeError::Provisioning)?;
        Ok(state
            .target_groups
            .values()
            .filter(|tg| tg.region == region)
            .cloned()
            .collect())
    }

    async fn register_target(
        &self,
        target_group: &TargetGroup,
        host: &Host,
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("register_target", format!("{} {}", target_group.name, host.id))
            .map_err(LandscapeError::Provisioning)?;
        let tg = state
            .target_groups
            .get_mut(&key(&target_group.region, &target_group.name))
            .ok_or_else(|| LandscapeError::NotFound(format!("target group {}", target_group.name)))?;
        if !tg.contains(&host.id) {
            tg.targets.push(host.id.clone());
        }
        Ok(())
    }

    async fn deregister_target(
        &self,
        target_group: &TargetGroup,
        host: &Host,
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("deregister_target", format!("{} {}", target_group.name, host.id))
            .map_err(LandscapeError::Provisioning)?;
        state.deregister(&key(&target_group.region, &target_group.name), &host.id);
        Ok(())
    }

    async fn delete_target_group(&self, target_group: &TargetGroup) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("delete_target_group", target_group.name.clone())
            .map_err(LandscapeError::Provisioning)?;
        state
            .target_groups
            .remove(&key(&target_group.region, &target_group.name));
        Ok(())
    }

    async fn load_balancers(&self, region: &str) -> LandscapeResult<Vec<LoadBalancer>> {
        let mut state = self.state();
        state
            .enter("load_balancers", region)
            .map_err(LandscapeError::Provisioning)?;
        Ok(state
            .load_balancers
            .values()
            .filter(|lb| lb.region == region)
            .cloned()
            .collect())
    }

    /// New load balancers carry a default rule redirecting to `/`.
    async fn create_load_balancer(&self, region: &str, name: &str) -> LandscapeResult<LoadBalancer> {
        let mut state = self.state();
        state
            .enter("create_load_balancer", name)
            .map_err(LandscapeError::Provisioning)?;
        let n = state.next_id();
        let arn = format!("arn:sim:{region}:loadbalancer/{name}");
        let lb = LoadBalancer {
            name: name.to_string(),
            arn: arn.clone(),
            region: region.to_string(),
            dns_name: format!("{}-{n}.{region}.elb.example.com", name.to_lowercase()),
            rules: vec![ListenerRule {
                arn: format!("{arn}/rule/default"),
                priority: None,
                conditions: Vec::new(),
                action: RuleAction::Redirect(Redirect::default()),
            }],
        };
        state.load_balancers.insert(key(region, name), lb.clone());
        Ok(lb)
    }

    async fn add_listener_rules(
        &self,
        load_balancer: &LoadBalancer,
        rules: Vec<ListenerRule>,
    ) -> LandscapeResult<Vec<ListenerRule>> {
        let mut state = self.state();
        state
            .enter("add_listener_rules", load_balancer.name.clone())
            .map_err(LandscapeError::Provisioning)?;
        let lb = state
            .load_balancers
            .get_mut(&key(&load_balancer.region, &load_balancer.name))
            .ok_or_else(|| LandscapeError::NotFound(format!("load balancer {}", load_balancer.name)))?;
        let mut priority = lb.rules.iter().filter_map(|r| r.priority).max().unwrap_or(0);
        let created: Vec<ListenerRule> = rules
            .into_iter()
            .map(|mut rule| {
                priority += 1;
                rule.priority = Some(priority);
                rule.arn = format!("{}/rule/{priority}", lb.arn);
                rule
            })
            .collect();
        lb.rules.extend(created.iter().cloned());
        Ok(created)
    }

    async fn delete_listener_rules(
        &self,
        load_balancer: &LoadBalancer,
        rules: &[ListenerRule],
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("delete_listener_rules", format!("{} x{}", load_balancer.name, rules.len()))
            .map_err(LandscapeError::Provisioning)?;
        if let Some(lb) = state
            .load_balancers
            .get_mut(&key(&load_balancer.region, &load_balancer.name))
        {
            lb.rules.retain(|r| !rules.iter().any(|d| d.arn == r.arn));
        }
        Ok(())
    }

    async fn delete_load_balancer(&self, load_balancer: &LoadBalancer) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("delete_load_balancer", load_balancer.name.clone())
            .map_err(LandscapeError::Provisioning)?;
        state
            .load_balancers
            .remove(&key(&load_balancer.region, &load_balancer.name));
        Ok(())
    }

    async fn create_auto_scaling_group(
        &self,
        group: &AutoScalingGroup,
    ) -> LandscapeResult<AutoScalingGroup> {
        let mut state = self.state();
        state
            .enter("create_auto_scaling_group", group.name.clone())
            .map_err(LandscapeError::Provisioning)?;
        let k = key(&group.region, &group.name);
        if state.auto_scaling_groups.contains_key(&k) {
            return Err(LandscapeError::Provisioning(format!(
                "auto-scaling group {} already exists",
                group.name
            )));
        }
        state.auto_scaling_groups.insert(k.clone(), group.clone());
        state.reconcile_auto_scaling_group(&k);
        Ok(group.clone())
    }

    async fn auto_scaling_groups(&self, region: &str) -> LandscapeResult<Vec<AutoScalingGroup>> {
        let mut state = self.state();
        state
            .enter("auto_scaling_groups", region)
            .map_err(LandscapeError::Provisioning)?;
        Ok(state
            .auto_scaling_groups
            .values()
            .filter(|g| g.region == region)
            .cloned()
            .collect())
    }

    async fn update_auto_scaling_group_min_size(
        &self,
        group: &AutoScalingGroup,
        min_size: u32,
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("update_auto_scaling_group_min_size", format!("{} {min_size}", group.name))
            .map_err(LandscapeError::Provisioning)?;
        let k = key(&group.region, &group.name);
        let stored = state
            .auto_scaling_groups
            .get_mut(&k)
            .ok_or_else(|| LandscapeError::NotFound(format!("auto-scaling group {}", group.name)))?;
        stored.min_size = min_size;
        stored.max_size = stored.max_size.max(min_size);
        state.reconcile_auto_scaling_group(&k);
        Ok(())
    }

    async fn update_launch_configuration(
        &self,
        group: &AutoScalingGroup,
        launch_configuration: LaunchConfiguration,
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter(
                "update_launch_configuration",
                format!("{} {}", group.name, launch_configuration.name),
            )
            .map_err(LandscapeError::Provisioning)?;
        let stored = state
            .auto_scaling_groups
            .get_mut(&key(&group.region, &group.name))
            .ok_or_else(|| LandscapeError::NotFound(format!("auto-scaling group {}", group.name)))?;
        stored.launch_configuration = launch_configuration;
        Ok(())
    }

    async fn delete_auto_scaling_group(&self, group: &AutoScalingGroup) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("delete_auto_scaling_group", group.name.clone())
            .map_err(LandscapeError::Provisioning)?;
        state
            .auto_scaling_groups
            .remove(&key(&group.region, &group.name));
        let managed: Vec<String> = state
            .hosts
            .values()
            .filter(|h| h.state != HostState::Terminated && h.host.is_managed_by(&group.name))
            .map(|h| h.host.id.clone())
            .collect();
        for id in managed {
            state.terminate(&id);
        }
        Ok(())
    }

    async fn hosted_zone_id(&self, domain: &str) -> LandscapeResult<String> {
        let mut state = self.state();
        state
            .enter("hosted_zone_id", domain)
            .map_err(LandscapeError::Provisioning)?;
        Ok(format!("Z-{}", domain.replace('.', "-")))
    }

    async fn upsert_dns_record(&self, record: &DnsRecord) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("upsert_dns_record", record.hostname.clone())
            .map_err(LandscapeError::Provisioning)?;
        state
            .dns_records
            .insert(record.hostname.clone(), record.clone());
        Ok(())
    }

    async fn dns_record(&self, hostname: &str) -> LandscapeResult<Option<DnsRecord>> {
        let mut state = self.state();
        state
            .enter("dns_record", hostname)
            .map_err(LandscapeError::Provisioning)?;
        Ok(state.dns_records.get(hostname).cloned())
    }

    async fn remove_dns_record(&self, record: &DnsRecord) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("remove_dns_record", record.hostname.clone())
            .map_err(LandscapeError::Provisioning)?;
        state.dns_records.remove(&record.hostname);
        Ok(())
    }

    async fn latest_image(&self, region: &str, image_type: &str) -> LandscapeResult<MachineImage> {
        let mut state = self.state();
        state
            .enter("latest_image", format!("{region} {image_type}"))
            .map_err(LandscapeError::Provisioning)?;
        state
            .images
            .iter()
            .filter(|i| i.image_type == image_type)
            .max_by_key(|i| i.created_at)
            .cloned()
            .ok_or_else(|| LandscapeError::NotFound(format!("image of type {image_type}")))
    }

    async fn install_archive_redirect(
        &self,
        _region: &str,
        hostname: &str,
        redirect: &Redirect,
    ) -> LandscapeResult<()> {
        let mut state = self.state();
        state
            .enter("install_archive_redirect", hostname)
            .map_err(LandscapeError::Provisioning)?;
        state.redirects.push((hostname.to_string(), redirect.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use landscape_core::{
        ApplicationConfiguration, LandscapeConfig, MemorySizing, ProcessAgent, Release,
    };

    use super::*;

    fn sim() -> SimLandscape {
        SimLandscape::new(LandscapeConfig::default())
    }

    #[tokio::test]
    async fn launched_host_becomes_running() {
        let sim = sim();
        let host = sim
            .launch_host(&HostLaunchRequest {
                region: "eu-west-1".to_string(),
                instance_type: "c5.2xlarge".to_string(),
                image: None,
                availability_zone: Some("eu-west-1b".to_string()),
                key_name: None,
                name: "regatta42 (master)".to_string(),
                tags: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(host.availability_zone, "eu-west-1b");
        assert_eq!(sim.host_state("eu-west-1", &host.id).await.unwrap(), HostState::Pending);
        assert_eq!(sim.host_state("eu-west-1", &host.id).await.unwrap(), HostState::Running);
    }

    #[tokio::test]
    async fn auto_scaling_group_launches_replicas_into_target_group() {
        let sim = sim();
        let tg = sim.create_target_group("eu-west-1", "S-regatta42", 8888).await.unwrap();
        let group = AutoScalingGroup {
            name: "S-regatta42".to_string(),
            region: "eu-west-1".to_string(),
            launch_configuration: LaunchConfiguration {
                name: "S-regatta42-build-1".to_string(),
                image_id: "ami-0001".to_string(),
                instance_type: "c5.2xlarge".to_string(),
                key_name: None,
                replica_configuration: ApplicationConfiguration::replica(
                    "regatta42",
                    "eu-west-1",
                    Release::new("build-1"),
                    8888,
                    "regatta42.example.com",
                    "token",
                    MemorySizing::Default,
                ),
            },
            min_size: 0,
            max_size: 4,
            target_group: tg.name.clone(),
            tags: HashMap::new(),
        };
        sim.create_auto_scaling_group(&group).await.unwrap();
        assert!(sim.processes_of("regatta42").is_empty());

        sim.update_auto_scaling_group_min_size(&group, 2).await.unwrap();
        let replicas = sim.processes_of("regatta42");
        assert_eq!(replicas.len(), 2);
        assert!(replicas.iter().all(|p| p.host.is_managed_by("S-regatta42")));
        assert!(sim.target_groups_snapshot("eu-west-1")[0].targets.is_empty());

        // Hosts join the target group once their replica is ready.
        for replica in &replicas {
            while !sim.is_ready(replica).await.unwrap() {}
        }
        assert_eq!(sim.target_groups_snapshot("eu-west-1")[0].targets.len(), 2);

        // A terminated group host is replaced.
        sim.terminate_host("eu-west-1", &replicas[0].host.id).await.unwrap();
        let after = sim.processes_of("regatta42");
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|p| !p.same_process(&replicas[0])));

        sim.delete_auto_scaling_group(&group).await.unwrap();
        assert!(sim.processes_of("regatta42").is_empty());
        assert!(sim.target_groups_snapshot("eu-west-1")[0].targets.is_empty());
    }

    #[tokio::test]
    async fn scheduled_failure_fires_once() {
        let sim = sim();
        sim.fail_next("create_load_balancer", "quota exceeded");
        assert!(sim.create_load_balancer("eu-west-1", "lb").await.is_err());
        let lb = sim.create_load_balancer("eu-west-1", "lb").await.unwrap();
        assert!(lb.has_only_default_rules());
        assert_eq!(sim.count("create_load_balancer"), 2);
    }

    #[tokio::test]
    async fn process_ready_after_boot_polls() {
        let sim = sim();
        let host = sim.add_shared_host("eu-west-1", "eu-west-1a");
        sim.set_boot_polls(2);
        let config = ApplicationConfiguration::master(
            "regatta42",
            "eu-west-1",
            Release::new("build-1"),
            "token",
            MemorySizing::Default,
        );
        let slot = landscape_core::ProcessSlot {
            port: 8888,
            directory: "/home/app/servers/regatta42".to_string(),
            server_name: "regatta42".to_string(),
        };
        let process = sim.install(&host, &config, &slot).await.unwrap();
        assert!(!sim.is_ready(&process).await.unwrap());
        assert!(!sim.is_ready(&process).await.unwrap());
        assert!(sim.is_ready(&process).await.unwrap());
        assert!(sim.install(&host, &config, &slot).await.is_err());
    }
}
