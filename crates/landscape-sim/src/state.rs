//! Shared simulator state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use landscape_core::{
    AutoScalingGroup, DnsRecord, Host, HostId, HostState, ImportedLeaderboardGroup,
    LandscapeConfig, LoadBalancer, MachineImage, Process, ProcessRole, ProcessSlot, Redirect,
    Region, Release, ReplicationState, TargetGroup,
};
use uuid::Uuid;

/// Zones of every simulated region, `<region>a` to `<region>c`.
pub(crate) const ZONE_SUFFIXES: [char; 3] = ['a', 'b', 'c'];

/// One collaborator call as seen by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub op: &'static str,
    pub subject: String,
}

/// Observation taken whenever a target is removed from a target group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deregistration {
    pub target_group: String,
    pub host_id: HostId,
    /// Other targets of the group running a ready process at that moment.
    pub ready_remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedDatabase {
    pub source: String,
    pub target: String,
    pub also_deleted: Vec<String>,
}

pub(crate) struct SimHost {
    pub host: Host,
    pub state: HostState,
}

pub(crate) struct SimProcess {
    pub process: Process,
    pub polls_until_ready: u32,
    /// Target group the host joins once the process is ready.
    pub register_on_ready: Option<(Region, String)>,
}

pub(crate) struct ImportJob {
    pub polls_remaining: u32,
    pub failure: Option<String>,
    pub groups: Vec<ImportedLeaderboardGroup>,
}

#[derive(Default)]
pub(crate) struct SimServer {
    pub leaderboard_groups: Vec<ImportedLeaderboardGroup>,
    pub references: Vec<String>,
    pub imports: HashMap<Uuid, ImportJob>,
    pub removed_event_references: Vec<Uuid>,
}

pub(crate) struct SimState {
    pub config: LandscapeConfig,
    next_id: u64,
    pub hosts: BTreeMap<HostId, SimHost>,
    /// Keyed by `host:port`.
    pub processes: BTreeMap<String, SimProcess>,
    pub target_groups: BTreeMap<(Region, String), TargetGroup>,
    pub load_balancers: BTreeMap<(Region, String), LoadBalancer>,
    pub auto_scaling_groups: BTreeMap<(Region, String), AutoScalingGroup>,
    pub dns_records: BTreeMap<String, DnsRecord>,
    pub images: Vec<MachineImage>,
    pub releases: Vec<Release>,
    pub redirects: Vec<(String, Redirect)>,
    pub servers: BTreeMap<String, SimServer>,
    pub archived_databases: Vec<ArchivedDatabase>,
    pub deregistrations: Vec<Deregistration>,
    pub calls: Vec<SimCall>,
    failures: HashMap<&'static str, String>,
    pub boot_polls: u32,
    pub import_polls: u32,
    pub import_failure: Option<String>,
    pub compare_diff_rounds: u32,
    pub session_token: Option<String>,
}

impl SimState {
    fn new(config: LandscapeConfig) -> Self {
        let image_type = config.landscape.image_type.clone();
        Self {
            config,
            next_id: 0,
            hosts: BTreeMap::new(),
            processes: BTreeMap::new(),
            target_groups: BTreeMap::new(),
            load_balancers: BTreeMap::new(),
            auto_scaling_groups: BTreeMap::new(),
            dns_records: BTreeMap::new(),
            images: vec![MachineImage {
                id: "ami-0001".to_string(),
                image_type,
                created_at: 1_790_000_000,
            }],
            releases: vec![
                Release::new("build-202609150000"),
                Release::new("build-202610010000"),
            ],
            redirects: Vec::new(),
            servers: BTreeMap::new(),
            archived_databases: Vec::new(),
            deregistrations: Vec::new(),
            calls: Vec::new(),
            failures: HashMap::new(),
            boot_polls: 1,
            import_polls: 1,
            import_failure: None,
            compare_diff_rounds: 0,
            session_token: Some("sim-session-token".to_string()),
        }
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Logs the call and consumes a scheduled failure for `op`, if any.
    pub fn enter(&mut self, op: &'static str, subject: impl Into<String>) -> Result<(), String> {
        self.calls.push(SimCall {
            op,
            subject: subject.into(),
        });
        match self.failures.remove(op) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    /// Host with its slots filled from the processes currently on it.
    pub fn host_snapshot(&self, id: &str) -> Option<Host> {
        let sim_host = self.hosts.get(id)?;
        if sim_host.state == HostState::Terminated {
            return None;
        }
        let mut host = sim_host.host.clone();
        host.slots = self
            .processes
            .values()
            .filter(|p| p.process.host.id == id)
            .map(|p| ProcessSlot {
                port: p.process.port,
                directory: p.process.directory.clone(),
                server_name: p.process.server_name.clone(),
            })
            .collect();
        Some(host)
    }

    pub fn launch(
        &mut self,
        region: &str,
        instance_type: &str,
        availability_zone: Option<&str>,
        tags: HashMap<String, String>,
        auto_scaling_group: Option<String>,
        state: HostState,
    ) -> Host {
        let n = self.next_id();
        let zone = availability_zone
            .map(str::to_string)
            .unwrap_or_else(|| format!("{region}{}", ZONE_SUFFIXES[(n % 3) as usize]));
        let host = Host {
            id: format!("i-{n:08x}"),
            region: region.to_string(),
            availability_zone: zone,
            instance_type: instance_type.to_string(),
            tags,
            auto_scaling_group,
            slots: Vec::new(),
        };
        self.hosts.insert(
            host.id.clone(),
            SimHost {
                host: host.clone(),
                state,
            },
        );
        host
    }

    pub fn add_process(&mut self, process: Process, register_on_ready: Option<(Region, String)>) {
        let polls_until_ready = self.boot_polls;
        self.processes.insert(
            process.endpoint(),
            SimProcess {
                process,
                polls_until_ready,
                register_on_ready,
            },
        );
    }

    /// Answers a readiness probe, registering self-registering hosts once ready.
    pub fn poll_ready(&mut self, endpoint: &str) -> Option<bool> {
        let sim = self.processes.get_mut(endpoint)?;
        if sim.polls_until_ready > 0 {
            sim.polls_until_ready -= 1;
            return Some(false);
        }
        let host_id = sim.process.host.id.clone();
        if let Some(tg_key) = sim.register_on_ready.take() {
            if let Some(tg) = self.target_groups.get_mut(&tg_key) {
                if !tg.contains(&host_id) {
                    tg.targets.push(host_id);
                }
            }
        }
        Some(true)
    }

    fn is_process_ready(&self, host_id: &str) -> bool {
        self.processes
            .values()
            .any(|p| p.process.host.id == host_id && p.polls_until_ready == 0)
    }

    pub fn deregister(&mut self, key: &(Region, String), host_id: &str) {
        let Some(tg) = self.target_groups.get(key) else {
            return;
        };
        let ready_remaining = tg
            .targets
            .iter()
            .filter(|t| *t != host_id && self.is_process_ready(t))
            .count();
        self.deregistrations.push(Deregistration {
            target_group: key.1.clone(),
            host_id: host_id.to_string(),
            ready_remaining,
        });
        if let Some(tg) = self.target_groups.get_mut(key) {
            tg.targets.retain(|t| t != host_id);
        }
    }

    /// Terminating a host of a live auto-scaling group makes the group
    /// launch a replacement.
    pub fn terminate(&mut self, host_id: &str) {
        let mut managed_by = None;
        if let Some(h) = self.hosts.get_mut(host_id) {
            h.state = HostState::Terminated;
            managed_by = h
                .host
                .auto_scaling_group
                .clone()
                .map(|group| (h.host.region.clone(), group));
        }
        self.processes.retain(|_, p| p.process.host.id != host_id);
        for tg in self.target_groups.values_mut() {
            tg.targets.retain(|t| t != host_id);
        }
        if let Some(group_key) = managed_by {
            self.reconcile_auto_scaling_group(&group_key);
        }
    }

    /// Launches replica hosts until the group runs at least `min_size` of them.
    pub fn reconcile_auto_scaling_group(&mut self, key: &(Region, String)) {
        let Some(group) = self.auto_scaling_groups.get(key).cloned() else {
            return;
        };
        let running = self
            .hosts
            .values()
            .filter(|h| h.state == HostState::Running && h.host.is_managed_by(&group.name))
            .count();
        for _ in running..group.min_size as usize {
            let lc = &group.launch_configuration;
            let host = self.launch(
                &group.region,
                &lc.instance_type,
                None,
                group.tags.clone(),
                Some(group.name.clone()),
                HostState::Running,
            );
            let config = &lc.replica_configuration;
            let port = config.port.unwrap_or(self.config.ports.first_port);
            let directory = self.config.ports.server_directory(&config.server_name);
            let replication = match &config.replication.master_hostname {
                Some(master_hostname) => ReplicationState::Replicating {
                    master_hostname: master_hostname.clone(),
                },
                None => ReplicationState::Primary,
            };
            let mut snapshot = host.clone();
            snapshot.slots = vec![ProcessSlot {
                port,
                directory: directory.clone(),
                server_name: config.server_name.clone(),
            }];
            self.add_process(
                Process {
                    host: snapshot,
                    port,
                    directory,
                    server_name: config.server_name.clone(),
                    release: config.release.clone(),
                    role: ProcessRole::Replica,
                    replication,
                },
                Some((group.region.clone(), group.target_group.clone())),
            );
        }
    }

    pub fn server(&mut self, base_url: &str) -> &mut SimServer {
        self.servers.entry(base_url.to_string()).or_default()
    }
}

/// In-memory landscape. Clones share state.
#[derive(Clone)]
pub struct SimLandscape {
    pub(crate) state: Arc<Mutex<SimState>>,
}

impl SimLandscape {
    pub fn new(config: LandscapeConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding ───────────────────────────────────────────────────

    /// A running, empty shared multi-process host.
    pub fn add_shared_host(&self, region: &str, availability_zone: &str) -> Host {
        let mut state = self.state();
        let naming = &state.config.landscape;
        let tags = HashMap::from([(
            naming.application_host_tag.clone(),
            naming.shared_host_tag_value.clone(),
        )]);
        let instance_type = naming.default_shared_instance_type.clone();
        state.launch(
            region,
            &instance_type,
            Some(availability_zone),
            tags,
            None,
            HostState::Running,
        )
    }

    /// Occupies `port` on the host with a ready master of another replica set.
    pub fn run_foreign_process(&self, host_id: &str, server_name: &str, port: u16) {
        let mut state = self.state();
        let Some(host) = state.host_snapshot(host_id) else {
            return;
        };
        let directory = state.config.ports.server_directory(server_name);
        let process = Process {
            host,
            port,
            directory,
            server_name: server_name.to_string(),
            release: Release::new("build-202609150000"),
            role: ProcessRole::Master,
            replication: ReplicationState::Primary,
        };
        state.processes.insert(
            process.endpoint(),
            SimProcess {
                process,
                polls_until_ready: 0,
                register_on_ready: None,
            },
        );
    }

    pub fn add_release(&self, name: &str) {
        self.state().releases.push(Release::new(name));
    }

    pub fn add_image(&self, image: MachineImage) {
        self.state().images.push(image);
    }

    /// Content a remote server reports, keyed by hostname.
    pub fn seed_server(&self, hostname: &str, groups: Vec<ImportedLeaderboardGroup>) {
        let mut state = self.state();
        state.server(&format!("https://{hostname}")).leaderboard_groups = groups;
    }

    pub fn add_remote_reference(&self, hostname: &str, referenced_base_url: &str) {
        let mut state = self.state();
        state
            .server(&format!("https://{hostname}"))
            .references
            .push(referenced_base_url.to_string());
    }

    // ── Behaviour knobs ───────────────────────────────────────────

    /// Number of not-ready answers a newly started process gives first.
    pub fn set_boot_polls(&self, polls: u32) {
        self.state().boot_polls = polls;
    }

    pub fn set_import_polls(&self, polls: u32) {
        self.state().import_polls = polls;
    }

    pub fn fail_imports(&self, message: &str) {
        self.state().import_failure = Some(message.to_string());
    }

    /// The next `rounds` comparisons report differences.
    pub fn set_compare_diff_rounds(&self, rounds: u32) {
        self.state().compare_diff_rounds = rounds;
    }

    pub fn set_session_token(&self, token: Option<&str>) {
        self.state().session_token = token.map(str::to_string);
    }

    /// The next call to `op` fails with `message`.
    pub fn fail_next(&self, op: &'static str, message: &str) {
        self.state().failures.insert(op, message.to_string());
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn position(&self, op: &str) -> Option<usize> {
        self.state().calls.iter().position(|c| c.op == op)
    }

    pub fn last_position(&self, op: &str) -> Option<usize> {
        self.state().calls.iter().rposition(|c| c.op == op)
    }

    /// First call to `op` whose subject contains `subject`.
    pub fn position_of(&self, op: &str, subject: &str) -> Option<usize> {
        self.state()
            .calls
            .iter()
            .position(|c| c.op == op && c.subject.contains(subject))
    }

    pub fn running_hosts(&self, region: &str) -> Vec<Host> {
        let state = self.state();
        state
            .hosts
            .values()
            .filter(|h| h.state == HostState::Running && h.host.region == region)
            .filter_map(|h| state.host_snapshot(&h.host.id))
            .collect()
    }

    pub fn processes_of(&self, server_name: &str) -> Vec<Process> {
        self.state()
            .processes
            .values()
            .filter(|p| p.process.server_name == server_name)
            .map(|p| p.process.clone())
            .collect()
    }

    pub fn target_groups_snapshot(&self, region: &str) -> Vec<TargetGroup> {
        self.state()
            .target_groups
            .values()
            .filter(|tg| tg.region == region)
            .cloned()
            .collect()
    }

    pub fn load_balancers_snapshot(&self, region: &str) -> Vec<LoadBalancer> {
        self.state()
            .load_balancers
            .values()
            .filter(|lb| lb.region == region)
            .cloned()
            .collect()
    }

    pub fn auto_scaling_group_snapshot(&self, region: &str, name: &str) -> Option<AutoScalingGroup> {
        self.state()
            .auto_scaling_groups
            .get(&(region.to_string(), name.to_string()))
            .cloned()
    }

    pub fn dns_record_snapshot(&self, hostname: &str) -> Option<DnsRecord> {
        self.state().dns_records.get(hostname).cloned()
    }

    pub fn redirects(&self) -> Vec<(String, Redirect)> {
        self.state().redirects.clone()
    }

    pub fn deregistrations(&self) -> Vec<Deregistration> {
        self.state().deregistrations.clone()
    }

    pub fn archived_databases(&self) -> Vec<ArchivedDatabase> {
        self.state().archived_databases.clone()
    }

    pub fn remote_references(&self, hostname: &str) -> Vec<String> {
        self.state()
            .servers
            .get(&format!("https://{hostname}"))
            .map(|s| s.references.clone())
            .unwrap_or_default()
    }

    pub fn removed_event_references(&self, hostname: &str) -> Vec<Uuid> {
        self.state()
            .servers
            .get(&format!("https://{hostname}"))
            .map(|s| s.removed_event_references.clone())
            .unwrap_or_default()
    }
}
