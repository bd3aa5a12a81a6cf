//! In-memory simulated provider for testing without cloud access.
//!
//! [`MockCloud`] implements every service trait over shared state. Provider
//! side transitions advance one step each time state is read through a
//! `describe`-style call:
//!
//! - instances boot after `instance_boot_polls` reads
//! - images bake after `image_bake_polls` reads
//! - registered instances turn `InService` after `health_check_polls` reads
//! - groups launch or terminate members to match desired capacity, unless
//!   the `Launch` / `Terminate` processes are suspended, choosing victims
//!   by the first termination policy
//!
//! Every call is recorded in a journal, and faults can be injected per
//! operation name (the AWS CLI operation, e.g. `update-auto-scaling-group`).
//!
//! ```
//! use awskit::backend::mock::{FaultKind, MockCloud};
//! use awskit::backend::AutoscaleService;
//!
//! let cloud = MockCloud::new();
//! cloud.fail_next("describe-auto-scaling-groups", FaultKind::Throttled);
//!
//! assert!(cloud.describe_group("web").is_err());
//! assert!(cloud.describe_group("web").unwrap().is_none());
//! assert_eq!(cloud.call_count("describe-auto-scaling-groups"), 2);
//! ```

use crate::backend::{
    AlarmService, AutoscaleService, ComputeService, ImageService, LoadBalancerService,
    NotificationService, ProviderClients,
};
use crate::error::{Error, Result};
use crate::types::{
    AutoScalingGroup, GroupInstance, GroupSpec, GroupTag, GroupUpdate, HealthState, Image,
    ImageState, Instance, InstanceHealth, InstanceSpec, InstanceState, LaunchConfiguration,
    LoadBalancer, MetricAlarmSpec, ScalingActivity, ScalingPolicySpec, Tags,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Every scaling process a group knows about.
pub const SCALING_PROCESSES: [&str; 8] = [
    "Launch",
    "Terminate",
    "HealthCheck",
    "ReplaceUnhealthy",
    "AZRebalance",
    "AlarmNotification",
    "ScheduledActions",
    "AddToLoadBalancer",
];

/// Knobs for the simulated provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBehavior {
    /// Reads before a launched instance is running
    pub instance_boot_polls: u32,
    /// Reads before a new image is available
    pub image_bake_polls: u32,
    /// Reads before a registered running instance is in service
    pub health_check_polls: u32,
    /// Launched instances fail to boot
    pub fail_instance_boot: bool,
    /// Images fail to bake
    pub fail_image_bake: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            instance_boot_polls: 1,
            image_bake_polls: 1,
            health_check_polls: 1,
            fail_instance_boot: false,
            fail_image_bake: false,
        }
    }
}

/// Kind of error an injected fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// `Error::Throttled`
    Throttled,
    /// `Error::InFlight`
    InFlight,
    /// `Error::NotFound`
    NotFound,
    /// `Error::Quota`
    Quota,
    /// `Error::Validation`
    Validation,
    /// `Error::Auth`
    Auth,
}

impl FaultKind {
    fn into_error(self, operation: &str) -> Error {
        let message = format!("injected fault in {operation}");
        match self {
            Self::Throttled => Error::Throttled {
                operation: operation.to_string(),
                message,
            },
            Self::InFlight => Error::InFlight {
                operation: operation.to_string(),
                message,
            },
            Self::NotFound => Error::NotFound { resource: message },
            Self::Quota => Error::Quota { message },
            Self::Validation => Error::Validation { message },
            Self::Auth => Error::Auth { message },
        }
    }
}

/// One recorded interaction with the simulated provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// A service call, by operation name, with a short argument summary
    Call {
        /// Operation name
        operation: String,
        /// Argument summary
        detail: String,
    },
    /// A provider-side transition (`launch i-..`, `terminate i-..`)
    Event(String),
}

/// A message published to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic ARN
    pub topic_arn: String,
    /// Message body
    pub message: String,
    /// Subject
    pub subject: Option<String>,
    /// Message structure
    pub message_structure: Option<String>,
}

#[derive(Debug)]
struct Fault {
    operation: String,
    kind: FaultKind,
    remaining: Option<u32>,
}

#[derive(Debug)]
struct MockInstance {
    instance: Instance,
    boot_polls: u32,
    group: Option<String>,
    launch_configuration: Option<String>,
    seq: u64,
}

#[derive(Debug)]
struct MockImage {
    image: Image,
    bake_polls: u32,
}

#[derive(Debug)]
struct MockGroup {
    group: AutoScalingGroup,
    notification: Option<(String, Vec<String>)>,
    activities: Vec<ScalingActivity>,
}

#[derive(Debug)]
struct MockLoadBalancer {
    name: String,
    health_check_interval: u32,
    /// Registered instance id -> remaining health polls
    registered: BTreeMap<String, u32>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    behavior: MockBehavior,
    instances: BTreeMap<String, MockInstance>,
    images: BTreeMap<String, MockImage>,
    snapshots: BTreeMap<String, String>,
    groups: BTreeMap<String, MockGroup>,
    launch_configurations: BTreeMap<String, LaunchConfiguration>,
    load_balancers: BTreeMap<String, MockLoadBalancer>,
    policies: BTreeMap<(String, String), ScalingPolicySpec>,
    alarms: BTreeMap<String, MetricAlarmSpec>,
    published: Vec<PublishedMessage>,
    journal: Vec<JournalEntry>,
    faults: Vec<Fault>,
    running_history: BTreeMap<String, Vec<usize>>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_fault(&mut self, operation: &str) -> Option<Error> {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.operation == operation && f.remaining != Some(0))?;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
        }
        let error = fault.kind.into_error(operation);
        self.faults.retain(|f| f.remaining != Some(0));
        Some(error)
    }

    fn launch(&mut self, image_id: &str, instance_type: &str, tags: Tags) -> String {
        let seq = self.next_id();
        let id = format!("i-{seq:08x}");
        let boot_polls = self.behavior.instance_boot_polls;
        let mut instance = Instance {
            id: id.clone(),
            state: InstanceState::Pending,
            image_id: image_id.to_string(),
            instance_type: instance_type.to_string(),
            public_dns_name: None,
            private_ip_address: None,
            availability_zone: Some("mock-1a".to_string()),
            launch_time: Some(Utc::now()),
            tags,
        };
        if boot_polls == 0 {
            boot(&mut instance, seq, self.behavior.fail_instance_boot);
        }
        self.instances.insert(
            id.clone(),
            MockInstance {
                instance,
                boot_polls,
                group: None,
                launch_configuration: None,
                seq,
            },
        );
        id
    }

    fn is_running(&self, instance_id: &str) -> bool {
        self.instances
            .get(instance_id)
            .is_some_and(|i| i.instance.state == InstanceState::Running)
    }

    fn deregister_everywhere(&mut self, instance_id: &str) {
        for lb in self.load_balancers.values_mut() {
            lb.registered.remove(instance_id);
        }
    }

    fn group_members(&self, group: &str) -> Vec<&MockInstance> {
        self.instances
            .values()
            .filter(|i| i.group.as_deref() == Some(group) && i.instance.state.is_alive())
            .collect()
    }

    /// Advance every provider-side state machine by one step.
    fn tick(&mut self) {
        let fail_boot = self.behavior.fail_instance_boot;
        for mock in self.instances.values_mut() {
            if mock.instance.state == InstanceState::Pending && mock.boot_polls > 0 {
                mock.boot_polls -= 1;
                if mock.boot_polls == 0 {
                    boot(&mut mock.instance, mock.seq, fail_boot);
                }
            }
        }

        let fail_bake = self.behavior.fail_image_bake;
        for mock in self.images.values_mut() {
            if mock.image.state == ImageState::Pending && mock.bake_polls > 0 {
                mock.bake_polls -= 1;
                if mock.bake_polls == 0 {
                    if fail_bake {
                        mock.image.state = ImageState::Failed;
                        mock.image.state_reason = Some("simulated bake failure".to_string());
                    } else {
                        mock.image.state = ImageState::Available;
                    }
                }
            }
        }

        let running: Vec<String> = self
            .instances
            .values()
            .filter(|i| i.instance.state == InstanceState::Running)
            .map(|i| i.instance.id.clone())
            .collect();
        for lb in self.load_balancers.values_mut() {
            for (id, polls) in &mut lb.registered {
                if *polls > 0 && running.contains(id) {
                    *polls -= 1;
                }
            }
        }

        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in names {
            self.converge(&name);
            let count = self
                .group_members(&name)
                .iter()
                .filter(|i| i.instance.state == InstanceState::Running)
                .count();
            self.running_history.entry(name).or_default().push(count);
        }
    }

    fn converge(&mut self, name: &str) {
        let Some(group) = self.groups.get(name).map(|g| g.group.clone()) else {
            return;
        };
        let suspended = |p: &str| group.suspended_processes.iter().any(|s| s == p);
        let members = self.group_members(name).len();
        let desired = group.desired_capacity as usize;

        if members < desired && !suspended("Launch") {
            let Some(lc_name) = group.launch_configuration_name.clone() else {
                return;
            };
            let Some(lc) = self.launch_configurations.get(&lc_name).cloned() else {
                return;
            };
            let propagated: Tags = group
                .tags
                .iter()
                .filter(|t| t.propagate_at_launch)
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect();
            for _ in members..desired {
                let id = self.launch(&lc.image_id, &lc.instance_type, propagated.clone());
                if let Some(mock) = self.instances.get_mut(&id) {
                    mock.group = Some(name.to_string());
                    mock.launch_configuration = Some(lc_name.clone());
                }
                let polls = self.behavior.health_check_polls;
                for lb_name in &group.load_balancer_names {
                    if let Some(lb) = self.load_balancers.get_mut(lb_name) {
                        lb.registered.insert(id.clone(), polls);
                    }
                }
                self.journal.push(JournalEntry::Event(format!("launch {id} {name}")));
                self.record_activity(
                    name,
                    format!("Launching a new EC2 instance: {id}"),
                    format!(
                        "An instance was started in response to a difference between desired and actual capacity, increasing the capacity from {members} to {desired}."
                    ),
                );
            }
        } else if members > desired && !suspended("Terminate") {
            for id in self.pick_victims(&group, members - desired) {
                if let Some(mock) = self.instances.get_mut(&id) {
                    mock.instance.state = InstanceState::Terminated;
                }
                self.deregister_everywhere(&id);
                self.journal.push(JournalEntry::Event(format!("terminate {id} {name}")));
                self.record_activity(
                    name,
                    format!("Terminating EC2 instance: {id}"),
                    format!(
                        "An instance was taken out of service in response to a difference between desired and actual capacity, shrinking the capacity from {members} to {desired}."
                    ),
                );
            }
        }
    }

    fn pick_victims(&self, group: &AutoScalingGroup, count: usize) -> Vec<String> {
        let current = group.launch_configuration_name.as_deref();
        let mut members = self.group_members(&group.name);
        let policy = group
            .termination_policies
            .first()
            .map_or("Default", String::as_str);
        match policy {
            "NewestInstance" => members.sort_by_key(|m| std::cmp::Reverse(m.seq)),
            "OldestInstance" => members.sort_by_key(|m| m.seq),
            _ => members.sort_by_key(|m| (m.launch_configuration.as_deref() == current, m.seq)),
        }
        members
            .into_iter()
            .take(count)
            .map(|m| m.instance.id.clone())
            .collect()
    }

    fn record_activity(&mut self, group: &str, description: String, cause: String) {
        let id = self.next_id();
        if let Some(mock) = self.groups.get_mut(group) {
            let now = Utc::now();
            mock.activities.push(ScalingActivity {
                activity_id: format!("act-{id:08x}"),
                description,
                cause,
                status_code: "Successful".to_string(),
                start_time: Some(now),
                end_time: Some(now),
                progress: 100,
            });
        }
    }

    fn group_view(&self, name: &str) -> Option<AutoScalingGroup> {
        let mock = self.groups.get(name)?;
        let mut group = mock.group.clone();
        group.instances = self
            .group_members(name)
            .into_iter()
            .map(|m| GroupInstance {
                instance_id: m.instance.id.clone(),
                availability_zone: m.instance.availability_zone.clone().unwrap_or_default(),
                lifecycle_state: match m.instance.state {
                    InstanceState::Running => "InService".to_string(),
                    _ => "Pending".to_string(),
                },
                health_status: "Healthy".to_string(),
                launch_configuration_name: m.launch_configuration.clone(),
            })
            .collect();
        Some(group)
    }

    fn load_balancer_view(&self, lb: &MockLoadBalancer) -> LoadBalancer {
        LoadBalancer {
            name: lb.name.clone(),
            dns_name: format!("{}.elb.mock", lb.name),
            instance_ids: lb.registered.keys().cloned().collect(),
            health_check_interval: lb.health_check_interval,
        }
    }

    fn require_group(&mut self, name: &str) -> Result<&mut MockGroup> {
        self.groups.get_mut(name).ok_or_else(|| Error::Validation {
            message: format!("AutoScalingGroup name not found - {name}"),
        })
    }

    fn require_launch_configuration(&self, name: &str) -> Result<()> {
        if self.launch_configurations.contains_key(name) {
            Ok(())
        } else {
            Err(Error::Validation {
                message: format!("Launch configuration name not found - {name}"),
            })
        }
    }
}

fn boot(instance: &mut Instance, seq: u64, fail: bool) {
    if fail {
        instance.state = InstanceState::Terminated;
        return;
    }
    instance.state = InstanceState::Running;
    instance.public_dns_name = Some(format!("ec2-{seq}.compute.mock"));
    instance.private_ip_address = Some(format!("10.0.{}.{}", (seq / 256) % 256, seq % 256));
}

fn validate_capacity(min: u32, desired: u32, max: u32) -> Result<()> {
    if min <= desired && desired <= max {
        Ok(())
    } else {
        Err(Error::Validation {
            message: format!(
                "Desired capacity:{desired} must be between the specified min size:{min} and max size:{max}"
            ),
        })
    }
}

/// Simulated provider implementing every service trait.
#[derive(Debug, Clone, Default)]
pub struct MockCloud {
    state: Arc<Mutex<MockState>>,
}

impl MockCloud {
    /// Create an empty simulated provider with default behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider clients that all share this mock.
    pub fn clients(&self) -> ProviderClients {
        ProviderClients::from_backend(Arc::new(self.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and apply any injected fault.
    fn call(&self, operation: &str, detail: impl Into<String>) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.journal.push(JournalEntry::Call {
            operation: operation.to_string(),
            detail: detail.into(),
        });
        match state.take_fault(operation) {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    // =========================================================================
    // Behavior and faults
    // =========================================================================

    /// Replace the simulation knobs.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.lock().behavior = behavior;
    }

    /// Make the next call to `operation` fail.
    pub fn fail_next(&self, operation: &str, kind: FaultKind) {
        self.fail_times(operation, kind, 1);
    }

    /// Make the next `times` calls to `operation` fail.
    pub fn fail_times(&self, operation: &str, kind: FaultKind, times: u32) {
        self.lock().faults.push(Fault {
            operation: operation.to_string(),
            kind,
            remaining: Some(times),
        });
    }

    /// Make every call to `operation` fail until faults are cleared.
    pub fn fail_always(&self, operation: &str, kind: FaultKind) {
        self.lock().faults.push(Fault {
            operation: operation.to_string(),
            kind,
            remaining: None,
        });
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    // =========================================================================
    // Journal
    // =========================================================================

    /// Every recorded call and event, in order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    /// Operation names of every recorded call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Call { operation, .. } => Some(operation.clone()),
                JournalEntry::Event(_) => None,
            })
            .collect()
    }

    /// Argument summaries of every call to `operation`, in order.
    pub fn call_details(&self, operation: &str) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Call { operation: op, detail } if op == operation => {
                    Some(detail.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of calls to `operation`, including failed ones.
    pub fn call_count(&self, operation: &str) -> usize {
        self.call_details(operation).len()
    }

    /// Provider-side transitions, in order.
    pub fn events(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Event(event) => Some(event.clone()),
                JournalEntry::Call { .. } => None,
            })
            .collect()
    }

    /// Forget every recorded call and event.
    pub fn clear_journal(&self) {
        let mut state = self.lock();
        state.journal.clear();
        state.running_history.clear();
    }

    /// Running member count of a group after every simulation step.
    pub fn running_history(&self, group: &str) -> Vec<usize> {
        self.lock()
            .running_history
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Add a load balancer with the given health check interval in seconds.
    pub fn add_load_balancer(&self, name: &str, health_check_interval: u32) {
        self.lock().load_balancers.insert(
            name.to_string(),
            MockLoadBalancer {
                name: name.to_string(),
                health_check_interval,
                registered: BTreeMap::new(),
            },
        );
    }

    /// Add an available image backed by one snapshot and return its id.
    pub fn add_image(&self, name: &str, tags: Tags) -> String {
        let mut state = self.lock();
        let id = state.next_id();
        let image_id = format!("ami-{id:08x}");
        let snapshot_id = format!("snap-{id:08x}");
        state.snapshots.insert(snapshot_id.clone(), image_id.clone());
        state.images.insert(
            image_id.clone(),
            MockImage {
                image: Image {
                    id: image_id.clone(),
                    name: name.to_string(),
                    state: ImageState::Available,
                    state_reason: None,
                    snapshot_ids: vec![snapshot_id],
                    creation_date: Some(Utc::now().to_rfc3339()),
                    tags,
                },
                bake_polls: 0,
            },
        );
        image_id
    }

    /// Add a launch configuration without validation.
    pub fn add_launch_configuration(&self, mut config: LaunchConfiguration) {
        if config.created_time.is_none() {
            config.created_time = Some(Utc::now());
        }
        self.lock()
            .launch_configurations
            .insert(config.name.clone(), config);
    }

    /// Add a running standalone instance and return its id.
    pub fn add_instance(&self, image_id: &str, tags: Tags) -> String {
        let mut state = self.lock();
        let id = state.launch(image_id, "t3.micro", tags);
        if let Some(mock) = state.instances.get_mut(&id) {
            let seq = mock.seq;
            mock.boot_polls = 0;
            boot(&mut mock.instance, seq, false);
        }
        id
    }

    /// Create a group already converged: `desired_capacity` running members,
    /// in service with every attached load balancer. Returns member ids.
    pub fn seed_group(&self, spec: &GroupSpec) -> Vec<String> {
        let mut state = self.lock();
        let image_id = state
            .launch_configurations
            .get(&spec.launch_configuration_name)
            .map_or_else(|| "ami-seed".to_string(), |lc| lc.image_id.clone());
        state.groups.insert(
            spec.name.clone(),
            MockGroup {
                group: group_from_spec(spec),
                notification: None,
                activities: Vec::new(),
            },
        );

        let propagated: Tags = spec
            .tags
            .iter()
            .filter(|t| t.propagate_at_launch)
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect();
        let mut ids = Vec::new();
        for _ in 0..spec.desired_capacity {
            let id = state.launch(&image_id, "t3.micro", propagated.clone());
            if let Some(mock) = state.instances.get_mut(&id) {
                let seq = mock.seq;
                mock.boot_polls = 0;
                mock.group = Some(spec.name.clone());
                mock.launch_configuration = Some(spec.launch_configuration_name.clone());
                boot(&mut mock.instance, seq, false);
            }
            for lb_name in &spec.load_balancer_names {
                if let Some(lb) = state.load_balancers.get_mut(lb_name) {
                    lb.registered.insert(id.clone(), 0);
                }
            }
            ids.push(id);
        }
        ids
    }

    // =========================================================================
    // Inspection (not journaled, does not advance the simulation)
    // =========================================================================

    /// Current state of a group.
    pub fn group_snapshot(&self, name: &str) -> Option<AutoScalingGroup> {
        self.lock().group_view(name)
    }

    /// Current state of an instance.
    pub fn instance_snapshot(&self, instance_id: &str) -> Option<Instance> {
        self.lock()
            .instances
            .get(instance_id)
            .map(|m| m.instance.clone())
    }

    /// Launch configuration a group member was started from.
    pub fn instance_launch_configuration(&self, instance_id: &str) -> Option<String> {
        self.lock()
            .instances
            .get(instance_id)
            .and_then(|m| m.launch_configuration.clone())
    }

    /// Current state of an image.
    pub fn image_snapshot(&self, image_id: &str) -> Option<Image> {
        self.lock().images.get(image_id).map(|m| m.image.clone())
    }

    /// Whether a snapshot still exists.
    pub fn snapshot_exists(&self, snapshot_id: &str) -> bool {
        self.lock().snapshots.contains_key(snapshot_id)
    }

    /// Names of all launch configurations.
    pub fn launch_configuration_names(&self) -> Vec<String> {
        self.lock().launch_configurations.keys().cloned().collect()
    }

    /// All scaling policies.
    pub fn policies(&self) -> Vec<ScalingPolicySpec> {
        self.lock().policies.values().cloned().collect()
    }

    /// All metric alarms.
    pub fn alarms(&self) -> Vec<MetricAlarmSpec> {
        self.lock().alarms.values().cloned().collect()
    }

    /// Topic and event types a group publishes to.
    pub fn notification_configuration(&self, group: &str) -> Option<(String, Vec<String>)> {
        self.lock()
            .groups
            .get(group)
            .and_then(|g| g.notification.clone())
    }

    /// Every message published to a topic.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Instances registered with a load balancer.
    pub fn registered_instances(&self, load_balancer: &str) -> Vec<String> {
        self.lock()
            .load_balancers
            .get(load_balancer)
            .map(|lb| lb.registered.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn group_from_spec(spec: &GroupSpec) -> AutoScalingGroup {
    AutoScalingGroup {
        name: spec.name.clone(),
        launch_configuration_name: Some(spec.launch_configuration_name.clone()),
        availability_zones: spec.availability_zones.clone(),
        min_size: spec.min_size,
        max_size: spec.max_size,
        desired_capacity: spec.desired_capacity,
        default_cooldown: spec.default_cooldown,
        health_check_type: spec.health_check_type.clone(),
        health_check_grace_period: spec.health_check_grace_period,
        load_balancer_names: spec.load_balancer_names.clone(),
        termination_policies: if spec.termination_policies.is_empty() {
            vec!["Default".to_string()]
        } else {
            spec.termination_policies.clone()
        },
        vpc_zone_identifier: spec.vpc_zone_identifier.clone(),
        tags: spec.tags.clone(),
        instances: Vec::new(),
        suspended_processes: Vec::new(),
        created_time: Some(Utc::now()),
    }
}

fn process_list(processes: Option<&[String]>) -> Vec<String> {
    processes.map_or_else(
        || SCALING_PROCESSES.iter().map(ToString::to_string).collect(),
        <[String]>::to_vec,
    )
}

// =============================================================================
// Service implementations
// =============================================================================

impl ComputeService for MockCloud {
    fn run_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let mut state = self.call("run-instances", spec.image_id.as_str())?;
        let available = state
            .images
            .get(&spec.image_id)
            .is_some_and(|m| m.image.state == ImageState::Available);
        if !available {
            return Err(Error::Validation {
                message: format!("The image id '[{}]' does not exist", spec.image_id),
            });
        }
        let id = state.launch(&spec.image_id, &spec.instance_type, Tags::new());
        state.journal.push(JournalEntry::Event(format!("launch {id}")));
        Ok(state.instances[&id].instance.clone())
    }

    fn describe_instance(&self, instance_id: &str) -> Result<Instance> {
        let mut state = self.call("describe-instances", instance_id)?;
        state.tick();
        state
            .instances
            .get(instance_id)
            .map(|m| m.instance.clone())
            .ok_or_else(|| Error::NotFound {
                resource: format!("instance {instance_id}"),
            })
    }

    fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>> {
        let mut state = self.call("describe-instances", instance_ids.join(","))?;
        state.tick();
        Ok(instance_ids
            .iter()
            .filter_map(|id| state.instances.get(id))
            .map(|m| m.instance.clone())
            .collect())
    }

    fn create_tags(&self, instance_id: &str, tags: &Tags) -> Result<()> {
        let mut state = self.call("create-tags", instance_id)?;
        let mock = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| Error::NotFound {
                resource: format!("instance {instance_id}"),
            })?;
        mock.instance.tags.extend(tags.clone());
        Ok(())
    }

    fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut state = self.call("terminate-instances", instance_id)?;
        let mock = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| Error::NotFound {
                resource: format!("instance {instance_id}"),
            })?;
        mock.instance.state = InstanceState::Terminated;
        state.deregister_everywhere(instance_id);
        state
            .journal
            .push(JournalEntry::Event(format!("terminate {instance_id}")));
        Ok(())
    }
}

impl ImageService for MockCloud {
    fn create_image(&self, instance_id: &str, name: &str, no_reboot: bool) -> Result<String> {
        let mut state = self.call(
            "create-image",
            format!("{instance_id} {name} no_reboot={no_reboot}"),
        )?;
        let source = state
            .instances
            .get(instance_id)
            .ok_or_else(|| Error::NotFound {
                resource: format!("instance {instance_id}"),
            })?;
        if source.instance.state != InstanceState::Running {
            return Err(Error::InFlight {
                operation: "create-image".to_string(),
                message: format!("instance {instance_id} is not in a state to be imaged"),
            });
        }
        if state.images.values().any(|m| m.image.name == name) {
            return Err(Error::AlreadyExists {
                resource: format!("AMI name {name}"),
            });
        }

        let id = state.next_id();
        let image_id = format!("ami-{id:08x}");
        let snapshot_id = format!("snap-{id:08x}");
        let bake_polls = state.behavior.image_bake_polls;
        state.snapshots.insert(snapshot_id.clone(), image_id.clone());
        state.images.insert(
            image_id.clone(),
            MockImage {
                image: Image {
                    id: image_id.clone(),
                    name: name.to_string(),
                    state: if bake_polls == 0 {
                        ImageState::Available
                    } else {
                        ImageState::Pending
                    },
                    state_reason: None,
                    snapshot_ids: vec![snapshot_id],
                    creation_date: Some(Utc::now().to_rfc3339()),
                    tags: Tags::new(),
                },
                bake_polls,
            },
        );
        Ok(image_id)
    }

    fn describe_image(&self, image_id: &str) -> Result<Image> {
        let mut state = self.call("describe-images", image_id)?;
        state.tick();
        state
            .images
            .get(image_id)
            .map(|m| m.image.clone())
            .ok_or_else(|| Error::NotFound {
                resource: format!("image {image_id}"),
            })
    }

    fn find_images(&self, tags: &Tags) -> Result<Vec<Image>> {
        let state = self.call("describe-images", "owners=self")?;
        Ok(state
            .images
            .values()
            .filter(|m| {
                tags.iter()
                    .all(|(k, v)| m.image.tags.get(k).is_some_and(|value| value == v))
            })
            .map(|m| m.image.clone())
            .collect())
    }

    fn tag_image(&self, image_id: &str, tags: &Tags) -> Result<()> {
        let mut state = self.call("create-tags", image_id)?;
        let mock = state
            .images
            .get_mut(image_id)
            .ok_or_else(|| Error::NotFound {
                resource: format!("image {image_id}"),
            })?;
        mock.image.tags.extend(tags.clone());
        Ok(())
    }

    fn deregister_image(&self, image_id: &str) -> Result<()> {
        let mut state = self.call("deregister-image", image_id)?;
        state
            .images
            .remove(image_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                resource: format!("image {image_id}"),
            })
    }

    fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let mut state = self.call("delete-snapshot", snapshot_id)?;
        state
            .snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                resource: format!("snapshot {snapshot_id}"),
            })
    }
}

impl AutoscaleService for MockCloud {
    fn describe_group(&self, name: &str) -> Result<Option<AutoScalingGroup>> {
        let mut state = self.call("describe-auto-scaling-groups", name)?;
        state.tick();
        Ok(state.group_view(name))
    }

    fn create_group(&self, spec: &GroupSpec) -> Result<()> {
        let mut state = self.call("create-auto-scaling-group", spec.name.as_str())?;
        if state.groups.contains_key(&spec.name) {
            return Err(Error::AlreadyExists {
                resource: format!("AutoScalingGroup {}", spec.name),
            });
        }
        state.require_launch_configuration(&spec.launch_configuration_name)?;
        validate_capacity(spec.min_size, spec.desired_capacity, spec.max_size)?;
        state.groups.insert(
            spec.name.clone(),
            MockGroup {
                group: group_from_spec(spec),
                notification: None,
                activities: Vec::new(),
            },
        );
        Ok(())
    }

    fn update_group(&self, name: &str, update: &GroupUpdate) -> Result<()> {
        let detail = format!(
            "{name} lc={} desired={} min={} max={} policies={}",
            update.launch_configuration_name.as_deref().unwrap_or("-"),
            update.desired_capacity.map_or("-".to_string(), |v| v.to_string()),
            update.min_size.map_or("-".to_string(), |v| v.to_string()),
            update.max_size.map_or("-".to_string(), |v| v.to_string()),
            update
                .termination_policies
                .as_ref()
                .map_or("-".to_string(), |p| p.join("+")),
        );
        let mut state = self.call("update-auto-scaling-group", detail)?;
        if let Some(lc) = &update.launch_configuration_name {
            state.require_launch_configuration(lc)?;
        }
        let group = &mut state.require_group(name)?.group;
        let min = update.min_size.unwrap_or(group.min_size);
        let max = update.max_size.unwrap_or(group.max_size);
        let desired = update.desired_capacity.unwrap_or(group.desired_capacity);
        validate_capacity(min, desired, max)?;

        group.min_size = min;
        group.max_size = max;
        group.desired_capacity = desired;
        if let Some(lc) = &update.launch_configuration_name {
            group.launch_configuration_name = Some(lc.clone());
        }
        if let Some(zones) = &update.availability_zones {
            group.availability_zones.clone_from(zones);
        }
        if let Some(cooldown) = update.default_cooldown {
            group.default_cooldown = Some(cooldown);
        }
        if let Some(kind) = &update.health_check_type {
            group.health_check_type = Some(kind.clone());
        }
        if let Some(grace) = update.health_check_grace_period {
            group.health_check_grace_period = Some(grace);
        }
        if let Some(policies) = &update.termination_policies {
            group.termination_policies.clone_from(policies);
        }
        if let Some(vpc) = &update.vpc_zone_identifier {
            group.vpc_zone_identifier = Some(vpc.clone());
        }
        Ok(())
    }

    fn attach_load_balancers(&self, group: &str, load_balancers: &[String]) -> Result<()> {
        let mut state = self.call("attach-load-balancers", format!("{group} {}", load_balancers.join(",")))?;
        let mock = state.require_group(group)?;
        for name in load_balancers {
            if !mock.group.load_balancer_names.contains(name) {
                mock.group.load_balancer_names.push(name.clone());
            }
        }
        let members: Vec<String> = state
            .group_members(group)
            .iter()
            .map(|m| m.instance.id.clone())
            .collect();
        let polls = state.behavior.health_check_polls;
        for name in load_balancers {
            let lb = state
                .load_balancers
                .get_mut(name)
                .ok_or_else(|| Error::NotFound {
                    resource: format!("load balancer {name}"),
                })?;
            for id in &members {
                lb.registered.entry(id.clone()).or_insert(polls);
            }
        }
        Ok(())
    }

    fn detach_load_balancers(&self, group: &str, load_balancers: &[String]) -> Result<()> {
        let mut state = self.call("detach-load-balancers", format!("{group} {}", load_balancers.join(",")))?;
        let mock = state.require_group(group)?;
        mock.group
            .load_balancer_names
            .retain(|n| !load_balancers.contains(n));
        let members: Vec<String> = state
            .group_members(group)
            .iter()
            .map(|m| m.instance.id.clone())
            .collect();
        for name in load_balancers {
            if let Some(lb) = state.load_balancers.get_mut(name) {
                for id in &members {
                    lb.registered.remove(id);
                }
            }
        }
        Ok(())
    }

    fn create_or_update_tags(&self, group: &str, tags: &[GroupTag]) -> Result<()> {
        let keys: Vec<&str> = tags.iter().map(|t| t.key.as_str()).collect();
        let mut state = self.call("create-or-update-tags", format!("{group} {}", keys.join(",")))?;
        let mock = state.require_group(group)?;
        for tag in tags {
            match mock.group.tags.iter_mut().find(|t| t.key == tag.key) {
                Some(existing) => *existing = tag.clone(),
                None => mock.group.tags.push(tag.clone()),
            }
        }
        Ok(())
    }

    fn delete_tags(&self, group: &str, keys: &[String]) -> Result<()> {
        let mut state = self.call("delete-tags", format!("{group} {}", keys.join(",")))?;
        let mock = state.require_group(group)?;
        mock.group.tags.retain(|t| !keys.contains(&t.key));
        Ok(())
    }

    fn suspend_processes(&self, group: &str, processes: Option<&[String]>) -> Result<()> {
        let mut state = self.call("suspend-processes", group)?;
        let mock = state.require_group(group)?;
        for process in process_list(processes) {
            if !mock.group.suspended_processes.contains(&process) {
                mock.group.suspended_processes.push(process);
            }
        }
        Ok(())
    }

    fn resume_processes(&self, group: &str, processes: Option<&[String]>) -> Result<()> {
        let mut state = self.call("resume-processes", group)?;
        let mock = state.require_group(group)?;
        let resumed = process_list(processes);
        mock.group
            .suspended_processes
            .retain(|p| !resumed.contains(p));
        Ok(())
    }

    fn describe_activities(
        &self,
        group: &str,
        max_records: usize,
    ) -> Result<Vec<ScalingActivity>> {
        let state = self.call("describe-scaling-activities", group)?;
        Ok(state
            .groups
            .get(group)
            .map(|g| {
                g.activities
                    .iter()
                    .rev()
                    .take(max_records)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn create_launch_configuration(&self, config: &LaunchConfiguration) -> Result<()> {
        let mut state = self.call(
            "create-launch-configuration",
            format!("{} {}", config.name, config.image_id),
        )?;
        if state.launch_configurations.contains_key(&config.name) {
            return Err(Error::AlreadyExists {
                resource: format!("launch configuration {}", config.name),
            });
        }
        if !state.images.contains_key(&config.image_id) {
            return Err(Error::Validation {
                message: format!("AMI {} is invalid", config.image_id),
            });
        }
        let mut stored = config.clone();
        stored.created_time = Some(Utc::now());
        state
            .launch_configurations
            .insert(stored.name.clone(), stored);
        Ok(())
    }

    fn describe_launch_configuration(&self, name: &str) -> Result<Option<LaunchConfiguration>> {
        let state = self.call("describe-launch-configurations", name)?;
        Ok(state.launch_configurations.get(name).cloned())
    }

    fn list_launch_configurations(&self) -> Result<Vec<LaunchConfiguration>> {
        let state = self.call("describe-launch-configurations", "*")?;
        Ok(state.launch_configurations.values().cloned().collect())
    }

    fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        let mut state = self.call("delete-launch-configuration", name)?;
        let in_use = state
            .groups
            .values()
            .any(|g| g.group.launch_configuration_name.as_deref() == Some(name));
        if in_use {
            return Err(Error::Validation {
                message: format!("Cannot delete launch configuration {name} because it is attached to AutoScalingGroup"),
            });
        }
        state
            .launch_configurations
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                resource: format!("launch configuration {name}"),
            })
    }

    fn put_scaling_policy(&self, policy: &ScalingPolicySpec) -> Result<String> {
        let mut state = self.call(
            "put-scaling-policy",
            format!("{} {}", policy.group_name, policy.name),
        )?;
        state.require_group(&policy.group_name)?;
        state.policies.insert(
            (policy.group_name.clone(), policy.name.clone()),
            policy.clone(),
        );
        Ok(format!(
            "arn:aws:autoscaling:mock:policy/{}/{}",
            policy.group_name, policy.name
        ))
    }

    fn put_notification_configuration(
        &self,
        group: &str,
        topic_arn: &str,
        notification_types: &[&str],
    ) -> Result<()> {
        let mut state = self.call(
            "put-notification-configuration",
            format!("{group} {topic_arn}"),
        )?;
        let mock = state.require_group(group)?;
        mock.notification = Some((
            topic_arn.to_string(),
            notification_types.iter().map(ToString::to_string).collect(),
        ));
        Ok(())
    }
}

impl LoadBalancerService for MockCloud {
    fn describe_load_balancer(&self, name: &str) -> Result<LoadBalancer> {
        let state = self.call("describe-load-balancers", name)?;
        state
            .load_balancers
            .get(name)
            .map(|lb| state.load_balancer_view(lb))
            .ok_or_else(|| Error::NotFound {
                resource: format!("load balancer {name}"),
            })
    }

    fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let state = self.call("describe-load-balancers", "*")?;
        Ok(state
            .load_balancers
            .values()
            .map(|lb| state.load_balancer_view(lb))
            .collect())
    }

    fn instance_health(
        &self,
        load_balancer: &str,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceHealth>> {
        let mut state = self.call(
            "describe-instance-health",
            format!("{load_balancer} {}", instance_ids.join(",")),
        )?;
        state.tick();
        let lb = state
            .load_balancers
            .get(load_balancer)
            .ok_or_else(|| Error::NotFound {
                resource: format!("load balancer {load_balancer}"),
            })?;
        let ids: Vec<String> = if instance_ids.is_empty() {
            lb.registered.keys().cloned().collect()
        } else {
            instance_ids.to_vec()
        };
        Ok(ids
            .into_iter()
            .map(|id| {
                let (state_value, reason, description) = match lb.registered.get(&id).copied() {
                    Some(0) if state.is_running(&id) => (HealthState::InService, None, None),
                    Some(_) => (
                        HealthState::OutOfService,
                        Some("Instance"),
                        Some("Instance has not passed the configured HealthyThreshold number of health checks consecutively."),
                    ),
                    None => (
                        HealthState::OutOfService,
                        Some("ELB"),
                        Some("Instance is not currently registered with the LoadBalancer."),
                    ),
                };
                InstanceHealth {
                    instance_id: id,
                    state: state_value,
                    reason_code: reason.map(ToString::to_string),
                    description: description.map(ToString::to_string),
                }
            })
            .collect())
    }

    fn register_instances(&self, load_balancer: &str, instance_ids: &[String]) -> Result<()> {
        let mut state = self.call(
            "register-instances-with-load-balancer",
            format!("{load_balancer} {}", instance_ids.join(",")),
        )?;
        let polls = state.behavior.health_check_polls;
        let lb = state
            .load_balancers
            .get_mut(load_balancer)
            .ok_or_else(|| Error::NotFound {
                resource: format!("load balancer {load_balancer}"),
            })?;
        for id in instance_ids {
            lb.registered.entry(id.clone()).or_insert(polls);
        }
        Ok(())
    }

    fn deregister_instances(&self, load_balancer: &str, instance_ids: &[String]) -> Result<()> {
        let mut state = self.call(
            "deregister-instances-from-load-balancer",
            format!("{load_balancer} {}", instance_ids.join(",")),
        )?;
        let lb = state
            .load_balancers
            .get_mut(load_balancer)
            .ok_or_else(|| Error::NotFound {
                resource: format!("load balancer {load_balancer}"),
            })?;
        for id in instance_ids {
            lb.registered.remove(id);
        }
        Ok(())
    }
}

impl AlarmService for MockCloud {
    fn put_metric_alarm(&self, alarm: &MetricAlarmSpec) -> Result<()> {
        let mut state = self.call("put-metric-alarm", alarm.name.as_str())?;
        state.alarms.insert(alarm.name.clone(), alarm.clone());
        Ok(())
    }
}

impl NotificationService for MockCloud {
    fn publish(
        &self,
        topic_arn: &str,
        message: &str,
        subject: Option<&str>,
        message_structure: Option<&str>,
    ) -> Result<()> {
        let mut state = self.call("publish", topic_arn)?;
        state.published.push(PublishedMessage {
            topic_arn: topic_arn.to_string(),
            message: message.to_string(),
            subject: subject.map(ToString::to_string),
            message_structure: message_structure.map(ToString::to_string),
        });
        Ok(())
    }
}
