//! Autoscale group management.
//!
//! [`FleetController`] owns everything that touches the group of one
//! application: launch configuration publishing, group create-or-update,
//! scaling process suspension, the capacity-doubling roll, scaling policies
//! and alarms, cleanup of old launch configurations and status snapshots.
//!
//! Updates follow one discipline: read the current state, apply the change,
//! read again to confirm. Transient provider errors re-read before retrying.

mod cleanup;
mod roll;
mod scaling;
mod status;

pub use cleanup::CleanupReport;
pub use roll::{RollMarker, RollReport};
pub use scaling::ScalingReport;
pub use status::{ActivityStatus, GroupStatus, InstanceStatus, LoadBalancerHealth};

use crate::application::Application;
use crate::error::{Error, Result};
use crate::naming::{self, ConfigurationName};
use crate::poll::Poller;
use crate::progress::{NoProgress, Progress};
use awskit::backend::AutoscaleService;
use awskit::retry::{self, LogCallback};
use awskit::types::notification;
use awskit::{AutoScalingGroup, GroupTag, Instance, InstanceState, ProviderClients, RetryConfig};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Running instances of `group`, ordered by id. A missing group has none.
pub fn running_instances(clients: &ProviderClients, group: &str) -> Result<Vec<Instance>> {
    let Some(current) = clients.autoscale.describe_group(group)? else {
        return Ok(Vec::new());
    };
    let ids = current.instance_ids();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut instances: Vec<Instance> = clients
        .compute
        .describe_instances(&ids)?
        .into_iter()
        .filter(|i| i.state == InstanceState::Running)
        .collect();
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(instances)
}

/// Whether a deploy created the group or updated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertOutcome {
    /// The group did not exist
    Created,
    /// The group existed and was overwritten
    Updated,
}

/// Where a group stands relative to its newest launch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FleetState {
    /// The group does not exist
    NoGroup,
    /// The group uses an older launch configuration
    Stale,
    /// The group uses the newest launch configuration
    Current,
    /// A roll is in progress or was interrupted
    Rolling(RollMarker),
}

impl fmt::Display for FleetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoGroup => write!(f, "no group"),
            Self::Stale => write!(f, "stale configuration"),
            Self::Current => write!(f, "current configuration"),
            Self::Rolling(marker) => write!(f, "rolling ({marker})"),
        }
    }
}

/// Operates the autoscale group of one application.
#[derive(Clone)]
pub struct FleetController {
    clients: ProviderClients,
    application: Application,
    poller: Poller,
    retry: RetryConfig,
    progress: Arc<dyn Progress>,
}

impl FleetController {
    /// Create a controller.
    pub fn new(clients: ProviderClients, application: Application, poller: Poller) -> Self {
        Self {
            clients,
            application,
            poller,
            retry: RetryConfig::default(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Backoff for transient provider errors.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Receiver of stage transitions.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Name of the managed group.
    pub fn group_name(&self) -> &str {
        &self.application.group.name
    }

    /// The application this controller deploys.
    pub fn application(&self) -> &Application {
        &self.application
    }

    /// Current group, `None` if it does not exist.
    pub fn group(&self) -> Result<Option<AutoScalingGroup>> {
        Ok(retry::with_retry(&self.retry, Some(&LogCallback), || {
            self.clients.autoscale.describe_group(self.group_name())
        })?)
    }

    /// Current group.
    ///
    /// # Errors
    ///
    /// Returns `Error::GroupNotFound` if it does not exist.
    pub fn require_group(&self) -> Result<AutoScalingGroup> {
        self.group()?.ok_or_else(|| Error::GroupNotFound {
            group: self.group_name().to_string(),
        })
    }

    /// Running instances of the group, ordered by id.
    pub fn running_instances(&self) -> Result<Vec<Instance>> {
        running_instances(&self.clients, self.group_name())
    }

    /// Where the group stands.
    pub fn state(&self) -> Result<FleetState> {
        let Some(group) = self.group()? else {
            return Ok(FleetState::NoGroup);
        };
        if let Some(marker) = group.tag(naming::TAG_ROLLING).and_then(RollMarker::decode) {
            return Ok(FleetState::Rolling(marker));
        }
        let newest = self.launch_configurations()?.pop().map(|(name, _)| name.to_string());
        if newest.is_some() && group.launch_configuration_name == newest {
            Ok(FleetState::Current)
        } else {
            Ok(FleetState::Stale)
        }
    }

    // ========================================================================
    // Launch configurations
    // ========================================================================

    /// Create a launch configuration for `image_id` under the next free
    /// versioned name and return that name.
    ///
    /// Existing configurations are never overwritten; if the chosen name is
    /// taken concurrently the names are listed again and the next version is
    /// tried.
    pub fn publish_launch_configuration(&self, image_id: &str) -> Result<String> {
        let group = self.group_name();
        let date = naming::today();

        let name = retry::with_retry(&self.retry, Some(&LogCallback), || {
            let existing: Vec<String> = self
                .clients
                .autoscale
                .list_launch_configurations()?
                .into_iter()
                .map(|lc| lc.name)
                .collect();
            let name = naming::next_configuration_name(group, &date, &existing).to_string();
            let config = self.application.launch_template.with_image(&name, image_id);
            match self.clients.autoscale.create_launch_configuration(&config) {
                Ok(()) => Ok(name),
                Err(e) if e.is_ignorable() => Err(awskit::Error::InFlight {
                    operation: "create-launch-configuration".to_string(),
                    message: format!("{name} was taken concurrently"),
                }),
                Err(e) => Err(e),
            }
        })?;

        log::info!("Published launch configuration {name} with {image_id}");
        Ok(name)
    }

    // ========================================================================
    // Group
    // ========================================================================

    /// Create the group, or overwrite every configured field of an existing
    /// one, so that it uses `launch_configuration`.
    pub fn upsert_group(&self, launch_configuration: &str) -> Result<UpsertOutcome> {
        let config = &self.application.group;
        let outcome = retry::with_retry(&self.retry, Some(&LogCallback), || {
            match self.clients.autoscale.describe_group(&config.name)? {
                None => {
                    let mut spec = config.spec(launch_configuration);
                    spec.tags = self.initial_tags();
                    match self.clients.autoscale.create_group(&spec) {
                        Ok(()) => Ok(UpsertOutcome::Created),
                        Err(e) if e.is_ignorable() => Err(awskit::Error::InFlight {
                            operation: "create-auto-scaling-group".to_string(),
                            message: format!("{} was created concurrently", config.name),
                        }),
                        Err(e) => Err(e),
                    }
                }
                Some(current) => {
                    self.clients
                        .autoscale
                        .update_group(&config.name, &config.update(launch_configuration))?;
                    self.sync_load_balancers(&current)?;
                    Ok(UpsertOutcome::Updated)
                }
            }
        })?;

        if let Some(topic) = &self.application.notification_topic {
            retry::with_retry(&self.retry, Some(&LogCallback), || {
                self.clients.autoscale.put_notification_configuration(
                    &config.name,
                    topic,
                    &notification::ALL_INSTANCE_EVENTS,
                )
            })?;
        }

        let confirmed = self.require_group()?;
        if confirmed.launch_configuration_name.as_deref() != Some(launch_configuration) {
            return Err(awskit::Error::Response {
                operation: "update-auto-scaling-group".to_string(),
                message: format!(
                    "{} still uses {}",
                    config.name,
                    confirmed
                        .launch_configuration_name
                        .as_deref()
                        .unwrap_or("no launch configuration")
                ),
            }
            .into());
        }

        match outcome {
            UpsertOutcome::Created => log::info!("Created group {}", config.name),
            UpsertOutcome::Updated => log::info!("Updated group {}", config.name),
        }
        Ok(outcome)
    }

    fn initial_tags(&self) -> Vec<GroupTag> {
        vec![
            GroupTag::propagated(naming::TAG_NAME, self.group_name()),
            GroupTag::propagated(naming::TAG_APPLICATION, &self.application.name),
            GroupTag::propagated(naming::TAG_DATE, naming::today()),
        ]
    }

    fn sync_load_balancers(&self, current: &AutoScalingGroup) -> awskit::Result<()> {
        let wanted = &self.application.group.load_balancers;
        let attach: Vec<String> = wanted
            .iter()
            .filter(|lb| !current.load_balancer_names.contains(lb))
            .cloned()
            .collect();
        let detach: Vec<String> = current
            .load_balancer_names
            .iter()
            .filter(|lb| !wanted.contains(lb))
            .cloned()
            .collect();

        if !attach.is_empty() {
            log::info!("Attaching {} to {}", attach.join(", "), current.name);
            self.clients
                .autoscale
                .attach_load_balancers(&current.name, &attach)?;
        }
        if !detach.is_empty() {
            log::info!("Detaching {} from {}", detach.join(", "), current.name);
            self.clients
                .autoscale
                .detach_load_balancers(&current.name, &detach)?;
        }
        Ok(())
    }

    // ========================================================================
    // Scaling processes
    // ========================================================================

    /// Suspend every scaling process. Returns `false` if the group does not
    /// exist.
    pub fn suspend_processes(&self) -> Result<bool> {
        if self.group()?.is_none() {
            log::debug!("No group {}; nothing to suspend", self.group_name());
            return Ok(false);
        }
        retry::with_retry(&self.retry, Some(&LogCallback), || {
            self.clients
                .autoscale
                .suspend_processes(self.group_name(), None)
        })?;
        log::info!("Suspended scaling processes of {}", self.group_name());
        Ok(true)
    }

    /// Resume `processes`, or all of them. Returns `false` if the group does
    /// not exist.
    pub fn resume_processes(&self, processes: Option<&[String]>) -> Result<bool> {
        if self.group()?.is_none() {
            log::debug!("No group {}; nothing to resume", self.group_name());
            return Ok(false);
        }
        resume(
            self.clients.autoscale.as_ref(),
            &self.retry,
            self.group_name(),
            processes,
        )?;
        Ok(true)
    }

    /// Suspend every scaling process until the returned guard is resumed or
    /// dropped.
    pub fn suspend_scoped(&self) -> Result<SuspendedProcesses> {
        let active = self.suspend_processes()?;
        Ok(SuspendedProcesses {
            autoscale: Arc::clone(&self.clients.autoscale),
            retry: self.retry.clone(),
            group: self.group_name().to_string(),
            active,
        })
    }
}

fn resume(
    autoscale: &dyn AutoscaleService,
    retry_config: &RetryConfig,
    group: &str,
    processes: Option<&[String]>,
) -> Result<()> {
    retry::with_retry(retry_config, Some(&LogCallback), || {
        autoscale.resume_processes(group, processes)
    })?;
    log::info!("Resumed scaling processes of {group}");
    Ok(())
}

/// Scaling processes suspended on a group.
///
/// The processes are resumed exactly once: by [`resume`](Self::resume), or
/// on drop if the guard goes out of scope first. [`keep`](Self::keep)
/// leaves them suspended on purpose.
pub struct SuspendedProcesses {
    autoscale: Arc<dyn AutoscaleService>,
    retry: RetryConfig,
    group: String,
    active: bool,
}

impl SuspendedProcesses {
    /// Group whose processes are suspended.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Resume the processes now.
    pub fn resume(mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        resume(self.autoscale.as_ref(), &self.retry, &self.group, None)
    }

    /// Leave the processes suspended.
    pub fn keep(mut self) {
        self.active = false;
    }
}

impl Drop for SuspendedProcesses {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = resume(self.autoscale.as_ref(), &self.retry, &self.group, None) {
            log::error!(
                "Failed to resume scaling processes of {}: {e}. Run `forseti resume` for this application",
                self.group
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::{GroupConfig, LaunchTemplate, Strategy};
    use crate::poll::{CancelToken, Timeouts};
    use awskit::{FaultKind, GroupSpec, LaunchConfiguration, MockCloud, Tags};
    use std::time::Duration;

    pub(crate) fn application() -> Application {
        Application {
            name: "web".to_string(),
            strategy: Strategy::DeployAndSnapshot,
            group: GroupConfig {
                name: "web".to_string(),
                availability_zones: vec!["mock-1a".to_string()],
                min_size: 1,
                max_size: 6,
                desired_capacity: Some(3),
                load_balancers: vec!["web-lb".to_string()],
                ..Default::default()
            },
            launch_template: LaunchTemplate {
                instance_type: "t3.small".to_string(),
                ..Default::default()
            },
            policies: Vec::new(),
            alarms: Vec::new(),
            notification_topic: None,
            golden: None,
            hooks: Default::default(),
        }
    }

    pub(crate) fn controller(mock: &MockCloud, application: Application) -> FleetController {
        FleetController::new(
            mock.clients(),
            application,
            Poller::new(
                Duration::ZERO,
                Timeouts::uniform(Duration::from_secs(5)),
                CancelToken::new(),
            ),
        )
        .with_retry(RetryConfig::new(3, Duration::ZERO, 1.0))
    }

    /// A running group `web` of `size` instances behind `web-lb`, on
    /// configuration `web-2024-01-01-1`. Returns the image id.
    pub(crate) fn seeded(mock: &MockCloud, size: u32) -> String {
        mock.add_load_balancer("web-lb", 0);
        let image = mock.add_image("web-base", Tags::new());
        mock.add_launch_configuration(LaunchConfiguration {
            name: "web-2024-01-01-1".to_string(),
            image_id: image.clone(),
            instance_type: "t3.small".to_string(),
            ..Default::default()
        });
        mock.seed_group(&GroupSpec {
            name: "web".to_string(),
            launch_configuration_name: "web-2024-01-01-1".to_string(),
            availability_zones: vec!["mock-1a".to_string()],
            min_size: 1,
            max_size: 6,
            desired_capacity: size,
            load_balancer_names: vec!["web-lb".to_string()],
            termination_policies: vec!["NewestInstance".to_string()],
            ..Default::default()
        });
        image
    }

    #[test]
    fn test_publish_twice_gives_distinct_names() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 1);
        let fleet = controller(&mock, application());

        let first = fleet.publish_launch_configuration(&image).unwrap();
        let second = fleet.publish_launch_configuration(&image).unwrap();
        assert_ne!(first, second);

        let date = naming::today();
        assert_eq!(first, format!("web-{date}-1"));
        assert_eq!(second, format!("web-{date}-2"));
    }

    #[test]
    fn test_publish_retries_after_throttling() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 1);
        let fleet = controller(&mock, application());

        mock.fail_next("create-launch-configuration", FaultKind::Throttled);
        let name = fleet.publish_launch_configuration(&image).unwrap();
        assert!(mock.launch_configuration_names().contains(&name));
        // The names were listed again before the second attempt
        assert_eq!(mock.call_count("describe-launch-configurations"), 2);
    }

    #[test]
    fn test_upsert_creates_with_tags() {
        let mock = MockCloud::new();
        mock.add_load_balancer("web-lb", 0);
        let image = mock.add_image("web-base", Tags::new());
        let mut app = application();
        app.notification_topic = Some("arn:aws:sns:mock:1:web".to_string());
        let fleet = controller(&mock, app);

        let lc = fleet.publish_launch_configuration(&image).unwrap();
        assert_eq!(fleet.upsert_group(&lc).unwrap(), UpsertOutcome::Created);

        let group = mock.group_snapshot("web").unwrap();
        assert_eq!(group.desired_capacity, 3);
        assert_eq!(group.tag(naming::TAG_APPLICATION), Some("web"));
        assert_eq!(group.tag(naming::TAG_NAME), Some("web"));
        assert!(group.tags.iter().all(|t| t.propagate_at_launch));

        let (topic, events) = mock.notification_configuration("web").unwrap();
        assert_eq!(topic, "arn:aws:sns:mock:1:web");
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 3);
        let fleet = controller(&mock, application());
        let lc = fleet.publish_launch_configuration(&image).unwrap();

        assert_eq!(fleet.upsert_group(&lc).unwrap(), UpsertOutcome::Updated);
        let once = mock.group_snapshot("web").unwrap();
        assert_eq!(fleet.upsert_group(&lc).unwrap(), UpsertOutcome::Updated);
        let twice = mock.group_snapshot("web").unwrap();

        assert_eq!(once.launch_configuration_name, twice.launch_configuration_name);
        assert_eq!(once.tags, twice.tags);
        assert_eq!(once.load_balancer_names, twice.load_balancer_names);
        assert_eq!(
            (once.min_size, once.max_size, once.desired_capacity),
            (twice.min_size, twice.max_size, twice.desired_capacity)
        );
        assert_eq!(twice.termination_policies, vec!["Default".to_string()]);
        assert_eq!(mock.call_count("attach-load-balancers"), 0);
    }

    #[test]
    fn test_upsert_corrects_load_balancer_drift() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 1);
        mock.add_load_balancer("web-internal", 0);
        let mut app = application();
        app.group.load_balancers = vec!["web-internal".to_string()];
        let fleet = controller(&mock, app);

        let lc = fleet.publish_launch_configuration(&image).unwrap();
        fleet.upsert_group(&lc).unwrap();

        let group = mock.group_snapshot("web").unwrap();
        assert_eq!(group.load_balancer_names, vec!["web-internal".to_string()]);
        assert_eq!(mock.call_details("detach-load-balancers"), vec!["web web-lb"]);
    }

    #[test]
    fn test_suspend_and_resume_without_group_are_noops() {
        let mock = MockCloud::new();
        let fleet = controller(&mock, application());
        assert!(!fleet.suspend_processes().unwrap());
        assert!(!fleet.resume_processes(None).unwrap());

        let guard = fleet.suspend_scoped().unwrap();
        guard.resume().unwrap();
        assert_eq!(mock.call_count("suspend-processes"), 0);
        assert_eq!(mock.call_count("resume-processes"), 0);
    }

    #[test]
    fn test_suspended_processes_resume_once_on_drop() {
        let mock = MockCloud::new();
        seeded(&mock, 1);
        let fleet = controller(&mock, application());

        {
            let guard = fleet.suspend_scoped().unwrap();
            assert_eq!(guard.group(), "web");
            assert_eq!(mock.group_snapshot("web").unwrap().suspended_processes.len(), 8);
        }
        assert!(mock.group_snapshot("web").unwrap().suspended_processes.is_empty());
        assert_eq!(mock.call_count("resume-processes"), 1);

        let guard = fleet.suspend_scoped().unwrap();
        guard.resume().unwrap();
        assert_eq!(mock.call_count("resume-processes"), 2);

        fleet.suspend_scoped().unwrap().keep();
        assert_eq!(mock.call_count("resume-processes"), 2);
        assert_eq!(mock.group_snapshot("web").unwrap().suspended_processes.len(), 8);
    }

    #[test]
    fn test_state_follows_configurations() {
        let mock = MockCloud::new();
        let fleet = controller(&mock, application());
        assert_eq!(fleet.state().unwrap(), FleetState::NoGroup);

        let image = seeded(&mock, 1);
        assert_eq!(fleet.state().unwrap(), FleetState::Current);

        let lc = fleet.publish_launch_configuration(&image).unwrap();
        assert_eq!(fleet.state().unwrap(), FleetState::Stale);

        fleet.upsert_group(&lc).unwrap();
        assert_eq!(fleet.state().unwrap(), FleetState::Current);
    }
}
