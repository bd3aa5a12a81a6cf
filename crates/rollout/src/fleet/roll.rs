//! Capacity-doubling roll onto the group's current launch configuration.

use super::FleetController;
use crate::error::Result;
use crate::naming;
use awskit::retry::{self, LogCallback};
use awskit::{AutoScalingGroup, GroupTag, GroupUpdate, HealthState, Instance};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

const OLDEST_CONFIGURATION_FIRST: &str = "OldestLaunchConfiguration";

/// Pre-roll settings recorded on the group while a roll is in progress.
///
/// Stored as the `forseti:rolling` tag value
/// `desired=3;max=6;running=3;policies=Default+OldestInstance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollMarker {
    /// Desired capacity before the roll
    pub desired: u32,
    /// Max size before the roll
    pub max: u32,
    /// Running instances before the roll
    pub running: u32,
    /// Termination policies before the roll
    pub policies: Vec<String>,
}

impl RollMarker {
    fn capture(group: &AutoScalingGroup, running: usize) -> Self {
        Self {
            desired: group.desired_capacity,
            max: group.max_size,
            running: u32::try_from(running).unwrap_or(u32::MAX),
            policies: group.termination_policies.clone(),
        }
    }

    /// Parse a tag value. Returns `None` if any field is missing or invalid.
    pub fn decode(value: &str) -> Option<Self> {
        let mut desired = None;
        let mut max = None;
        let mut running = None;
        let mut policies = None;
        for part in value.split(';') {
            let (key, val) = part.split_once('=')?;
            match key.trim() {
                "desired" => desired = val.trim().parse().ok(),
                "max" => max = val.trim().parse().ok(),
                "running" => running = val.trim().parse().ok().filter(|n| *n > 0),
                "policies" => {
                    policies = Some(
                        val.split('+')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(ToString::to_string)
                            .collect(),
                    );
                }
                _ => {}
            }
        }
        Some(Self {
            desired: desired?,
            max: max?,
            running: running?,
            policies: policies?,
        })
    }
}

impl fmt::Display for RollMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "desired={};max={};running={};policies={}",
            self.desired,
            self.max,
            self.running,
            self.policies.join("+")
        )
    }
}

/// Outcome of a roll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollReport {
    /// Instances running before the roll
    pub old_instances: Vec<String>,
    /// Instances launched by the roll
    pub new_instances: Vec<String>,
    /// Launch configuration the group was rolled onto
    pub launch_configuration: Option<String>,
    /// Capacity the group was returned to
    pub desired_capacity: u32,
    /// The group had no running instances, so nothing was rolled
    pub skipped: bool,
}

impl FleetController {
    /// Replace every running instance with one from the group's current
    /// launch configuration without dropping below the pre-roll count.
    ///
    /// 1. Record the running instances.
    /// 2. Double desired capacity and max size.
    /// 3. Wait until that many instances run.
    /// 4. Wait until the new instances are in service with every load
    ///    balancer, twice, one health check interval apart.
    /// 5. Return to the target capacity terminating the oldest configuration
    ///    first, then restore max size and termination policies.
    ///
    /// Scaling process suspension stays with the caller. The pre-roll
    /// settings are kept in a group tag until the roll completes, so an
    /// interrupted roll resumed later grows from the pre-roll count rather
    /// than from the already doubled fleet.
    pub fn roll_forward(&self) -> Result<RollReport> {
        let group = self.require_group()?;
        let name = group.name.clone();
        let running = self.running_instances()?;

        if running.is_empty() {
            log::info!("No running instances in {name}; nothing to roll");
            return Ok(RollReport {
                launch_configuration: group.launch_configuration_name,
                desired_capacity: group.desired_capacity,
                skipped: true,
                ..Default::default()
            });
        }

        for process in ["Launch", "Terminate"] {
            if group.suspended_processes.iter().any(|p| p == process) {
                log::warn!("{process} is suspended on {name}; the roll will wait for it to resume");
            }
        }

        let (original, old) = match group.tag(naming::TAG_ROLLING).and_then(RollMarker::decode) {
            Some(marker) => {
                log::warn!("Resuming interrupted roll of {name} ({marker})");
                let old = earliest_launched(running, marker.running as usize);
                (marker, old)
            }
            None => {
                let marker = RollMarker::capture(&group, running.len());
                let tag = [GroupTag::group_only(naming::TAG_ROLLING, marker.to_string())];
                retry::with_retry(&self.retry, Some(&LogCallback), || {
                    self.clients.autoscale.create_or_update_tags(&name, &tag)
                })?;
                (marker, running.into_iter().map(|i| i.id).collect())
            }
        };

        let doubled = original.running.saturating_mul(2);
        let target = self.application.group.desired_capacity.unwrap_or(original.desired);

        // Step 2
        self.progress
            .on_stage_start(&format!("Scaling {name} to {doubled} instances"));
        let grown_max = original.max.saturating_mul(2).max(doubled);
        self.apply_capacity(
            &format!("{name} to accept desired capacity {doubled}"),
            &GroupUpdate {
                desired_capacity: Some(doubled),
                max_size: Some(grown_max),
                ..Default::default()
            },
            |g| g.desired_capacity == doubled && g.max_size == grown_max,
        )?;

        // Step 3
        self.wait_running_count(doubled)?;
        self.progress
            .on_stage_complete(&format!("{doubled} instances running in {name}"));

        // Step 4
        let new: Vec<String> = self
            .running_instances()?
            .into_iter()
            .map(|i| i.id)
            .filter(|id| !old.contains(id))
            .collect();
        self.progress
            .on_stage_start(&format!("Waiting for {} new instances to pass health checks", new.len()));
        self.wait_healthy(&group.load_balancer_names, &new)?;
        self.progress.on_stage_complete("New instances healthy");

        // Step 5
        self.progress
            .on_stage_start(&format!("Draining {name} back to {target} instances"));
        let draining = vec![OLDEST_CONFIGURATION_FIRST.to_string()];
        self.apply_capacity(
            &format!("{name} to accept desired capacity {target}"),
            &GroupUpdate {
                desired_capacity: Some(target),
                termination_policies: Some(draining.clone()),
                ..Default::default()
            },
            |g| g.desired_capacity == target && g.termination_policies == draining,
        )?;
        self.wait_running_count(target)?;

        let restored_max = original.max.max(target);
        self.apply_capacity(
            &format!("{name} to restore max size {restored_max}"),
            &GroupUpdate {
                max_size: Some(restored_max),
                termination_policies: Some(original.policies.clone()),
                ..Default::default()
            },
            |g| g.max_size == restored_max && g.termination_policies == original.policies,
        )?;

        let key = [naming::TAG_ROLLING.to_string()];
        retry::with_retry(&self.retry, Some(&LogCallback), || {
            self.clients.autoscale.delete_tags(&name, &key)
        })?;
        self.progress
            .on_stage_complete(&format!("{name} rolled onto new instances"));

        let confirmed = self.require_group()?;
        log::info!(
            "Rolled {name}: replaced {} instances with {}",
            old.len(),
            new.len()
        );
        Ok(RollReport {
            old_instances: old,
            new_instances: new,
            launch_configuration: confirmed.launch_configuration_name,
            desired_capacity: confirmed.desired_capacity,
            skipped: false,
        })
    }

    /// Wait until a freshly created group runs its desired capacity and every
    /// member passes both health passes. Returns the member ids.
    pub fn await_converged(&self) -> Result<Vec<String>> {
        let group = self.require_group()?;
        let desired = group.desired_capacity;
        self.progress
            .on_stage_start(&format!("Waiting for {} to launch {desired} instances", group.name));
        self.wait_running_count(desired)?;
        let members: Vec<String> = self
            .running_instances()?
            .into_iter()
            .map(|i| i.id)
            .collect();
        self.wait_healthy(&group.load_balancer_names, &members)?;
        self.progress
            .on_stage_complete(&format!("{desired} instances healthy in {}", group.name));
        Ok(members)
    }

    /// Two in-service passes, one health check interval apart.
    fn wait_healthy(&self, load_balancers: &[String], instance_ids: &[String]) -> Result<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        self.wait_in_service(load_balancers, instance_ids)?;
        let interval = self.health_check_interval(load_balancers)?;
        log::info!("First health pass succeeded; checking again in {}s", interval.as_secs());
        self.poller.sleep("second health pass", interval)?;
        self.wait_in_service(load_balancers, instance_ids)
    }

    /// Apply `update` until the re-read group satisfies `applied`.
    ///
    /// The provider may reject a capacity change while another scaling
    /// activity is in flight; such rejections are polled through.
    fn apply_capacity<F>(&self, stage: &str, update: &GroupUpdate, applied: F) -> Result<()>
    where
        F: Fn(&AutoScalingGroup) -> bool,
    {
        let name = self.group_name();
        self.poller.wait_until(stage, self.poller.timeouts.group, || {
            let current = self.require_group()?;
            if applied(&current) {
                return Ok(true);
            }
            self.clients.autoscale.update_group(name, update)?;
            Ok(false)
        })
    }

    fn wait_running_count(&self, count: u32) -> Result<()> {
        let expected = count as usize;
        let stage = format!("{} to run {count} instances", self.group_name());
        self.poller.wait_until(&stage, self.poller.timeouts.group, || {
            Ok(self.running_instances()?.len() == expected)
        })
    }

    /// Wait until every id in `instance_ids` is in service with every load
    /// balancer in `load_balancers`.
    fn wait_in_service(&self, load_balancers: &[String], instance_ids: &[String]) -> Result<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let wanted: BTreeSet<&str> = instance_ids.iter().map(String::as_str).collect();
        for lb in load_balancers {
            let stage = format!("{} instances in service with {lb}", wanted.len());
            self.poller
                .wait_until(&stage, self.poller.timeouts.load_balancer, || {
                    let health = self.clients.load_balancers.instance_health(lb, instance_ids)?;
                    let healthy: BTreeSet<&str> = health
                        .iter()
                        .filter(|h| h.state == HealthState::InService)
                        .map(|h| h.instance_id.as_str())
                        .collect();
                    Ok(wanted.is_subset(&healthy))
                })?;
        }
        Ok(())
    }

    fn health_check_interval(&self, load_balancers: &[String]) -> Result<Duration> {
        let mut longest = 0;
        for lb in load_balancers {
            let described = retry::with_retry(&self.retry, Some(&LogCallback), || {
                self.clients.load_balancers.describe_load_balancer(lb)
            })?;
            longest = longest.max(described.health_check_interval);
        }
        Ok(Duration::from_secs(u64::from(longest)))
    }
}

/// Ids of the `count` earliest launched instances.
fn earliest_launched(mut running: Vec<Instance>, count: usize) -> Vec<String> {
    running.sort_by(|a, b| a.launch_time.cmp(&b.launch_time).then_with(|| a.id.cmp(&b.id)));
    running.truncate(count);
    let mut ids: Vec<String> = running.into_iter().map(|i| i.id).collect();
    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::tests::{application, controller, seeded};
    use awskit::{FaultKind, MockCloud};

    #[test]
    fn test_marker_roundtrip() {
        let marker = RollMarker {
            desired: 3,
            max: 6,
            running: 3,
            policies: vec!["Default".to_string(), "OldestInstance".to_string()],
        };
        let encoded = marker.to_string();
        assert_eq!(encoded, "desired=3;max=6;running=3;policies=Default+OldestInstance");
        assert_eq!(RollMarker::decode(&encoded), Some(marker));
    }

    #[test]
    fn test_marker_rejects_partial_values() {
        assert_eq!(RollMarker::decode("desired=3;max=6"), None);
        assert_eq!(RollMarker::decode("desired=3;max=6;policies=Default"), None);
        assert_eq!(RollMarker::decode("desired=x;max=6;running=3;policies=Default"), None);
        assert_eq!(RollMarker::decode("desired=3;max=6;running=0;policies=Default"), None);
        assert_eq!(RollMarker::decode("garbage"), None);
    }

    #[test]
    fn test_roll_restores_capacity_and_policies() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 3);
        let fleet = controller(&mock, application());
        let lc = fleet.publish_launch_configuration(&image).unwrap();
        fleet.upsert_group(&lc).unwrap();
        // Upsert overwrote the policies with the configured default
        let before = mock.group_snapshot("web").unwrap().termination_policies;

        let report = fleet.roll_forward().unwrap();
        assert!(!report.skipped);
        assert_eq!(report.old_instances.len(), 3);
        assert_eq!(report.new_instances.len(), 3);

        let group = mock.group_snapshot("web").unwrap();
        assert_eq!(group.desired_capacity, 3);
        assert_eq!(group.max_size, 6);
        assert_eq!(group.termination_policies, before);
        assert_eq!(group.tag(naming::TAG_ROLLING), None);

        let on_new: Vec<String> = report
            .new_instances
            .iter()
            .filter(|id| mock.instance_launch_configuration(id).as_deref() == Some(lc.as_str()))
            .cloned()
            .collect();
        assert_eq!(on_new.len(), 3);
        for id in &report.old_instances {
            assert_eq!(
                mock.instance_snapshot(id).unwrap().state,
                awskit::InstanceState::Terminated
            );
        }
    }

    #[test]
    fn test_roll_doubles_then_drains() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 2);
        let mut app = application();
        app.group.desired_capacity = Some(2);
        let fleet = controller(&mock, app);
        let lc = fleet.publish_launch_configuration(&image).unwrap();
        fleet.upsert_group(&lc).unwrap();
        mock.clear_journal();

        fleet.roll_forward().unwrap();
        let updates = mock.call_details("update-auto-scaling-group");
        assert_eq!(updates[0], "web lc=- desired=4 min=- max=12 policies=-");
        assert_eq!(
            updates[1],
            "web lc=- desired=2 min=- max=- policies=OldestLaunchConfiguration"
        );
        assert_eq!(updates[2], "web lc=- desired=- min=- max=6 policies=Default");
    }

    #[test]
    fn test_empty_group_is_skipped() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 0);
        let mut app = application();
        app.group.min_size = 0;
        app.group.desired_capacity = Some(0);
        let fleet = controller(&mock, app);
        let lc = fleet.publish_launch_configuration(&image).unwrap();
        fleet.upsert_group(&lc).unwrap();

        let report = fleet.roll_forward().unwrap();
        assert!(report.skipped);
        assert_eq!(mock.call_count("update-auto-scaling-group"), 1);
    }

    #[test]
    fn test_in_flight_rejection_is_polled_through() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 1);
        let mut app = application();
        app.group.desired_capacity = Some(1);
        let fleet = controller(&mock, app);
        let lc = fleet.publish_launch_configuration(&image).unwrap();
        fleet.upsert_group(&lc).unwrap();

        mock.fail_times("update-auto-scaling-group", FaultKind::InFlight, 2);
        let report = fleet.roll_forward().unwrap();
        assert_eq!(report.new_instances.len(), 1);
        assert_eq!(mock.group_snapshot("web").unwrap().desired_capacity, 1);
    }

    /// Value of `key=` in an update-auto-scaling-group journal detail.
    fn update_field(detail: &str, key: &str) -> Option<u32> {
        detail
            .split(' ')
            .find_map(|f| f.strip_prefix(key)?.strip_prefix('='))
            .and_then(|v| v.parse().ok())
    }

    #[test]
    fn test_interrupted_roll_keeps_marker() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 2);
        let mut app = application();
        app.group.desired_capacity = Some(2);
        let fleet = controller(&mock, app);
        let lc = fleet.publish_launch_configuration(&image).unwrap();
        fleet.upsert_group(&lc).unwrap();
        let originals: Vec<String> = fleet
            .running_instances()
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        mock.clear_journal();

        mock.fail_always("describe-load-balancers", FaultKind::Auth);
        assert!(fleet.roll_forward().is_err());
        assert_eq!(
            mock.call_details("update-auto-scaling-group")[0],
            "web lc=- desired=4 min=- max=12 policies=-"
        );
        assert_eq!(fleet.running_instances().unwrap().len(), 4);

        let group = mock.group_snapshot("web").unwrap();
        let marker = group.tag(naming::TAG_ROLLING).and_then(RollMarker::decode).unwrap();
        assert_eq!(marker.desired, 2);
        assert_eq!(marker.max, 6);
        assert_eq!(marker.running, 2);
        assert!(matches!(fleet.state().unwrap(), crate::fleet::FleetState::Rolling(_)));

        mock.clear_faults();
        mock.clear_journal();
        let report = fleet.roll_forward().unwrap();
        assert_eq!(report.old_instances, originals);
        assert_eq!(report.new_instances.len(), 2);

        // The resumed roll never grows past the first roll's peak
        for detail in mock.call_details("update-auto-scaling-group") {
            assert!(update_field(&detail, "desired").is_none_or(|d| d <= 4), "{detail}");
            assert!(update_field(&detail, "max").is_none_or(|m| m <= 12), "{detail}");
        }
        assert!(mock.running_history("web").iter().all(|&n| n <= 4));

        let group = mock.group_snapshot("web").unwrap();
        assert_eq!(group.desired_capacity, 2);
        assert_eq!(group.max_size, 6);
        assert_eq!(group.tag(naming::TAG_ROLLING), None);
        for id in &originals {
            assert_eq!(
                mock.instance_snapshot(id).unwrap().state,
                awskit::InstanceState::Terminated
            );
        }
    }
}
