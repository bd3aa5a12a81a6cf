use super::{FleetController, RollMarker};
use crate::error::{Error, Result};
use crate::naming;
use awskit::{InstanceHealth, ScalingActivity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Read-only snapshot of a group.
///
/// This is the shape every status renderer consumes; its field names are
/// also the JSON output keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    /// Group name
    pub name: String,
    /// Launch configuration in use
    pub launch_configuration: Option<String>,
    /// Desired capacity
    pub desired_capacity: u32,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Attached load balancers, comma separated, or `N/A`
    pub load_balancers: String,
    /// Group members
    pub instances: Vec<InstanceStatus>,
    /// Most recent scaling activities, newest first
    pub activities: Vec<ActivityStatus>,
    /// Suspended scaling processes
    pub suspended_processes: Vec<String>,
    /// Pre-roll settings if a roll is in progress or was interrupted
    pub rolling: Option<RollMarker>,
}

/// One group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    /// Instance id
    pub id: String,
    /// Autoscale health status
    pub health: String,
    /// Autoscale lifecycle state
    pub lifecycle_state: String,
    /// Launch configuration the instance was started from
    pub launch_configuration: Option<String>,
    /// Availability zone
    pub availability_zone: String,
    /// Health per attached load balancer
    pub load_balancers: Vec<LoadBalancerHealth>,
}

/// Health of one instance in one load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadBalancerHealth {
    /// Load balancer name
    pub name: String,
    /// `InService`, `OutOfService` or `Unknown`
    pub state: String,
    /// Provider explanation for an unhealthy state
    pub reason: Option<String>,
}

/// One scaling activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityStatus {
    /// What happened
    pub description: String,
    /// Start time
    pub start: String,
    /// End time, or `in progress`
    pub end: String,
    /// Why it happened
    pub cause: String,
}

impl From<&ScalingActivity> for ActivityStatus {
    fn from(activity: &ScalingActivity) -> Self {
        Self {
            description: activity.description.clone(),
            start: format_time(activity.start_time.as_ref()).unwrap_or_default(),
            end: format_time(activity.end_time.as_ref())
                .unwrap_or_else(|| "in progress".to_string()),
            cause: activity.cause.clone(),
        }
    }
}

fn format_time(time: Option<&DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.format(TIME_FORMAT).to_string())
}

impl FleetController {
    /// Snapshot the group with up to `activities` recent scaling activities.
    ///
    /// # Errors
    ///
    /// Returns `Error::GroupNotFound` if the group does not exist.
    pub fn status(&self, activities: usize) -> Result<GroupStatus> {
        let group = self.group()?.ok_or_else(|| Error::GroupNotFound {
            group: self.group_name().to_string(),
        })?;

        let ids = group.instance_ids();
        let mut health: BTreeMap<&str, Vec<InstanceHealth>> = BTreeMap::new();
        if !ids.is_empty() {
            for lb in &group.load_balancer_names {
                let reported = self.clients.load_balancers.instance_health(lb, &ids)?;
                health.insert(lb.as_str(), reported);
            }
        }

        let instances = group
            .instances
            .iter()
            .map(|member| InstanceStatus {
                id: member.instance_id.clone(),
                health: member.health_status.clone(),
                lifecycle_state: member.lifecycle_state.clone(),
                launch_configuration: member.launch_configuration_name.clone(),
                availability_zone: member.availability_zone.clone(),
                load_balancers: health
                    .iter()
                    .map(|(lb, reported)| {
                        let entry = reported.iter().find(|h| h.instance_id == member.instance_id);
                        LoadBalancerHealth {
                            name: (*lb).to_string(),
                            state: entry.map_or_else(|| "Unknown".to_string(), |h| h.state.to_string()),
                            reason: entry.and_then(|h| h.description.clone()),
                        }
                    })
                    .collect(),
            })
            .collect();

        let recent = if activities == 0 {
            Vec::new()
        } else {
            self.clients
                .autoscale
                .describe_activities(&group.name, activities)?
                .iter()
                .map(ActivityStatus::from)
                .collect()
        };

        let load_balancers = if group.load_balancer_names.is_empty() {
            "N/A".to_string()
        } else {
            group.load_balancer_names.join(", ")
        };

        Ok(GroupStatus {
            rolling: group.tag(naming::TAG_ROLLING).and_then(RollMarker::decode),
            name: group.name,
            launch_configuration: group.launch_configuration_name,
            desired_capacity: group.desired_capacity,
            min_size: group.min_size,
            max_size: group.max_size,
            load_balancers,
            instances,
            activities: recent,
            suspended_processes: group.suspended_processes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::tests::{application, controller, seeded};
    use awskit::MockCloud;

    #[test]
    fn test_status_of_missing_group() {
        let mock = MockCloud::new();
        let fleet = controller(&mock, application());
        assert!(matches!(fleet.status(5), Err(Error::GroupNotFound { .. })));
    }

    #[test]
    fn test_status_reports_per_balancer_health() {
        let mock = MockCloud::new();
        seeded(&mock, 2);
        let fleet = controller(&mock, application());

        let status = fleet.status(5).unwrap();
        assert_eq!(status.name, "web");
        assert_eq!(status.launch_configuration.as_deref(), Some("web-2024-01-01-1"));
        assert_eq!(status.load_balancers, "web-lb");
        assert_eq!(status.instances.len(), 2);
        for instance in &status.instances {
            assert_eq!(instance.load_balancers.len(), 1);
            assert_eq!(instance.load_balancers[0].state, "InService");
            assert_eq!(instance.launch_configuration.as_deref(), Some("web-2024-01-01-1"));
        }
        assert!(status.rolling.is_none());
        assert_eq!(mock.call_count("update-auto-scaling-group"), 0);
    }

    #[test]
    fn test_status_lists_recent_activities() {
        let mock = MockCloud::new();
        let image = seeded(&mock, 1);
        let fleet = controller(&mock, application());
        let lc = fleet.publish_launch_configuration(&image).unwrap();
        fleet.upsert_group(&lc).unwrap();

        let status = fleet.status(10).unwrap();
        assert!(!status.activities.is_empty());
        assert!(status.activities[0].description.starts_with("Launching"));
        assert_ne!(status.activities[0].end, "in progress");
        assert!(fleet.status(0).unwrap().activities.is_empty());
    }

    #[test]
    fn test_activity_without_end_is_in_progress() {
        let activity = ScalingActivity {
            activity_id: "act-1".to_string(),
            description: "Launching a new EC2 instance".to_string(),
            cause: "capacity".to_string(),
            status_code: "InProgress".to_string(),
            start_time: Some(Utc::now()),
            end_time: None,
            progress: 30,
        };
        assert_eq!(ActivityStatus::from(&activity).end, "in progress");
    }
}
