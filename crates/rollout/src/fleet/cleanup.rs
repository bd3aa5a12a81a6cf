use super::FleetController;
use crate::error::Result;
use crate::naming::ConfigurationName;
use awskit::LaunchConfiguration;
use awskit::retry::{self, LogCallback};
use serde::Serialize;

/// Outcome of a launch configuration cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Configurations deleted, oldest first
    pub deleted: Vec<String>,
    /// Configurations kept
    pub kept: Vec<String>,
    /// Old configuration still referenced by the group
    pub skipped_in_use: Vec<String>,
    /// Images that could not be deleted, with the error
    pub image_failures: Vec<String>,
}

impl FleetController {
    /// Launch configurations following the group's naming pattern, oldest
    /// first.
    pub fn launch_configurations(&self) -> Result<Vec<(ConfigurationName, LaunchConfiguration)>> {
        let group = self.group_name();
        let all = retry::with_retry(&self.retry, Some(&LogCallback), || {
            self.clients.autoscale.list_launch_configurations()
        })?;
        let mut matching: Vec<(ConfigurationName, LaunchConfiguration)> = all
            .into_iter()
            .filter_map(|lc| ConfigurationName::parse(group, &lc.name).map(|name| (name, lc)))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matching)
    }

    /// Names `cleanup_old_configurations(keep)` would delete.
    pub fn cleanup_candidates(&self, keep: usize) -> Result<Vec<String>> {
        let all = self.launch_configurations()?;
        let excess = all.len().saturating_sub(keep);
        Ok(all
            .into_iter()
            .take(excess)
            .map(|(_, lc)| lc.name)
            .collect())
    }

    /// Delete all but the newest `keep` configurations of the group along
    /// with their images.
    ///
    /// The configuration the group currently uses is never deleted. An image
    /// still referenced by a surviving configuration is left alone. Image
    /// deletion failures are logged and reported; the configuration is
    /// deleted regardless.
    pub fn cleanup_old_configurations(&self, keep: usize) -> Result<CleanupReport> {
        let in_use = self.group()?.and_then(|g| g.launch_configuration_name);
        let all = self.launch_configurations()?;
        let excess = all.len().saturating_sub(keep);
        let mut report = CleanupReport {
            kept: all.iter().skip(excess).map(|(_, lc)| lc.name.clone()).collect(),
            ..Default::default()
        };

        let mut surviving: Vec<&LaunchConfiguration> = all.iter().map(|(_, lc)| lc).collect();
        for (_, lc) in all.iter().take(excess) {
            if in_use.as_deref() == Some(lc.name.as_str()) {
                log::warn!("Keeping {}: {} still uses it", lc.name, self.group_name());
                report.skipped_in_use.push(lc.name.clone());
                continue;
            }
            surviving.retain(|other| other.name != lc.name);

            if surviving.iter().any(|other| other.image_id == lc.image_id) {
                log::info!("Image {} is shared with a newer configuration; not deleting it", lc.image_id);
            } else {
                log::info!("Deleting image {} of {}", lc.image_id, lc.name);
                let deleted = retry::with_retry(&self.retry, Some(&LogCallback), || {
                    self.clients.images.delete_image(&lc.image_id)
                });
                if let Err(e) = deleted {
                    log::warn!("Failed to delete image {} of {}: {e}", lc.image_id, lc.name);
                    report.image_failures.push(format!("{}: {e}", lc.image_id));
                }
            }

            retry::with_retry(&self.retry, Some(&LogCallback), || {
                self.clients.autoscale.delete_launch_configuration(&lc.name)
            })?;
            log::info!("Deleted launch configuration {}", lc.name);
            report.deleted.push(lc.name.clone());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::fleet::tests::{application, controller};
    use awskit::{FaultKind, GroupSpec, LaunchConfiguration, MockCloud, Tags};

    /// Seven configurations `web-2024-01-0{1..7}-1`, each with its own
    /// image; the group uses the newest. Returns the image ids, oldest first.
    fn seven(mock: &MockCloud) -> Vec<String> {
        mock.add_load_balancer("web-lb", 0);
        let mut images = Vec::new();
        for day in 1..=7 {
            let image = mock.add_image(&format!("web-ami-2024-01-0{day}-1"), Tags::new());
            mock.add_launch_configuration(LaunchConfiguration {
                name: format!("web-2024-01-0{day}-1"),
                image_id: image.clone(),
                instance_type: "t3.small".to_string(),
                ..Default::default()
            });
            images.push(image);
        }
        mock.seed_group(&GroupSpec {
            name: "web".to_string(),
            launch_configuration_name: "web-2024-01-07-1".to_string(),
            min_size: 1,
            max_size: 6,
            desired_capacity: 1,
            load_balancer_names: vec!["web-lb".to_string()],
            ..Default::default()
        });
        images
    }

    #[test]
    fn test_keep_four_of_seven_deletes_three_oldest() {
        let mock = MockCloud::new();
        let images = seven(&mock);
        mock.add_launch_configuration(LaunchConfiguration {
            name: "web-api-2024-01-01-1".to_string(),
            image_id: "ami-api".to_string(),
            ..Default::default()
        });
        let fleet = controller(&mock, application());

        let report = fleet.cleanup_old_configurations(4).unwrap();
        assert_eq!(
            report.deleted,
            vec!["web-2024-01-01-1", "web-2024-01-02-1", "web-2024-01-03-1"]
        );
        assert_eq!(report.kept.len(), 4);
        assert!(mock.launch_configuration_names().contains(&"web-api-2024-01-01-1".to_string()));
        for image in &images[..3] {
            assert!(mock.image_snapshot(image).is_none());
        }
        assert!(mock.image_snapshot(&images[3]).is_some());
    }

    #[test]
    fn test_image_is_deleted_before_its_configuration() {
        let mock = MockCloud::new();
        let images = seven(&mock);
        let fleet = controller(&mock, application());
        mock.clear_journal();

        fleet.cleanup_old_configurations(6).unwrap();
        let calls: Vec<String> = mock
            .calls()
            .into_iter()
            .filter(|c| c == "deregister-image" || c == "delete-launch-configuration")
            .collect();
        assert_eq!(calls, vec!["deregister-image", "delete-launch-configuration"]);
        assert_eq!(mock.call_details("deregister-image"), vec![images[0].clone()]);
    }

    #[test]
    fn test_configuration_in_use_is_never_deleted() {
        let mock = MockCloud::new();
        seven(&mock);
        let fleet = controller(&mock, application());

        let report = fleet.cleanup_old_configurations(0).unwrap();
        assert_eq!(report.deleted.len(), 6);
        assert_eq!(report.skipped_in_use, vec!["web-2024-01-07-1"]);
        assert_eq!(mock.launch_configuration_names(), vec!["web-2024-01-07-1"]);
    }

    #[test]
    fn test_image_failure_is_reported() {
        let mock = MockCloud::new();
        seven(&mock);
        let fleet = controller(&mock, application());

        mock.fail_always("deregister-image", FaultKind::Auth);
        let report = fleet.cleanup_old_configurations(5).unwrap();
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.image_failures.len(), 2);
    }

    #[test]
    fn test_shared_image_survives() {
        let mock = MockCloud::new();
        let images = seven(&mock);
        mock.add_launch_configuration(LaunchConfiguration {
            name: "web-2024-01-08-1".to_string(),
            image_id: images[0].clone(),
            ..Default::default()
        });
        let fleet = controller(&mock, application());

        let report = fleet.cleanup_old_configurations(7).unwrap();
        assert_eq!(report.deleted, vec!["web-2024-01-01-1"]);
        assert!(mock.image_snapshot(&images[0]).is_some());
    }

    #[test]
    fn test_candidates_match_cleanup() {
        let mock = MockCloud::new();
        seven(&mock);
        let fleet = controller(&mock, application());
        let candidates = fleet.cleanup_candidates(4).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(fleet.cleanup_old_configurations(4).unwrap().deleted, candidates);
    }
}
