use super::FleetController;
use crate::error::Result;
use awskit::retry::{self, LogCallback};
use serde::Serialize;
use std::collections::BTreeMap;

/// Policies and alarms upserted on a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScalingReport {
    /// Policy name to ARN
    pub policies: BTreeMap<String, String>,
    /// Alarm names
    pub alarms: Vec<String>,
}

impl FleetController {
    /// Upsert the application's scaling policies, then the alarms that fire
    /// them.
    pub fn attach_scaling(&self) -> Result<ScalingReport> {
        let group = self.group_name();
        let mut report = ScalingReport::default();

        for policy in &self.application.policies {
            let spec = policy.spec(group);
            let arn = retry::with_retry(&self.retry, Some(&LogCallback), || {
                self.clients.autoscale.put_scaling_policy(&spec)
            })?;
            log::info!("Scaling policy {} on {group}: {arn}", policy.name);
            report.policies.insert(policy.name.clone(), arn);
        }

        for alarm in &self.application.alarms {
            let Some(arn) = report.policies.get(&alarm.policy) else {
                log::warn!(
                    "Alarm {} fires unknown policy {}; skipping",
                    alarm.name,
                    alarm.policy
                );
                continue;
            };
            let spec = alarm.spec(group, arn);
            retry::with_retry(&self.retry, Some(&LogCallback), || {
                self.clients.alarms.put_metric_alarm(&spec)
            })?;
            log::info!("Alarm {} fires {}", alarm.name, alarm.policy);
            report.alarms.push(alarm.name.clone());
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::application::{AlarmConfig, PolicyConfig};
    use crate::fleet::tests::{application, controller, seeded};
    use awskit::{FaultKind, MockCloud};

    fn policy(name: &str, adjustment: i32) -> PolicyConfig {
        PolicyConfig {
            name: name.to_string(),
            adjustment_type: "ChangeInCapacity".to_string(),
            scaling_adjustment: adjustment,
            cooldown: Some(300),
            min_adjustment_step: None,
        }
    }

    fn alarm(name: &str, policy: &str) -> AlarmConfig {
        AlarmConfig {
            name: name.to_string(),
            metric_name: "CPUUtilization".to_string(),
            namespace: "AWS/EC2".to_string(),
            statistic: "Average".to_string(),
            comparison_operator: "GreaterThanOrEqualToThreshold".to_string(),
            threshold: 70.0,
            period: 60,
            evaluation_periods: 2,
            unit: None,
            description: None,
            dimensions: None,
            policy: policy.to_string(),
        }
    }

    #[test]
    fn test_alarms_fire_their_policy() {
        let mock = MockCloud::new();
        seeded(&mock, 1);
        let mut app = application();
        app.policies = vec![policy("scale-up", 1), policy("scale-down", -1)];
        app.alarms = vec![alarm("cpu-high", "scale-up"), alarm("orphan", "missing")];
        let fleet = controller(&mock, app);

        let report = fleet.attach_scaling().unwrap();
        assert_eq!(report.policies.len(), 2);
        assert_eq!(report.alarms, vec!["cpu-high"]);

        let alarms = mock.alarms();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].alarm_actions, vec![report.policies["scale-up"].clone()]);
        assert_eq!(
            alarms[0].dimensions.get("AutoScalingGroupName").map(String::as_str),
            Some("web")
        );
    }

    #[test]
    fn test_policies_are_upserted() {
        let mock = MockCloud::new();
        seeded(&mock, 1);
        let mut app = application();
        app.policies = vec![policy("scale-up", 1)];
        let fleet = controller(&mock, app);

        let first = fleet.attach_scaling().unwrap();
        let second = fleet.attach_scaling().unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.policies().len(), 1);
    }

    #[test]
    fn test_throttled_policy_is_retried() {
        let mock = MockCloud::new();
        seeded(&mock, 1);
        let mut app = application();
        app.policies = vec![policy("scale-up", 1)];
        let fleet = controller(&mock, app);

        mock.fail_next("put-scaling-policy", FaultKind::Throttled);
        let report = fleet.attach_scaling().unwrap();
        assert_eq!(report.policies.len(), 1);
        assert_eq!(mock.call_count("put-scaling-policy"), 2);
    }
}
