//! Resolved, immutable deployment configuration of one application.
//!
//! An [`Application`] is produced by an
//! [`ApplicationRegistry`](crate::config::ApplicationRegistry) once per
//! invocation and never changes during a run.

use crate::error::{ConfigErrorKind, Error, Result};
use awskit::{GroupSpec, GroupUpdate, InstanceSpec, LaunchConfiguration, MetricAlarmSpec};
use awskit::{ScalingPolicySpec, Tags};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How a deployable image is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Provision a dedicated instance, image it, terminate it
    GoldenInstance,
    /// Deploy to the live fleet, then image one of its instances
    DeployAndSnapshot,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "golden_instance" | "golden_instances" => Ok(Self::GoldenInstance),
            "deploy_and_snapshot" => Ok(Self::DeployAndSnapshot),
            other => Err(Error::configuration(
                ConfigErrorKind::UnknownStrategy,
                format!("`{other}` (expected golden_instance or deploy_and_snapshot)"),
            )),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GoldenInstance => "golden_instance",
            Self::DeployAndSnapshot => "deploy_and_snapshot",
        };
        write!(f, "{s}")
    }
}

/// A shell command run from a fixed working directory.
///
/// The command may contain a `{dns_name}` placeholder, replaced with the
/// comma-separated addresses of the instances the hook targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookCommand {
    /// Command template
    pub command: String,
    /// Directory the command runs in
    pub working_directory: PathBuf,
}

/// SSH login used to reach a golden instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshLogin {
    /// Remote user
    pub username: String,
    /// Private key file
    pub key_filename: Option<PathBuf>,
}

/// Everything needed to build an image from a dedicated instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenConfig {
    /// Launch parameters of the golden instance
    pub instance: InstanceSpec,
    /// How to log in once it runs
    pub login: SshLogin,
    /// Provision command, run locally against the instance address
    pub provision: HookCommand,
}

/// Optional hook commands of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hooks {
    /// Deploys new code to running instances
    pub deploy: Option<HookCommand>,
    /// Puts running instances into maintenance
    pub maintenance_on: Option<HookCommand>,
    /// Takes running instances out of maintenance
    pub maintenance_off: Option<HookCommand>,
}

/// Configured shape of the autoscale group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupConfig {
    /// Group name, stable across deployments
    pub name: String,
    /// Availability zones
    pub availability_zones: Vec<String>,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Target capacity; when absent an existing group keeps its own
    pub desired_capacity: Option<u32>,
    /// Cooldown in seconds
    pub default_cooldown: Option<u32>,
    /// `EC2` or `ELB`
    pub health_check_type: Option<String>,
    /// Grace period in seconds
    pub health_check_grace_period: Option<u32>,
    /// Classic load balancers
    pub load_balancers: Vec<String>,
    /// Termination policies
    pub termination_policies: Vec<String>,
    /// Comma-separated subnet ids
    pub vpc_zone_identifier: Option<String>,
}

impl GroupConfig {
    /// Creation request for a group that does not exist yet.
    pub fn spec(&self, launch_configuration: &str) -> GroupSpec {
        GroupSpec {
            name: self.name.clone(),
            launch_configuration_name: launch_configuration.to_string(),
            availability_zones: self.availability_zones.clone(),
            min_size: self.min_size,
            max_size: self.max_size,
            desired_capacity: self.desired_capacity.unwrap_or(self.min_size),
            default_cooldown: self.default_cooldown,
            health_check_type: self.health_check_type.clone(),
            health_check_grace_period: self.health_check_grace_period,
            load_balancer_names: self.load_balancers.clone(),
            termination_policies: self.termination_policies.clone(),
            vpc_zone_identifier: self.vpc_zone_identifier.clone(),
            tags: Vec::new(),
        }
    }

    /// Update overwriting every configured field of an existing group.
    pub fn update(&self, launch_configuration: &str) -> GroupUpdate {
        let mut update = GroupUpdate::overwrite(&self.spec(launch_configuration));
        update.desired_capacity = self.desired_capacity;
        if self.availability_zones.is_empty() {
            update.availability_zones = None;
        }
        if self.termination_policies.is_empty() {
            update.termination_policies = Some(vec!["Default".to_string()]);
        }
        update
    }
}

/// Instance parameters shared by every launch configuration of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchTemplate {
    /// Instance type
    pub instance_type: String,
    /// SSH key pair name
    pub key_name: Option<String>,
    /// Security groups
    pub security_groups: Vec<String>,
    /// User data script
    pub user_data: Option<String>,
    /// Detailed monitoring
    pub instance_monitoring: bool,
    /// Instance profile
    pub iam_instance_profile: Option<String>,
    /// Spot bid price
    pub spot_price: Option<String>,
    /// Whether instances get a public address
    pub associate_public_ip_address: Option<bool>,
}

impl LaunchTemplate {
    /// A launch configuration booting `image_id`.
    pub fn with_image(&self, name: &str, image_id: &str) -> LaunchConfiguration {
        LaunchConfiguration {
            name: name.to_string(),
            image_id: image_id.to_string(),
            instance_type: self.instance_type.clone(),
            key_name: self.key_name.clone(),
            security_groups: self.security_groups.clone(),
            user_data: self.user_data.clone(),
            instance_monitoring: self.instance_monitoring,
            iam_instance_profile: self.iam_instance_profile.clone(),
            spot_price: self.spot_price.clone(),
            associate_public_ip_address: self.associate_public_ip_address,
            created_time: None,
        }
    }
}

/// A named simple scaling policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyConfig {
    /// Policy name
    pub name: String,
    /// `ChangeInCapacity`, `ExactCapacity` or `PercentChangeInCapacity`
    pub adjustment_type: String,
    /// Adjustment amount
    pub scaling_adjustment: i32,
    /// Cooldown in seconds
    pub cooldown: Option<u32>,
    /// Minimum adjustment for percentage policies
    pub min_adjustment_step: Option<i32>,
}

impl PolicyConfig {
    /// Provider request binding this policy to `group`.
    pub fn spec(&self, group: &str) -> ScalingPolicySpec {
        ScalingPolicySpec {
            name: self.name.clone(),
            group_name: group.to_string(),
            adjustment_type: self.adjustment_type.clone(),
            scaling_adjustment: self.scaling_adjustment,
            cooldown: self.cooldown,
            min_adjustment_step: self.min_adjustment_step,
        }
    }
}

/// A metric alarm triggering one of the application's policies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmConfig {
    /// Alarm name
    pub name: String,
    /// Metric name
    pub metric_name: String,
    /// Metric namespace
    pub namespace: String,
    /// Statistic
    pub statistic: String,
    /// Provider comparison operator name
    pub comparison_operator: String,
    /// Threshold
    pub threshold: f64,
    /// Period in seconds
    pub period: u32,
    /// Periods to evaluate
    pub evaluation_periods: u32,
    /// Metric unit
    pub unit: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Dimensions; defaults to the group name
    pub dimensions: Option<BTreeMap<String, String>>,
    /// Policy fired on ALARM
    pub policy: String,
}

impl AlarmConfig {
    /// Provider request for this alarm, firing `policy_arn`.
    pub fn spec(&self, group: &str, policy_arn: &str) -> MetricAlarmSpec {
        let dimensions = self.dimensions.clone().unwrap_or_else(|| {
            BTreeMap::from([("AutoScalingGroupName".to_string(), group.to_string())])
        });
        MetricAlarmSpec {
            name: self.name.clone(),
            metric_name: self.metric_name.clone(),
            namespace: self.namespace.clone(),
            statistic: self.statistic.clone(),
            comparison_operator: self.comparison_operator.clone(),
            threshold: self.threshold,
            period: self.period,
            evaluation_periods: self.evaluation_periods,
            unit: self.unit.clone(),
            description: self.description.clone(),
            dimensions,
            alarm_actions: vec![policy_arn.to_string()],
            ok_actions: Vec::new(),
            insufficient_data_actions: Vec::new(),
        }
    }
}

/// Map a comparison shorthand (`>=`, `<`, ...) to the provider's operator name.
///
/// Full operator names pass through unchanged.
pub fn comparison_operator(value: &str) -> Result<String> {
    let name = match value.trim() {
        ">=" => "GreaterThanOrEqualToThreshold",
        ">" => "GreaterThanThreshold",
        "<" => "LessThanThreshold",
        "<=" => "LessThanOrEqualToThreshold",
        full @ ("GreaterThanOrEqualToThreshold"
        | "GreaterThanThreshold"
        | "LessThanThreshold"
        | "LessThanOrEqualToThreshold") => full,
        other => {
            return Err(Error::configuration(
                ConfigErrorKind::WrongType,
                format!("unknown comparison `{other}`"),
            ));
        }
    };
    Ok(name.to_string())
}

/// One deployable application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    /// Unique name
    pub name: String,
    /// How images are produced
    pub strategy: Strategy,
    /// Autoscale group shape
    pub group: GroupConfig,
    /// Launch configuration template
    pub launch_template: LaunchTemplate,
    /// Scaling policies, in configuration order
    pub policies: Vec<PolicyConfig>,
    /// Alarms bound to those policies
    pub alarms: Vec<AlarmConfig>,
    /// Topic for group events and deployment notifications
    pub notification_topic: Option<String>,
    /// Golden instance settings, required by that strategy
    pub golden: Option<GoldenConfig>,
    /// Hook commands
    pub hooks: Hooks,
}

impl Application {
    /// Tags identifying resources created for this application today.
    pub fn resource_tags(&self, date: &str) -> Tags {
        Tags::from([
            (
                crate::naming::TAG_APPLICATION.to_string(),
                self.name.clone(),
            ),
            (crate::naming::TAG_DATE.to_string(), date.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> GroupConfig {
        GroupConfig {
            name: "web".to_string(),
            availability_zones: vec!["eu-west-1a".to_string()],
            min_size: 2,
            max_size: 6,
            desired_capacity: None,
            load_balancers: vec!["web-lb".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "golden_instance".parse::<Strategy>().unwrap(),
            Strategy::GoldenInstance
        );
        assert_eq!(
            "golden_instances".parse::<Strategy>().unwrap(),
            Strategy::GoldenInstance
        );
        assert_eq!(
            "deploy_and_snapshot".parse::<Strategy>().unwrap(),
            Strategy::DeployAndSnapshot
        );

        let err = "canary".parse::<Strategy>().unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration {
                kind: ConfigErrorKind::UnknownStrategy,
                ..
            }
        ));
    }

    #[test]
    fn test_group_spec_defaults_desired_to_min() {
        let spec = group().spec("web-2024-03-01-1");
        assert_eq!(spec.desired_capacity, 2);
        assert_eq!(spec.load_balancer_names, vec!["web-lb".to_string()]);
    }

    #[test]
    fn test_group_update_keeps_unconfigured_desired() {
        let update = group().update("web-2024-03-01-1");
        assert_eq!(update.desired_capacity, None);
        assert_eq!(update.min_size, Some(2));
        assert_eq!(update.max_size, Some(6));
        assert_eq!(update.termination_policies, Some(vec!["Default".to_string()]));

        let mut configured = group();
        configured.desired_capacity = Some(3);
        assert_eq!(configured.update("x").desired_capacity, Some(3));
    }

    #[test]
    fn test_alarm_defaults_dimension_to_group() {
        let alarm = AlarmConfig {
            name: "web-cpu-high".to_string(),
            metric_name: "CPUUtilization".to_string(),
            namespace: "AWS/EC2".to_string(),
            statistic: "Average".to_string(),
            comparison_operator: comparison_operator(">=").unwrap(),
            threshold: 70.0,
            period: 300,
            evaluation_periods: 2,
            unit: None,
            description: None,
            dimensions: None,
            policy: "scale-up".to_string(),
        };
        let spec = alarm.spec("web", "arn:policy/scale-up");
        assert_eq!(spec.comparison_operator, "GreaterThanOrEqualToThreshold");
        assert_eq!(
            spec.dimensions.get("AutoScalingGroupName").map(String::as_str),
            Some("web")
        );
        assert_eq!(spec.alarm_actions, vec!["arn:policy/scale-up".to_string()]);
    }

    #[test]
    fn test_comparison_operator_rejects_unknown() {
        assert_eq!(comparison_operator("<").unwrap(), "LessThanThreshold");
        assert_eq!(
            comparison_operator("LessThanOrEqualToThreshold").unwrap(),
            "LessThanOrEqualToThreshold"
        );
        assert!(comparison_operator("~=").is_err());
    }
}
