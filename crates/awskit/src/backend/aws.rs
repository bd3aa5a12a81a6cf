//! Real provider backend using `aws` CLI commands.
//!
//! Every call runs `aws <service> <operation> ... --output json` and parses
//! the JSON response. Read-only calls are retried on transient errors;
//! mutating calls are issued once and transient failures are returned to
//! the caller, which re-reads state before trying again.

use crate::backend::{
    AlarmService, AutoscaleService, ComputeService, ImageService, LoadBalancerService,
    NotificationService,
};
use crate::error::{Error, Result};
use crate::retry::{self, LogCallback};
use crate::types::{
    AutoScalingGroup, GroupSpec, GroupTag, GroupUpdate, Image, Instance, InstanceHealth,
    InstanceSpec, LaunchConfiguration, LoadBalancer, MetricAlarmSpec, RetryConfig,
    ScalingActivity, ScalingPolicySpec, Tags,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::PathBuf;
use std::process::Command;

/// Connection settings passed to every `aws` invocation.
#[derive(Debug, Clone, Default)]
pub struct AwsConfig {
    /// `--region`
    pub region: Option<String>,
    /// `--profile`
    pub profile: Option<String>,
    /// Retry policy for read-only calls
    pub retry: RetryConfig,
}

/// Backend that executes real `aws` commands.
pub struct AwsCliBackend {
    /// Path to the aws executable
    aws_path: PathBuf,
    config: AwsConfig,
}

impl AwsCliBackend {
    /// Create a new backend.
    ///
    /// Returns an error if the AWS CLI is not installed.
    pub fn new(config: AwsConfig) -> Result<Self> {
        let aws_path = which::which("aws").map_err(|_| Error::CliNotFound)?;
        Ok(Self { aws_path, config })
    }

    /// Run an aws command and return stdout.
    fn run(&self, service: &str, operation: &str, args: &Args) -> Result<String> {
        let mut command = Command::new(&self.aws_path);
        command
            .arg(service)
            .arg(operation)
            .args(&args.0)
            .args(["--output", "json"]);
        if let Some(region) = &self.config.region {
            command.args(["--region", region.as_str()]);
        }
        if let Some(profile) = &self.config.profile {
            command.args(["--profile", profile.as_str()]);
        }

        log::debug!("aws {service} {operation} {}", args.0.join(" "));
        let output = command.output().map_err(|e| Error::CommandFailed {
            message: format!("failed to execute aws: {e}"),
            stderr: String::new(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_aws_output(&stderr, operation));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a read-only command with retry and parse its response.
    fn query<T: DeserializeOwned>(&self, service: &str, operation: &str, args: &Args) -> Result<T> {
        retry::with_retry(&self.config.retry, Some(&LogCallback), || {
            let stdout = self.run(service, operation, args)?;
            parse(operation, &stdout)
        })
    }

    /// Run a mutating command once.
    fn mutate(&self, service: &str, operation: &str, args: &Args) -> Result<String> {
        self.run(service, operation, args)
    }
}

fn parse<T: DeserializeOwned>(operation: &str, stdout: &str) -> Result<T> {
    let body = if stdout.trim().is_empty() { "{}" } else { stdout };
    serde_json::from_str(body).map_err(|e| Error::Response {
        operation: operation.to_string(),
        message: e.to_string(),
    })
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Command line builder.
#[derive(Debug, Default)]
struct Args(Vec<String>);

impl Args {
    fn new() -> Self {
        Self::default()
    }

    fn flag(mut self, name: &str) -> Self {
        self.0.push(name.to_string());
        self
    }

    fn opt(mut self, name: &str, value: impl ToString) -> Self {
        self.0.push(name.to_string());
        self.0.push(value.to_string());
        self
    }

    fn opt_if<V: ToString>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.opt(name, v),
            None => self,
        }
    }

    fn list(mut self, name: &str, values: &[String]) -> Self {
        if !values.is_empty() {
            self.0.push(name.to_string());
            self.0.extend(values.iter().cloned());
        }
        self
    }

    fn json(self, name: &str, value: &impl Serialize) -> Result<Self> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.opt(name, encoded))
    }
}

fn tag_list(tags: &Tags) -> serde_json::Value {
    tags.iter()
        .map(|(k, v)| json!({ "Key": k, "Value": v }))
        .collect()
}

fn group_tag_list(group: &str, tags: &[GroupTag]) -> serde_json::Value {
    tags.iter()
        .map(|t| {
            json!({
                "ResourceId": group,
                "ResourceType": "auto-scaling-group",
                "Key": t.key,
                "Value": t.value,
                "PropagateAtLaunch": t.propagate_at_launch,
            })
        })
        .collect()
}

// =============================================================================
// Compute
// =============================================================================

impl ComputeService for AwsCliBackend {
    fn run_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let (ids, names): (Vec<String>, Vec<String>) = spec
            .security_groups
            .iter()
            .cloned()
            .partition(|g| g.starts_with("sg-"));

        let args = Args::new()
            .opt("--image-id", &spec.image_id)
            .opt("--instance-type", &spec.instance_type)
            .opt("--count", 1)
            .opt_if("--key-name", spec.key_name.as_ref())
            .list("--security-group-ids", &ids)
            .list("--security-groups", &names)
            .opt_if("--user-data", spec.user_data.as_ref())
            .opt("--monitoring", format!("Enabled={}", spec.monitoring))
            .opt_if(
                "--placement",
                spec.availability_zone
                    .as_ref()
                    .map(|z| format!("AvailabilityZone={z}")),
            )
            .opt_if("--subnet-id", spec.subnet_id.as_ref())
            .opt_if(
                "--iam-instance-profile",
                spec.iam_instance_profile.as_ref().map(|p| format!("Name={p}")),
            );

        let stdout = self.mutate("ec2", "run-instances", &args)?;
        let response: wire::RunInstances = parse("run-instances", &stdout)?;
        response
            .instances
            .into_iter()
            .next()
            .map(wire::Instance::into_instance)
            .ok_or_else(|| Error::Response {
                operation: "run-instances".to_string(),
                message: "no instance in response".to_string(),
            })
    }

    fn describe_instance(&self, instance_id: &str) -> Result<Instance> {
        let args = Args::new().opt("--instance-ids", instance_id);
        let response: wire::DescribeInstances = self.query("ec2", "describe-instances", &args)?;
        response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .next()
            .map(wire::Instance::into_instance)
            .ok_or_else(|| Error::NotFound {
                resource: format!("instance {instance_id}"),
            })
    }

    fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let filters = json!([{ "Name": "instance-id", "Values": instance_ids }]);
        let args = Args::new().json("--filters", &filters)?;
        let response: wire::DescribeInstances = self.query("ec2", "describe-instances", &args)?;
        Ok(response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(wire::Instance::into_instance)
            .collect())
    }

    fn create_tags(&self, instance_id: &str, tags: &Tags) -> Result<()> {
        let args = Args::new()
            .opt("--resources", instance_id)
            .json("--tags", &tag_list(tags))?;
        self.mutate("ec2", "create-tags", &args)?;
        Ok(())
    }

    fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let args = Args::new().opt("--instance-ids", instance_id);
        self.mutate("ec2", "terminate-instances", &args)?;
        Ok(())
    }
}

// =============================================================================
// Images
// =============================================================================

impl ImageService for AwsCliBackend {
    fn create_image(&self, instance_id: &str, name: &str, no_reboot: bool) -> Result<String> {
        let args = Args::new()
            .opt("--instance-id", instance_id)
            .opt("--name", name)
            .flag(if no_reboot { "--no-reboot" } else { "--reboot" });
        let stdout = self.mutate("ec2", "create-image", &args)?;
        let response: wire::CreateImage = parse("create-image", &stdout)?;
        Ok(response.image_id)
    }

    fn describe_image(&self, image_id: &str) -> Result<Image> {
        let args = Args::new().opt("--image-ids", image_id);
        let response: wire::DescribeImages = self.query("ec2", "describe-images", &args)?;
        response
            .images
            .into_iter()
            .next()
            .map(wire::Image::into_image)
            .ok_or_else(|| Error::NotFound {
                resource: format!("image {image_id}"),
            })
    }

    fn find_images(&self, tags: &Tags) -> Result<Vec<Image>> {
        let filters: Vec<_> = tags
            .iter()
            .map(|(k, v)| json!({ "Name": format!("tag:{k}"), "Values": [v] }))
            .collect();
        let args = Args::new()
            .opt("--owners", "self")
            .json("--filters", &filters)?;
        let response: wire::DescribeImages = self.query("ec2", "describe-images", &args)?;
        Ok(response
            .images
            .into_iter()
            .map(wire::Image::into_image)
            .collect())
    }

    fn tag_image(&self, image_id: &str, tags: &Tags) -> Result<()> {
        let args = Args::new()
            .opt("--resources", image_id)
            .json("--tags", &tag_list(tags))?;
        self.mutate("ec2", "create-tags", &args)?;
        Ok(())
    }

    fn deregister_image(&self, image_id: &str) -> Result<()> {
        let args = Args::new().opt("--image-id", image_id);
        self.mutate("ec2", "deregister-image", &args)?;
        Ok(())
    }

    fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let args = Args::new().opt("--snapshot-id", snapshot_id);
        self.mutate("ec2", "delete-snapshot", &args)?;
        Ok(())
    }
}

// =============================================================================
// Autoscaling
// =============================================================================

impl AutoscaleService for AwsCliBackend {
    fn describe_group(&self, name: &str) -> Result<Option<AutoScalingGroup>> {
        let args = Args::new().opt("--auto-scaling-group-names", name);
        let response: wire::DescribeGroups =
            self.query("autoscaling", "describe-auto-scaling-groups", &args)?;
        Ok(response
            .auto_scaling_groups
            .into_iter()
            .next()
            .map(wire::Group::into_group))
    }

    fn create_group(&self, spec: &GroupSpec) -> Result<()> {
        let mut args = Args::new()
            .opt("--auto-scaling-group-name", &spec.name)
            .opt("--launch-configuration-name", &spec.launch_configuration_name)
            .opt("--min-size", spec.min_size)
            .opt("--max-size", spec.max_size)
            .opt("--desired-capacity", spec.desired_capacity)
            .opt_if("--default-cooldown", spec.default_cooldown)
            .list("--availability-zones", &spec.availability_zones)
            .list("--load-balancer-names", &spec.load_balancer_names)
            .opt_if("--health-check-type", spec.health_check_type.as_ref())
            .opt_if("--health-check-grace-period", spec.health_check_grace_period)
            .list("--termination-policies", &spec.termination_policies)
            .opt_if("--vpc-zone-identifier", spec.vpc_zone_identifier.as_ref());
        if !spec.tags.is_empty() {
            args = args.json("--tags", &group_tag_list(&spec.name, &spec.tags))?;
        }
        self.mutate("autoscaling", "create-auto-scaling-group", &args)?;
        Ok(())
    }

    fn update_group(&self, name: &str, update: &GroupUpdate) -> Result<()> {
        let empty = Vec::new();
        let args = Args::new()
            .opt("--auto-scaling-group-name", name)
            .opt_if(
                "--launch-configuration-name",
                update.launch_configuration_name.as_ref(),
            )
            .opt_if("--min-size", update.min_size)
            .opt_if("--max-size", update.max_size)
            .opt_if("--desired-capacity", update.desired_capacity)
            .opt_if("--default-cooldown", update.default_cooldown)
            .list(
                "--availability-zones",
                update.availability_zones.as_ref().unwrap_or(&empty),
            )
            .opt_if("--health-check-type", update.health_check_type.as_ref())
            .opt_if(
                "--health-check-grace-period",
                update.health_check_grace_period,
            )
            .list(
                "--termination-policies",
                update.termination_policies.as_ref().unwrap_or(&empty),
            )
            .opt_if("--vpc-zone-identifier", update.vpc_zone_identifier.as_ref());
        self.mutate("autoscaling", "update-auto-scaling-group", &args)?;
        Ok(())
    }

    fn attach_load_balancers(&self, group: &str, load_balancers: &[String]) -> Result<()> {
        if load_balancers.is_empty() {
            return Ok(());
        }
        let args = Args::new()
            .opt("--auto-scaling-group-name", group)
            .list("--load-balancer-names", load_balancers);
        self.mutate("autoscaling", "attach-load-balancers", &args)?;
        Ok(())
    }

    fn detach_load_balancers(&self, group: &str, load_balancers: &[String]) -> Result<()> {
        if load_balancers.is_empty() {
            return Ok(());
        }
        let args = Args::new()
            .opt("--auto-scaling-group-name", group)
            .list("--load-balancer-names", load_balancers);
        self.mutate("autoscaling", "detach-load-balancers", &args)?;
        Ok(())
    }

    fn create_or_update_tags(&self, group: &str, tags: &[GroupTag]) -> Result<()> {
        let args = Args::new().json("--tags", &group_tag_list(group, tags))?;
        self.mutate("autoscaling", "create-or-update-tags", &args)?;
        Ok(())
    }

    fn delete_tags(&self, group: &str, keys: &[String]) -> Result<()> {
        let tags: Vec<_> = keys
            .iter()
            .map(|k| {
                json!({
                    "ResourceId": group,
                    "ResourceType": "auto-scaling-group",
                    "Key": k,
                })
            })
            .collect();
        let args = Args::new().json("--tags", &tags)?;
        self.mutate("autoscaling", "delete-tags", &args)?;
        Ok(())
    }

    fn suspend_processes(&self, group: &str, processes: Option<&[String]>) -> Result<()> {
        let args = Args::new()
            .opt("--auto-scaling-group-name", group)
            .list("--scaling-processes", processes.unwrap_or_default());
        self.mutate("autoscaling", "suspend-processes", &args)?;
        Ok(())
    }

    fn resume_processes(&self, group: &str, processes: Option<&[String]>) -> Result<()> {
        let args = Args::new()
            .opt("--auto-scaling-group-name", group)
            .list("--scaling-processes", processes.unwrap_or_default());
        self.mutate("autoscaling", "resume-processes", &args)?;
        Ok(())
    }

    fn describe_activities(
        &self,
        group: &str,
        max_records: usize,
    ) -> Result<Vec<ScalingActivity>> {
        let args = Args::new()
            .opt("--auto-scaling-group-name", group)
            .opt("--max-items", max_records);
        let response: wire::DescribeActivities =
            self.query("autoscaling", "describe-scaling-activities", &args)?;
        Ok(response
            .activities
            .into_iter()
            .map(wire::Activity::into_activity)
            .collect())
    }

    fn create_launch_configuration(&self, config: &LaunchConfiguration) -> Result<()> {
        let mut args = Args::new()
            .opt("--launch-configuration-name", &config.name)
            .opt("--image-id", &config.image_id)
            .opt("--instance-type", &config.instance_type)
            .opt_if("--key-name", config.key_name.as_ref())
            .list("--security-groups", &config.security_groups)
            .opt_if("--user-data", config.user_data.as_ref())
            .opt(
                "--instance-monitoring",
                format!("Enabled={}", config.instance_monitoring),
            )
            .opt_if("--iam-instance-profile", config.iam_instance_profile.as_ref())
            .opt_if("--spot-price", config.spot_price.as_ref());
        match config.associate_public_ip_address {
            Some(true) => args = args.flag("--associate-public-ip-address"),
            Some(false) => args = args.flag("--no-associate-public-ip-address"),
            None => {}
        }
        self.mutate("autoscaling", "create-launch-configuration", &args)?;
        Ok(())
    }

    fn describe_launch_configuration(&self, name: &str) -> Result<Option<LaunchConfiguration>> {
        let args = Args::new().opt("--launch-configuration-names", name);
        let response: wire::DescribeLaunchConfigurations =
            self.query("autoscaling", "describe-launch-configurations", &args)?;
        Ok(response
            .launch_configurations
            .into_iter()
            .next()
            .map(wire::LaunchConfiguration::into_launch_configuration))
    }

    fn list_launch_configurations(&self) -> Result<Vec<LaunchConfiguration>> {
        // The CLI follows pagination tokens itself.
        let response: wire::DescribeLaunchConfigurations =
            self.query("autoscaling", "describe-launch-configurations", &Args::new())?;
        Ok(response
            .launch_configurations
            .into_iter()
            .map(wire::LaunchConfiguration::into_launch_configuration)
            .collect())
    }

    fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        let args = Args::new().opt("--launch-configuration-name", name);
        self.mutate("autoscaling", "delete-launch-configuration", &args)?;
        Ok(())
    }

    fn put_scaling_policy(&self, policy: &ScalingPolicySpec) -> Result<String> {
        let args = Args::new()
            .opt("--auto-scaling-group-name", &policy.group_name)
            .opt("--policy-name", &policy.name)
            .opt("--adjustment-type", &policy.adjustment_type)
            .opt("--scaling-adjustment", policy.scaling_adjustment)
            .opt_if("--cooldown", policy.cooldown)
            .opt_if("--min-adjustment-step", policy.min_adjustment_step);
        let stdout = self.mutate("autoscaling", "put-scaling-policy", &args)?;
        let response: wire::PutScalingPolicy = parse("put-scaling-policy", &stdout)?;
        Ok(response.policy_arn)
    }

    fn put_notification_configuration(
        &self,
        group: &str,
        topic_arn: &str,
        notification_types: &[&str],
    ) -> Result<()> {
        let types: Vec<String> = notification_types.iter().map(ToString::to_string).collect();
        let args = Args::new()
            .opt("--auto-scaling-group-name", group)
            .opt("--topic-arn", topic_arn)
            .list("--notification-types", &types);
        self.mutate("autoscaling", "put-notification-configuration", &args)?;
        Ok(())
    }
}

// =============================================================================
// Load balancers
// =============================================================================

impl LoadBalancerService for AwsCliBackend {
    fn describe_load_balancer(&self, name: &str) -> Result<LoadBalancer> {
        let args = Args::new().opt("--load-balancer-names", name);
        let response: wire::DescribeLoadBalancers =
            self.query("elb", "describe-load-balancers", &args)?;
        response
            .load_balancer_descriptions
            .into_iter()
            .next()
            .map(wire::LoadBalancer::into_load_balancer)
            .ok_or_else(|| Error::NotFound {
                resource: format!("load balancer {name}"),
            })
    }

    fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>> {
        let response: wire::DescribeLoadBalancers =
            self.query("elb", "describe-load-balancers", &Args::new())?;
        Ok(response
            .load_balancer_descriptions
            .into_iter()
            .map(wire::LoadBalancer::into_load_balancer)
            .collect())
    }

    fn instance_health(
        &self,
        load_balancer: &str,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceHealth>> {
        let mut args = Args::new().opt("--load-balancer-name", load_balancer);
        if !instance_ids.is_empty() {
            let instances: Vec<_> = instance_ids
                .iter()
                .map(|id| json!({ "InstanceId": id }))
                .collect();
            args = args.json("--instances", &instances)?;
        }
        let response: wire::DescribeInstanceHealth =
            self.query("elb", "describe-instance-health", &args)?;
        Ok(response
            .instance_states
            .into_iter()
            .map(wire::InstanceState::into_health)
            .collect())
    }

    fn register_instances(&self, load_balancer: &str, instance_ids: &[String]) -> Result<()> {
        let args = Args::new()
            .opt("--load-balancer-name", load_balancer)
            .list("--instances", instance_ids);
        self.mutate("elb", "register-instances-with-load-balancer", &args)?;
        Ok(())
    }

    fn deregister_instances(&self, load_balancer: &str, instance_ids: &[String]) -> Result<()> {
        let args = Args::new()
            .opt("--load-balancer-name", load_balancer)
            .list("--instances", instance_ids);
        self.mutate("elb", "deregister-instances-from-load-balancer", &args)?;
        Ok(())
    }
}

// =============================================================================
// Alarms and notifications
// =============================================================================

impl AlarmService for AwsCliBackend {
    fn put_metric_alarm(&self, alarm: &MetricAlarmSpec) -> Result<()> {
        let dimensions: Vec<_> = alarm
            .dimensions
            .iter()
            .map(|(k, v)| json!({ "Name": k, "Value": v }))
            .collect();
        let mut args = Args::new()
            .opt("--alarm-name", &alarm.name)
            .opt("--metric-name", &alarm.metric_name)
            .opt("--namespace", &alarm.namespace)
            .opt("--statistic", &alarm.statistic)
            .opt("--comparison-operator", &alarm.comparison_operator)
            .opt("--threshold", alarm.threshold)
            .opt("--period", alarm.period)
            .opt("--evaluation-periods", alarm.evaluation_periods)
            .opt_if("--unit", alarm.unit.as_ref())
            .opt_if("--alarm-description", alarm.description.as_ref())
            .list("--alarm-actions", &alarm.alarm_actions)
            .list("--ok-actions", &alarm.ok_actions)
            .list(
                "--insufficient-data-actions",
                &alarm.insufficient_data_actions,
            );
        if !dimensions.is_empty() {
            args = args.json("--dimensions", &dimensions)?;
        }
        self.mutate("cloudwatch", "put-metric-alarm", &args)?;
        Ok(())
    }
}

impl NotificationService for AwsCliBackend {
    fn publish(
        &self,
        topic_arn: &str,
        message: &str,
        subject: Option<&str>,
        message_structure: Option<&str>,
    ) -> Result<()> {
        let args = Args::new()
            .opt("--topic-arn", topic_arn)
            .opt("--message", message)
            .opt_if("--subject", subject)
            .opt_if("--message-structure", message_structure);
        self.mutate("sns", "publish", &args)?;
        Ok(())
    }
}

// =============================================================================
// Response shapes
// =============================================================================

mod wire {
    use super::parse_timestamp;
    use crate::types;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Tag {
        pub key: String,
        #[serde(default)]
        pub value: String,
    }

    fn into_tags(tags: Vec<Tag>) -> types::Tags {
        tags.into_iter().map(|t| (t.key, t.value)).collect()
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct RunInstances {
        #[serde(default)]
        pub instances: Vec<Instance>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DescribeInstances {
        #[serde(default)]
        pub reservations: Vec<Reservation>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Reservation {
        #[serde(default)]
        pub instances: Vec<Instance>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct StateName {
        pub name: String,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Placement {
        pub availability_zone: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Instance {
        pub instance_id: String,
        #[serde(default)]
        pub image_id: String,
        #[serde(default)]
        pub instance_type: String,
        pub state: StateName,
        pub public_dns_name: Option<String>,
        pub private_ip_address: Option<String>,
        #[serde(default)]
        pub placement: Placement,
        pub launch_time: Option<String>,
        #[serde(default)]
        pub tags: Vec<Tag>,
    }

    impl Instance {
        pub fn into_instance(self) -> types::Instance {
            types::Instance {
                id: self.instance_id,
                state: types::InstanceState::from_provider(&self.state.name),
                image_id: self.image_id,
                instance_type: self.instance_type,
                public_dns_name: self.public_dns_name,
                private_ip_address: self.private_ip_address,
                availability_zone: self.placement.availability_zone,
                launch_time: parse_timestamp(self.launch_time.as_deref()),
                tags: into_tags(self.tags),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct CreateImage {
        pub image_id: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DescribeImages {
        #[serde(default)]
        pub images: Vec<Image>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct StateReason {
        pub message: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Ebs {
        pub snapshot_id: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct BlockDeviceMapping {
        pub ebs: Option<Ebs>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Image {
        pub image_id: String,
        #[serde(default)]
        pub name: String,
        pub state: String,
        pub state_reason: Option<StateReason>,
        pub creation_date: Option<String>,
        #[serde(default)]
        pub block_device_mappings: Vec<BlockDeviceMapping>,
        #[serde(default)]
        pub tags: Vec<Tag>,
    }

    impl Image {
        pub fn into_image(self) -> types::Image {
            types::Image {
                id: self.image_id,
                name: self.name,
                state: types::ImageState::from_provider(&self.state),
                state_reason: self.state_reason.and_then(|r| r.message),
                snapshot_ids: self
                    .block_device_mappings
                    .into_iter()
                    .filter_map(|m| m.ebs.and_then(|e| e.snapshot_id))
                    .collect(),
                creation_date: self.creation_date,
                tags: into_tags(self.tags),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DescribeGroups {
        #[serde(default)]
        pub auto_scaling_groups: Vec<Group>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct GroupInstance {
        pub instance_id: String,
        #[serde(default)]
        pub availability_zone: String,
        #[serde(default)]
        pub lifecycle_state: String,
        #[serde(default)]
        pub health_status: String,
        pub launch_configuration_name: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct GroupTag {
        pub key: String,
        #[serde(default)]
        pub value: String,
        #[serde(default)]
        pub propagate_at_launch: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct SuspendedProcess {
        pub process_name: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Group {
        pub auto_scaling_group_name: String,
        pub launch_configuration_name: Option<String>,
        #[serde(default)]
        pub availability_zones: Vec<String>,
        pub min_size: u32,
        pub max_size: u32,
        pub desired_capacity: u32,
        pub default_cooldown: Option<u32>,
        pub health_check_type: Option<String>,
        pub health_check_grace_period: Option<u32>,
        #[serde(default)]
        pub load_balancer_names: Vec<String>,
        #[serde(default)]
        pub termination_policies: Vec<String>,
        #[serde(rename = "VPCZoneIdentifier")]
        pub vpc_zone_identifier: Option<String>,
        #[serde(default)]
        pub tags: Vec<GroupTag>,
        #[serde(default)]
        pub instances: Vec<GroupInstance>,
        #[serde(default)]
        pub suspended_processes: Vec<SuspendedProcess>,
        pub created_time: Option<String>,
    }

    impl Group {
        pub fn into_group(self) -> types::AutoScalingGroup {
            types::AutoScalingGroup {
                name: self.auto_scaling_group_name,
                launch_configuration_name: self.launch_configuration_name,
                availability_zones: self.availability_zones,
                min_size: self.min_size,
                max_size: self.max_size,
                desired_capacity: self.desired_capacity,
                default_cooldown: self.default_cooldown,
                health_check_type: self.health_check_type,
                health_check_grace_period: self.health_check_grace_period,
                load_balancer_names: self.load_balancer_names,
                termination_policies: self.termination_policies,
                vpc_zone_identifier: self.vpc_zone_identifier.filter(|v| !v.is_empty()),
                tags: self
                    .tags
                    .into_iter()
                    .map(|t| types::GroupTag {
                        key: t.key,
                        value: t.value,
                        propagate_at_launch: t.propagate_at_launch,
                    })
                    .collect(),
                instances: self
                    .instances
                    .into_iter()
                    .map(|i| types::GroupInstance {
                        instance_id: i.instance_id,
                        availability_zone: i.availability_zone,
                        lifecycle_state: i.lifecycle_state,
                        health_status: i.health_status,
                        launch_configuration_name: i.launch_configuration_name,
                    })
                    .collect(),
                suspended_processes: self
                    .suspended_processes
                    .into_iter()
                    .map(|p| p.process_name)
                    .collect(),
                created_time: parse_timestamp(self.created_time.as_deref()),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DescribeActivities {
        #[serde(default)]
        pub activities: Vec<Activity>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct Activity {
        pub activity_id: String,
        #[serde(default)]
        pub description: String,
        #[serde(default)]
        pub cause: String,
        #[serde(default)]
        pub status_code: String,
        pub start_time: Option<String>,
        pub end_time: Option<String>,
        #[serde(default)]
        pub progress: u32,
    }

    impl Activity {
        pub fn into_activity(self) -> types::ScalingActivity {
            types::ScalingActivity {
                activity_id: self.activity_id,
                description: self.description,
                cause: self.cause,
                status_code: self.status_code,
                start_time: parse_timestamp(self.start_time.as_deref()),
                end_time: parse_timestamp(self.end_time.as_deref()),
                progress: self.progress,
            }
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DescribeLaunchConfigurations {
        #[serde(default)]
        pub launch_configurations: Vec<LaunchConfiguration>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct InstanceMonitoring {
        #[serde(default)]
        pub enabled: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct LaunchConfiguration {
        pub launch_configuration_name: String,
        #[serde(default)]
        pub image_id: String,
        #[serde(default)]
        pub instance_type: String,
        pub key_name: Option<String>,
        #[serde(default)]
        pub security_groups: Vec<String>,
        pub user_data: Option<String>,
        #[serde(default)]
        pub instance_monitoring: InstanceMonitoring,
        pub iam_instance_profile: Option<String>,
        pub spot_price: Option<String>,
        pub associate_public_ip_address: Option<bool>,
        pub created_time: Option<String>,
    }

    impl LaunchConfiguration {
        pub fn into_launch_configuration(self) -> types::LaunchConfiguration {
            types::LaunchConfiguration {
                name: self.launch_configuration_name,
                image_id: self.image_id,
                instance_type: self.instance_type,
                key_name: self.key_name.filter(|k| !k.is_empty()),
                security_groups: self.security_groups,
                user_data: self.user_data.filter(|u| !u.is_empty()),
                instance_monitoring: self.instance_monitoring.enabled,
                iam_instance_profile: self.iam_instance_profile,
                spot_price: self.spot_price,
                associate_public_ip_address: self.associate_public_ip_address,
                created_time: parse_timestamp(self.created_time.as_deref()),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct PutScalingPolicy {
        #[serde(rename = "PolicyARN")]
        pub policy_arn: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DescribeLoadBalancers {
        #[serde(default)]
        pub load_balancer_descriptions: Vec<LoadBalancer>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct LoadBalancerInstance {
        pub instance_id: String,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct HealthCheck {
        #[serde(default)]
        pub interval: u32,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct LoadBalancer {
        pub load_balancer_name: String,
        #[serde(rename = "DNSName", default)]
        pub dns_name: String,
        #[serde(default)]
        pub instances: Vec<LoadBalancerInstance>,
        #[serde(default)]
        pub health_check: HealthCheck,
    }

    impl LoadBalancer {
        pub fn into_load_balancer(self) -> types::LoadBalancer {
            types::LoadBalancer {
                name: self.load_balancer_name,
                dns_name: self.dns_name,
                instance_ids: self.instances.into_iter().map(|i| i.instance_id).collect(),
                health_check_interval: self.health_check.interval,
            }
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DescribeInstanceHealth {
        #[serde(default)]
        pub instance_states: Vec<InstanceState>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct InstanceState {
        pub instance_id: String,
        pub state: String,
        pub reason_code: Option<String>,
        pub description: Option<String>,
    }

    impl InstanceState {
        pub fn into_health(self) -> types::InstanceHealth {
            types::InstanceHealth {
                instance_id: self.instance_id,
                state: types::HealthState::from_provider(&self.state),
                reason_code: self.reason_code.filter(|r| r != "N/A"),
                description: self.description.filter(|d| d != "N/A"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthState, ImageState, InstanceState};

    #[test]
    fn test_args_builder() {
        let args = Args::new()
            .opt("--name", "web")
            .opt_if("--cooldown", Some(300))
            .opt_if::<String>("--missing", None)
            .list("--zones", &["a".to_string(), "b".to_string()])
            .list("--empty", &[])
            .flag("--reboot");
        assert_eq!(
            args.0,
            vec!["--name", "web", "--cooldown", "300", "--zones", "a", "b", "--reboot"]
        );
    }

    #[test]
    fn test_parse_describe_instances() {
        let body = r#"{
            "Reservations": [{
                "Instances": [{
                    "InstanceId": "i-0abc",
                    "ImageId": "ami-1",
                    "InstanceType": "t3.micro",
                    "State": {"Code": 16, "Name": "running"},
                    "PublicDnsName": "ec2-1-2-3-4.compute.amazonaws.com",
                    "PrivateIpAddress": "10.0.0.1",
                    "Placement": {"AvailabilityZone": "eu-west-1a"},
                    "LaunchTime": "2024-01-15T10:00:00+00:00",
                    "Tags": [{"Key": "forseti:application", "Value": "web"}]
                }]
            }]
        }"#;
        let response: wire::DescribeInstances = parse("describe-instances", body).unwrap();
        let instance = response.reservations[0].instances.first().unwrap();
        assert_eq!(instance.instance_id, "i-0abc");

        let instance = response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(wire::Instance::into_instance)
            .next()
            .unwrap();
        assert_eq!(instance.state, InstanceState::Running);
        assert_eq!(instance.availability_zone.as_deref(), Some("eu-west-1a"));
        assert_eq!(instance.tag("forseti:application"), Some("web"));
        assert!(instance.launch_time.is_some());
    }

    #[test]
    fn test_parse_group() {
        let body = r#"{
            "AutoScalingGroups": [{
                "AutoScalingGroupName": "web",
                "LaunchConfigurationName": "web-2024-01-15-2",
                "MinSize": 1, "MaxSize": 6, "DesiredCapacity": 3,
                "DefaultCooldown": 300,
                "AvailabilityZones": ["eu-west-1a"],
                "LoadBalancerNames": ["web-lb"],
                "HealthCheckType": "ELB",
                "HealthCheckGracePeriod": 300,
                "Instances": [{
                    "InstanceId": "i-1", "AvailabilityZone": "eu-west-1a",
                    "LifecycleState": "InService", "HealthStatus": "Healthy",
                    "LaunchConfigurationName": "web-2024-01-15-2"
                }],
                "SuspendedProcesses": [{"ProcessName": "Launch", "SuspensionReason": "User suspended"}],
                "VPCZoneIdentifier": "",
                "Tags": [{"Key": "Name", "Value": "web", "PropagateAtLaunch": true}],
                "TerminationPolicies": ["Default"],
                "CreatedTime": "2024-01-01T00:00:00.000Z"
            }]
        }"#;
        let response: wire::DescribeGroups = parse("describe-auto-scaling-groups", body).unwrap();
        let group = response
            .auto_scaling_groups
            .into_iter()
            .next()
            .unwrap()
            .into_group();
        assert_eq!(group.desired_capacity, 3);
        assert_eq!(group.suspended_processes, vec!["Launch"]);
        assert_eq!(group.vpc_zone_identifier, None);
        assert_eq!(group.tag("Name"), Some("web"));
        assert!(group.created_time.is_some());
    }

    #[test]
    fn test_parse_image_snapshots() {
        let body = r#"{"Images": [{
            "ImageId": "ami-1", "Name": "web-ami-2024-01-15-1", "State": "available",
            "BlockDeviceMappings": [
                {"DeviceName": "/dev/xvda", "Ebs": {"SnapshotId": "snap-1"}},
                {"DeviceName": "/dev/sdb", "VirtualName": "ephemeral0"}
            ]
        }]}"#;
        let response: wire::DescribeImages = parse("describe-images", body).unwrap();
        let image = response.images.into_iter().next().unwrap().into_image();
        assert_eq!(image.state, ImageState::Available);
        assert_eq!(image.snapshot_ids, vec!["snap-1"]);
    }

    #[test]
    fn test_parse_instance_health() {
        let body = r#"{"InstanceStates": [
            {"InstanceId": "i-1", "State": "InService", "ReasonCode": "N/A", "Description": "N/A"},
            {"InstanceId": "i-2", "State": "OutOfService", "ReasonCode": "Instance",
             "Description": "Instance has failed at least the UnhealthyThreshold number of health checks consecutively."}
        ]}"#;
        let response: wire::DescribeInstanceHealth =
            parse("describe-instance-health", body).unwrap();
        let health: Vec<_> = response
            .instance_states
            .into_iter()
            .map(wire::InstanceState::into_health)
            .collect();
        assert_eq!(health[0].state, HealthState::InService);
        assert_eq!(health[0].reason_code, None);
        assert_eq!(health[1].state, HealthState::OutOfService);
        assert_eq!(health[1].reason_code.as_deref(), Some("Instance"));
    }

    #[test]
    fn test_parse_empty_output() {
        let response: wire::DescribeLaunchConfigurations =
            parse("describe-launch-configurations", "").unwrap();
        assert!(response.launch_configurations.is_empty());
    }

    #[test]
    fn test_parse_malformed_output() {
        let result: Result<wire::CreateImage> = parse("create-image", "not json");
        assert!(matches!(result, Err(Error::Response { .. })));
    }
}
