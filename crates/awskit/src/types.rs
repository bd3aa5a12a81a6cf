//! Core types for provider resources.
//!
//! These are plain snapshots of provider-side records. They carry no
//! behavior beyond small accessors; every state transition is observed by
//! polling the corresponding service again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Resource tags, ordered by key.
pub type Tags = BTreeMap<String, String>;

// =============================================================================
// Instances
// =============================================================================

/// Lifecycle state of an instance, folded into the states the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Booting
    Pending,
    /// Running
    Running,
    /// Shutting down or terminated
    Terminated,
    /// Stopped or otherwise unusable
    Failed,
}

impl InstanceState {
    /// Map a provider state name (`pending`, `running`, `shutting-down`, ...).
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" | "terminated" => Self::Terminated,
            _ => Self::Failed,
        }
    }

    /// Whether the instance can still become or stay usable.
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider instance id
    pub id: String,
    /// Current state
    pub state: InstanceState,
    /// Image the instance was launched from
    pub image_id: String,
    /// Instance type
    pub instance_type: String,
    /// Public DNS name, if assigned
    pub public_dns_name: Option<String>,
    /// Private IP address, if assigned
    pub private_ip_address: Option<String>,
    /// Availability zone
    pub availability_zone: Option<String>,
    /// Launch time
    pub launch_time: Option<DateTime<Utc>>,
    /// Tags
    pub tags: Tags,
}

impl Instance {
    /// Whether the instance carries a tag with this key.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Value of a tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Address hooks should connect to: public DNS name, falling back to the private IP.
    pub fn address(&self) -> Option<&str> {
        self.public_dns_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.private_ip_address.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Parameters for launching a standalone instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Image to boot
    pub image_id: String,
    /// Instance type
    pub instance_type: String,
    /// SSH key pair name
    pub key_name: Option<String>,
    /// Security group names or ids
    pub security_groups: Vec<String>,
    /// User data script
    pub user_data: Option<String>,
    /// Detailed monitoring
    pub monitoring: bool,
    /// Placement zone
    pub availability_zone: Option<String>,
    /// Subnet for VPC launches
    pub subnet_id: Option<String>,
    /// Instance profile name
    pub iam_instance_profile: Option<String>,
}

// =============================================================================
// Images
// =============================================================================

/// Lifecycle state of a machine image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    /// Still baking
    Pending,
    /// Ready to launch from
    Available,
    /// Failed, invalid or deregistered
    Failed,
}

impl ImageState {
    /// Map a provider state name.
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "available" => Self::Available,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A machine image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Provider image id
    pub id: String,
    /// Image name
    pub name: String,
    /// Current state
    pub state: ImageState,
    /// Provider explanation for a failed state
    pub state_reason: Option<String>,
    /// Snapshots backing the image's block devices
    pub snapshot_ids: Vec<String>,
    /// Creation timestamp as reported by the provider
    pub creation_date: Option<String>,
    /// Tags
    pub tags: Tags,
}

// =============================================================================
// Autoscaling
// =============================================================================

/// An immutable launch template for an autoscale group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfiguration {
    /// Configuration name
    pub name: String,
    /// Image instances are launched from
    pub image_id: String,
    /// Instance type
    pub instance_type: String,
    /// SSH key pair name
    pub key_name: Option<String>,
    /// Security group names or ids
    pub security_groups: Vec<String>,
    /// User data script
    pub user_data: Option<String>,
    /// Detailed monitoring
    pub instance_monitoring: bool,
    /// Instance profile name or ARN
    pub iam_instance_profile: Option<String>,
    /// Spot bid price
    pub spot_price: Option<String>,
    /// Whether instances get a public address
    pub associate_public_ip_address: Option<bool>,
    /// Creation time
    pub created_time: Option<DateTime<Utc>>,
}

/// An instance as seen by its autoscale group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInstance {
    /// Instance id
    pub instance_id: String,
    /// Availability zone
    pub availability_zone: String,
    /// Group lifecycle state (`Pending`, `InService`, `Terminating`, ...)
    pub lifecycle_state: String,
    /// Group health status (`Healthy`, `Unhealthy`)
    pub health_status: String,
    /// Launch configuration the instance was started from
    pub launch_configuration_name: Option<String>,
}

/// A tag attached to an autoscale group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
    /// Whether launched instances inherit the tag
    pub propagate_at_launch: bool,
}

impl GroupTag {
    /// Create a tag propagated to launched instances.
    pub fn propagated(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            propagate_at_launch: true,
        }
    }

    /// Create a tag kept on the group only.
    pub fn group_only(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            propagate_at_launch: false,
        }
    }
}

/// Current state of an autoscale group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    /// Group name
    pub name: String,
    /// Launch configuration new instances use
    pub launch_configuration_name: Option<String>,
    /// Availability zones
    pub availability_zones: Vec<String>,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Desired capacity
    pub desired_capacity: u32,
    /// Cooldown between scaling activities, in seconds
    pub default_cooldown: Option<u32>,
    /// `EC2` or `ELB`
    pub health_check_type: Option<String>,
    /// Grace period before health checks start, in seconds
    pub health_check_grace_period: Option<u32>,
    /// Attached classic load balancers
    pub load_balancer_names: Vec<String>,
    /// Termination policies, in evaluation order
    pub termination_policies: Vec<String>,
    /// Comma-separated subnet ids
    pub vpc_zone_identifier: Option<String>,
    /// Tags
    pub tags: Vec<GroupTag>,
    /// Member instances
    pub instances: Vec<GroupInstance>,
    /// Names of suspended scaling processes
    pub suspended_processes: Vec<String>,
    /// Creation time
    pub created_time: Option<DateTime<Utc>>,
}

impl AutoScalingGroup {
    /// Value of a group tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// Ids of all member instances.
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.instance_id.clone()).collect()
    }
}

/// Parameters for creating an autoscale group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Group name
    pub name: String,
    /// Launch configuration
    pub launch_configuration_name: String,
    /// Availability zones
    pub availability_zones: Vec<String>,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Desired capacity
    pub desired_capacity: u32,
    /// Cooldown in seconds
    pub default_cooldown: Option<u32>,
    /// `EC2` or `ELB`
    pub health_check_type: Option<String>,
    /// Grace period in seconds
    pub health_check_grace_period: Option<u32>,
    /// Attached classic load balancers
    pub load_balancer_names: Vec<String>,
    /// Termination policies
    pub termination_policies: Vec<String>,
    /// Comma-separated subnet ids
    pub vpc_zone_identifier: Option<String>,
    /// Initial tags
    pub tags: Vec<GroupTag>,
}

/// In-place update of an autoscale group. `None` leaves a field untouched.
///
/// Load balancers are not part of the update; they are attached and detached
/// separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    /// Launch configuration
    pub launch_configuration_name: Option<String>,
    /// Availability zones
    pub availability_zones: Option<Vec<String>>,
    /// Minimum size
    pub min_size: Option<u32>,
    /// Maximum size
    pub max_size: Option<u32>,
    /// Desired capacity
    pub desired_capacity: Option<u32>,
    /// Cooldown in seconds
    pub default_cooldown: Option<u32>,
    /// `EC2` or `ELB`
    pub health_check_type: Option<String>,
    /// Grace period in seconds
    pub health_check_grace_period: Option<u32>,
    /// Termination policies
    pub termination_policies: Option<Vec<String>>,
    /// Comma-separated subnet ids
    pub vpc_zone_identifier: Option<String>,
}

impl GroupUpdate {
    /// An update that overwrites every configured field of `spec`.
    pub fn overwrite(spec: &GroupSpec) -> Self {
        Self {
            launch_configuration_name: Some(spec.launch_configuration_name.clone()),
            availability_zones: Some(spec.availability_zones.clone()),
            min_size: Some(spec.min_size),
            max_size: Some(spec.max_size),
            desired_capacity: Some(spec.desired_capacity),
            default_cooldown: spec.default_cooldown,
            health_check_type: spec.health_check_type.clone(),
            health_check_grace_period: spec.health_check_grace_period,
            termination_policies: Some(spec.termination_policies.clone()),
            vpc_zone_identifier: spec.vpc_zone_identifier.clone(),
        }
    }

    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A scaling activity reported by the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingActivity {
    /// Activity id
    pub activity_id: String,
    /// Human-readable description
    pub description: String,
    /// Why the activity happened
    pub cause: String,
    /// `Successful`, `InProgress`, `Failed`, ...
    pub status_code: String,
    /// Start time
    pub start_time: Option<DateTime<Utc>>,
    /// End time, absent while in progress
    pub end_time: Option<DateTime<Utc>>,
    /// Progress percentage
    pub progress: u32,
}

/// A simple scaling policy bound to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicySpec {
    /// Policy name
    pub name: String,
    /// Group the policy is bound to
    pub group_name: String,
    /// `ChangeInCapacity`, `ExactCapacity` or `PercentChangeInCapacity`
    pub adjustment_type: String,
    /// Adjustment amount
    pub scaling_adjustment: i32,
    /// Cooldown in seconds
    pub cooldown: Option<u32>,
    /// Minimum adjustment for percentage policies
    pub min_adjustment_step: Option<i32>,
}

/// A metric alarm. `alarm_actions` hold provider ARNs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAlarmSpec {
    /// Alarm name
    pub name: String,
    /// Metric name
    pub metric_name: String,
    /// Metric namespace
    pub namespace: String,
    /// `Average`, `Sum`, ...
    pub statistic: String,
    /// Provider comparison operator name
    pub comparison_operator: String,
    /// Threshold
    pub threshold: f64,
    /// Period in seconds
    pub period: u32,
    /// Number of periods to evaluate
    pub evaluation_periods: u32,
    /// Metric unit
    pub unit: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Metric dimensions
    pub dimensions: BTreeMap<String, String>,
    /// Actions on ALARM
    pub alarm_actions: Vec<String>,
    /// Actions on OK
    pub ok_actions: Vec<String>,
    /// Actions on INSUFFICIENT_DATA
    pub insufficient_data_actions: Vec<String>,
}

/// Instance lifecycle events a group can publish to a topic.
pub mod notification {
    /// Instance launched
    pub const INSTANCE_LAUNCH: &str = "autoscaling:EC2_INSTANCE_LAUNCH";
    /// Instance failed to launch
    pub const INSTANCE_LAUNCH_ERROR: &str = "autoscaling:EC2_INSTANCE_LAUNCH_ERROR";
    /// Instance terminated
    pub const INSTANCE_TERMINATE: &str = "autoscaling:EC2_INSTANCE_TERMINATE";
    /// Instance failed to terminate
    pub const INSTANCE_TERMINATE_ERROR: &str = "autoscaling:EC2_INSTANCE_TERMINATE_ERROR";

    /// All instance lifecycle events.
    pub const ALL_INSTANCE_EVENTS: [&str; 4] = [
        INSTANCE_LAUNCH,
        INSTANCE_LAUNCH_ERROR,
        INSTANCE_TERMINATE,
        INSTANCE_TERMINATE_ERROR,
    ];
}

// =============================================================================
// Load balancers
// =============================================================================

/// Health of an instance as reported by one load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthState {
    /// Receiving traffic
    InService,
    /// Not receiving traffic
    OutOfService,
    /// Unknown state
    Unknown,
}

impl HealthState {
    /// Map a provider state name.
    pub fn from_provider(name: &str) -> Self {
        match name {
            "InService" => Self::InService,
            "OutOfService" => Self::OutOfService,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InService => "InService",
            Self::OutOfService => "OutOfService",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Per-instance health reported by a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    /// Instance id
    pub instance_id: String,
    /// Health state
    pub state: HealthState,
    /// Short reason code
    pub reason_code: Option<String>,
    /// Human-readable description
    pub description: Option<String>,
}

/// A classic load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// Name
    pub name: String,
    /// DNS name
    pub dns_name: String,
    /// Registered instance ids
    pub instance_ids: Vec<String>,
    /// Health check interval in seconds
    pub health_check_interval: u32,
}

// =============================================================================
// Retry
// =============================================================================

/// Configuration for retry behavior on transient provider errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}
