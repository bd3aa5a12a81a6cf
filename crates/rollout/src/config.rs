//! Configuration file and application registry.
//!
//! The document has two halves: `applications`, describing how each
//! application deploys, and `autoscale`, holding group, launch configuration,
//! policy and alarm definitions referenced by name. A group and its launch
//! configuration template share the same name.
//!
//! ```toml
//! [applications.web]
//! autoscale_group = "web"
//! deployment_strategy = "deploy_and_snapshot"
//! scaling_policies = ["web-scale-up"]
//!
//! [applications.web.deploy]
//! command = "fab -H {dns_name} deploy"
//! working_directory = "~/src/web"
//!
//! [autoscale.groups.web]
//! availability_zones = ["eu-west-1a", "eu-west-1b"]
//! min_size = 2
//! max_size = 6
//! load_balancers = ["web-lb"]
//!
//! [autoscale.configs.web]
//! instance_type = "t3.small"
//! security_groups = ["web"]
//!
//! [autoscale.policies.web-scale-up]
//! adjustment_type = "ChangeInCapacity"
//! scaling_adjustment = 1
//! ```
//!
//! Files ending in `.json` are read as JSON, everything else as TOML.

use crate::application::{
    AlarmConfig, Application, GoldenConfig, GroupConfig, HookCommand, Hooks, LaunchTemplate,
    PolicyConfig, SshLogin, Strategy, comparison_operator,
};
use crate::error::{ConfigErrorKind, Error, Result};
use crate::poll::Timeouts;
use awskit::{InstanceSpec, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// File schema
// ============================================================================

/// The whole configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForsetiConfig {
    /// Engine tunables
    #[serde(default)]
    pub settings: Settings,
    /// Applications by name
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationEntry>,
    /// Autoscale definitions
    #[serde(default)]
    pub autoscale: AutoscaleSection,
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between polls
    pub poll_interval_secs: u64,
    /// Instance boot and SSH deadline
    pub instance_timeout_secs: u64,
    /// Image bake deadline
    pub image_timeout_secs: u64,
    /// Group convergence deadline
    pub group_timeout_secs: u64,
    /// Load balancer health deadline
    pub load_balancer_timeout_secs: u64,
    /// Attempts for transient provider errors
    pub retry_attempts: u32,
    /// First backoff delay in seconds
    pub retry_base_delay_secs: u64,
    /// Directory holding per-application lock files
    pub lock_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            poll_interval_secs: 1,
            instance_timeout_secs: timeouts.instance.as_secs(),
            image_timeout_secs: timeouts.image.as_secs(),
            group_timeout_secs: timeouts.group.as_secs(),
            load_balancer_timeout_secs: timeouts.load_balancer.as_secs(),
            retry_attempts: RetryConfig::default().max_attempts,
            retry_base_delay_secs: RetryConfig::default().base_delay.as_secs(),
            lock_dir: None,
        }
    }
}

impl Settings {
    /// Interval between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Deadlines per wait kind.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            instance: Duration::from_secs(self.instance_timeout_secs),
            image: Duration::from_secs(self.image_timeout_secs),
            group: Duration::from_secs(self.group_timeout_secs),
            load_balancer: Duration::from_secs(self.load_balancer_timeout_secs),
        }
    }

    /// Backoff for transient provider errors.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry_attempts.max(1),
            Duration::from_secs(self.retry_base_delay_secs),
            2.0,
        )
    }

    /// Directory for lock files, `~` expanded.
    pub fn lock_dir(&self) -> PathBuf {
        match &self.lock_dir {
            Some(dir) => expand(dir),
            None => dirs::runtime_dir()
                .or_else(dirs::cache_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join("forseti")
                .join("locks"),
        }
    }
}

/// One entry under `applications`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationEntry {
    /// Name of the group (and launch configuration template)
    pub autoscale_group: String,
    /// `golden_instance` or `deploy_and_snapshot`
    pub deployment_strategy: String,
    /// Policies attached on every deployment
    #[serde(default)]
    pub scaling_policies: Vec<String>,
    /// Topic for group events and deployment messages
    #[serde(default)]
    pub sns_notification_arn: Option<String>,
    /// Golden instance settings
    #[serde(default)]
    pub gold: Option<GoldEntry>,
    /// Deploy hook
    #[serde(default)]
    pub deploy: Option<HookEntry>,
    /// Maintenance-on hook
    #[serde(default)]
    pub maintenance_on: Option<HookEntry>,
    /// Maintenance-off hook
    #[serde(default)]
    pub maintenance_off: Option<HookEntry>,
}

/// A hook command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookEntry {
    /// Command template
    pub command: String,
    /// Working directory, `~` allowed
    #[serde(default = "current_dir")]
    pub working_directory: String,
}

fn current_dir() -> String {
    ".".to_string()
}

/// Golden instance launch parameters plus its provision hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoldEntry {
    /// Base image
    pub image_id: String,
    /// Instance type
    pub instance_type: String,
    /// Key pair
    #[serde(default)]
    pub key_name: Option<String>,
    /// Security groups
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// User data
    #[serde(default)]
    pub user_data: Option<String>,
    /// Availability zone
    #[serde(default)]
    pub placement: Option<String>,
    /// Subnet
    #[serde(default)]
    pub subnet_id: Option<String>,
    /// Instance profile
    #[serde(default, alias = "instance_profile_name")]
    pub iam_instance_profile: Option<String>,
    /// Provision hook and login
    pub provision: ProvisionEntry,
}

/// Provision hook of a golden instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionEntry {
    /// Command template
    pub command: String,
    /// Working directory
    #[serde(default = "current_dir")]
    pub working_directory: String,
    /// SSH user
    pub username: String,
    /// SSH private key
    #[serde(default)]
    pub key_filename: Option<String>,
}

/// The `autoscale` half of the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscaleSection {
    /// Groups by name
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
    /// Launch configuration templates by group name
    #[serde(default)]
    pub configs: BTreeMap<String, LaunchConfigEntry>,
    /// Scaling policies by name
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyEntry>,
    /// Alarms by name
    #[serde(default)]
    pub alarms: BTreeMap<String, AlarmEntry>,
}

/// Group definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Availability zones
    #[serde(default)]
    pub availability_zones: Vec<String>,
    /// Minimum size
    pub min_size: u32,
    /// Maximum size
    pub max_size: u32,
    /// Desired capacity
    #[serde(default)]
    pub desired_capacity: Option<u32>,
    /// Classic load balancers
    #[serde(default)]
    pub load_balancers: Vec<String>,
    /// Cooldown in seconds
    #[serde(default)]
    pub default_cooldown: Option<u32>,
    /// `EC2` or `ELB`
    #[serde(default)]
    pub health_check_type: Option<String>,
    /// Grace period in seconds
    #[serde(default, alias = "health_check_period")]
    pub health_check_grace_period: Option<u32>,
    /// Termination policies
    #[serde(default)]
    pub termination_policies: Vec<String>,
    /// Comma-separated subnet ids
    #[serde(default)]
    pub vpc_zone_identifier: Option<String>,
}

/// Launch configuration template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfigEntry {
    /// Instance type
    pub instance_type: String,
    /// Key pair
    #[serde(default)]
    pub key_name: Option<String>,
    /// Security groups
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// User data
    #[serde(default)]
    pub user_data: Option<String>,
    /// Detailed monitoring
    #[serde(default = "enabled")]
    pub instance_monitoring: bool,
    /// Instance profile
    #[serde(default, alias = "instance_profile_name")]
    pub iam_instance_profile: Option<String>,
    /// Spot bid price
    #[serde(default)]
    pub spot_price: Option<String>,
    /// Public address
    #[serde(default)]
    pub associate_public_ip_address: Option<bool>,
}

fn enabled() -> bool {
    true
}

/// Scaling policy definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Adjustment type
    pub adjustment_type: String,
    /// Adjustment amount
    pub scaling_adjustment: i32,
    /// Cooldown in seconds
    #[serde(default)]
    pub cooldown: Option<u32>,
    /// Minimum step
    #[serde(default)]
    pub min_adjustment_step: Option<i32>,
}

/// Alarm definition. `alarm_actions` names a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEntry {
    /// Metric name
    #[serde(alias = "metric")]
    pub metric_name: String,
    /// Namespace
    #[serde(default = "ec2_namespace")]
    pub namespace: String,
    /// Statistic
    pub statistic: String,
    /// `>=`, `>`, `<`, `<=` or a full operator name
    #[serde(alias = "comparison")]
    pub comparison_operator: String,
    /// Threshold
    pub threshold: f64,
    /// Period in seconds
    pub period: u32,
    /// Periods to evaluate
    pub evaluation_periods: u32,
    /// Unit
    #[serde(default)]
    pub unit: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Dimensions
    #[serde(default)]
    pub dimensions: Option<BTreeMap<String, String>>,
    /// Policy fired on ALARM
    pub alarm_actions: String,
}

fn ec2_namespace() -> String {
    "AWS/EC2".to_string()
}

// ============================================================================
// Loading
// ============================================================================

impl ForsetiConfig {
    /// Load a configuration file, choosing the format by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| parse_error(e.message()))
    }

    /// Parse a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| parse_error(&e.to_string()))
    }
}

fn parse_error(message: &str) -> Error {
    let kind = if message.contains("missing field") {
        ConfigErrorKind::MissingKey
    } else if message.contains("invalid type") || message.contains("invalid value") {
        ConfigErrorKind::WrongType
    } else {
        ConfigErrorKind::Malformed
    };
    Error::configuration(kind, message.trim())
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn missing(key: impl Into<String>) -> Error {
    Error::configuration(ConfigErrorKind::MissingKey, key)
}

// ============================================================================
// Registry
// ============================================================================

/// Resolves application names to their deployment configuration.
pub trait ApplicationRegistry {
    /// Fully resolved configuration of `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the application is unknown or its
    /// entry references something that is not defined.
    fn application(&self, name: &str) -> Result<Application>;

    /// Names of every configured application.
    fn application_names(&self) -> Vec<String>;
}

/// Registry backed by a loaded [`ForsetiConfig`].
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    config: ForsetiConfig,
}

impl ConfigRegistry {
    /// Wrap a loaded configuration.
    pub fn new(config: ForsetiConfig) -> Self {
        Self { config }
    }

    /// Engine tunables.
    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    fn group(&self, name: &str) -> Result<GroupConfig> {
        let entry = self
            .config
            .autoscale
            .groups
            .get(name)
            .ok_or_else(|| missing(format!("autoscale.groups.{name}")))?;
        Ok(GroupConfig {
            name: name.to_string(),
            availability_zones: entry.availability_zones.clone(),
            min_size: entry.min_size,
            max_size: entry.max_size,
            desired_capacity: entry.desired_capacity,
            default_cooldown: entry.default_cooldown,
            health_check_type: entry.health_check_type.clone(),
            health_check_grace_period: entry.health_check_grace_period,
            load_balancers: entry.load_balancers.clone(),
            termination_policies: entry.termination_policies.clone(),
            vpc_zone_identifier: entry.vpc_zone_identifier.clone(),
        })
    }

    fn launch_template(&self, group: &str) -> Result<LaunchTemplate> {
        let entry = self
            .config
            .autoscale
            .configs
            .get(group)
            .ok_or_else(|| missing(format!("autoscale.configs.{group}")))?;
        Ok(LaunchTemplate {
            instance_type: entry.instance_type.clone(),
            key_name: entry.key_name.clone(),
            security_groups: entry.security_groups.clone(),
            user_data: entry.user_data.clone(),
            instance_monitoring: entry.instance_monitoring,
            iam_instance_profile: entry.iam_instance_profile.clone(),
            spot_price: entry.spot_price.clone(),
            associate_public_ip_address: entry.associate_public_ip_address,
        })
    }

    fn policies(&self, names: &[String]) -> Result<Vec<PolicyConfig>> {
        names
            .iter()
            .map(|name| {
                let entry = self
                    .config
                    .autoscale
                    .policies
                    .get(name)
                    .ok_or_else(|| missing(format!("autoscale.policies.{name}")))?;
                Ok(PolicyConfig {
                    name: name.clone(),
                    adjustment_type: entry.adjustment_type.clone(),
                    scaling_adjustment: entry.scaling_adjustment,
                    cooldown: entry.cooldown,
                    min_adjustment_step: entry.min_adjustment_step,
                })
            })
            .collect()
    }

    /// Alarms whose policy belongs to the application.
    fn alarms(&self, policies: &[String]) -> Result<Vec<AlarmConfig>> {
        self.config
            .autoscale
            .alarms
            .iter()
            .filter(|(_, entry)| policies.contains(&entry.alarm_actions))
            .map(|(name, entry)| {
                Ok(AlarmConfig {
                    name: name.clone(),
                    metric_name: entry.metric_name.clone(),
                    namespace: entry.namespace.clone(),
                    statistic: entry.statistic.clone(),
                    comparison_operator: comparison_operator(&entry.comparison_operator)
                        .map_err(|_| {
                            Error::configuration(
                                ConfigErrorKind::WrongType,
                                format!(
                                    "autoscale.alarms.{name}.comparison_operator: `{}`",
                                    entry.comparison_operator
                                ),
                            )
                        })?,
                    threshold: entry.threshold,
                    period: entry.period,
                    evaluation_periods: entry.evaluation_periods,
                    unit: entry.unit.clone(),
                    description: entry.description.clone(),
                    dimensions: entry.dimensions.clone(),
                    policy: entry.alarm_actions.clone(),
                })
            })
            .collect()
    }
}

fn hook(entry: &HookEntry) -> HookCommand {
    HookCommand {
        command: entry.command.clone(),
        working_directory: expand(Path::new(&entry.working_directory)),
    }
}

fn golden(entry: &GoldEntry) -> GoldenConfig {
    GoldenConfig {
        instance: InstanceSpec {
            image_id: entry.image_id.clone(),
            instance_type: entry.instance_type.clone(),
            key_name: entry.key_name.clone(),
            security_groups: entry.security_groups.clone(),
            user_data: entry.user_data.clone(),
            monitoring: false,
            availability_zone: entry.placement.clone(),
            subnet_id: entry.subnet_id.clone(),
            iam_instance_profile: entry.iam_instance_profile.clone(),
        },
        login: SshLogin {
            username: entry.provision.username.clone(),
            key_filename: entry
                .provision
                .key_filename
                .as_deref()
                .map(|k| expand(Path::new(k))),
        },
        provision: HookCommand {
            command: entry.provision.command.clone(),
            working_directory: expand(Path::new(&entry.provision.working_directory)),
        },
    }
}

impl ApplicationRegistry for ConfigRegistry {
    fn application(&self, name: &str) -> Result<Application> {
        let entry = self.config.applications.get(name).ok_or_else(|| {
            Error::configuration(
                ConfigErrorKind::UnknownApplication,
                format!("no application named `{name}`"),
            )
        })?;

        if entry.autoscale_group.is_empty() {
            return Err(missing(format!("applications.{name}.autoscale_group")));
        }
        let strategy: Strategy = entry.deployment_strategy.parse().map_err(|e| match e {
            Error::Configuration { kind, message } => Error::configuration(
                kind,
                format!("applications.{name}.deployment_strategy: {message}"),
            ),
            other => other,
        })?;

        let golden = entry.gold.as_ref().map(golden);
        let hooks = Hooks {
            deploy: entry.deploy.as_ref().map(hook),
            maintenance_on: entry.maintenance_on.as_ref().map(hook),
            maintenance_off: entry.maintenance_off.as_ref().map(hook),
        };
        match strategy {
            Strategy::GoldenInstance if golden.is_none() => {
                return Err(missing(format!("applications.{name}.gold")));
            }
            Strategy::DeployAndSnapshot if hooks.deploy.is_none() => {
                return Err(missing(format!("applications.{name}.deploy")));
            }
            _ => {}
        }

        Ok(Application {
            name: name.to_string(),
            strategy,
            group: self.group(&entry.autoscale_group)?,
            launch_template: self.launch_template(&entry.autoscale_group)?,
            policies: self.policies(&entry.scaling_policies)?,
            alarms: self.alarms(&entry.scaling_policies)?,
            notification_topic: entry.sns_notification_arn.clone(),
            golden,
            hooks,
        })
    }

    fn application_names(&self) -> Vec<String> {
        self.config.applications.keys().cloned().collect()
    }
}
