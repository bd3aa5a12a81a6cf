#![allow(dead_code)]

use awskit::{GroupSpec, LaunchConfiguration, MockCloud, RetryConfig, Tags};
use rollout::application::SshLogin;
use rollout::hooks::{CommandRunner, ReachabilityProbe};
use rollout::{
    Application, ApplicationRegistry, CancelToken, ConfigRegistry, ForsetiConfig, Orchestrator,
    Poller, Timeouts,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CONFIG: &str = r#"
[applications.web]
autoscale_group = "web"
deployment_strategy = "deploy_and_snapshot"
scaling_policies = ["web-scale-up"]
sns_notification_arn = "arn:aws:sns:mock:1:deploys"

[applications.web.deploy]
command = "deploy --hosts {dns_name}"

[applications.web.maintenance_on]
command = "maintenance on {dns_name}"

[applications.web.maintenance_off]
command = "maintenance off {dns_name}"

[applications.worker]
autoscale_group = "worker"
deployment_strategy = "golden_instance"

[applications.worker.gold]
image_id = "ami-replaced-by-tests"
instance_type = "t3.micro"

[applications.worker.gold.provision]
command = "provision {dns_name}"
username = "ubuntu"

[autoscale.groups.web]
availability_zones = ["mock-1a"]
min_size = 1
max_size = 6
desired_capacity = 3
load_balancers = ["web-lb"]

[autoscale.groups.worker]
availability_zones = ["mock-1a"]
min_size = 1
max_size = 6
desired_capacity = 3
load_balancers = ["worker-lb"]

[autoscale.configs.web]
instance_type = "t3.small"

[autoscale.configs.worker]
instance_type = "t3.micro"

[autoscale.policies.web-scale-up]
adjustment_type = "ChangeInCapacity"
scaling_adjustment = 1
cooldown = 300

[autoscale.alarms.web-cpu-high]
metric = "CPUUtilization"
statistic = "Average"
comparison = ">="
threshold = 70.0
period = 60
evaluation_periods = 2
alarm_actions = "web-scale-up"
"#;

/// Runner that records commands instead of running them.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    status: i32,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn exiting(status: i32) -> Arc<Self> {
        Arc::new(Self {
            status,
            ..Default::default()
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &str, _working_directory: &Path) -> rollout::Result<i32> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(self.status)
    }
}

pub struct Reachable;

impl ReachabilityProbe for Reachable {
    fn is_reachable(&self, _address: &str, _login: &SshLogin) -> bool {
        true
    }
}

pub fn registry() -> ConfigRegistry {
    ConfigRegistry::new(ForsetiConfig::from_toml_str(CONFIG).unwrap())
}

pub fn web() -> Application {
    registry().application("web").unwrap()
}

/// The golden instance application, building from a base image in `mock`.
pub fn worker(mock: &MockCloud) -> Application {
    let base = mock.add_image("ubuntu-base", Tags::new());
    let mut application = registry().application("worker").unwrap();
    if let Some(golden) = application.golden.as_mut() {
        golden.instance.image_id = base;
    }
    application
}

/// A converged group `name` of `size` instances behind `<name>-lb`, on
/// launch configuration `<name>-2024-01-01-1`. Returns the member ids.
pub fn seed_group(mock: &MockCloud, name: &str, size: u32) -> Vec<String> {
    let lb = format!("{name}-lb");
    mock.add_load_balancer(&lb, 0);
    let image = mock.add_image(&format!("{name}-seed"), Tags::new());
    let launch_configuration = format!("{name}-2024-01-01-1");
    mock.add_launch_configuration(LaunchConfiguration {
        name: launch_configuration.clone(),
        image_id: image,
        instance_type: "t3.small".to_string(),
        ..Default::default()
    });
    mock.seed_group(&GroupSpec {
        name: name.to_string(),
        launch_configuration_name: launch_configuration,
        availability_zones: vec!["mock-1a".to_string()],
        min_size: 1,
        max_size: 6,
        desired_capacity: size,
        load_balancer_names: vec![lb],
        ..Default::default()
    })
}

pub fn poller(cancel: CancelToken) -> Poller {
    Poller::new(Duration::ZERO, Timeouts::uniform(Duration::from_secs(5)), cancel)
}

pub fn orchestrator(mock: &MockCloud, runner: Arc<RecordingRunner>) -> Orchestrator {
    orchestrator_with(mock, runner, CancelToken::new())
}

pub fn orchestrator_with(
    mock: &MockCloud,
    runner: Arc<RecordingRunner>,
    cancel: CancelToken,
) -> Orchestrator {
    Orchestrator::new(mock.clients(), runner, Arc::new(Reachable), poller(cancel))
        .with_retry(RetryConfig::new(3, Duration::ZERO, 1.0))
}
