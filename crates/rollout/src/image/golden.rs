use super::{GoldenImage, ImageBuilder, bake_image};
use crate::application::Application;
use crate::error::{ConfigErrorKind, Error, Result};
use crate::hooks::{CommandRunner, ReachabilityProbe};
use crate::naming;
use crate::poll::Poller;
use crate::progress::Progress;
use awskit::retry::{self, LogCallback};
use awskit::{InstanceState, ProviderClients, RetryConfig};
use std::sync::Arc;

/// Builds an image from a dedicated, freshly provisioned instance.
///
/// Stages: launch, wait running, wait for SSH, provision, bake, terminate.
/// The instance is terminated only after a successful bake; on failure it
/// is left running for inspection.
pub struct GoldenInstanceBuilder {
    clients: ProviderClients,
    poller: Poller,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn ReachabilityProbe>,
    progress: Arc<dyn Progress>,
    retry: RetryConfig,
    extra_args: Vec<String>,
}

impl GoldenInstanceBuilder {
    /// Create a builder.
    pub fn new(
        clients: ProviderClients,
        poller: Poller,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn ReachabilityProbe>,
        progress: Arc<dyn Progress>,
    ) -> Self {
        Self {
            clients,
            poller,
            runner,
            probe,
            progress,
            retry: RetryConfig::default(),
            extra_args: Vec::new(),
        }
    }

    /// Backoff for transient provider errors.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Arguments appended to the provision command.
    #[must_use]
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    fn wait_running(&self, instance_id: &str) -> Result<()> {
        let stage = format!("instance {instance_id} to run");
        let waited = self
            .poller
            .wait_for(&stage, self.poller.timeouts.instance, || {
                match self.clients.compute.instance_state(instance_id)? {
                    InstanceState::Running => Ok(Some(())),
                    InstanceState::Pending => Ok(None),
                    state => Err(Error::InstanceLaunchFailed {
                        instance_id: instance_id.to_string(),
                        reason: format!("instance entered state {state}"),
                    }),
                }
            });
        launch_failure(instance_id, waited, "did not reach running")
    }

    fn wait_reachable(&self, instance_id: &str, address: &str, application: &Application) -> Result<()> {
        let Some(golden) = &application.golden else {
            return Ok(());
        };
        let stage = format!("SSH on {address}");
        let waited = self
            .poller
            .wait_until(&stage, self.poller.timeouts.instance, || {
                Ok(self.probe.is_reachable(address, &golden.login))
            });
        launch_failure(instance_id, waited, "never accepted SSH logins")
    }
}

/// Turn a timeout while waiting on a launch into `InstanceLaunchFailed`.
fn launch_failure(instance_id: &str, waited: Result<()>, what: &str) -> Result<()> {
    match waited {
        Err(Error::Timeout { waited, .. }) => Err(Error::InstanceLaunchFailed {
            instance_id: instance_id.to_string(),
            reason: format!("{what} within {}s", waited.as_secs()),
        }),
        other => other,
    }
}

impl ImageBuilder for GoldenInstanceBuilder {
    fn produce_image(&self, application: &Application) -> Result<GoldenImage> {
        let golden = application.golden.as_ref().ok_or_else(|| {
            Error::configuration(
                ConfigErrorKind::MissingKey,
                format!("applications.{}.gold", application.name),
            )
        })?;

        self.progress.on_stage_start("Launching golden instance");
        let mut spec = golden.instance.clone();
        spec.monitoring = false;
        let instance = self.clients.compute.run_instance(&spec)?;
        let instance_id = instance.id;
        log::info!("Golden instance {instance_id} launched from {}", spec.image_id);

        self.wait_running(&instance_id)?;

        let date = naming::today();
        let mut tags = application.resource_tags(&date);
        tags.insert(
            naming::TAG_NAME.to_string(),
            naming::golden_instance_name(&application.name, &date),
        );
        tags.insert(naming::TAG_GOLDEN_INSTANCE.to_string(), "true".to_string());
        retry::with_retry(&self.retry, Some(&LogCallback), || {
            self.clients.compute.create_tags(&instance_id, &tags)
        })?;
        self.progress
            .on_stage_complete(&format!("Golden instance {instance_id} running"));

        let described = self.clients.compute.describe_instance(&instance_id)?;
        let address = described
            .address()
            .ok_or_else(|| Error::InstanceLaunchFailed {
                instance_id: instance_id.clone(),
                reason: "instance has no reachable address".to_string(),
            })?
            .to_string();

        self.progress
            .on_stage_start(&format!("Waiting for SSH on {address}"));
        self.wait_reachable(&instance_id, &address, application)?;
        self.progress.on_stage_complete("SSH reachable");

        self.progress.on_stage_start("Provisioning golden instance");
        let command = golden
            .provision
            .render(std::slice::from_ref(&address), &self.extra_args);
        let status = self
            .runner
            .run(&command, &golden.provision.working_directory)?;
        if status != 0 {
            return Err(Error::ProvisionHookFailed { command, status });
        }
        self.progress.on_stage_complete("Provisioned");

        self.progress.on_stage_start("Baking image");
        let image = bake_image(&self.clients, &self.poller, application, &instance_id, false)?;
        self.progress
            .on_stage_complete(&format!("Image {} available", image.image_id));

        let terminated = retry::with_retry(&self.retry, Some(&LogCallback), || {
            self.clients.compute.terminate_instance(&instance_id)
        });
        match terminated {
            Ok(()) => log::info!("Golden instance {instance_id} terminated"),
            Err(e) => log::warn!("Failed to terminate golden instance {instance_id}: {e}"),
        }

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{GoldenConfig, HookCommand, SshLogin, Strategy};
    use crate::poll::{CancelToken, Timeouts};
    use crate::progress::NoProgress;
    use awskit::{InstanceSpec, MockBehavior, MockCloud, Tags};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
        status: i32,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &str, _working_directory: &Path) -> Result<i32> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(self.status)
        }
    }

    struct Reachable;

    impl ReachabilityProbe for Reachable {
        fn is_reachable(&self, _address: &str, _login: &SshLogin) -> bool {
            true
        }
    }

    fn application(base_image: &str) -> Application {
        Application {
            name: "worker".to_string(),
            strategy: Strategy::GoldenInstance,
            group: Default::default(),
            launch_template: Default::default(),
            policies: Vec::new(),
            alarms: Vec::new(),
            notification_topic: None,
            golden: Some(GoldenConfig {
                instance: InstanceSpec {
                    image_id: base_image.to_string(),
                    instance_type: "t3.micro".to_string(),
                    monitoring: true,
                    ..Default::default()
                },
                login: SshLogin {
                    username: "ubuntu".to_string(),
                    key_filename: None,
                },
                provision: HookCommand {
                    command: "provision {dns_name}".to_string(),
                    working_directory: PathBuf::from("/srv/ops"),
                },
            }),
            hooks: Default::default(),
        }
    }

    fn builder(mock: &MockCloud, runner: Arc<RecordingRunner>) -> GoldenInstanceBuilder {
        GoldenInstanceBuilder::new(
            mock.clients(),
            Poller::new(
                Duration::ZERO,
                Timeouts::uniform(Duration::from_secs(5)),
                CancelToken::new(),
            ),
            runner,
            Arc::new(Reachable),
            Arc::new(NoProgress),
        )
        .with_retry(RetryConfig::new(3, Duration::ZERO, 1.0))
    }

    #[test]
    fn test_builds_tags_and_terminates() {
        let mock = MockCloud::new();
        let base = mock.add_image("ubuntu-base", Tags::new());
        let runner = Arc::new(RecordingRunner::default());

        let image = builder(&mock, runner.clone())
            .with_extra_args(vec!["--tags=web".to_string()])
            .produce_image(&application(&base))
            .unwrap();

        let source = mock.instance_snapshot(&image.source_instance_id).unwrap();
        assert_eq!(source.state, InstanceState::Terminated);
        assert_eq!(source.tag(naming::TAG_GOLDEN_INSTANCE), Some("true"));
        assert_eq!(source.tag(naming::TAG_APPLICATION), Some("worker"));

        let commands = runner.commands.lock().unwrap().clone();
        let address = source.public_dns_name.unwrap();
        assert_eq!(commands, vec![format!("provision {address} --tags=web")]);

        let baked = mock.image_snapshot(&image.image_id).unwrap();
        assert!(baked.name.starts_with("worker-ami-"));
        assert!(baked.name.ends_with("-1"));
        assert_eq!(baked.tags.get(naming::TAG_APPLICATION).map(String::as_str), Some("worker"));
        assert_eq!(
            mock.call_details("create-image"),
            vec![format!("{} {} no_reboot=false", image.source_instance_id, baked.name)]
        );
    }

    #[test]
    fn test_provision_failure_leaves_instance_running() {
        let mock = MockCloud::new();
        let base = mock.add_image("ubuntu-base", Tags::new());
        let runner = Arc::new(RecordingRunner {
            status: 2,
            ..Default::default()
        });

        let err = builder(&mock, runner)
            .produce_image(&application(&base))
            .unwrap_err();
        assert!(matches!(err, Error::ProvisionHookFailed { status: 2, .. }));
        assert_eq!(mock.call_count("create-image"), 0);
        assert_eq!(mock.call_count("terminate-instances"), 0);
    }

    #[test]
    fn test_boot_failure_is_launch_failure() {
        let mock = MockCloud::new();
        let base = mock.add_image("ubuntu-base", Tags::new());
        mock.set_behavior(MockBehavior {
            fail_instance_boot: true,
            ..Default::default()
        });

        let err = builder(&mock, Arc::new(RecordingRunner::default()))
            .produce_image(&application(&base))
            .unwrap_err();
        assert!(matches!(err, Error::InstanceLaunchFailed { .. }));
    }

    #[test]
    fn test_failed_bake_is_image_failure() {
        let mock = MockCloud::new();
        let base = mock.add_image("ubuntu-base", Tags::new());
        mock.set_behavior(MockBehavior {
            fail_image_bake: true,
            ..Default::default()
        });

        let err = builder(&mock, Arc::new(RecordingRunner::default()))
            .produce_image(&application(&base))
            .unwrap_err();
        assert!(matches!(err, Error::ImageCreationFailed { .. }));
        assert_eq!(mock.call_count("terminate-instances"), 0);
    }
}
