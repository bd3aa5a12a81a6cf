//! Deployment orchestration.
//!
//! [`Orchestrator::deploy`] sequences image production and fleet updates for
//! one application according to its strategy:
//!
//! - **golden instance**: build (or reuse) an image, publish a launch
//!   configuration, upsert the group, attach policies and alarms, then roll
//!   an existing group's running fleet onto the new configuration
//! - **deploy and snapshot**: with scaling processes suspended, run the
//!   deploy hook against the running fleet, image one of its instances,
//!   publish a launch configuration, upsert the group and attach policies and
//!   alarms; processes are resumed whatever happens
//!
//! Every deploy holds the application's [`DeploymentLock`] and reports
//! started/finished/failed notifications.

use crate::application::{Application, HookCommand, Strategy};
use crate::error::{ConfigErrorKind, Error, Result};
use crate::fleet::{
    CleanupReport, FleetController, GroupStatus, RollReport, ScalingReport, UpsertOutcome,
};
use crate::hooks::{CommandRunner, ReachabilityProbe};
use crate::image::{GoldenInstanceBuilder, ImageBuilder, SnapshotBuilder};
use crate::lock::DeploymentLock;
use crate::naming::ConfigurationName;
use crate::notify::Notifier;
use crate::poll::Poller;
use crate::progress::{NoProgress, Progress};
use awskit::{ImageState, LaunchConfiguration, ProviderClients, RetryConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parameters of one deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    /// Use this image instead of building one
    pub image_override: Option<String>,
    /// Arguments appended to the provision command
    pub extra_args: Vec<String>,
}

/// What a successful deploy did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentReport {
    /// Application name
    pub application: String,
    /// Strategy used
    pub strategy: Strategy,
    /// Image behind the new launch configuration
    pub image_id: String,
    /// New launch configuration
    pub launch_configuration: String,
    /// Whether the group was created or updated
    pub group: UpsertOutcome,
    /// Policies and alarms attached
    pub scaling: ScalingReport,
    /// Roll of the running fleet, for the golden instance strategy
    pub roll: Option<RollReport>,
    /// Wall-clock time of the deploy
    pub elapsed: Duration,
}

/// Format a duration as `mm:ss`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Runs deploys and fleet maintenance operations.
pub struct Orchestrator {
    clients: ProviderClients,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn ReachabilityProbe>,
    poller: Poller,
    retry: RetryConfig,
    progress: Arc<dyn Progress>,
    lock_dir: Option<PathBuf>,
}

impl Orchestrator {
    /// Create an orchestrator. Without [`with_lock_dir`](Self::with_lock_dir)
    /// no deployment lock is taken.
    pub fn new(
        clients: ProviderClients,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn ReachabilityProbe>,
        poller: Poller,
    ) -> Self {
        Self {
            clients,
            runner,
            probe,
            poller,
            retry: RetryConfig::default(),
            progress: Arc::new(NoProgress),
            lock_dir: None,
        }
    }

    /// Backoff for transient provider errors.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Receiver of stage transitions.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Directory holding per-application lock files.
    #[must_use]
    pub fn with_lock_dir(mut self, dir: PathBuf) -> Self {
        self.lock_dir = Some(dir);
        self
    }

    /// Fleet controller for `application`.
    pub fn fleet(&self, application: &Application) -> FleetController {
        FleetController::new(self.clients.clone(), application.clone(), self.poller.clone())
            .with_retry(self.retry.clone())
            .with_progress(Arc::clone(&self.progress))
    }

    fn lock(&self, application: &Application) -> Result<Option<DeploymentLock>> {
        self.lock_dir
            .as_deref()
            .map(|dir| DeploymentLock::acquire(dir, &application.name))
            .transpose()
    }

    fn notifier(&self, application: &Application) -> Notifier {
        Notifier::new(
            Arc::clone(&self.clients.notifications),
            &application.name,
            application.notification_topic.clone(),
        )
    }

    // ========================================================================
    // Deploy
    // ========================================================================

    /// Deploy `application` with its configured strategy.
    ///
    /// Either the new launch configuration is live on a converged group
    /// with policies and alarms attached, or an error is returned. Side
    /// effects of a failed deploy (a golden instance left for inspection, an
    /// unused launch configuration) stay for manual cleanup.
    pub fn deploy(&self, application: &Application, request: &DeployRequest) -> Result<DeploymentReport> {
        let started = Instant::now();
        let _lock = self.lock(application)?;
        let notifier = self.notifier(application);
        let extra = BTreeMap::from([("Strategy".to_string(), application.strategy.to_string())]);

        log::info!("Deploying {} ({})", application.name, application.strategy);
        notifier.send(
            &format!("Deployment of {} started", application.name),
            Some(&format!("[forseti] {} deployment started", application.name)),
            &extra,
        );

        let result = match application.strategy {
            Strategy::GoldenInstance => self.deploy_golden(application, request),
            Strategy::DeployAndSnapshot => self.deploy_snapshot(application, request),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(mut report) => {
                report.elapsed = elapsed;
                log::info!(
                    "Deployed {} on {} in {}",
                    application.name,
                    report.launch_configuration,
                    format_elapsed(elapsed)
                );
                let mut extra = extra;
                extra.insert("LaunchConfiguration".to_string(), report.launch_configuration.clone());
                extra.insert("ImageId".to_string(), report.image_id.clone());
                notifier.send(
                    &format!(
                        "Deployment of {} finished in {}",
                        application.name,
                        format_elapsed(elapsed)
                    ),
                    Some(&format!("[forseti] {} deployment finished", application.name)),
                    &extra,
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("Deployment of {} failed: {e}", application.name);
                notifier.send(
                    &format!(
                        "Deployment of {} failed after {}: {e}",
                        application.name,
                        format_elapsed(elapsed)
                    ),
                    Some(&format!("[forseti] {} deployment failed", application.name)),
                    &extra,
                );
                Err(e)
            }
        }
    }

    fn deploy_golden(&self, application: &Application, request: &DeployRequest) -> Result<DeploymentReport> {
        let fleet = self.fleet(application);

        let image_id = match &request.image_override {
            Some(image_id) => self.existing_image(image_id)?,
            None => {
                GoldenInstanceBuilder::new(
                    self.clients.clone(),
                    self.poller.clone(),
                    Arc::clone(&self.runner),
                    Arc::clone(&self.probe),
                    Arc::clone(&self.progress),
                )
                .with_retry(self.retry.clone())
                .with_extra_args(request.extra_args.clone())
                .produce_image(application)?
                .image_id
            }
        };

        let (launch_configuration, group, scaling) = self.publish(&fleet, &image_id)?;
        // A new group launches straight onto the new configuration
        let roll = match group {
            UpsertOutcome::Updated => Some(fleet.roll_forward()?),
            UpsertOutcome::Created => {
                fleet.await_converged()?;
                None
            }
        };

        Ok(DeploymentReport {
            application: application.name.clone(),
            strategy: application.strategy,
            image_id,
            launch_configuration,
            group,
            scaling,
            roll,
            elapsed: Duration::ZERO,
        })
    }

    fn deploy_snapshot(&self, application: &Application, request: &DeployRequest) -> Result<DeploymentReport> {
        let hook = application.hooks.deploy.as_ref().ok_or_else(|| {
            Error::configuration(
                ConfigErrorKind::MissingKey,
                format!("applications.{}.deploy", application.name),
            )
        })?;
        let fleet = self.fleet(application);
        fleet.require_group()?;

        let suspended = fleet.suspend_scoped()?;
        let body = self.snapshot_body(application, request, &fleet, hook);
        let resumed = suspended.resume();

        match (body, resumed) {
            (Ok(report), Ok(())) => Ok(report),
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(resume_error)) => {
                log::error!(
                    "Failed to resume scaling processes of {}: {resume_error}. Run `forseti resume {}`",
                    fleet.group_name(),
                    application.name
                );
                Err(e)
            }
        }
    }

    fn snapshot_body(
        &self,
        application: &Application,
        request: &DeployRequest,
        fleet: &FleetController,
        hook: &HookCommand,
    ) -> Result<DeploymentReport> {
        let addresses = self.fleet_addresses(fleet)?;

        self.progress
            .on_stage_start(&format!("Running deploy hook on {} instances", addresses.len()));
        let command = hook.render(&addresses, &[]);
        let status = self.runner.run(&command, &hook.working_directory)?;
        if status != 0 {
            return Err(Error::DeployHookFailed { command, status });
        }
        self.progress.on_stage_complete("Deploy hook finished");

        let image_id = match &request.image_override {
            Some(image_id) => self.existing_image(image_id)?,
            None => {
                SnapshotBuilder::new(
                    self.clients.clone(),
                    self.poller.clone(),
                    Arc::clone(&self.progress),
                )
                .produce_image(application)?
                .image_id
            }
        };

        let (launch_configuration, group, scaling) = self.publish(fleet, &image_id)?;

        Ok(DeploymentReport {
            application: application.name.clone(),
            strategy: application.strategy,
            image_id,
            launch_configuration,
            group,
            scaling,
            roll: None,
            elapsed: Duration::ZERO,
        })
    }

    fn publish(
        &self,
        fleet: &FleetController,
        image_id: &str,
    ) -> Result<(String, UpsertOutcome, ScalingReport)> {
        self.progress.on_stage_start("Publishing launch configuration");
        let launch_configuration = fleet.publish_launch_configuration(image_id)?;
        let group = fleet.upsert_group(&launch_configuration)?;
        let scaling = fleet.attach_scaling()?;
        self.progress.on_stage_complete(&format!(
            "{} uses {launch_configuration}",
            fleet.group_name()
        ));
        Ok((launch_configuration, group, scaling))
    }

    /// Check that a caller-supplied image exists and is usable.
    fn existing_image(&self, image_id: &str) -> Result<String> {
        let image = self.clients.images.describe_image(image_id)?;
        if image.state != ImageState::Available {
            return Err(Error::configuration(
                ConfigErrorKind::WrongType,
                format!("image {image_id} is {}, not available", image.state),
            ));
        }
        log::info!("Using existing image {image_id} ({})", image.name);
        Ok(image.id)
    }

    /// Addresses of the group's running instances.
    fn fleet_addresses(&self, fleet: &FleetController) -> Result<Vec<String>> {
        let instances = fleet.running_instances()?;
        if instances.is_empty() {
            return Err(Error::NoRunningInstances {
                group: fleet.group_name().to_string(),
            });
        }
        Ok(instances
            .iter()
            .filter_map(|i| i.address().map(ToString::to_string))
            .collect())
    }

    // ========================================================================
    // Maintenance and recovery
    // ========================================================================

    /// Enter or leave maintenance mode.
    ///
    /// Entering suspends scaling processes and runs the `maintenance_on`
    /// hook against the running fleet; processes are resumed again if the
    /// hook fails. Leaving resumes processes and runs `maintenance_off`.
    pub fn maintenance(&self, application: &Application, enable: bool) -> Result<()> {
        let _lock = self.lock(application)?;
        let fleet = self.fleet(application);
        fleet.require_group()?;

        if enable {
            let suspended = fleet.suspend_scoped()?;
            if let Some(hook) = &application.hooks.maintenance_on {
                // Dropping `suspended` on error resumes the processes
                self.run_maintenance_hook(&fleet, hook)?;
            }
            suspended.keep();
            log::info!("{} is in maintenance mode", application.name);
        } else {
            fleet.resume_processes(None)?;
            if let Some(hook) = &application.hooks.maintenance_off {
                self.run_maintenance_hook(&fleet, hook)?;
            }
            log::info!("{} left maintenance mode", application.name);
        }
        Ok(())
    }

    fn run_maintenance_hook(&self, fleet: &FleetController, hook: &HookCommand) -> Result<()> {
        let addresses = self.fleet_addresses(fleet)?;
        let command = hook.render(&addresses, &[]);
        let status = self.runner.run(&command, &hook.working_directory)?;
        if status != 0 {
            return Err(Error::MaintenanceHookFailed { command, status });
        }
        Ok(())
    }

    /// Roll the group onto fresh instances of its current launch
    /// configuration.
    pub fn regenerate(&self, application: &Application) -> Result<RollReport> {
        let _lock = self.lock(application)?;
        self.fleet(application).roll_forward()
    }

    /// Resume every scaling process of the group. Returns `false` if the
    /// group does not exist.
    pub fn resume(&self, application: &Application) -> Result<bool> {
        self.fleet(application).resume_processes(None)
    }

    /// Snapshot the group with up to `activities` recent scaling activities.
    pub fn status(&self, application: &Application, activities: usize) -> Result<GroupStatus> {
        self.fleet(application).status(activities)
    }

    /// Launch configurations of the group, oldest first.
    pub fn list_configurations(
        &self,
        application: &Application,
    ) -> Result<Vec<(ConfigurationName, LaunchConfiguration)>> {
        self.fleet(application).launch_configurations()
    }

    /// Names a cleanup keeping `keep` configurations would delete.
    pub fn cleanup_candidates(&self, application: &Application, keep: usize) -> Result<Vec<String>> {
        self.fleet(application).cleanup_candidates(keep)
    }

    /// Delete all but the newest `keep` launch configurations and their
    /// images.
    pub fn cleanup(&self, application: &Application, keep: usize) -> Result<CleanupReport> {
        let _lock = self.lock(application)?;
        self.fleet(application).cleanup_old_configurations(keep)
    }
}
