//! Capability traits for provider resources.
//!
//! Each provider service is a separate trait so that components only depend
//! on what they use. All calls are synchronous point-in-time requests;
//! long-running transitions (instance boot, image bake, group convergence,
//! load balancer health) are observed by polling from the caller.
//!
//! Two implementations ship with the crate:
//! - [`aws::AwsCliBackend`] shells out to the `aws` CLI
//! - [`mock::MockCloud`] simulates the provider in memory for tests
//!
//! [`ProviderClients`] bundles one handle per service and is what the
//! deployment engine is given.

pub mod aws;
pub mod mock;

use crate::error::Result;
use crate::types::{
    AutoScalingGroup, GroupSpec, GroupTag, GroupUpdate, Image, ImageState, Instance,
    InstanceHealth, InstanceSpec, InstanceState, LaunchConfiguration, LoadBalancer,
    MetricAlarmSpec, ScalingActivity, ScalingPolicySpec, Tags,
};
use std::sync::Arc;

/// Instance lifecycle operations.
pub trait ComputeService: Send + Sync {
    /// Launch a single instance. Quota and validation failures are fatal.
    fn run_instance(&self, spec: &InstanceSpec) -> Result<Instance>;

    /// Describe one instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the instance does not exist.
    fn describe_instance(&self, instance_id: &str) -> Result<Instance>;

    /// Describe several instances. Unknown ids are omitted.
    fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Instance>>;

    /// Add or overwrite tags on an instance.
    fn create_tags(&self, instance_id: &str, tags: &Tags) -> Result<()>;

    /// Terminate an instance.
    fn terminate_instance(&self, instance_id: &str) -> Result<()>;

    /// Current state of an instance.
    fn instance_state(&self, instance_id: &str) -> Result<InstanceState> {
        Ok(self.describe_instance(instance_id)?.state)
    }
}

/// Machine image operations.
pub trait ImageService: Send + Sync {
    /// Start baking an image from an instance and return its id.
    fn create_image(&self, instance_id: &str, name: &str, no_reboot: bool) -> Result<String>;

    /// Describe one image.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the image does not exist.
    fn describe_image(&self, image_id: &str) -> Result<Image>;

    /// Images owned by this account carrying all of `tags`.
    fn find_images(&self, tags: &Tags) -> Result<Vec<Image>>;

    /// Add or overwrite tags on an image.
    fn tag_image(&self, image_id: &str, tags: &Tags) -> Result<()>;

    /// Deregister an image, leaving its snapshots behind.
    fn deregister_image(&self, image_id: &str) -> Result<()>;

    /// Delete a block storage snapshot.
    fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    /// Current state of an image.
    fn image_state(&self, image_id: &str) -> Result<ImageState> {
        Ok(self.describe_image(image_id)?.state)
    }

    /// Deregister an image and delete its backing snapshots.
    ///
    /// Snapshot deletion is best-effort: a failure is logged and does not
    /// undo or fail the deregistration. An image that no longer exists is
    /// treated as already deleted.
    fn delete_image(&self, image_id: &str) -> Result<()> {
        let image = match self.describe_image(image_id) {
            Ok(image) => image,
            Err(e) if e.is_not_found() => {
                log::debug!("Image {image_id} already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.deregister_image(image_id)?;

        for snapshot_id in &image.snapshot_ids {
            if let Err(e) = self.delete_snapshot(snapshot_id) {
                log::warn!("Failed to delete snapshot {snapshot_id} of {image_id}: {e}");
            }
        }
        Ok(())
    }
}

/// Autoscale group, launch configuration and scaling policy operations.
pub trait AutoscaleService: Send + Sync {
    /// Describe a group, `None` if it does not exist.
    fn describe_group(&self, name: &str) -> Result<Option<AutoScalingGroup>>;

    /// Create a group.
    fn create_group(&self, spec: &GroupSpec) -> Result<()>;

    /// Update a group in place.
    fn update_group(&self, name: &str, update: &GroupUpdate) -> Result<()>;

    /// Attach classic load balancers to a group.
    fn attach_load_balancers(&self, group: &str, load_balancers: &[String]) -> Result<()>;

    /// Detach classic load balancers from a group.
    fn detach_load_balancers(&self, group: &str, load_balancers: &[String]) -> Result<()>;

    /// Add or overwrite group tags.
    fn create_or_update_tags(&self, group: &str, tags: &[GroupTag]) -> Result<()>;

    /// Remove group tags by key.
    fn delete_tags(&self, group: &str, keys: &[String]) -> Result<()>;

    /// Suspend scaling processes; `None` suspends all of them.
    fn suspend_processes(&self, group: &str, processes: Option<&[String]>) -> Result<()>;

    /// Resume scaling processes; `None` resumes all of them.
    fn resume_processes(&self, group: &str, processes: Option<&[String]>) -> Result<()>;

    /// Most recent scaling activities, newest first.
    fn describe_activities(&self, group: &str, max_records: usize)
    -> Result<Vec<ScalingActivity>>;

    /// Create a launch configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyExists` if the name is taken; configurations
    /// are never overwritten.
    fn create_launch_configuration(&self, config: &LaunchConfiguration) -> Result<()>;

    /// Describe a launch configuration, `None` if it does not exist.
    fn describe_launch_configuration(&self, name: &str) -> Result<Option<LaunchConfiguration>>;

    /// All launch configurations in the account and region.
    fn list_launch_configurations(&self) -> Result<Vec<LaunchConfiguration>>;

    /// Delete a launch configuration.
    fn delete_launch_configuration(&self, name: &str) -> Result<()>;

    /// Create or replace a scaling policy and return its ARN.
    fn put_scaling_policy(&self, policy: &ScalingPolicySpec) -> Result<String>;

    /// Publish the group's instance lifecycle events to a topic.
    fn put_notification_configuration(
        &self,
        group: &str,
        topic_arn: &str,
        notification_types: &[&str],
    ) -> Result<()>;
}

/// Classic load balancer operations.
pub trait LoadBalancerService: Send + Sync {
    /// Describe one load balancer.
    fn describe_load_balancer(&self, name: &str) -> Result<LoadBalancer>;

    /// All load balancers.
    fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>>;

    /// Health of the given instances; an empty slice means every registered instance.
    fn instance_health(
        &self,
        load_balancer: &str,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceHealth>>;

    /// Register instances.
    fn register_instances(&self, load_balancer: &str, instance_ids: &[String]) -> Result<()>;

    /// Deregister instances.
    fn deregister_instances(&self, load_balancer: &str, instance_ids: &[String]) -> Result<()>;

    /// Names of the load balancers an instance is registered with.
    fn load_balancers_for_instance(&self, instance_id: &str) -> Result<Vec<String>> {
        Ok(self
            .list_load_balancers()?
            .into_iter()
            .filter(|lb| lb.instance_ids.iter().any(|id| id == instance_id))
            .map(|lb| lb.name)
            .collect())
    }
}

/// Metric alarm operations.
pub trait AlarmService: Send + Sync {
    /// Create or replace a metric alarm.
    fn put_metric_alarm(&self, alarm: &MetricAlarmSpec) -> Result<()>;
}

/// Pub/sub topic publishing.
pub trait NotificationService: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// With `message_structure = Some("json")` the message is a JSON object
    /// keyed by delivery protocol.
    fn publish(
        &self,
        topic_arn: &str,
        message: &str,
        subject: Option<&str>,
        message_structure: Option<&str>,
    ) -> Result<()>;
}

/// One handle per provider service, shared by every engine component.
#[derive(Clone)]
pub struct ProviderClients {
    /// Instances
    pub compute: Arc<dyn ComputeService>,
    /// Images
    pub images: Arc<dyn ImageService>,
    /// Groups, launch configurations and policies
    pub autoscale: Arc<dyn AutoscaleService>,
    /// Load balancers
    pub load_balancers: Arc<dyn LoadBalancerService>,
    /// Metric alarms
    pub alarms: Arc<dyn AlarmService>,
    /// Topic publishing
    pub notifications: Arc<dyn NotificationService>,
}

impl ProviderClients {
    /// Clients backed by the AWS CLI.
    ///
    /// Returns an error if the `aws` executable is not installed.
    pub fn aws(config: aws::AwsConfig) -> Result<Self> {
        let backend = aws::AwsCliBackend::new(config)?;
        Ok(Self::from_backend(Arc::new(backend)))
    }

    /// Clients that all share a single backend implementing every service.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ComputeService
            + ImageService
            + AutoscaleService
            + LoadBalancerService
            + AlarmService
            + NotificationService
            + 'static,
    {
        Self {
            compute: backend.clone(),
            images: backend.clone(),
            autoscale: backend.clone(),
            load_balancers: backend.clone(),
            alarms: backend.clone(),
            notifications: backend,
        }
    }
}

impl std::fmt::Debug for ProviderClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClients").finish_non_exhaustive()
    }
}
