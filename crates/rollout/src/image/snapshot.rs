use super::{GoldenImage, ImageBuilder, bake_image};
use crate::application::Application;
use crate::error::{Error, Result};
use crate::fleet::running_instances;
use crate::naming;
use crate::poll::Poller;
use crate::progress::Progress;
use awskit::backend::LoadBalancerService;
use awskit::{HealthState, Instance};
use std::sync::Arc;

/// Pick the instance to image: the lowest id not tagged
/// `forseti:avoid_ami_creation`.
pub fn choose_instance<'a>(group: &str, instances: &'a [Instance]) -> Result<&'a Instance> {
    instances
        .iter()
        .filter(|i| !i.has_tag(naming::TAG_AVOID_AMI_CREATION))
        .min_by(|a, b| a.id.cmp(&b.id))
        .ok_or_else(|| Error::NoEligibleInstance {
            group: group.to_string(),
        })
}

/// An instance removed from its load balancers.
///
/// Dropping the guard registers the instance again with every load balancer
/// it was removed from, without waiting for it to become healthy.
pub struct OutOfRotation {
    load_balancers: Arc<dyn LoadBalancerService>,
    instance_id: String,
    removed_from: Vec<String>,
}

impl OutOfRotation {
    /// Deregister `instance_id` from `names` and wait until each reports it
    /// out of service.
    pub fn take(
        load_balancers: Arc<dyn LoadBalancerService>,
        poller: &Poller,
        instance_id: &str,
        names: &[String],
    ) -> Result<Self> {
        let mut guard = Self {
            load_balancers,
            instance_id: instance_id.to_string(),
            removed_from: Vec::new(),
        };
        let ids = [instance_id.to_string()];

        for name in names {
            log::info!("Deregistering {instance_id} from {name}");
            guard.load_balancers.deregister_instances(name, &ids)?;
            guard.removed_from.push(name.clone());
        }

        for name in names {
            let stage = format!("{instance_id} to leave {name}");
            poller.wait_until(&stage, poller.timeouts.load_balancer, || {
                let health = guard.load_balancers.instance_health(name, &ids)?;
                Ok(health
                    .iter()
                    .all(|h| h.instance_id != instance_id || h.state != HealthState::InService))
            })?;
        }
        Ok(guard)
    }

    /// Load balancers the instance was removed from.
    pub fn removed_from(&self) -> &[String] {
        &self.removed_from
    }

    /// Register the instance again now.
    pub fn restore(self) {
        drop(self);
    }
}

impl Drop for OutOfRotation {
    fn drop(&mut self) {
        let ids = [self.instance_id.clone()];
        for name in self.removed_from.drain(..) {
            match self.load_balancers.register_instances(&name, &ids) {
                Ok(()) => log::info!("Registered {} with {name} again", self.instance_id),
                Err(e) => log::warn!(
                    "Failed to register {} with {name} again: {e}; register it by hand",
                    self.instance_id
                ),
            }
        }
    }
}

/// Builds an image from an instance of the live fleet.
///
/// The caller owns scaling process suspension; this builder only takes the
/// chosen instance out of rotation for the duration of the bake.
pub struct SnapshotBuilder {
    clients: awskit::ProviderClients,
    poller: Poller,
    progress: Arc<dyn Progress>,
}

impl SnapshotBuilder {
    /// Create a builder.
    pub fn new(clients: awskit::ProviderClients, poller: Poller, progress: Arc<dyn Progress>) -> Self {
        Self {
            clients,
            poller,
            progress,
        }
    }
}

impl ImageBuilder for SnapshotBuilder {
    fn produce_image(&self, application: &Application) -> Result<GoldenImage> {
        let group = &application.group.name;
        let instances = running_instances(&self.clients, group)?;
        let candidate = choose_instance(group, &instances)?;
        let instance_id = candidate.id.clone();
        log::info!("Imaging {instance_id} of {group}");

        let names = self
            .clients
            .load_balancers
            .load_balancers_for_instance(&instance_id)?;

        self.progress
            .on_stage_start(&format!("Taking {instance_id} out of rotation"));
        let guard = OutOfRotation::take(
            Arc::clone(&self.clients.load_balancers),
            &self.poller,
            &instance_id,
            &names,
        )?;
        self.progress.on_stage_complete("Out of rotation");

        self.progress.on_stage_start("Baking image");
        let image = bake_image(&self.clients, &self.poller, application, &instance_id, false)?;
        guard.restore();
        self.progress
            .on_stage_complete(&format!("Image {} available", image.image_id));
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{CancelToken, Timeouts};
    use awskit::{FaultKind, InstanceState, MockCloud, Tags};
    use std::time::Duration;

    fn instance(id: &str, avoid: bool) -> Instance {
        let mut tags = Tags::new();
        if avoid {
            tags.insert(naming::TAG_AVOID_AMI_CREATION.to_string(), "true".to_string());
        }
        Instance {
            id: id.to_string(),
            state: InstanceState::Running,
            image_id: "ami-1".to_string(),
            instance_type: "t3.micro".to_string(),
            public_dns_name: None,
            private_ip_address: None,
            availability_zone: None,
            launch_time: None,
            tags,
        }
    }

    fn poller() -> Poller {
        Poller::new(
            Duration::ZERO,
            Timeouts::uniform(Duration::from_secs(5)),
            CancelToken::new(),
        )
    }

    #[test]
    fn test_choose_skips_avoided_instances() {
        let instances = vec![
            instance("i-0003", false),
            instance("i-0001", true),
            instance("i-0002", false),
        ];
        assert_eq!(choose_instance("web", &instances).unwrap().id, "i-0002");
    }

    #[test]
    fn test_choose_fails_when_all_avoided() {
        let instances = vec![instance("i-0001", true), instance("i-0002", true)];
        let err = choose_instance("web", &instances).unwrap_err();
        assert!(matches!(err, Error::NoEligibleInstance { ref group } if group == "web"));
        assert!(choose_instance("web", &[]).is_err());
    }

    #[test]
    fn test_out_of_rotation_restores_on_drop() {
        let mock = MockCloud::new();
        mock.add_load_balancer("web-lb", 0);
        mock.add_load_balancer("web-internal", 0);
        let image = mock.add_image("base", Tags::new());
        let id = mock.add_instance(&image, Tags::new());
        let clients = mock.clients();
        let names = vec!["web-lb".to_string(), "web-internal".to_string()];
        for name in &names {
            clients
                .load_balancers
                .register_instances(name, std::slice::from_ref(&id))
                .unwrap();
        }

        let guard =
            OutOfRotation::take(clients.load_balancers.clone(), &poller(), &id, &names).unwrap();
        assert_eq!(guard.removed_from(), names.as_slice());
        assert!(mock.registered_instances("web-lb").is_empty());

        drop(guard);
        assert_eq!(mock.registered_instances("web-lb"), vec![id.clone()]);
        assert_eq!(mock.registered_instances("web-internal"), vec![id]);
    }

    #[test]
    fn test_failed_wait_registers_again() {
        let mock = MockCloud::new();
        mock.add_load_balancer("web-lb", 0);
        mock.add_load_balancer("web-internal", 0);
        let image = mock.add_image("base", Tags::new());
        let id = mock.add_instance(&image, Tags::new());
        let clients = mock.clients();
        let names = vec!["web-lb".to_string(), "web-internal".to_string()];
        for name in &names {
            clients
                .load_balancers
                .register_instances(name, std::slice::from_ref(&id))
                .unwrap();
        }

        mock.fail_next("describe-instance-health", FaultKind::Auth);
        let result = OutOfRotation::take(clients.load_balancers.clone(), &poller(), &id, &names);
        assert!(result.is_err());
        assert_eq!(mock.call_count("deregister-instances-from-load-balancer"), 2);
        assert_eq!(mock.registered_instances("web-lb"), vec![id.clone()]);
        assert_eq!(mock.registered_instances("web-internal"), vec![id]);
    }
}
