//! Deployable image production.
//!
//! Two strategies implement [`ImageBuilder`]:
//! - [`GoldenInstanceBuilder`] provisions a dedicated instance and images it
//! - [`SnapshotBuilder`] images an instance of the live fleet after taking it
//!   out of rotation
//!
//! Both finish through the same bake step: create the image, poll until it is
//! available, then tag it with the application and date.

mod golden;
mod snapshot;

pub use golden::GoldenInstanceBuilder;
pub use snapshot::{OutOfRotation, SnapshotBuilder, choose_instance};

use crate::application::Application;
use crate::error::{Error, Result};
use crate::naming;
use crate::poll::Poller;
use awskit::{ImageState, ProviderClients, Tags};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// An image ready to back a launch configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenImage {
    /// Provider image id
    pub image_id: String,
    /// Image name
    pub name: String,
    /// Instance the image was taken from
    pub source_instance_id: String,
    /// When the bake finished
    pub created_at: DateTime<Utc>,
    /// Tags applied to the image
    pub tags: Tags,
    /// Lifecycle state
    pub state: ImageState,
}

/// Produces a deployable image for an application.
pub trait ImageBuilder {
    /// Build an image and wait until it is available.
    fn produce_image(&self, application: &Application) -> Result<GoldenImage>;
}

/// Image `instance_id`, wait for the bake and tag the result.
pub(crate) fn bake_image(
    clients: &ProviderClients,
    poller: &Poller,
    application: &Application,
    instance_id: &str,
    no_reboot: bool,
) -> Result<GoldenImage> {
    let date = naming::today();
    let mut tags = application.resource_tags(&date);
    let existing = clients.images.find_images(&tags)?.len();
    let name = naming::image_name(&application.name, &date, existing + 1);

    log::info!("Creating image {name} from {instance_id}");
    let image_id = clients.images.create_image(instance_id, &name, no_reboot)?;

    let stage = format!("image {image_id} to become available");
    let waited = poller.wait_for(&stage, poller.timeouts.image, || {
        let image = clients.images.describe_image(&image_id)?;
        match image.state {
            ImageState::Available => Ok(Some(())),
            ImageState::Pending => Ok(None),
            ImageState::Failed => Err(Error::ImageCreationFailed {
                source_instance: instance_id.to_string(),
                reason: image
                    .state_reason
                    .unwrap_or_else(|| format!("image {image_id} failed")),
            }),
        }
    });
    match waited {
        Ok(()) => {}
        Err(Error::Timeout { waited, .. }) => {
            return Err(Error::ImageCreationFailed {
                source_instance: instance_id.to_string(),
                reason: format!(
                    "image {image_id} not available after {}s",
                    waited.as_secs()
                ),
            });
        }
        Err(e) => return Err(e),
    }

    tags.insert(naming::TAG_NAME.to_string(), name.clone());
    clients.images.tag_image(&image_id, &tags)?;
    log::info!("Image {image_id} ({name}) is available");

    Ok(GoldenImage {
        image_id,
        name,
        source_instance_id: instance_id.to_string(),
        created_at: Utc::now(),
        tags,
        state: ImageState::Available,
    })
}
