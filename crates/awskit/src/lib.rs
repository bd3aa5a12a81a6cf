//! # awskit
//!
//! Capability interfaces over the cloud provider services a fleet
//! deployment touches.
//!
//! This crate provides:
//! - One trait per provider service ([`backend::ComputeService`],
//!   [`backend::ImageService`], [`backend::AutoscaleService`],
//!   [`backend::LoadBalancerService`], [`backend::AlarmService`],
//!   [`backend::NotificationService`])
//! - [`ProviderClients`], the bundle of service handles the engine is given
//! - A backend driving the `aws` CLI and an in-memory [`MockCloud`]
//! - Categorized errors that tell transient provider conditions from fatal ones
//!
//! ## Example
//!
//! ```no_run
//! use awskit::{AwsConfig, ProviderClients};
//!
//! let clients = ProviderClients::aws(AwsConfig {
//!     region: Some("eu-west-1".to_string()),
//!     ..Default::default()
//! })
//! .expect("AWS CLI not available");
//!
//! if let Some(group) = clients.autoscale.describe_group("web").unwrap() {
//!     println!("{} runs {} instances", group.name, group.instances.len());
//! }
//! ```
//!
//! ## Retry Logic
//!
//! Read-only calls are retried on throttling with exponential backoff,
//! configured through [`RetryConfig`]. Mutations are issued once so that
//! callers can re-read state before trying again with [`retry::with_retry`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod types;

pub use backend::ProviderClients;
pub use backend::aws::{AwsCliBackend, AwsConfig};
pub use backend::mock::{FaultKind, JournalEntry, MockBehavior, MockCloud, PublishedMessage};
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    AutoScalingGroup, GroupInstance, GroupSpec, GroupTag, GroupUpdate, HealthState, Image,
    ImageState, Instance, InstanceHealth, InstanceSpec, InstanceState, LaunchConfiguration,
    LoadBalancer, MetricAlarmSpec, RetryConfig, ScalingActivity, ScalingPolicySpec, Tags,
};
