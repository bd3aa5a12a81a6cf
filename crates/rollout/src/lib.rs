//! # rollout
//!
//! Deployment engine for autoscaled server fleets.
//!
//! A deploy builds a machine image, publishes a launch configuration for it
//! and converges the application's autoscale group onto that configuration
//! without dropping below the running capacity.
//!
//! ## Core Concepts
//!
//! - **Application**: an autoscale group, its launch parameters, scaling
//!   policies, alarms, hooks and deployment strategy
//!   ([`ApplicationRegistry`] resolves them by name)
//! - **ImageBuilder**: produces the image, from a dedicated golden instance
//!   or from a snapshot of the live fleet
//! - **FleetController**: launch configurations, group upserts, scaling
//!   process suspension, the capacity-doubling roll, cleanup and status
//! - **Orchestrator**: sequences the above per strategy, with a
//!   per-application lock and notifications
//!
//! Every wait goes through a [`Poller`] with a deadline and a cancellation
//! token. Scaling processes and load balancer registrations are restored by
//! guards even when a step fails.
//!
//! ## Example
//!
//! ```ignore
//! use rollout::{ConfigRegistry, ApplicationRegistry, ForsetiConfig, Orchestrator, DeployRequest};
//! use rollout::hooks::{ShellRunner, SshProbe};
//! use rollout::poll::{CancelToken, Poller};
//! use std::sync::Arc;
//!
//! let config = ForsetiConfig::load("forseti.toml".as_ref())?;
//! let registry = ConfigRegistry::new(config);
//! let settings = registry.settings();
//! let poller = Poller::new(settings.poll_interval(), settings.timeouts(), CancelToken::new());
//!
//! let orchestrator = Orchestrator::new(
//!     awskit::ProviderClients::aws(Default::default())?,
//!     Arc::new(ShellRunner),
//!     Arc::new(SshProbe::default()),
//!     poller,
//! );
//! let report = orchestrator.deploy(&registry.application("web")?, &DeployRequest::default())?;
//! println!("{} now runs {}", report.application, report.launch_configuration);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod application;
pub mod config;
pub mod error;
pub mod fleet;
pub mod hooks;
pub mod image;
pub mod lock;
pub mod naming;
pub mod notify;
pub mod orchestrator;
pub mod poll;
pub mod progress;

pub use application::{Application, Strategy};
pub use config::{ApplicationRegistry, ConfigRegistry, ForsetiConfig};
pub use error::{ConfigErrorKind, Error, ErrorCategory, Result};
pub use fleet::{FleetController, FleetState, GroupStatus, UpsertOutcome};
pub use image::{GoldenImage, ImageBuilder};
pub use orchestrator::{DeployRequest, DeploymentReport, Orchestrator};
pub use poll::{CancelToken, Poller, Timeouts};
pub use progress::{NoProgress, Progress};
