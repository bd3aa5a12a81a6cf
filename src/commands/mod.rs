pub mod configurations;
pub mod deploy;
pub mod fleet;
pub mod status;

use crate::Context;
use crate::paths;
use crate::progress::SpinnerProgress;
use anyhow::{Context as _, Result};
use awskit::{AwsConfig, ProviderClients};
use rollout::config::Settings;
use rollout::hooks::{ShellRunner, SshProbe};
use rollout::{
    Application, ApplicationRegistry, CancelToken, ConfigRegistry, ForsetiConfig, Orchestrator,
    Poller,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::Arc;

/// Everything a command needs to talk to the provider.
pub struct Session {
    pub registry: ConfigRegistry,
    pub orchestrator: Orchestrator,
    pub cancel: CancelToken,
}

impl Session {
    /// Load the configuration and connect to the provider.
    pub fn open(ctx: &Context) -> Result<Self> {
        let path = paths::config_file(ctx.config.as_deref())?;
        let config = ForsetiConfig::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let registry = ConfigRegistry::new(config);
        let settings = registry.settings().clone();

        let clients = ProviderClients::aws(AwsConfig {
            region: ctx.region.clone(),
            profile: ctx.profile.clone(),
            retry: settings.retry(),
        })
        .context("Failed to set up the AWS CLI backend")?;

        let cancel = CancelToken::new();
        watch_signals(&cancel)?;

        let orchestrator = orchestrator(clients, &settings, cancel.clone(), ctx.quiet);
        Ok(Self {
            registry,
            orchestrator,
            cancel,
        })
    }

    /// Resolve `name` in the loaded configuration.
    pub fn application(&self, name: &str) -> Result<Application> {
        Ok(self.registry.application(name)?)
    }

    /// `name` if given, otherwise every configured application.
    pub fn applications(&self, name: Option<&str>) -> Result<Vec<Application>> {
        match name {
            Some(name) => Ok(vec![self.application(name)?]),
            None => self
                .registry
                .application_names()
                .iter()
                .map(|name| self.application(name))
                .collect(),
        }
    }
}

fn orchestrator(
    clients: ProviderClients,
    settings: &Settings,
    cancel: CancelToken,
    quiet: bool,
) -> Orchestrator {
    let poller = Poller::new(settings.poll_interval(), settings.timeouts(), cancel);
    Orchestrator::new(
        clients,
        Arc::new(ShellRunner),
        Arc::new(SshProbe::default()),
        poller,
    )
    .with_retry(settings.retry())
    .with_progress(Arc::new(SpinnerProgress::new(quiet)))
    .with_lock_dir(settings.lock_dir())
}

/// Turn the first SIGINT/SIGTERM into a cancellation; a second one exits.
fn watch_signals(cancel: &CancelToken) -> Result<()> {
    let flag = cancel.flag();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 130, Arc::clone(&flag))
            .context("Failed to install signal handler")?;
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .context("Failed to install signal handler")?;
    }
    Ok(())
}
