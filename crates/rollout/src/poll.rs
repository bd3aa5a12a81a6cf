//! Bounded, cancellable polling.
//!
//! The provider offers no completion callbacks, so every wait is a loop of
//! probe, check deadline, sleep. Each loop has a deadline and stops early
//! when the shared [`CancelToken`] is triggered.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared flag set when the operator asks the run to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying flag, for signal handler registration.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadlines for each kind of wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Instance boot and SSH reachability
    pub instance: Duration,
    /// Image bake
    pub image: Duration,
    /// Group capacity changes and convergence
    pub group: Duration,
    /// Load balancer health transitions
    pub load_balancer: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            instance: Duration::from_secs(10 * 60),
            image: Duration::from_secs(60 * 60),
            group: Duration::from_secs(30 * 60),
            load_balancer: Duration::from_secs(15 * 60),
        }
    }
}

impl Timeouts {
    /// The same deadline for every wait.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            instance: timeout,
            image: timeout,
            group: timeout,
            load_balancer: timeout,
        }
    }
}

/// Runs polling loops at a fixed interval.
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    /// Deadlines per wait kind
    pub timeouts: Timeouts,
    cancel: CancelToken,
}

impl Poller {
    /// Create a poller.
    pub fn new(interval: Duration, timeouts: Timeouts, cancel: CancelToken) -> Self {
        Self {
            interval,
            timeouts,
            cancel,
        }
    }

    /// The cancellation token this poller observes.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fail with `Interrupted` if cancellation was requested.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation.
    pub fn sleep(&self, stage: &str, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check(stage)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Poll `probe` until it yields a value.
    ///
    /// Transient provider errors count as "not yet"; any other error ends
    /// the wait. Exceeding `timeout` yields `Error::Timeout`.
    pub fn wait_for<T, F>(&self, stage: &str, timeout: Duration, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            self.check(stage)?;
            attempt += 1;
            match probe() {
                Ok(Some(value)) => {
                    log::debug!("{stage}: done after {attempt} polls");
                    return Ok(value);
                }
                Ok(None) => log::debug!("{stage}: not yet (poll {attempt})"),
                Err(e) if e.is_retryable() => {
                    log::debug!("{stage}: transient error on poll {attempt}: {e}");
                }
                Err(e) => return Err(e),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Error::Timeout {
                    stage: stage.to_string(),
                    waited,
                });
            }
            self.sleep(stage, self.interval)?;
        }
    }

    /// Poll `condition` until it holds.
    pub fn wait_until<F>(&self, stage: &str, timeout: Duration, mut condition: F) -> Result<()>
    where
        F: FnMut() -> Result<bool>,
    {
        self.wait_for(stage, timeout, || Ok(condition()?.then_some(())))
    }
}
