//! Error types for the deployment engine.
//!
//! Provider errors are wrapped unchanged; everything else is a failure of
//! one deployment stage. Errors raised while scaling processes are
//! suspended are intercepted by the orchestrator long enough to resume the
//! group, then returned to the caller.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// What was wrong with an application's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A required key is absent
    MissingKey,
    /// A key holds a value of the wrong type
    WrongType,
    /// The deployment strategy is not one we know
    UnknownStrategy,
    /// No application with that name is configured
    UnknownApplication,
    /// The document could not be parsed at all
    Malformed,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingKey => "missing key",
            Self::WrongType => "wrong type",
            Self::UnknownStrategy => "unknown strategy",
            Self::UnknownApplication => "unknown application",
            Self::Malformed => "malformed",
        };
        write!(f, "{s}")
    }
}

/// Categories of deployment errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad or incomplete configuration, detected before any mutation
    Configuration,
    /// Provider throttling or a conflicting activity in flight
    ProviderTransient,
    /// Provider rejected the request for good
    ProviderFatal,
    /// Instance launch or image bake failed
    ImageBuild,
    /// The fleet is not in a state the operation can start from
    Precondition,
    /// A provision, deploy or maintenance hook exited non-zero
    Hook,
    /// Another deployment of the same application is running
    Concurrency,
    /// A polling loop ran out of time
    Timeout,
    /// The operator interrupted the run
    Interrupted,
    /// Local IO failure
    Io,
}

impl ErrorCategory {
    /// Whether this error category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderTransient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration error",
            Self::ProviderTransient => "Transient provider error",
            Self::ProviderFatal => "Provider error",
            Self::ImageBuild => "Image build failed",
            Self::Precondition => "Fleet not ready",
            Self::Hook => "Hook command failed",
            Self::Concurrency => "Deployment already running",
            Self::Timeout => "Timed out",
            Self::Interrupted => "Interrupted",
            Self::Io => "IO error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Configuration => "Fix the application entry in the configuration file",
            Self::ProviderTransient => "Wait for running scaling activities to settle and retry",
            Self::ProviderFatal => "Check the error details, limits and credentials",
            Self::ImageBuild => {
                "Inspect the source instance (it is left running) and terminate it when done"
            }
            Self::Precondition => "Check the group with `forseti status <app>`",
            Self::Hook => "Run the hook by hand to see its output",
            Self::Concurrency => "Wait for the other deployment to finish",
            Self::Timeout => "Check `forseti status <app>`; raise the timeout in [settings] if needed",
            Self::Interrupted => "Check `forseti status <app>` and run `forseti resume <app>` if needed",
            Self::Io => "Check file permissions and available disk space",
        }
    }
}

/// Errors that can occur during a deployment.
#[derive(Debug, Error)]
pub enum Error {
    /// Application configuration is missing or malformed
    #[error("configuration error ({kind}): {message}")]
    Configuration {
        /// What kind of problem
        kind: ConfigErrorKind,
        /// Which key and why
        message: String,
    },

    /// Provider call failed
    #[error(transparent)]
    Provider(#[from] awskit::Error),

    /// A freshly launched instance never became usable
    #[error("instance {instance_id} failed to launch: {reason}")]
    InstanceLaunchFailed {
        /// Instance that failed
        instance_id: String,
        /// What went wrong
        reason: String,
    },

    /// Image creation failed or never completed
    #[error("image from {source_instance} failed: {reason}")]
    ImageCreationFailed {
        /// Instance the image was taken from
        source_instance: String,
        /// What went wrong
        reason: String,
    },

    /// Every running instance is excluded from image creation
    #[error("no running instance of {group} is eligible for image creation")]
    NoEligibleInstance {
        /// Group that was searched
        group: String,
    },

    /// The group has no running instances to work with
    #[error("group {group} has no running instances")]
    NoRunningInstances {
        /// Group that was searched
        group: String,
    },

    /// The autoscale group does not exist
    #[error("autoscale group {group} does not exist")]
    GroupNotFound {
        /// Group name
        group: String,
    },

    /// Deploy hook exited non-zero
    #[error("deploy hook `{command}` exited with status {status}")]
    DeployHookFailed {
        /// Rendered command
        command: String,
        /// Exit status
        status: i32,
    },

    /// Provision hook exited non-zero
    #[error("provision hook `{command}` exited with status {status}")]
    ProvisionHookFailed {
        /// Rendered command
        command: String,
        /// Exit status
        status: i32,
    },

    /// Maintenance hook exited non-zero
    #[error("maintenance hook `{command}` exited with status {status}")]
    MaintenanceHookFailed {
        /// Rendered command
        command: String,
        /// Exit status
        status: i32,
    },

    /// Another deployment holds the application lock
    #[error("another deployment of {application} is running (lock {})", .lock_path.display())]
    ConcurrentDeployment {
        /// Application name
        application: String,
        /// Lock file held by the other run
        lock_path: PathBuf,
    },

    /// A polling loop exceeded its deadline
    #[error("timed out after {}s waiting for {stage}", .waited.as_secs())]
    Timeout {
        /// What was being waited for
        stage: String,
        /// How long we waited
        waited: Duration,
    },

    /// The operator interrupted the run
    #[error("interrupted while waiting for {stage}")]
    Interrupted {
        /// What was being waited for
        stage: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn configuration(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self::Configuration {
            kind,
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration { .. } => ErrorCategory::Configuration,
            Error::Provider(e) if e.is_retryable() => ErrorCategory::ProviderTransient,
            Error::Provider(_) => ErrorCategory::ProviderFatal,
            Error::InstanceLaunchFailed { .. } | Error::ImageCreationFailed { .. } => {
                ErrorCategory::ImageBuild
            }
            Error::NoEligibleInstance { .. }
            | Error::NoRunningInstances { .. }
            | Error::GroupNotFound { .. } => ErrorCategory::Precondition,
            Error::DeployHookFailed { .. }
            | Error::ProvisionHookFailed { .. }
            | Error::MaintenanceHookFailed { .. } => ErrorCategory::Hook,
            Error::ConcurrentDeployment { .. } => ErrorCategory::Concurrency,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Interrupted { .. } => ErrorCategory::Interrupted,
            Error::Io(_) => ErrorCategory::Io,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Actionable advice for the operator.
    pub fn advice(&self) -> &'static str {
        match self {
            Error::Provider(e) => e.category().advice(),
            other => other.category().advice(),
        }
    }
}

/// Result type alias for rollout operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_split_by_retryability() {
        let throttled = Error::from(awskit::Error::Throttled {
            operation: "describe-auto-scaling-groups".to_string(),
            message: "Rate exceeded".to_string(),
        });
        assert_eq!(throttled.category(), ErrorCategory::ProviderTransient);
        assert!(throttled.is_retryable());

        let quota = Error::from(awskit::Error::Quota {
            message: "InstanceLimitExceeded".to_string(),
        });
        assert_eq!(quota.category(), ErrorCategory::ProviderFatal);
        assert!(!quota.is_retryable());
    }

    #[test]
    fn test_configuration_error_display() {
        let err = Error::configuration(
            ConfigErrorKind::UnknownStrategy,
            "applications.web.deployment_strategy = \"canary\"",
        );
        assert_eq!(
            err.to_string(),
            "configuration error (unknown strategy): applications.web.deployment_strategy = \"canary\""
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_hook_and_precondition_categories() {
        let hook = Error::DeployHookFailed {
            command: "fab deploy".to_string(),
            status: 2,
        };
        assert_eq!(hook.category(), ErrorCategory::Hook);
        assert_eq!(hook.to_string(), "deploy hook `fab deploy` exited with status 2");

        let none = Error::NoEligibleInstance {
            group: "web".to_string(),
        };
        assert_eq!(none.category(), ErrorCategory::Precondition);
    }

    #[test]
    fn test_timeout_display_in_seconds() {
        let err = Error::Timeout {
            stage: "image ami-1 to become available".to_string(),
            waited: Duration::from_secs(90),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 90s waiting for image ami-1 to become available"
        );
    }
}
