//! Error types for cloud provider operations.
//!
//! Errors are categorized so that callers can tell transient provider
//! conditions (throttling, a scaling activity already in flight) apart from
//! fatal ones (quota, validation, missing credentials). Only the transient
//! categories are retried.

use thiserror::Error;

/// Categories of provider errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request throttled or the service is temporarily unavailable
    Throttled,
    /// Another operation on the same resource is still in flight
    InFlight,
    /// The referenced resource does not exist
    NotFound,
    /// A resource with the same name already exists
    AlreadyExists,
    /// Account or capacity quota exceeded
    Quota,
    /// The request was rejected as invalid
    Validation,
    /// Credentials missing, expired or lacking permission
    Auth,
    /// The `aws` executable could not be found
    CliNotFound,
    /// The provider command failed for an unclassified reason
    CommandFailed,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::InFlight)
    }

    /// Whether this error can be safely ignored (operation already done).
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Throttled => "Provider throttled the request",
            Self::InFlight => "Another operation is in progress",
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::Quota => "Quota exceeded",
            Self::Validation => "Request rejected as invalid",
            Self::Auth => "Authentication or authorization failure",
            Self::CliNotFound => "AWS CLI not installed",
            Self::CommandFailed => "Provider command failed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Throttled => "Wait a moment and try again",
            Self::InFlight => "Wait for the current scaling activity to finish and retry",
            Self::NotFound => "Check the resource name and the selected region",
            Self::AlreadyExists => "No action needed - the resource already exists",
            Self::Quota => "Request a limit increase or free up existing resources",
            Self::Validation => "Check the configured values for this resource",
            Self::Auth => "Check AWS_PROFILE / AWS_REGION and the credentials in use",
            Self::CliNotFound => "Install the AWS CLI (https://aws.amazon.com/cli/)",
            Self::CommandFailed => "Check the error details for more information",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while talking to the cloud provider.
#[derive(Debug, Error)]
pub enum Error {
    /// Request throttled or the service is temporarily unavailable
    #[error("{operation} throttled: {message}")]
    Throttled {
        /// Operation that was throttled
        operation: String,
        /// Provider message
        message: String,
    },

    /// A conflicting operation is still running on the resource
    #[error("{operation} rejected while another activity is in progress: {message}")]
    InFlight {
        /// Operation that was rejected
        operation: String,
        /// Provider message
        message: String,
    },

    /// Resource not found
    #[error("not found: {resource}")]
    NotFound {
        /// Resource identifier or description
        resource: String,
    },

    /// Resource already exists
    #[error("already exists: {resource}")]
    AlreadyExists {
        /// Resource identifier or description
        resource: String,
    },

    /// Quota exceeded
    #[error("quota exceeded: {message}")]
    Quota {
        /// Provider message
        message: String,
    },

    /// Validation failure
    #[error("invalid request: {message}")]
    Validation {
        /// Provider message
        message: String,
    },

    /// Authentication or authorization failure
    #[error("access denied: {message}")]
    Auth {
        /// Provider message
        message: String,
    },

    /// The AWS CLI is not installed or not in PATH
    #[error("AWS CLI not found. Install it from https://aws.amazon.com/cli/")]
    CliNotFound,

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// The provider answered with something we could not interpret
    #[error("unexpected response from {operation}: {message}")]
    Response {
        /// Operation whose response was malformed
        operation: String,
        /// What was wrong with it
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

const THROTTLED_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "ServiceUnavailable",
    "Unavailable",
    "InternalError",
    "InternalFailure",
];

const IN_FLIGHT_CODES: &[&str] = &[
    "ScalingActivityInProgress",
    "ScalingActivityInProgressFault",
    "ResourceContention",
    "ResourceContentionFault",
    "IncorrectState",
    "IncorrectInstanceState",
];

const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "SignatureDoesNotMatch",
];

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Throttled { .. } => ErrorCategory::Throttled,
            Error::InFlight { .. } => ErrorCategory::InFlight,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Error::Quota { .. } => ErrorCategory::Quota,
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::Auth { .. } => ErrorCategory::Auth,
            Error::CliNotFound => ErrorCategory::CliNotFound,
            Error::CommandFailed { .. } => ErrorCategory::CommandFailed,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error can be safely ignored.
    pub fn is_ignorable(&self) -> bool {
        self.category().is_ignorable()
    }

    /// Whether this error means the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Create an error from AWS CLI output.
    ///
    /// The CLI reports service errors as
    /// `An error occurred (Code) when calling the Op operation: message`;
    /// the code decides the category. Connection failures that never reach
    /// the service are treated as throttling.
    pub fn from_aws_output(stderr: &str, operation: &str) -> Self {
        let trimmed = stderr.trim();
        let message = trimmed
            .split_once("operation: ")
            .map_or(trimmed, |(_, rest)| rest)
            .to_string();

        let Some(code) = error_code(trimmed) else {
            let lower = trimmed.to_lowercase();
            if lower.contains("could not connect to the endpoint")
                || lower.contains("read timeout")
                || lower.contains("connection was closed")
                || lower.contains("connect timeout")
            {
                return Error::Throttled {
                    operation: operation.to_string(),
                    message,
                };
            }
            if lower.contains("unable to locate credentials")
                || (lower.contains("could not be found") && lower.contains("profile"))
            {
                return Error::Auth { message };
            }
            return Error::CommandFailed {
                message: format!("aws {operation} failed"),
                stderr: trimmed.to_string(),
            };
        };

        if THROTTLED_CODES.contains(&code) {
            return Error::Throttled {
                operation: operation.to_string(),
                message,
            };
        }

        if IN_FLIGHT_CODES.contains(&code) {
            return Error::InFlight {
                operation: operation.to_string(),
                message,
            };
        }

        if AUTH_CODES.contains(&code) {
            return Error::Auth { message };
        }

        if code.ends_with("NotFound")
            || code.ends_with(".NotFound")
            || code.ends_with("NotFoundException")
            || code == "InvalidAMIID.Unavailable"
        {
            return Error::NotFound { resource: message };
        }

        if code.contains("AlreadyExists") || code.ends_with(".Duplicate") {
            return Error::AlreadyExists { resource: message };
        }

        if code.ends_with("LimitExceeded")
            || code.ends_with("LimitExceededFault")
            || code == "InsufficientInstanceCapacity"
        {
            return Error::Quota { message };
        }

        if code.starts_with("Validation")
            || code.starts_with("InvalidParameter")
            || code.starts_with("MissingParameter")
            || code.starts_with("Invalid")
            || code == "ResourceInUse"
        {
            return Error::Validation { message };
        }

        Error::CommandFailed {
            message: format!("aws {operation} failed ({code})"),
            stderr: trimmed.to_string(),
        }
    }
}

/// Extract the service error code from AWS CLI stderr.
fn error_code(stderr: &str) -> Option<&str> {
    let start = stderr.find("An error occurred (")? + "An error occurred (".len();
    let rest = &stderr[start..];
    let end = rest.find(')')?;
    Some(&rest[..end])
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, Error>;
