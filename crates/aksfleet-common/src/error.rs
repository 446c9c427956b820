//! Error types for fleet operations
//!
//! Errors carry the context needed to act on them: which cluster, which command,
//! what the cloud CLI printed. The variants follow the failure classes callers
//! branch on (bad naming convention, missing cluster, expired credentials,
//! subprocess failure, persistence failure).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for fleet operations
#[derive(Debug, Error)]
pub enum Error {
    /// A naming convention or configuration value could not be interpreted
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's malformed
        message: String,
    },

    /// A cluster, context or record does not exist where it was looked up
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What was being looked up (e.g. "kubeconfig context", "cluster")
        kind: &'static str,
        /// The name that was looked up
        name: String,
    },

    /// The cloud CLI rejected the call because the login grant expired
    #[error("cloud credentials expired while running `{command}`")]
    AuthExpired {
        /// Human-readable command that failed
        command: String,
        /// Combined output that was classified as an auth failure
        output: String,
    },

    /// A subprocess exited unsuccessfully for a reason other than auth
    #[error("`{command}` failed (exit code {code:?}): {stderr}")]
    Subprocess {
        /// Human-readable command that failed
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },

    /// A remote call did not finish within its time bound
    #[error("`{command}` timed out after {after:?}")]
    Timeout {
        /// Human-readable command that timed out
        command: String,
        /// The bound that was exceeded
        after: Duration,
    },

    /// Reading or writing a file failed
    #[error("persistence error for {}: {message}", path.display())]
    Persistence {
        /// File or directory involved
        path: PathBuf,
        /// Description of what failed
        message: String,
    },

    /// Caller input rejected before anything was executed
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// The operation was cancelled before it produced a result
    #[error("operation cancelled")]
    Cancelled,

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Kubernetes client error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a persistence error for a path
    pub fn persistence(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// True when the failure should trigger one reauthentication and retry
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }

    /// Captured process output, when the error came from the cloud CLI
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::AuthExpired { output, .. } => Some(output),
            Self::Subprocess { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
