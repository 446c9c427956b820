//! Cloud operator abstraction
//!
//! Every query and mutation against the cloud goes through [`CloudOperator`].
//! Today the only implementation shells out to the Azure CLI ([`CliOperator`])
//! and classifies expired credentials by matching its output. Keeping that
//! behind the trait means discovery and the node-pool executor only ever see
//! [`Error::AuthExpired`](crate::Error::AuthExpired), never raw strings.

use std::fmt;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::Result;

mod cli;

pub use cli::{AuthFailureClassifier, CliOperator, SubstringClassifier};

/// A node pool addressed by the node-pool commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePoolTarget {
    /// Cluster name as the cloud knows it (no `-admin` suffix)
    pub cluster: String,
    /// Resource group containing the cluster
    pub resource_group: String,
    /// Subscription containing the resource group
    pub subscription: String,
    /// Node pool name
    pub pool: String,
}

/// Every cloud call this crate makes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCommand {
    /// "Am I logged in at all" probe
    AccountShow,
    /// Lightweight call that needs a valid, unexpired grant
    AccessTokenProbe,
    /// Interactive login, optionally pinned to a tenant
    Login {
        /// Tenant to authenticate against
        tenant: Option<String>,
    },
    /// Drop cached credentials
    Logout,
    /// IDs of every subscription visible to the principal
    ListSubscriptions,
    /// Look up one managed cluster in one subscription
    ShowCluster {
        /// Cluster name
        name: String,
        /// Resource group
        resource_group: String,
        /// Subscription to search
        subscription: String,
    },
    /// Every node pool of one cluster, as JSON
    ListNodePools {
        /// Cluster name
        cluster: String,
        /// Resource group
        resource_group: String,
        /// Subscription containing the resource group
        subscription: String,
    },
    /// Turn the cluster autoscaler off for a pool
    DisableAutoscaler {
        /// Pool to update
        pool: NodePoolTarget,
    },
    /// Set a fixed node count
    ScaleNodePool {
        /// Pool to scale
        pool: NodePoolTarget,
        /// Desired node count
        node_count: u32,
    },
    /// Turn the cluster autoscaler on with bounds
    EnableAutoscaler {
        /// Pool to update
        pool: NodePoolTarget,
        /// Autoscaler minimum
        min_count: u32,
        /// Autoscaler maximum
        max_count: u32,
    },
}

impl CloudCommand {
    /// True for commands that change cloud state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::DisableAutoscaler { .. } | Self::ScaleNodePool { .. } | Self::EnableAutoscaler { .. }
        )
    }
}

impl fmt::Display for CloudCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountShow => write!(f, "account show"),
            Self::AccessTokenProbe => write!(f, "account get-access-token"),
            Self::Login { tenant: Some(t) } => write!(f, "login --tenant {}", t),
            Self::Login { tenant: None } => write!(f, "login"),
            Self::Logout => write!(f, "logout"),
            Self::ListSubscriptions => write!(f, "account list"),
            Self::ShowCluster {
                name, subscription, ..
            } => write!(f, "aks show {} (subscription {})", name, subscription),
            Self::ListNodePools {
                cluster, subscription, ..
            } => write!(f, "nodepool list {} (subscription {})", cluster, subscription),
            Self::DisableAutoscaler { pool } => {
                write!(f, "nodepool update {}/{} --disable-cluster-autoscaler", pool.cluster, pool.pool)
            }
            Self::ScaleNodePool { pool, node_count } => {
                write!(f, "nodepool scale {}/{} --node-count {}", pool.cluster, pool.pool, node_count)
            }
            Self::EnableAutoscaler {
                pool,
                min_count,
                max_count,
            } => write!(
                f,
                "nodepool update {}/{} --enable-cluster-autoscaler --min-count {} --max-count {}",
                pool.cluster, pool.pool, min_count, max_count
            ),
        }
    }
}

/// Captured output of a successful call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Output with only stdout set
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Non-empty trimmed stdout lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Capability to run cloud commands
///
/// Implementations must bound every call with a timeout and report expired
/// credentials as `Error::AuthExpired` so callers can retry exactly once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudOperator: Send + Sync {
    /// Run one command
    async fn execute(&self, command: &CloudCommand) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> NodePoolTarget {
        NodePoolTarget {
            cluster: "akspriv-x".into(),
            resource_group: "rg-x".into(),
            subscription: "sub-1".into(),
            pool: "user1".into(),
        }
    }

    #[test]
    fn test_mutations_are_flagged() {
        assert!(CloudCommand::ScaleNodePool {
            pool: target(),
            node_count: 0
        }
        .is_mutation());
        assert!(!CloudCommand::AccessTokenProbe.is_mutation());
        assert!(!CloudCommand::ListNodePools {
            cluster: "akspriv-x".into(),
            resource_group: "rg-x".into(),
            subscription: "sub-1".into(),
        }
        .is_mutation());
        assert!(!CloudCommand::Login { tenant: None }.is_mutation());
    }

    #[test]
    fn test_output_lines_skip_blanks() {
        let out = CommandOutput::stdout("sub-a\n\n  sub-b  \n");
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["sub-a", "sub-b"]);
    }
}
