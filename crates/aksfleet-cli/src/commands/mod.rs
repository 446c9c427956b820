//! CLI commands

use std::path::PathBuf;
use std::sync::Arc;

use aksfleet_common::cloud::{CliOperator, CloudOperator};
use aksfleet_common::config::{self, FleetSettings};
use aksfleet_common::credentials::CredentialGuard;
use aksfleet_common::history::HistoryTracker;
use aksfleet_common::kubeconfig::KubeconfigIndex;
use tracing::debug;

use crate::{Error, Result};

pub mod clusters;
pub mod discover;
pub mod history;
pub mod login;
pub mod nodepool;
pub mod status;

/// Settings plus the cloud operator and credential guard every command shares
pub struct FleetContext {
    pub settings: FleetSettings,
    pub operator: Arc<dyn CloudOperator>,
    pub guard: Arc<CredentialGuard>,
}

impl FleetContext {
    /// Load `~/.aksfleet/config.json` and wire the Azure CLI operator
    pub fn load() -> Result<Self> {
        Ok(Self::from_settings(config::load_settings()?))
    }

    /// Wire the Azure CLI operator for explicit settings
    pub fn from_settings(settings: FleetSettings) -> Self {
        let operator: Arc<dyn CloudOperator> = Arc::new(CliOperator::new(settings.timeouts()));
        let guard = Arc::new(
            CredentialGuard::new(operator.clone())
                .with_default_tenant(settings.default_tenant.clone()),
        );
        Self {
            settings,
            operator,
            guard,
        }
    }

    /// Open the history tracker under `~/.aksfleet/history`
    pub async fn open_history(&self) -> Result<HistoryTracker> {
        let root = config::history_root()?;
        Ok(HistoryTracker::open(root, self.settings.history_max_entries).await)
    }
}

/// Resolve and index the kubeconfig using the resolution chain
pub fn load_kubeconfig(explicit: Option<&str>) -> Result<(PathBuf, KubeconfigIndex)> {
    let path = config::resolve_kubeconfig(explicit).ok_or_else(|| {
        Error::command_failed(
            "no kubeconfig found. Pass --kubeconfig or set AKSFLEET_KUBECONFIG / KUBECONFIG.",
        )
    })?;
    debug!(path = %path.display(), "using kubeconfig");
    let index = KubeconfigIndex::load(&path)?;
    Ok((path, index))
}
