//! Per-user configuration stored at `~/.aksfleet/`.
//!
//! - `~/.aksfleet/config.json`: [`FleetSettings`] (tenant fallback, timeouts, limits)
//! - `~/.aksfleet/clusters-config.json`: discovered cluster metadata
//! - `~/.aksfleet/history/`: one JSON file per history entry
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `AKSFLEET_KUBECONFIG` environment variable
//! 3. First path listed in `KUBECONFIG`
//! 4. `~/.kube/config`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".aksfleet";
const SETTINGS_FILE_NAME: &str = "config.json";
const CLUSTERS_FILE_NAME: &str = "clusters-config.json";
const HISTORY_DIR_NAME: &str = "history";
const KUBECONFIG_ENV: &str = "AKSFLEET_KUBECONFIG";
const DEFAULT_TENANT_ENV: &str = "AKSFLEET_DEFAULT_TENANT";

/// Prefix of the managed clusters in the kubeconfig.
pub const DEFAULT_CLUSTER_PREFIX: &str = "akspriv-";

/// In-memory history capacity.
pub const DEFAULT_HISTORY_MAX_ENTRIES: usize = 1000;

/// Persistent settings, every field optional on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    /// Tenant used for reauthentication when none can be read from the error output.
    pub default_tenant: Option<String>,
    /// Only kubeconfig clusters with this prefix take part in fleet discovery.
    pub cluster_prefix: String,
    /// Capacity of the in-memory history cache.
    pub history_max_entries: usize,
    /// Bound for "am I logged in" style probes.
    pub probe_timeout_secs: u64,
    /// Bound for ordinary cloud CLI calls.
    pub command_timeout_secs: u64,
    /// Bound for interactive logins (browser or device code).
    pub login_timeout_secs: u64,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            default_tenant: None,
            cluster_prefix: DEFAULT_CLUSTER_PREFIX.to_string(),
            history_max_entries: DEFAULT_HISTORY_MAX_ENTRIES,
            probe_timeout_secs: 10,
            command_timeout_secs: 30,
            login_timeout_secs: 300,
        }
    }
}

impl FleetSettings {
    /// Timeout classes handed to the cloud operator.
    pub fn timeouts(&self) -> CommandTimeouts {
        CommandTimeouts {
            probe: Duration::from_secs(self.probe_timeout_secs),
            command: Duration::from_secs(self.command_timeout_secs),
            login: Duration::from_secs(self.login_timeout_secs),
        }
    }

    /// Apply environment overrides on top of the file contents.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(tenant) = std::env::var(DEFAULT_TENANT_ENV) {
            if !tenant.is_empty() {
                self.default_tenant = Some(tenant);
            }
        }
        self
    }
}

/// Time bounds for the three kinds of cloud CLI calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Authentication probes
    pub probe: Duration,
    /// Queries and mutations
    pub command: Duration,
    /// Interactive login
    pub login: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        FleetSettings::default().timeouts()
    }
}

/// Returns `~/.aksfleet/`, creating it if it doesn't exist.
pub fn fleet_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::configuration("could not determine home directory"))?;
    let dir = home.join(CONFIG_DIR_NAME);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| Error::persistence(&dir, e))?;
    }
    Ok(dir)
}

/// Path to `~/.aksfleet/config.json`.
pub fn settings_path() -> Result<PathBuf> {
    Ok(fleet_dir()?.join(SETTINGS_FILE_NAME))
}

/// Path to `~/.aksfleet/clusters-config.json`.
pub fn clusters_config_path() -> Result<PathBuf> {
    Ok(fleet_dir()?.join(CLUSTERS_FILE_NAME))
}

/// Path to `~/.aksfleet/history/`.
pub fn history_root() -> Result<PathBuf> {
    Ok(fleet_dir()?.join(HISTORY_DIR_NAME))
}

/// Load settings from `~/.aksfleet/config.json`, returning defaults if missing.
pub fn load_settings() -> Result<FleetSettings> {
    load_settings_from(&settings_path()?)
}

/// Load settings from an explicit path, returning defaults if missing.
pub fn load_settings_from(path: &Path) -> Result<FleetSettings> {
    if !path.exists() {
        return Ok(FleetSettings::default().with_env_overrides());
    }
    let data = std::fs::read_to_string(path).map_err(|e| Error::persistence(path, e))?;
    let settings: FleetSettings = serde_json::from_str(&data).map_err(|e| {
        Error::configuration(format!("failed to parse {}: {}", path.display(), e))
    })?;
    Ok(settings.with_env_overrides())
}

/// Resolve a kubeconfig path using the priority chain.
///
/// Returns `None` when no candidate exists; callers report that as a
/// configuration error.
pub fn resolve_kubeconfig(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(KUBECONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }

    let default = dirs::home_dir()?.join(".kube").join("config");
    default.exists().then_some(default)
}
