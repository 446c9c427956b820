//! Persisted cluster metadata (`clusters-config.json`)
//!
//! A JSON array of `{clusterName, resourceGroup, subscription}` records, unique
//! by name and always written sorted by name with 2-space indentation. Reads
//! are permissive: a missing or malformed file is an empty set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::kubeconfig::normalize_cluster_name;
use crate::{config, Error, Result};

/// Resource group and subscription of one managed cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cloud resource name of the cluster
    #[serde(rename = "clusterName")]
    pub name: String,
    /// Resource group containing the cluster
    #[serde(rename = "resourceGroup")]
    pub resource_group: String,
    /// Subscription containing the resource group
    pub subscription: String,
}

/// Reads and merges the cluster configuration file
#[derive(Debug, Clone)]
pub struct ClusterConfigStore {
    path: PathBuf,
}

impl ClusterConfigStore {
    /// Store backed by an explicit file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by `~/.aksfleet/clusters-config.json`
    pub fn default_location() -> Result<Self> {
        Ok(Self::at(config::clusters_config_path()?))
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every persisted record; empty if the file is missing or unreadable
    pub fn load(&self) -> Vec<ClusterConfig> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read cluster config");
                return Vec::new();
            }
        };

        match serde_json::from_str(&data) {
            Ok(configs) => configs,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed cluster config");
                Vec::new()
            }
        }
    }

    /// Merge `discovered` into the persisted set and write it back.
    ///
    /// New records replace persisted ones with the same name; all other
    /// records survive. Returns the number of records written.
    pub fn save(&self, discovered: &[ClusterConfig]) -> Result<usize> {
        let mut merged: BTreeMap<String, ClusterConfig> = self
            .load()
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        for config in discovered {
            merged.insert(config.name.clone(), config.clone());
        }

        let configs: Vec<ClusterConfig> = merged.into_values().collect();
        self.write(&configs)?;
        info!(
            path = %self.path.display(),
            saved = discovered.len(),
            total = configs.len(),
            "cluster config saved"
        );
        Ok(configs.len())
    }

    /// Add or replace a single record
    pub fn upsert(&self, config: ClusterConfig) -> Result<usize> {
        self.save(std::slice::from_ref(&config))
    }

    /// Find a record by name, tolerating the `-admin` suffix on either side
    pub fn find(&self, name: &str) -> Result<ClusterConfig> {
        let wanted = normalize_cluster_name(name);
        let configs = self.load();

        configs
            .iter()
            .find(|c| c.name == name)
            .or_else(|| {
                configs
                    .iter()
                    .find(|c| normalize_cluster_name(&c.name) == wanted)
            })
            .cloned()
            .ok_or_else(|| Error::not_found("cluster config", name))
    }

    fn write(&self, configs: &[ClusterConfig]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
            }
        }
        let data = serde_json::to_string_pretty(configs)?;
        std::fs::write(&self.path, data).map_err(|e| Error::persistence(&self.path, e))?;
        debug!(path = %self.path.display(), count = configs.len(), "wrote cluster config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, rg: &str) -> ClusterConfig {
        ClusterConfig {
            name: name.to_string(),
            resource_group: rg.to_string(),
            subscription: "sub-1".to_string(),
        }
    }

    #[test]
    fn test_missing_or_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterConfigStore::at(dir.path().join("clusters-config.json"));
        assert!(store.load().is_empty());

        std::fs::write(store.path(), "[{ broken").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_upsert_replaces_matching_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterConfigStore::at(dir.path().join("clusters-config.json"));

        store.save(&[cfg("A", "rg1"), cfg("B", "rg2")]).unwrap();
        let total = store.save(&[cfg("A", "rg1-new")]).unwrap();

        assert_eq!(total, 2);
        assert_eq!(store.load(), vec![cfg("A", "rg1-new"), cfg("B", "rg2")]);
    }

    #[test]
    fn test_save_is_byte_identical_when_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterConfigStore::at(dir.path().join("clusters-config.json"));
        let set = [cfg("zeta", "rg-z"), cfg("alpha", "rg-a"), cfg("mid", "rg-m")];

        store.save(&set).unwrap();
        let first = std::fs::read(store.path()).unwrap();
        store.save(&set).unwrap();
        let second = std::fs::read(store.path()).unwrap();

        assert_eq!(first, second);
        let names: Vec<_> = store.load().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_file_format_uses_camel_case_and_two_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterConfigStore::at(dir.path().join("clusters-config.json"));
        store.upsert(cfg("akspriv-a", "rg-a")).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            raw,
            "[\n  {\n    \"clusterName\": \"akspriv-a\",\n    \"resourceGroup\": \"rg-a\",\n    \"subscription\": \"sub-1\"\n  }\n]"
        );
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterConfigStore::at(dir.path().join("nested/dir/clusters-config.json"));
        assert_eq!(store.upsert(cfg("a", "rg")).unwrap(), 1);
    }

    #[test]
    fn test_save_failure_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // The target path is a directory, so the write must fail
        let store = ClusterConfigStore::at(dir.path());
        assert!(matches!(
            store.save(&[cfg("a", "rg")]),
            Err(Error::Persistence { .. })
        ));
    }

    #[test]
    fn test_find_tolerates_admin_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterConfigStore::at(dir.path().join("clusters-config.json"));
        store
            .save(&[cfg("akspriv-a", "rg-a"), cfg("akspriv-b-admin", "rg-b")])
            .unwrap();

        assert_eq!(store.find("akspriv-a").unwrap().resource_group, "rg-a");
        assert_eq!(store.find("akspriv-a-admin").unwrap().resource_group, "rg-a");
        assert_eq!(store.find("akspriv-b").unwrap().resource_group, "rg-b");
        assert!(matches!(
            store.find("akspriv-c"),
            Err(Error::NotFound { .. })
        ));
    }
}
