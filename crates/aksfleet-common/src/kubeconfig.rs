//! Kubeconfig context metadata
//!
//! Only the context list matters here: which context points at which cluster,
//! and which user (credential) it authenticates with. The AKS user name encodes
//! the resource group (`clusterAdmin_<resourceGroup>_<clusterName>`), which is
//! what cluster resolution reads. Everything else in the file is left to kube-rs.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

/// Suffix the AKS admin credentials add to context names.
pub const ADMIN_SUFFIX: &str = "-admin";

/// The slice of a kubeconfig this crate reads
#[derive(Debug, Clone, Default, Deserialize)]
struct KubeconfigFile {
    #[serde(default)]
    contexts: Vec<NamedContext>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedContext {
    name: String,
    #[serde(default)]
    context: Option<ContextEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

/// One kubeconfig context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    /// Context name (e.g. `akspriv-prod-admin`)
    pub name: String,
    /// Value of the context's `cluster` field
    pub cluster: String,
    /// Value of the context's `user` field
    pub user: Option<String>,
}

/// Context lookup table built from a kubeconfig
#[derive(Debug, Clone, Default)]
pub struct KubeconfigIndex {
    contexts: Vec<ContextInfo>,
}

impl KubeconfigIndex {
    /// Load and index a kubeconfig file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::persistence(path, e))?;
        Self::from_yaml(&raw)
    }

    /// Index kubeconfig YAML (JSON is valid YAML, so both are accepted).
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: KubeconfigFile = serde_yaml::from_str(raw)?;
        let contexts = file
            .contexts
            .into_iter()
            .filter_map(|named| {
                named.context.map(|ctx| ContextInfo {
                    name: named.name,
                    cluster: ctx.cluster,
                    user: ctx.user.filter(|u| !u.is_empty()),
                })
            })
            .collect();

        Ok(Self { contexts })
    }

    /// Find the context whose `cluster` field equals `cluster`.
    ///
    /// The first match in file order wins.
    pub fn context_for_cluster(&self, cluster: &str) -> Result<&ContextInfo> {
        self.contexts
            .iter()
            .find(|ctx| ctx.cluster == cluster)
            .ok_or_else(|| Error::not_found("kubeconfig context for cluster", cluster))
    }

    /// Credential identifier of the context pointing at `cluster`.
    pub fn user_for_cluster(&self, cluster: &str) -> Result<&str> {
        let ctx = self.context_for_cluster(cluster)?;
        ctx.user.as_deref().ok_or_else(|| {
            Error::configuration(format!(
                "context {} for cluster {} has no user",
                ctx.name, cluster
            ))
        })
    }

    /// Clusters whose name starts with `prefix`, deduplicated and sorted.
    ///
    /// Several contexts may point at the same cluster; it is listed once.
    pub fn discover_clusters(&self, prefix: &str) -> Vec<String> {
        self.contexts
            .iter()
            .filter(|ctx| ctx.cluster.starts_with(prefix))
            .map(|ctx| ctx.cluster.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Strip the `-admin` suffix that admin contexts carry.
pub fn normalize_cluster_name(name: &str) -> &str {
    name.strip_suffix(ADMIN_SUFFIX).unwrap_or(name)
}

#[cfg(test)]
pub(crate) const SAMPLE_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: akspriv-payments-prd-admin
clusters:
- name: akspriv-payments-prd
  cluster:
    server: https://payments-prd.hcp.eastus.azmk8s.io:443
- name: akspriv-billing-hlg
  cluster:
    server: https://billing-hlg.hcp.eastus.azmk8s.io:443
- name: kind-local
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: akspriv-payments-prd-admin
  context:
    cluster: akspriv-payments-prd
    user: clusterAdmin_rg-payments-prd_akspriv-payments-prd
- name: akspriv-billing-hlg-admin
  context:
    cluster: akspriv-billing-hlg
    user: clusterAdmin_rg-billing-hlg_akspriv-billing-hlg
- name: akspriv-billing-hlg-readonly
  context:
    cluster: akspriv-billing-hlg
    user: clusterUser_rg-billing-hlg_akspriv-billing-hlg
- name: kind-local
  context:
    cluster: kind-local
    user: kind-local
users: []
"#;
