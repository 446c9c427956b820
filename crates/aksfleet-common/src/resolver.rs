//! Cluster resolution: kubeconfig naming convention plus a subscription probe
//!
//! The resource group comes from the AKS credential name in the kubeconfig
//! (`clusterAdmin_<resourceGroup>_<clusterName>`). The subscription is found
//! by asking every visible subscription for the cluster until one answers.
//! That probe is linear in the number of subscriptions, which is fine because
//! it only runs during explicit discovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::client_cache::KubeClients;
use crate::cloud::{CloudCommand, CloudOperator};
use crate::cluster_config::ClusterConfig;
use crate::credentials::CredentialGuard;
use crate::kubeconfig::KubeconfigIndex;
use crate::{Error, Result};

/// Bound for the API server reachability probe
pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves one cluster name to its cloud coordinates
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Resource group and subscription of `cluster`
    async fn resolve(&self, cluster: &str) -> Result<ClusterConfig>;
}

/// Outcome of a cluster reachability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The API server answered
    Connected {
        /// Reported git version
        version: String,
    },
    /// No answer within [`CONNECTION_TEST_TIMEOUT`]
    Timeout,
    /// Client construction or the request failed
    Error {
        /// What went wrong
        message: String,
    },
}

/// Resolver backed by a kubeconfig and a cloud operator
pub struct ClusterResolver {
    kubeconfig: Arc<KubeconfigIndex>,
    operator: Arc<dyn CloudOperator>,
    guard: Arc<CredentialGuard>,
    clients: Option<Arc<KubeClients>>,
}

impl ClusterResolver {
    /// Create a resolver; cloud calls go through `operator`, reauth through `guard`
    pub fn new(
        kubeconfig: Arc<KubeconfigIndex>,
        operator: Arc<dyn CloudOperator>,
        guard: Arc<CredentialGuard>,
    ) -> Self {
        Self {
            kubeconfig,
            operator,
            guard,
            clients: None,
        }
    }

    /// Attach the caller-owned Kubernetes client cache
    pub fn with_clients(mut self, clients: Arc<KubeClients>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Subscriptions visible to the authenticated principal
    pub async fn list_subscriptions(&self) -> Result<Vec<String>> {
        let command = CloudCommand::ListSubscriptions;
        let output = self
            .guard
            .call("list subscriptions", || self.operator.execute(&command))
            .await?;
        Ok(output.lines().map(str::to_string).collect())
    }

    /// Check that the cluster's API server answers within the timeout.
    pub async fn test_connection(&self, cluster: &str) -> ConnectionStatus {
        let clients = match &self.clients {
            Some(clients) => clients,
            None => {
                return ConnectionStatus::Error {
                    message: "no Kubernetes client cache configured".to_string(),
                }
            }
        };
        let context = match self.kubeconfig.context_for_cluster(cluster) {
            Ok(ctx) => ctx.name.clone(),
            Err(e) => {
                return ConnectionStatus::Error {
                    message: e.to_string(),
                }
            }
        };

        let probe = async {
            let client = clients.client_for(cluster, &context).await?;
            Ok::<_, Error>(client.apiserver_version().await?)
        };

        match tokio::time::timeout(CONNECTION_TEST_TIMEOUT, probe).await {
            Ok(Ok(info)) => ConnectionStatus::Connected {
                version: info.git_version,
            },
            Ok(Err(e)) => ConnectionStatus::Error {
                message: e.to_string(),
            },
            Err(_) => ConnectionStatus::Timeout,
        }
    }
}

#[async_trait]
impl ClusterLookup for ClusterResolver {
    async fn resolve(&self, cluster: &str) -> Result<ClusterConfig> {
        let user = self.kubeconfig.user_for_cluster(cluster)?;
        let resource_group = resource_group_from_user(user)?;
        debug!(cluster = %cluster, resource_group = %resource_group, "resource group from kubeconfig");

        let subscriptions = self.list_subscriptions().await?;
        for subscription in &subscriptions {
            let command = CloudCommand::ShowCluster {
                name: cluster.to_string(),
                resource_group: resource_group.clone(),
                subscription: subscription.clone(),
            };
            let probe = self
                .guard
                .call("aks show", || self.operator.execute(&command))
                .await;
            match probe {
                Ok(output) => {
                    let resource_id = output.stdout.trim();
                    if resource_id.is_empty() {
                        continue;
                    }
                    let subscription = subscription_from_resource_id(resource_id)
                        .unwrap_or(subscription.as_str())
                        .to_string();
                    info!(cluster = %cluster, subscription = %subscription, "cluster resolved");
                    return Ok(ClusterConfig {
                        name: cluster.to_string(),
                        resource_group,
                        subscription,
                    });
                }
                // Still expired after the guard's single retry
                Err(e) if e.is_auth_expired() => return Err(e),
                Err(e) => {
                    debug!(cluster = %cluster, subscription = %subscription, error = %e, "not in subscription");
                }
            }
        }

        Err(Error::not_found("cluster in any visible subscription", cluster))
    }
}

/// Resource group from an AKS credential name (`prefix_resourceGroup_clusterName`)
pub fn resource_group_from_user(user: &str) -> Result<String> {
    let parts: Vec<&str> = user.split('_').collect();
    if parts.len() < 3 || parts[1].is_empty() {
        return Err(Error::configuration(format!(
            "credential name {} does not match prefix_resourceGroup_clusterName",
            user
        )));
    }
    Ok(parts[1].to_string())
}

/// Subscription id from an ARM resource id (`/subscriptions/<id>/...`)
pub fn subscription_from_resource_id(resource_id: &str) -> Option<&str> {
    let mut segments = resource_id.split('/');
    segments
        .find(|s| s.eq_ignore_ascii_case("subscriptions"))
        .and_then(|_| segments.next())
        .filter(|s| !s.is_empty())
}
