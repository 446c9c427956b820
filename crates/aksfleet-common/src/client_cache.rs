//! Per-cluster client cache
//!
//! Clients are keyed by cluster name and built at most once per key, even when
//! several tasks ask for the same cluster at the same time. The cache is an
//! explicit object owned by the caller; nothing here is global.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{Error, Result};

/// Concurrency-safe map of lazily constructed clients
pub struct ClientCache<C> {
    entries: DashMap<String, Arc<OnceCell<C>>>,
}

impl<C: Clone> ClientCache<C> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the cached client for `name`, building it with `factory` if absent.
    ///
    /// Concurrent callers for the same key wait on one construction. A failed
    /// construction is not cached; the next caller tries again.
    pub async fn get_or_try_init<F, Fut>(&self, name: &str, factory: F) -> Result<C>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        // Clone the cell out so the shard lock is not held across the await
        let cell = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let client = cell
            .get_or_try_init(|| async move {
                debug!(cluster = %name, "building client");
                factory().await
            })
            .await?;
        Ok(client.clone())
    }

    /// Drop the cached client for `name`
    pub fn invalidate(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Drop every cached client
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of initialised clients
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// True if no client has been built yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Clone> Default for ClientCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Kubernetes clients for the contexts of one kubeconfig file
pub struct KubeClients {
    kubeconfig: PathBuf,
    cache: ClientCache<Client>,
}

impl KubeClients {
    /// Cache for clients built from `kubeconfig`
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            cache: ClientCache::new(),
        }
    }

    /// Client for `cluster` using the kubeconfig context `context`
    pub async fn client_for(&self, cluster: &str, context: &str) -> Result<Client> {
        let path = self.kubeconfig.clone();
        let context = context.to_string();
        self.cache
            .get_or_try_init(cluster, || build_client(path, context))
            .await
    }

    /// Forget the client for `cluster` (after credentials rotate, for example)
    pub fn invalidate(&self, cluster: &str) -> bool {
        self.cache.invalidate(cluster)
    }

    /// Number of clients built so far
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if no client has been built yet
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

async fn build_client(path: PathBuf, context: String) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
        Error::configuration(format!(
            "failed to read kubeconfig {}: {}",
            path.display(),
            e
        ))
    })?;
    let options = KubeConfigOptions {
        context: Some(context.clone()),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| {
            Error::configuration(format!("invalid kubeconfig context {}: {}", context, e))
        })?;
    Ok(Client::try_from(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_build_once() {
        let cache: Arc<ClientCache<String>> = Arc::new(ClientCache::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_init("akspriv-a", || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("client-a".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "client-a");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let cache: ClientCache<String> = ClientCache::new();

        let err = cache
            .get_or_try_init("akspriv-a", || async {
                Err(Error::configuration("no credentials"))
            })
            .await;
        assert!(err.is_err());
        assert!(cache.is_empty());

        let ok = cache
            .get_or_try_init("akspriv-a", || async { Ok("second".to_string()) })
            .await
            .unwrap();
        assert_eq!(ok, "second");
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let cache: ClientCache<u32> = ClientCache::new();
        cache.get_or_try_init("a", || async { Ok(1) }).await.unwrap();
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));

        let rebuilt = cache.get_or_try_init("a", || async { Ok(2) }).await.unwrap();
        assert_eq!(rebuilt, 2);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_is_configuration_error() {
        let clients = KubeClients::new("/nonexistent/aksfleet/kubeconfig");
        let err = clients.client_for("akspriv-a", "akspriv-a-admin").await;
        assert!(matches!(err, Err(Error::Configuration { .. })));
        assert!(clients.is_empty());
    }
}
