//! Fleet discovery: resolve every cluster concurrently, report in input order
//!
//! One task per cluster, admitted through a semaphore so at most
//! [`MAX_CONCURRENT_DISCOVERIES`] lookups are in flight. Workers report
//! `(index, result)` over a channel and the coordinator waits for exactly one
//! message per cluster before reordering by index. A failing cluster never
//! affects another. Cancelling the token releases every worker; clusters that
//! had not finished are reported as [`Error::Cancelled`].

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster_config::{ClusterConfig, ClusterConfigStore};
use crate::resolver::ClusterLookup;
use crate::{Error, Result};

/// Upper bound on concurrent cluster lookups
pub const MAX_CONCURRENT_DISCOVERIES: usize = 10;

/// Subscription prefix length shown in progress lines
const SUBSCRIPTION_PREVIEW_LEN: usize = 8;

/// A cluster that could not be resolved
#[derive(Debug)]
pub struct DiscoveryFailure {
    /// Position in the input list
    pub index: usize,
    /// Cluster name
    pub cluster: String,
    /// Why resolution failed
    pub error: Error,
}

/// Outcome of one discovery run, both lists in input order
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Resolved clusters
    pub configs: Vec<ClusterConfig>,
    /// Clusters that failed
    pub failures: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    /// Number of clusters attempted
    pub fn total(&self) -> usize {
        self.configs.len() + self.failures.len()
    }

    /// Upsert the resolved clusters into `store`, returning the stored total
    pub fn save(&self, store: &ClusterConfigStore) -> Result<usize> {
        store.save(&self.configs)
    }
}

/// Bounded-concurrency fan-out of a [`ClusterLookup`]
pub struct FleetDiscovery {
    lookup: Arc<dyn ClusterLookup>,
    concurrency: usize,
}

impl FleetDiscovery {
    /// Coordinator admitting [`MAX_CONCURRENT_DISCOVERIES`] lookups at once
    pub fn new(lookup: Arc<dyn ClusterLookup>) -> Self {
        Self {
            lookup,
            concurrency: MAX_CONCURRENT_DISCOVERIES,
        }
    }

    /// Use a tighter admission limit (clamped to `1..=MAX_CONCURRENT_DISCOVERIES`)
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.clamp(1, MAX_CONCURRENT_DISCOVERIES);
        self
    }

    /// Resolve every cluster in `names`, calling `progress` once per cluster in input order.
    pub async fn discover<P>(&self, names: &[String], progress: P) -> DiscoveryReport
    where
        P: Fn(&str),
    {
        self.discover_with_cancel(names, progress, CancellationToken::new())
            .await
    }

    /// Like [`discover`](Self::discover), stopping early when `cancel` fires.
    pub async fn discover_with_cancel<P>(
        &self,
        names: &[String],
        progress: P,
        cancel: CancellationToken,
    ) -> DiscoveryReport
    where
        P: Fn(&str),
    {
        let total = names.len();
        info!(clusters = total, concurrency = self.concurrency, "starting fleet discovery");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<(usize, Result<ClusterConfig>)>(total.max(1));

        for (index, name) in names.iter().enumerate() {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let lookup = self.lookup.clone();
            let cancel = cancel.clone();
            let name = name.clone();

            tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    result = async {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| Error::Cancelled)?;
                        debug!(cluster = %name, "resolving");
                        lookup.resolve(&name).await
                    } => result,
                };
                // The receiver only goes away if the coordinator itself was dropped
                let _ = tx.send((index, result)).await;
            });
        }
        drop(tx);

        let mut slots: Vec<Option<Result<ClusterConfig>>> = (0..total).map(|_| None).collect();
        let mut received = 0;
        while received < total {
            let Some((index, result)) = rx.recv().await else {
                break;
            };
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
            received += 1;
        }

        let mut report = DiscoveryReport::default();
        for (index, (name, slot)) in names.iter().zip(slots).enumerate() {
            // A worker that panicked never reports; count it as not finished
            let result = slot.unwrap_or(Err(Error::Cancelled));
            match result {
                Ok(config) => {
                    progress(&format!(
                        "[{}/{}] ✅ {} - RG: {}, Sub: {}...",
                        index + 1,
                        total,
                        name,
                        config.resource_group,
                        subscription_preview(&config.subscription)
                    ));
                    report.configs.push(config);
                }
                Err(error) => {
                    progress(&format!("[{}/{}] ❌ {}: {}", index + 1, total, name, error));
                    report.failures.push(DiscoveryFailure {
                        index,
                        cluster: name.clone(),
                        error,
                    });
                }
            }
        }

        progress(&format!(
            "📊 Summary: ✅ {} succeeded | ❌ {} failed",
            report.configs.len(),
            report.failures.len()
        ));
        info!(
            succeeded = report.configs.len(),
            failed = report.failures.len(),
            "fleet discovery finished"
        );
        report
    }
}

fn subscription_preview(subscription: &str) -> String {
    subscription.chars().take(SUBSCRIPTION_PREVIEW_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fake lookup with per-cluster latency, failures and an in-flight gauge
    #[derive(Default)]
    struct FakeLookup {
        failing: HashSet<String>,
        hanging: HashSet<String>,
        latency: Vec<(String, Duration)>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ClusterLookup for FakeLookup {
        async fn resolve(&self, cluster: &str) -> Result<ClusterConfig> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.hanging.contains(cluster) {
                std::future::pending::<()>().await;
            }
            let delay = self
                .latency
                .iter()
                .find(|(name, _)| name == cluster)
                .map(|(_, d)| *d)
                .unwrap_or(Duration::from_millis(50));
            tokio::time::sleep(delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.failing.contains(cluster) {
                return Err(Error::not_found("cluster in any visible subscription", cluster));
            }
            Ok(ClusterConfig {
                name: cluster.to_string(),
                resource_group: format!("rg-{}", cluster),
                subscription: "0123456789abcdef".to_string(),
            })
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("akspriv-{:02}", i)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_partitioned_and_order_is_input_order() {
        let clusters = names(6);
        let lookup = FakeLookup {
            failing: ["akspriv-01", "akspriv-04"].iter().map(|s| s.to_string()).collect(),
            // Later clusters finish first
            latency: clusters
                .iter()
                .enumerate()
                .map(|(i, n)| (n.clone(), Duration::from_millis(600 - 100 * i as u64)))
                .collect(),
            ..Default::default()
        };
        let discovery = FleetDiscovery::new(Arc::new(lookup));
        let lines = Mutex::new(Vec::new());

        let report = discovery
            .discover(&clusters, |line| lines.lock().push(line.to_string()))
            .await;

        assert_eq!(report.total(), 6);
        assert_eq!(report.configs.len(), 4);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(
            report.configs.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["akspriv-00", "akspriv-02", "akspriv-03", "akspriv-05"]
        );
        assert_eq!(report.failures[0].cluster, "akspriv-01");
        assert_eq!(report.failures[1].index, 4);

        let lines = lines.into_inner();
        assert_eq!(lines.len(), 7);
        for (i, line) in lines.iter().take(6).enumerate() {
            assert!(line.starts_with(&format!("[{}/6]", i + 1)), "{line}");
        }
        assert_eq!(lines[0], "[1/6] ✅ akspriv-00 - RG: rg-akspriv-00, Sub: 01234567...");
        assert!(lines[1].starts_with("[2/6] ❌ akspriv-01: "));
        assert_eq!(lines[6], "📊 Summary: ✅ 4 succeeded | ❌ 2 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_more_than_ten_lookups_in_flight() {
        let lookup = Arc::new(FakeLookup::default());
        let discovery = FleetDiscovery::new(lookup.clone());

        let report = discovery.discover(&names(26), |_| {}).await;

        assert_eq!(report.configs.len(), 26);
        let max = lookup.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= MAX_CONCURRENT_DISCOVERIES, "observed {max} concurrent lookups");
        assert!(max > 1, "lookups never overlapped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tighter_concurrency_limit() {
        let lookup = Arc::new(FakeLookup::default());
        let discovery = FleetDiscovery::new(lookup.clone()).with_concurrency(3);

        discovery.discover(&names(12), |_| {}).await;
        assert!(lookup.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_partial_results() {
        let clusters = names(5);
        let lookup = FakeLookup {
            hanging: ["akspriv-03", "akspriv-04"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let discovery = FleetDiscovery::new(Arc::new(lookup));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let report = discovery
            .discover_with_cancel(&clusters, |_| {}, cancel)
            .await;

        assert_eq!(report.configs.len(), 3);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let discovery = FleetDiscovery::new(Arc::new(FakeLookup::default()));
        let lines = Mutex::new(Vec::new());
        let report = discovery
            .discover(&[], |line| lines.lock().push(line.to_string()))
            .await;
        assert_eq!(report.total(), 0);
        assert_eq!(
            lines.into_inner(),
            vec!["📊 Summary: ✅ 0 succeeded | ❌ 0 failed".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_saves_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterConfigStore::at(dir.path().join("clusters-config.json"));
        let discovery = FleetDiscovery::new(Arc::new(FakeLookup::default()));

        let report = discovery.discover(&names(3), |_| {}).await;
        assert_eq!(report.save(&store).unwrap(), 3);
        assert_eq!(store.load().len(), 3);
    }
}
