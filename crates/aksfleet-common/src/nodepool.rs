//! Sequential node-pool mutation
//!
//! Applies one or two node-pool operations strictly in list order. Each
//! operation is either "autoscaler off, then scale to N" or "autoscaler on
//! with min/max". The first failure stops the run; already applied steps are
//! not rolled back, so callers read the per-step results to see how far it
//! got. Between two steps the executor waits [`STEP_SETTLE_DELAY`] for the
//! control plane to converge. Never run two executors against the same pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cloud::{CloudCommand, CloudOperator, NodePoolTarget};
use crate::cluster_config::ClusterConfig;
use crate::credentials::CredentialGuard;
use crate::history::{HistoryAction, HistoryEntry, HistoryStatus, HistoryTracker};
use crate::kubeconfig::normalize_cluster_name;
use crate::{Error, Result};

/// Wait between two operations. Fixed; the cloud control plane needs it.
pub const STEP_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Wait between disabling the autoscaler and scaling the same pool
pub const COMMAND_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Most operations one sequential run accepts
pub const MAX_SEQUENTIAL_OPERATIONS: usize = 2;

/// Desired state of one node pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolOperation {
    /// Node pool name
    pub name: String,
    /// Autoscaler on (min/max apply) or off (node_count applies)
    pub autoscaling_enabled: bool,
    /// Fixed node count when the autoscaler is off
    pub node_count: u32,
    /// Autoscaler minimum
    pub min_node_count: u32,
    /// Autoscaler maximum
    pub max_node_count: u32,
    /// Display ordinal only; execution follows list order
    pub order: u32,
}

impl NodePoolOperation {
    /// Autoscaler off, scale to `node_count`
    pub fn manual(name: impl Into<String>, node_count: u32) -> Self {
        Self {
            name: name.into(),
            autoscaling_enabled: false,
            node_count,
            min_node_count: 0,
            max_node_count: 0,
            order: 0,
        }
    }

    /// Autoscaler on with bounds
    pub fn autoscaled(name: impl Into<String>, min_node_count: u32, max_node_count: u32) -> Self {
        Self {
            name: name.into(),
            autoscaling_enabled: true,
            node_count: 0,
            min_node_count,
            max_node_count,
            order: 0,
        }
    }

    /// Set the display ordinal
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("node pool name is empty"));
        }
        if self.autoscaling_enabled && self.min_node_count > self.max_node_count {
            return Err(Error::validation(format!(
                "node pool {}: min count {} exceeds max count {}",
                self.name, self.min_node_count, self.max_node_count
            )));
        }
        Ok(())
    }

    fn commands(&self, cluster: &ClusterConfig, cluster_name: &str) -> Vec<CloudCommand> {
        let pool = NodePoolTarget {
            cluster: cluster_name.to_string(),
            resource_group: cluster.resource_group.clone(),
            subscription: cluster.subscription.clone(),
            pool: self.name.clone(),
        };
        if self.autoscaling_enabled {
            vec![CloudCommand::EnableAutoscaler {
                pool,
                min_count: self.min_node_count,
                max_count: self.max_node_count,
            }]
        } else {
            vec![
                CloudCommand::DisableAutoscaler { pool: pool.clone() },
                CloudCommand::ScaleNodePool {
                    pool,
                    node_count: self.node_count,
                },
            ]
        }
    }
}

/// Current state of a node pool, as `az aks nodepool list` reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    /// Node pool name
    pub name: String,
    /// VM size of the pool's nodes
    #[serde(default)]
    pub vm_size: String,
    /// Current node count
    #[serde(default)]
    pub count: u32,
    /// Autoscaler minimum, unset while the autoscaler is off
    #[serde(default)]
    pub min_count: Option<u32>,
    /// Autoscaler maximum, unset while the autoscaler is off
    #[serde(default)]
    pub max_count: Option<u32>,
    /// Whether the cluster autoscaler manages this pool
    #[serde(default)]
    pub enable_auto_scaling: bool,
    /// `System` or `User`
    #[serde(default)]
    pub mode: String,
    /// Provisioning state (e.g. `Succeeded`, `Scaling`)
    #[serde(default)]
    pub provisioning_state: String,
}

/// Node pools of `cluster`, sorted by name.
///
/// Goes through `guard`, so an expired grant is recovered and the listing
/// retried once.
pub async fn list_node_pools(
    operator: &dyn CloudOperator,
    guard: &CredentialGuard,
    cluster: &ClusterConfig,
) -> Result<Vec<NodePool>> {
    let command = CloudCommand::ListNodePools {
        cluster: normalize_cluster_name(&cluster.name).to_string(),
        resource_group: cluster.resource_group.clone(),
        subscription: cluster.subscription.clone(),
    };
    let output = guard
        .call("nodepool list", || operator.execute(&command))
        .await?;
    let mut pools: Vec<NodePool> = serde_json::from_str(&output.stdout)?;
    pools.sort_by(|a, b| a.name.cmp(&b.name));
    info!(cluster = %cluster.name, pools = pools.len(), "node pools listed");
    Ok(pools)
}

/// Outcome of one attempted operation
#[derive(Debug)]
pub struct SequentialApplyResult {
    /// 1-based position in the run
    pub step: usize,
    /// Node pool name
    pub pool_name: String,
    /// Display ordinal copied from the operation
    pub order: u32,
    /// Whether every command of the step succeeded
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Failure cause when `success` is false
    pub error: Option<Error>,
}

/// Per-step results of a sequential run
#[derive(Debug, Default)]
pub struct SequentialApplyReport {
    /// One entry per attempted step; a failure is always the last entry
    pub results: Vec<SequentialApplyResult>,
    /// True only if every requested operation succeeded
    pub completed: bool,
}

/// Applies node-pool operations one at a time, fail-fast
pub struct SequentialExecutor {
    operator: Arc<dyn CloudOperator>,
    guard: Arc<CredentialGuard>,
    history: Option<Arc<HistoryTracker>>,
    session: Option<String>,
}

impl SequentialExecutor {
    /// Executor issuing commands through `operator`, recovering auth via `guard`
    pub fn new(operator: Arc<dyn CloudOperator>, guard: Arc<CredentialGuard>) -> Self {
        Self {
            operator,
            guard,
            history: None,
            session: None,
        }
    }

    /// Log every attempted step to `history`
    pub fn with_history(mut self, history: Arc<HistoryTracker>) -> Self {
        self.history = Some(history);
        self
    }

    /// Session name recorded on history entries
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Apply `operations` to `cluster` in order.
    ///
    /// Returns `Err` only for invalid input, before anything runs. Cloud
    /// failures end the run and show up as the last result.
    pub async fn apply(
        &self,
        cluster: &ClusterConfig,
        operations: &[NodePoolOperation],
    ) -> Result<SequentialApplyReport> {
        if operations.is_empty() || operations.len() > MAX_SEQUENTIAL_OPERATIONS {
            return Err(Error::validation(format!(
                "sequential apply takes 1 to {} node pools, got {}",
                MAX_SEQUENTIAL_OPERATIONS,
                operations.len()
            )));
        }
        for op in operations {
            op.validate()?;
        }

        let cluster_name = normalize_cluster_name(&cluster.name);
        let total = operations.len();
        let mut report = SequentialApplyReport::default();

        for (i, op) in operations.iter().enumerate() {
            let step = i + 1;
            if i > 0 {
                info!(
                    next_pool = %op.name,
                    delay = ?STEP_SETTLE_DELAY,
                    "waiting for control plane before next node pool"
                );
                tokio::time::sleep(STEP_SETTLE_DELAY).await;
            }

            info!(cluster = %cluster_name, pool = %op.name, step, total, "applying node pool");
            let started = Instant::now();
            let outcome = self.apply_one(cluster, cluster_name, op).await;
            let elapsed = started.elapsed();

            let result = match outcome {
                Ok(()) => {
                    info!(cluster = %cluster_name, pool = %op.name, step, "node pool applied");
                    SequentialApplyResult {
                        step,
                        pool_name: op.name.clone(),
                        order: op.order,
                        success: true,
                        message: format!("node pool {} applied", op.name),
                        error: None,
                    }
                }
                Err(e) => {
                    error!(cluster = %cluster_name, pool = %op.name, step, error = %e, "node pool apply failed");
                    SequentialApplyResult {
                        step,
                        pool_name: op.name.clone(),
                        order: op.order,
                        success: false,
                        message: format!("node pool {} failed at step {}: {}", op.name, step, e),
                        error: Some(e),
                    }
                }
            };

            self.record(cluster_name, op, &result, elapsed).await;
            let failed = !result.success;
            report.results.push(result);
            if failed {
                return Ok(report);
            }
        }

        report.completed = true;
        Ok(report)
    }

    async fn apply_one(
        &self,
        cluster: &ClusterConfig,
        cluster_name: &str,
        op: &NodePoolOperation,
    ) -> Result<()> {
        let commands = op.commands(cluster, cluster_name);
        let count = commands.len();
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(COMMAND_SETTLE_DELAY).await;
            }
            info!(command = %command, "running {}/{}", i + 1, count);
            let name = command.to_string();
            self.guard
                .call(&name, || self.operator.execute(command))
                .await?;
        }
        Ok(())
    }

    async fn record(
        &self,
        cluster_name: &str,
        op: &NodePoolOperation,
        result: &SequentialApplyResult,
        elapsed: Duration,
    ) {
        let Some(history) = &self.history else {
            return;
        };

        let after = match serde_json::to_value(op) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => serde_json::Map::new(),
            Err(e) => {
                warn!(error = %e, "failed to serialize node pool operation for history");
                serde_json::Map::new()
            }
        };

        let mut entry = HistoryEntry::new(HistoryAction::ApplyNodepool, cluster_name, &op.name);
        entry.after = after;
        entry.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        entry.session_name = self.session.clone().unwrap_or_default();
        if result.success {
            entry.status = HistoryStatus::Success;
        } else {
            entry.status = HistoryStatus::Failed;
            entry.error_msg = result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
        }
        history.log(entry).await;
    }
}
