//! `aksfleet nodepool`: inspect node pools and apply sequential changes.
//!
//! `list` shows each pool's current count and autoscaler state. `apply`
//! applies each `--pool` in the order given, at most two per run. A pool arg
//! is either `NAME=COUNT` (autoscaler off, scale to COUNT) or
//! `NAME=MIN..MAX` (autoscaler on with bounds).
//!
//! # Usage
//!
//! ```bash
//! aksfleet nodepool list --cluster akspriv-payments-prd
//!
//! # Drain the spot pool, then let the on-demand pool autoscale
//! aksfleet nodepool apply --cluster akspriv-payments-prd \
//!     --pool spot=0 --pool ondemand=2..8 --session night-shift
//! ```

use std::sync::Arc;

use aksfleet_common::cluster_config::ClusterConfigStore;
use aksfleet_common::nodepool::{list_node_pools, NodePool, NodePoolOperation, SequentialExecutor};
use clap::{Args, Subcommand};

use super::FleetContext;
use crate::{Error, Result};

/// List or apply node-pool changes
#[derive(Args, Debug)]
pub struct NodepoolArgs {
    #[command(subcommand)]
    pub command: NodepoolCommand,
}

#[derive(Subcommand, Debug)]
pub enum NodepoolCommand {
    /// Show every node pool with its count and autoscaler state
    List {
        /// Cluster name as saved in the cluster configuration
        #[arg(long)]
        cluster: String,
    },
    /// Apply one or two node-pool changes in order, stopping at the first failure
    Apply {
        /// Cluster name as saved in the cluster configuration
        #[arg(long)]
        cluster: String,
        /// NAME=COUNT or NAME=MIN..MAX (repeat for a second pool)
        #[arg(long = "pool", required = true, value_parser = parse_pool_arg)]
        pools: Vec<NodePoolOperation>,
        /// Session name recorded in the history
        #[arg(long)]
        session: Option<String>,
    },
}

pub async fn run(args: NodepoolArgs) -> Result<()> {
    match args.command {
        NodepoolCommand::List { cluster } => list(&cluster).await,
        NodepoolCommand::Apply {
            cluster,
            pools,
            session,
        } => apply(&cluster, pools, session).await,
    }
}

async fn list(cluster: &str) -> Result<()> {
    let ctx = FleetContext::load()?;
    let config = ClusterConfigStore::default_location()?.find(cluster)?;

    ctx.guard.ensure_authenticated().await?;
    let pools = list_node_pools(ctx.operator.as_ref(), &ctx.guard, &config).await?;
    if pools.is_empty() {
        println!("No node pools in {}.", config.name);
        return Ok(());
    }
    print!("{}", format_pools(&pools));
    Ok(())
}

fn format_pools(pools: &[NodePool]) -> String {
    let name_width = pools
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0)
        .max("POOL".len());

    let mut out = format!(
        "{:<name_width$}  {:<6}  {:>5}  {:<10}  {:<9}  STATE\n",
        "POOL", "MODE", "COUNT", "AUTOSCALER", "MIN..MAX"
    );
    for p in pools {
        let (autoscaler, bounds) = match (p.enable_auto_scaling, p.min_count, p.max_count) {
            (true, Some(min), Some(max)) => ("on", format!("{}..{}", min, max)),
            (true, _, _) => ("on", "-".to_string()),
            (false, _, _) => ("off", "-".to_string()),
        };
        out.push_str(&format!(
            "{:<name_width$}  {:<6}  {:>5}  {:<10}  {:<9}  {}\n",
            p.name, p.mode, p.count, autoscaler, bounds, p.provisioning_state
        ));
    }
    out
}

async fn apply(cluster: &str, pools: Vec<NodePoolOperation>, session: Option<String>) -> Result<()> {
    let ctx = FleetContext::load()?;
    let config = ClusterConfigStore::default_location()?.find(cluster)?;
    let history = Arc::new(ctx.open_history().await?);

    ctx.guard.ensure_authenticated().await?;

    let operations: Vec<NodePoolOperation> = pools
        .into_iter()
        .enumerate()
        .map(|(i, op)| op.with_order(i as u32 + 1))
        .collect();

    let mut executor =
        SequentialExecutor::new(ctx.operator.clone(), ctx.guard.clone()).with_history(history.clone());
    if let Some(session) = session {
        executor = executor.with_session(session);
    }

    let report = executor.apply(&config, &operations).await?;
    history.flush().await;

    for result in &report.results {
        let mark = if result.success { "✅" } else { "❌" };
        println!(
            "{} [{}/{}] {} (*{}): {}",
            mark,
            result.step,
            operations.len(),
            result.pool_name,
            result.order,
            result.message
        );
    }

    if report.completed {
        println!("All {} node pool(s) applied.", operations.len());
        Ok(())
    } else {
        Err(Error::command_failed(format!(
            "sequential apply stopped after {} of {} step(s); earlier steps stay applied",
            report.results.len(),
            operations.len()
        )))
    }
}

/// Parse `NAME=COUNT` or `NAME=MIN..MAX`
pub fn parse_pool_arg(arg: &str) -> std::result::Result<NodePoolOperation, String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=COUNT or NAME=MIN..MAX, got {}", arg))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing node pool name in {}", arg));
    }

    let count = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid node count {:?} in {}", s, arg))
    };

    match value.split_once("..") {
        Some((min, max)) => {
            let (min, max) = (count(min)?, count(max)?);
            if min > max {
                return Err(format!("min {} exceeds max {} in {}", min, max, arg));
            }
            Ok(NodePoolOperation::autoscaled(name, min, max))
        }
        None => Ok(NodePoolOperation::manual(name, count(value)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;

    fn pool(name: &str, autoscaled: bool, count: u32, bounds: Option<(u32, u32)>) -> NodePool {
        NodePool {
            name: name.into(),
            vm_size: "Standard_D4s_v5".into(),
            count,
            min_count: bounds.map(|b| b.0),
            max_count: bounds.map(|b| b.1),
            enable_auto_scaling: autoscaled,
            mode: "User".into(),
            provisioning_state: "Succeeded".into(),
        }
    }

    #[test]
    fn test_pool_table_shows_autoscaler_state() {
        let table = format_pools(&[
            pool("spot", false, 0, None),
            pool("ondemand-large", true, 3, Some((2, 8))),
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("spot  "));
        assert!(lines[1].contains(" off "));
        assert!(lines[2].contains(" on "));
        assert!(lines[2].contains("2..8"));
        let column = lines[0].find("MODE").unwrap();
        assert_eq!(lines[1].find("User"), Some(column));
        assert_eq!(lines[2].find("User"), Some(column));
    }

    #[test]
    fn test_list_requires_cluster() {
        assert!(Cli::try_parse_from(["aksfleet", "nodepool", "list"]).is_err());
        assert!(
            Cli::try_parse_from(["aksfleet", "nodepool", "list", "--cluster", "akspriv-a"]).is_ok()
        );
    }

    #[test]
    fn test_parse_manual_arg() {
        let op = parse_pool_arg("spot=0").unwrap();
        assert_eq!(op, NodePoolOperation::manual("spot", 0));
    }

    #[test]
    fn test_parse_autoscaled_arg() {
        let op = parse_pool_arg("ondemand=2..8").unwrap();
        assert!(op.autoscaling_enabled);
        assert_eq!((op.min_node_count, op.max_node_count), (2, 8));
    }

    #[test]
    fn test_reject_bad_pool_args() {
        assert!(parse_pool_arg("spot").is_err());
        assert!(parse_pool_arg("=3").is_err());
        assert!(parse_pool_arg("spot=-1").is_err());
        assert!(parse_pool_arg("spot=5..2").is_err());
        assert!(parse_pool_arg("spot=a..b").is_err());
    }

    #[test]
    fn test_pool_flags_keep_order() {
        let cli = Cli::try_parse_from([
            "aksfleet",
            "nodepool",
            "apply",
            "--cluster",
            "akspriv-a",
            "--pool",
            "spot=0",
            "--pool",
            "ondemand=1..4",
        ])
        .unwrap();
        let crate::Commands::Nodepool(NodepoolArgs {
            command: NodepoolCommand::Apply { pools, .. },
        }) = cli.command
        else {
            panic!("expected nodepool apply");
        };
        assert_eq!(pools[0].name, "spot");
        assert_eq!(pools[1].name, "ondemand");
    }
}
