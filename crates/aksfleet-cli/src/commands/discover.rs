//! `aksfleet discover`: resolve resource group and subscription for clusters.
//!
//! Without `--cluster`, every kubeconfig cluster whose name starts with the
//! configured prefix (default `akspriv-`) is discovered. Results are merged
//! into `~/.aksfleet/clusters-config.json` unless `--no-save` is given.
//! Ctrl-C cancels the run and keeps whatever finished.

use std::sync::Arc;

use aksfleet_common::client_cache::KubeClients;
use aksfleet_common::cluster_config::ClusterConfigStore;
use aksfleet_common::discovery::FleetDiscovery;
use aksfleet_common::resolver::ClusterResolver;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{load_kubeconfig, FleetContext};
use crate::{Error, Result};

/// Discover cloud metadata for clusters
#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Cluster to discover (repeatable; default: every prefixed kubeconfig cluster)
    #[arg(long = "cluster")]
    pub clusters: Vec<String>,

    /// Print results without updating the saved cluster configuration
    #[arg(long)]
    pub no_save: bool,
}

pub async fn run(args: DiscoverArgs, kubeconfig: Option<&str>) -> Result<()> {
    let ctx = FleetContext::load()?;
    let (path, index) = load_kubeconfig(kubeconfig)?;

    let names: Vec<String> = if args.clusters.is_empty() {
        index.discover_clusters(&ctx.settings.cluster_prefix)
    } else {
        args.clusters
    };
    if names.is_empty() {
        return Err(Error::command_failed(format!(
            "no clusters with prefix {} in {}",
            ctx.settings.cluster_prefix,
            path.display()
        )));
    }

    ctx.guard.ensure_authenticated().await?;

    let resolver = ClusterResolver::new(Arc::new(index), ctx.operator.clone(), ctx.guard.clone())
        .with_clients(Arc::new(KubeClients::new(path)));
    let discovery = FleetDiscovery::new(Arc::new(resolver));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling discovery");
            on_interrupt.cancel();
        }
    });

    println!("Discovering {} cluster(s)...", names.len());
    let report = discovery
        .discover_with_cancel(&names, |line| println!("{}", line), cancel)
        .await;

    if args.no_save {
        return Ok(());
    }
    if report.configs.is_empty() {
        println!("Nothing to save.");
        return Ok(());
    }

    let store = ClusterConfigStore::default_location()?;
    let total = report.save(&store)?;
    info!(path = %store.path().display(), total, "cluster configuration updated");
    println!(
        "Saved {} cluster(s) to {} ({} total).",
        report.configs.len(),
        store.path().display(),
        total
    );
    Ok(())
}
