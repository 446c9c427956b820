//! `aksfleet status`: test connectivity to a cluster's API server.

use std::sync::Arc;

use aksfleet_common::client_cache::KubeClients;
use aksfleet_common::kubeconfig::normalize_cluster_name;
use aksfleet_common::resolver::{ClusterResolver, ConnectionStatus, CONNECTION_TEST_TIMEOUT};
use clap::Args;

use super::{load_kubeconfig, FleetContext};
use crate::{Error, Result};

/// Test connectivity to a cluster's API server
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Cluster name (the kubeconfig context's cluster field)
    pub cluster: String,
}

pub async fn run(args: StatusArgs, kubeconfig: Option<&str>) -> Result<()> {
    let ctx = FleetContext::load()?;
    let (path, index) = load_kubeconfig(kubeconfig)?;
    let cluster = normalize_cluster_name(&args.cluster).to_string();

    let resolver = ClusterResolver::new(Arc::new(index), ctx.operator.clone(), ctx.guard.clone())
        .with_clients(Arc::new(KubeClients::new(path)));

    match resolver.test_connection(&cluster).await {
        ConnectionStatus::Connected { version } => {
            println!("✅ {} connected (Kubernetes {})", cluster, version);
            Ok(())
        }
        ConnectionStatus::Timeout => Err(Error::command_failed(format!(
            "{} did not answer within {:?}",
            cluster, CONNECTION_TEST_TIMEOUT
        ))),
        ConnectionStatus::Error { message } => Err(Error::command_failed(format!(
            "{} unreachable: {}",
            cluster, message
        ))),
    }
}
