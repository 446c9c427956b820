//! `aksfleet clusters`: show or edit `~/.aksfleet/clusters-config.json`.

use aksfleet_common::cluster_config::{ClusterConfig, ClusterConfigStore};
use clap::{Args, Subcommand};

use crate::{Error, Result};

/// Show or edit the saved cluster configuration
#[derive(Args, Debug)]
pub struct ClustersArgs {
    #[command(subcommand)]
    pub command: ClustersCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClustersCommand {
    /// List saved clusters
    List,
    /// Add or replace one cluster record
    Add {
        /// Cluster name
        #[arg(long)]
        name: String,
        /// Resource group
        #[arg(long)]
        resource_group: String,
        /// Subscription id
        #[arg(long)]
        subscription: String,
    },
}

pub async fn run(args: ClustersArgs) -> Result<()> {
    let store = ClusterConfigStore::default_location()?;
    match args.command {
        ClustersCommand::List => {
            let configs = store.load();
            if configs.is_empty() {
                println!("No clusters saved. Run `aksfleet discover` first.");
                return Ok(());
            }
            print!("{}", format_table(&configs));
        }
        ClustersCommand::Add {
            name,
            resource_group,
            subscription,
        } => {
            if name.is_empty() || resource_group.is_empty() || subscription.is_empty() {
                return Err(Error::validation(
                    "name, resource group and subscription must be non-empty",
                ));
            }
            let total = store.upsert(ClusterConfig {
                name: name.clone(),
                resource_group,
                subscription,
            })?;
            println!("Saved {} ({} cluster(s) total).", name, total);
        }
    }
    Ok(())
}

fn format_table(configs: &[ClusterConfig]) -> String {
    let name_width = configs
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0)
        .max("CLUSTER".len());
    let rg_width = configs
        .iter()
        .map(|c| c.resource_group.len())
        .max()
        .unwrap_or(0)
        .max("RESOURCE GROUP".len());

    let mut out = format!(
        "{:<name_width$}  {:<rg_width$}  SUBSCRIPTION\n",
        "CLUSTER", "RESOURCE GROUP"
    );
    for c in configs {
        out.push_str(&format!(
            "{:<name_width$}  {:<rg_width$}  {}\n",
            c.name, c.resource_group, c.subscription
        ));
    }
    out
}
