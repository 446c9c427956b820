//! aksfleet CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// aksfleet - AKS fleet discovery and node-pool operations
#[derive(Parser, Debug)]
#[command(name = "aksfleet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Kubeconfig to read (defaults: AKSFLEET_KUBECONFIG, KUBECONFIG, ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve resource group and subscription for every cluster
    Discover(commands::discover::DiscoverArgs),
    /// Show or edit the saved cluster configuration
    Clusters(commands::clusters::ClustersArgs),
    /// Apply node-pool changes in sequence
    Nodepool(commands::nodepool::NodepoolArgs),
    /// Query or clear the operation history
    History(commands::history::HistoryArgs),
    /// Check cloud credentials and log in if needed
    Login(commands::login::LoginArgs),
    /// Test connectivity to a cluster's API server
    Status(commands::status::StatusArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let kubeconfig = self.kubeconfig.as_deref();
        match self.command {
            Commands::Discover(args) => commands::discover::run(args, kubeconfig).await,
            Commands::Clusters(args) => commands::clusters::run(args).await,
            Commands::Nodepool(args) => commands::nodepool::run(args).await,
            Commands::History(args) => commands::history::run(args).await,
            Commands::Login(args) => commands::login::run(args).await,
            Commands::Status(args) => commands::status::run(args, kubeconfig).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_kubeconfig_after_subcommand() {
        let cli = Cli::try_parse_from([
            "aksfleet",
            "discover",
            "--kubeconfig",
            "/tmp/kc",
            "--cluster",
            "akspriv-a",
        ])
        .unwrap();
        assert_eq!(cli.kubeconfig.as_deref(), Some("/tmp/kc"));
        assert!(matches!(cli.command, Commands::Discover(_)));
    }
}
