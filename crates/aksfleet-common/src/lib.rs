//! Fleet orchestration for managed Kubernetes clusters on Azure: discovery,
//! credential recovery, sequential node-pool mutation and operation history.

#![deny(missing_docs)]

pub mod client_cache;
pub mod cloud;
pub mod cluster_config;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod history;
pub mod kubeconfig;
pub mod nodepool;
pub mod resolver;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
