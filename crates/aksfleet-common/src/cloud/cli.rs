//! Azure CLI subprocess operator

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CloudCommand, CloudOperator, CommandOutput};
use crate::config::CommandTimeouts;
use crate::{Error, Result};

/// Scope requested when logging in against a specific tenant.
const MANAGEMENT_SCOPE: &str = "https://management.core.windows.net//.default";

/// Decides whether a failed call's output means "credentials expired"
pub trait AuthFailureClassifier: Send + Sync {
    /// True if `output` describes an expired or missing grant
    fn is_auth_failure(&self, output: &str) -> bool;
}

/// Matches known literal substrings in CLI output.
///
/// Fragile by nature: it depends on the exact wording of Azure AD errors.
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    patterns: Vec<String>,
}

impl SubstringClassifier {
    /// Classifier with custom patterns
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self::new([
            "AADSTS50173",
            "The provided grant has expired",
            "expired",
            "authentication",
        ])
    }
}

impl AuthFailureClassifier for SubstringClassifier {
    fn is_auth_failure(&self, output: &str) -> bool {
        self.patterns.iter().any(|p| output.contains(p.as_str()))
    }
}

/// Runs cloud commands through the `az` binary
pub struct CliOperator {
    program: String,
    timeouts: CommandTimeouts,
    classifier: Arc<dyn AuthFailureClassifier>,
}

impl CliOperator {
    /// Operator invoking `az` from `PATH`
    pub fn new(timeouts: CommandTimeouts) -> Self {
        Self {
            program: "az".to_string(),
            timeouts,
            classifier: Arc::new(SubstringClassifier::default()),
        }
    }

    /// Use a different executable (wrappers, tests)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Replace the auth failure classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn AuthFailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn timeout_for(&self, command: &CloudCommand) -> Duration {
        match command {
            CloudCommand::AccountShow | CloudCommand::AccessTokenProbe | CloudCommand::Logout => {
                self.timeouts.probe
            }
            CloudCommand::Login { .. } => self.timeouts.login,
            _ => self.timeouts.command,
        }
    }
}

/// argv (without the program) for a command
fn cli_args(command: &CloudCommand) -> Vec<String> {
    fn pool_args(verb: &str, pool: &super::NodePoolTarget) -> Vec<String> {
        [
            "aks",
            "nodepool",
            verb,
            "--resource-group",
            pool.resource_group.as_str(),
            "--cluster-name",
            pool.cluster.as_str(),
            "--name",
            pool.pool.as_str(),
            "--subscription",
            pool.subscription.as_str(),
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    let mut args: Vec<String> = match command {
        CloudCommand::AccountShow => vec![
            "account".into(),
            "show".into(),
            "--output".into(),
            "json".into(),
        ],
        CloudCommand::AccessTokenProbe => vec!["account".into(), "get-access-token".into()],
        CloudCommand::Login { tenant: Some(tenant) } => vec![
            "login".into(),
            "--tenant".into(),
            tenant.clone(),
            "--scope".into(),
            MANAGEMENT_SCOPE.into(),
        ],
        CloudCommand::Login { tenant: None } => vec!["login".into()],
        CloudCommand::Logout => vec!["logout".into()],
        CloudCommand::ListSubscriptions => vec![
            "account".into(),
            "list".into(),
            "--query".into(),
            "[].id".into(),
            "-o".into(),
            "tsv".into(),
        ],
        CloudCommand::ShowCluster {
            name,
            resource_group,
            subscription,
        } => vec![
            "aks".into(),
            "show".into(),
            "--name".into(),
            name.clone(),
            "--resource-group".into(),
            resource_group.clone(),
            "--subscription".into(),
            subscription.clone(),
            "--query".into(),
            "id".into(),
            "-o".into(),
            "tsv".into(),
        ],
        CloudCommand::ListNodePools {
            cluster,
            resource_group,
            subscription,
        } => vec![
            "aks".into(),
            "nodepool".into(),
            "list".into(),
            "--resource-group".into(),
            resource_group.clone(),
            "--cluster-name".into(),
            cluster.clone(),
            "--subscription".into(),
            subscription.clone(),
            "-o".into(),
            "json".into(),
        ],
        CloudCommand::DisableAutoscaler { pool } => {
            let mut args = pool_args("update", pool);
            args.push("--disable-cluster-autoscaler".into());
            args
        }
        CloudCommand::ScaleNodePool { pool, node_count } => {
            let mut args = pool_args("scale", pool);
            args.extend(["--node-count".into(), node_count.to_string()]);
            args
        }
        CloudCommand::EnableAutoscaler {
            pool,
            min_count,
            max_count,
        } => {
            let mut args = pool_args("update", pool);
            args.extend([
                "--enable-cluster-autoscaler".into(),
                "--min-count".into(),
                min_count.to_string(),
                "--max-count".into(),
                max_count.to_string(),
            ]);
            args
        }
    };
    args.push("--only-show-errors".into());
    args
}

#[async_trait]
impl CloudOperator for CliOperator {
    async fn execute(&self, command: &CloudCommand) -> Result<CommandOutput> {
        let args = cli_args(command);
        let timeout = self.timeout_for(command);
        let description = command.to_string();
        if command.is_mutation() {
            info!(command = %description, "changing cloud state");
        } else {
            debug!(command = %description, "running {}", self.program);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Interactive login needs the terminal for device-code prompts
        if matches!(command, CloudCommand::Login { .. }) {
            cmd.stdin(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!(command = %description, "timed out after {:?}", timeout);
                Error::Timeout {
                    command: description.clone(),
                    after: timeout,
                }
            })?
            .map_err(|e| Error::Subprocess {
                command: description.clone(),
                code: None,
                stderr: format!("failed to execute {}: {}", self.program, e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            return Ok(CommandOutput { stdout, stderr });
        }

        let combined = format!("{}{}", stdout, stderr);
        if self.classifier.is_auth_failure(&combined) {
            return Err(Error::AuthExpired {
                command: description,
                output: combined,
            });
        }

        Err(Error::Subprocess {
            command: description,
            code: output.status.code(),
            stderr,
        })
    }
}
