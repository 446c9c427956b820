//! Credential guard: transparent recovery from expired cloud credentials
//!
//! The guard makes at most one reauthentication attempt per invocation and
//! never re-verifies afterwards. Retrying the original operation is the
//! caller's job, and [`CredentialGuard::call`] does exactly one retry.
//!
//! Logins can block for minutes on a browser or device-code flow. Event-driven
//! callers should run the guard on a background task and deliver the outcome
//! as a message.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cloud::{CloudCommand, CloudOperator};
use crate::{Error, Result};

/// What [`CredentialGuard::ensure_authenticated`] had to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials were valid, nothing was done
    AlreadyAuthenticated,
    /// No session existed, a plain login was performed
    LoggedIn,
    /// The grant had expired; logged out and back in
    Reauthenticated {
        /// Tenant the login was scoped to, if any
        tenant: Option<String>,
    },
}

/// Wraps cloud calls with expired-credential detection and a single reauthentication
pub struct CredentialGuard {
    operator: Arc<dyn CloudOperator>,
    default_tenant: Option<String>,
    login_lock: Mutex<()>,
    generation: AtomicU64,
}

impl CredentialGuard {
    /// Create a guard issuing logins through `operator`
    pub fn new(operator: Arc<dyn CloudOperator>) -> Self {
        Self {
            operator,
            default_tenant: None,
            login_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Tenant used when none can be read from the failure output
    pub fn with_default_tenant(mut self, tenant: Option<String>) -> Self {
        self.default_tenant = tenant.filter(|t| !t.is_empty());
        self
    }

    /// Number of logins performed by this guard
    pub fn logins(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Check the session and log in when needed.
    ///
    /// - not logged in at all: one plain login
    /// - token probe reports an expired grant: logout, then a tenant-scoped login
    /// - token probe fails for another reason: one plain login
    pub async fn ensure_authenticated(&self) -> Result<AuthOutcome> {
        let _guard = self.login_lock.lock().await;

        if let Err(e) = self.operator.execute(&CloudCommand::AccountShow).await {
            info!(error = %e, "no active cloud session, logging in");
            self.login(None).await?;
            return Ok(AuthOutcome::LoggedIn);
        }

        match self.operator.execute(&CloudCommand::AccessTokenProbe).await {
            Ok(_) => {
                debug!("cloud credentials valid");
                Ok(AuthOutcome::AlreadyAuthenticated)
            }
            Err(e) if e.is_auth_expired() => {
                let tenant = self.tenant_from(e.output());
                self.reauthenticate(tenant).await
            }
            Err(e) => {
                warn!(error = %e, "token probe failed, logging in");
                self.login(None).await?;
                Ok(AuthOutcome::LoggedIn)
            }
        }
    }

    /// Recover from `error`, a failure already classified as expired credentials.
    ///
    /// If another caller reauthenticated while this one waited, nothing is done.
    pub async fn recover(&self, error: &Error) -> Result<AuthOutcome> {
        self.recover_since(error, self.logins()).await
    }

    /// Like [`recover`](Self::recover), but any login counted after `seen`
    /// (a [`logins`](Self::logins) value read before the failed call started)
    /// already covers this failure.
    pub async fn recover_since(&self, error: &Error, seen: u64) -> Result<AuthOutcome> {
        let _guard = self.login_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != seen {
            debug!("credentials refreshed by a concurrent caller");
            return Ok(AuthOutcome::AlreadyAuthenticated);
        }

        let tenant = self.tenant_from(error.output());
        self.reauthenticate(tenant).await
    }

    /// Run `op`; on expired credentials recover once and run it exactly once more.
    pub async fn call<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let seen = self.logins();
        match op().await {
            Err(e) if e.is_auth_expired() => {
                warn!(operation = %name, "cloud credentials expired, reauthenticating");
                self.recover_since(&e, seen).await?;
                op().await
            }
            other => other,
        }
    }

    fn tenant_from(&self, output: Option<&str>) -> Option<String> {
        output
            .and_then(extract_tenant)
            .or_else(|| self.default_tenant.clone())
    }

    async fn reauthenticate(&self, tenant: Option<String>) -> Result<AuthOutcome> {
        info!(tenant = ?tenant, "cloud grant expired, logging out and back in");
        if let Err(e) = self.operator.execute(&CloudCommand::Logout).await {
            warn!(error = %e, "logout failed, continuing with login");
        }
        self.login(tenant.clone()).await?;
        Ok(AuthOutcome::Reauthenticated { tenant })
    }

    async fn login(&self, tenant: Option<String>) -> Result<()> {
        let result = self.operator.execute(&CloudCommand::Login { tenant }).await;
        // Count attempts, not successes: a failed login still ends this round
        self.generation.fetch_add(1, Ordering::SeqCst);
        result.map(|_| ())
    }
}

/// Extract the tenant from `--tenant "<id>"` (or single-quoted) in CLI output.
pub fn extract_tenant(text: &str) -> Option<String> {
    let (_, rest) = text.split_once("--tenant")?;
    let rest = rest.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &rest[quote.len_utf8()..];
    let end = inner.find(quote)?;
    let tenant = inner[..end].trim();
    (!tenant.is_empty()).then(|| tenant.to_string())
}
