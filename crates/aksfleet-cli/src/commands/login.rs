//! `aksfleet login`: make sure the Azure CLI session is usable.
//!
//! Runs the credential guard once: logs in when no session exists, and logs
//! out and back in (scoped to the tenant named in the error, or the configured
//! default tenant) when the grant has expired.

use aksfleet_common::config;
use aksfleet_common::credentials::AuthOutcome;
use clap::Args;

use super::FleetContext;
use crate::Result;

/// Check cloud credentials and log in if needed
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Tenant to fall back to when the expiry message names none
    #[arg(long)]
    pub tenant: Option<String>,
}

pub async fn run(args: LoginArgs) -> Result<()> {
    let mut settings = config::load_settings()?;
    if args.tenant.is_some() {
        settings.default_tenant = args.tenant;
    }
    let ctx = FleetContext::from_settings(settings);

    match ctx.guard.ensure_authenticated().await? {
        AuthOutcome::AlreadyAuthenticated => println!("Already authenticated."),
        AuthOutcome::LoggedIn => println!("Logged in."),
        AuthOutcome::Reauthenticated { tenant: Some(tenant) } => {
            println!("Credentials had expired; logged in again to tenant {}.", tenant)
        }
        AuthOutcome::Reauthenticated { tenant: None } => {
            println!("Credentials had expired; logged in again.")
        }
    }
    Ok(())
}
