//! `aksfleet history`: query or clear the operation history.

use aksfleet_common::history::{HistoryAction, HistoryEntry, HistoryFilter, HistoryStatus};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Subcommand};

use super::FleetContext;
use crate::{Error, Result};

/// Query or clear the operation history
#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: HistoryCommand,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List entries, newest first
    List(ListArgs),
    /// Print one entry as JSON
    Show {
        /// Entry id
        id: String,
    },
    /// Counts by status, action and cluster
    Stats,
    /// Delete every history entry, in memory and on disk
    Clear {
        /// Confirm the irreversible deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Only this action (e.g. apply_nodepool)
    #[arg(long)]
    pub action: Option<HistoryAction>,
    /// Only this cluster
    #[arg(long)]
    pub cluster: Option<String>,
    /// Only this resource
    #[arg(long)]
    pub resource: Option<String>,
    /// Only this status (success, failed, partial)
    #[arg(long)]
    pub status: Option<HistoryStatus>,
    /// Entries at or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub since: Option<String>,
    /// Entries at or before this date (YYYY-MM-DD covers the whole day, or RFC 3339)
    #[arg(long)]
    pub until: Option<String>,
    /// Only this session
    #[arg(long)]
    pub session: Option<String>,
    /// Show at most this many entries
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

impl ListArgs {
    fn filter(&self) -> Result<HistoryFilter> {
        Ok(HistoryFilter {
            action: self.action,
            cluster: self.cluster.clone(),
            resource: self.resource.clone(),
            status: self.status,
            start: self
                .since
                .as_deref()
                .map(|s| parse_bound(s, NaiveTime::MIN))
                .transpose()?,
            end: self
                .until
                .as_deref()
                .map(|s| parse_bound(s, end_of_day()))
                .transpose()?,
            session_name: self.session.clone(),
        })
    }
}

pub async fn run(args: HistoryArgs) -> Result<()> {
    let ctx = FleetContext::load()?;
    let tracker = ctx.open_history().await?;

    match args.command {
        HistoryCommand::List(list) => {
            let entries = tracker.get_filtered(&list.filter()?);
            if entries.is_empty() {
                println!("No history entries.");
                return Ok(());
            }
            for entry in entries.iter().take(list.limit) {
                println!("{}", summary_line(entry));
            }
            if entries.len() > list.limit {
                println!("... {} more (raise --limit)", entries.len() - list.limit);
            }
        }
        HistoryCommand::Show { id } => {
            let entry = tracker.get_by_id(&id)?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        HistoryCommand::Stats => {
            let stats = tracker.stats();
            println!(
                "Total: {}  ✅ {}  ❌ {}  ⚠️ {}",
                stats.total, stats.success, stats.failed, stats.partial
            );
            println!("By action:");
            for (action, count) in &stats.by_action {
                println!("  {:<20} {}", action, count);
            }
            println!("By cluster:");
            for (cluster, count) in &stats.by_cluster {
                println!("  {:<30} {}", cluster, count);
            }
        }
        HistoryCommand::Clear { yes } => {
            if !yes {
                return Err(Error::validation(
                    "clearing history is irreversible; pass --yes to confirm",
                ));
            }
            tracker.clear().await?;
            println!("History cleared ({}).", tracker.root().display());
        }
    }
    Ok(())
}

fn summary_line(entry: &HistoryEntry) -> String {
    let mark = match entry.status {
        HistoryStatus::Success => "✅",
        HistoryStatus::Failed => "❌",
        HistoryStatus::Partial => "⚠️",
    };
    let mut line = format!(
        "{} {} {} {} {} ({} ms) [{}]",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        mark,
        entry.action,
        entry.cluster,
        entry.resource,
        entry.duration_ms,
        entry.id
    );
    if !entry.error_msg.is_empty() {
        line.push_str(&format!(": {}", entry.error_msg));
    }
    line
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
}

/// Parse an RFC 3339 timestamp or a bare date at `time_of_day` (UTC)
fn parse_bound(raw: &str, time_of_day: NaiveTime) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(time_of_day).and_utc())
        .map_err(|_| Error::validation(format!("invalid date {}: use YYYY-MM-DD or RFC 3339", raw)))
}
