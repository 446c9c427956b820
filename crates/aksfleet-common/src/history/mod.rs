//! Personal operation history
//!
//! A record of mutating operations kept for operational reference. It is not
//! an audit log and makes no tamper-evidence guarantees.

mod entry;
mod tracker;

pub use entry::{HistoryAction, HistoryEntry, HistoryFilter, HistoryStats, HistoryStatus};
pub use tracker::{entry_path, HistoryTracker, LOADED_MONTHS, WRITE_QUEUE_CAPACITY};
