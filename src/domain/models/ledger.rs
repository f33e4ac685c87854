//! Append-only audit ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::Phase;

/// Entry to be appended; the store assigns the sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub phase_at_start: Option<Phase>,
    pub phase_at_end: Option<Phase>,
    pub result_summary: String,
    pub cost_delta: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A persisted, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: i64,
    pub task_id: Uuid,
    pub project_id: Uuid,
    /// `None` when the manifest could not be loaded.
    pub phase_at_start: Option<Phase>,
    pub phase_at_end: Option<Phase>,
    pub result_summary: String,
    pub cost_delta: f64,
    pub recorded_at: DateTime<Utc>,
}
