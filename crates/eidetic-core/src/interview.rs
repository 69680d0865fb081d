//! Interview records: raw transcripts plus ingestion bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed conversation delivered by the voice runtime.
///
/// The transcript is committed before analysis, so a failed analysis
/// keeps the raw material and records the failure on this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interview {
    /// Monotonic per-project id, e.g. `INT_003`.
    pub id: String,
    /// External conversation identifier; the ingestion idempotency key.
    pub conversation_id: String,
    pub transcript: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Script version active when the conversation started, when known.
    #[serde(default)]
    pub script_version_used: Option<u32>,
    pub received_at: DateTime<Utc>,
    /// Populated when analysis of this transcript failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_error: Option<String>,
}
