use crate::message::unix_time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a fine-tuning job's event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineTuningEvent {
    /// Event identifier.
    pub id: String,
    /// Creation time in unix seconds.
    #[serde(default)]
    pub created_at: i64,
    /// Severity: `info`, `warn` or `error`.
    #[serde(default)]
    pub level: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
    /// Event type, e.g. `message` or `metrics`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Structured payload such as training metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl FineTuningEvent {
    /// Creation time as a UTC timestamp, `None` while unset.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        unix_time(self.created_at)
    }
}

/// A server-side fine-tuning job, as returned by the cancel endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineTuningJob {
    /// Job identifier.
    pub id: String,
    /// Base model being tuned.
    #[serde(default)]
    pub model: String,
    /// Lifecycle status, e.g. `running` or `cancelled`.
    #[serde(default)]
    pub status: String,
    /// Creation time in unix seconds.
    #[serde(default)]
    pub created_at: i64,
    /// Resulting model, once training has succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fine_tuned_model: Option<String>,
}

impl FineTuningJob {
    /// Whether the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "cancelled")
    }
}
