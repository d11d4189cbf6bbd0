use serde::{Deserialize, Serialize};

/// Processing outcome recorded for a received webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEventStatus {
    /// Filed in the ledger, detached processing not finished yet.
    Received,
    Processed,
    Ignored,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processed => "processed",
            Self::Ignored => "ignored",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for WebhookEventStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "processed" => Ok(Self::Processed),
            "ignored" => Ok(Self::Ignored),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for WebhookEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A webhook delivery filed in the idempotency ledger.
///
/// Rows are append-only: duplicates of (provider, event_id) never create a
/// second row, and terminal rows keep their raw payload for replay debugging.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: String,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: WebhookEventStatus,
    pub error_message: Option<String>,
    pub processed_at: Option<i64>,
    pub created_at: i64,
}
