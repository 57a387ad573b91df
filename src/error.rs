use event_store::StoreError;
use nostr_core::InvalidEvent;
use thiserror::Error;

/// Why a single payload did not make it into the store.
///
/// Only `StorageFailure` means something went wrong locally; every other
/// variant describes a payload that was dropped.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid event {id}: {reason}")]
    InvalidSignature { id: String, reason: InvalidEvent },

    #[error("event {id} expired at {expires_at}")]
    Expired { id: String, expires_at: f64 },

    #[error("unsupported kind {0}")]
    UnsupportedKind(u16),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),

    #[error("ingest queue is closed")]
    QueueClosed,
}

impl ProcessError {
    /// Short label used in logs and CLI summaries.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessError::MalformedPayload(_) => "malformed",
            ProcessError::InvalidSignature { .. } => "invalid_signature",
            ProcessError::Expired { .. } => "expired",
            ProcessError::UnsupportedKind(_) => "unsupported_kind",
            ProcessError::StorageFailure(_) => "storage_failure",
            ProcessError::QueueClosed => "queue_closed",
        }
    }

    /// Failures the caller should act on rather than just count.
    pub fn is_local_failure(&self) -> bool {
        matches!(self, ProcessError::StorageFailure(_) | ProcessError::QueueClosed)
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(e: serde_json::Error) -> Self {
        ProcessError::MalformedPayload(e.to_string())
    }
}
