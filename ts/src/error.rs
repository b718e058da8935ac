//! Error types shared by every `taskstore` component.

use thiserror::Error;

/// Errors surfaced by `taskstore`'s durable-state components.
///
/// Every variant maps to one of the error-code classes used throughout the
/// orchestrator (`E1xx` config, `E2xx` lifecycle, `E3xx` evidence, `E4xx`
/// locking, `E5xx` integration).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("task already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("invalid namespace {namespace:?}: {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("task decomposition error: {0}")]
    Decomposition(String),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("evidence collection failed: {0}")]
    EvidenceCollection(String),

    #[error("evidence index corrupted: {0}")]
    IndexCorruption(String),

    #[error("raw log missing: {0}")]
    RawLogMissing(String),

    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },

    #[error("lock acquisition failed on {path}: {reason}")]
    LockAcquisition { path: String, reason: String },

    #[error("lock release failed: unknown lock_id {0}")]
    LockRelease(String),

    #[error("global executor semaphore exceeded (capacity {capacity})")]
    SemaphoreExceeded { capacity: usize },

    #[error("auto-release of expired locks is forbidden")]
    ForbiddenAutoRelease,

    #[error("session_id missing")]
    SessionIdMissing,

    #[error("session_id mismatch: expected {expected}, got {got}")]
    SessionMismatch { expected: String, got: String },

    #[error("channel closed before reply")]
    ChannelClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// The error-code class this variant belongs to (`E1xx`..`E5xx`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidNamespace { .. } => "E104",
            Self::Decomposition(_) => "E205",
            Self::ResourceLimit(_) => "E206",
            Self::EvidenceCollection(_) => "E301",
            Self::IndexCorruption(_) => "E302",
            Self::RawLogMissing(_) => "E303",
            Self::HashMismatch { .. } => "E304",
            Self::LockAcquisition { .. } => "E401",
            Self::LockRelease(_) => "E402",
            Self::SemaphoreExceeded { .. } => "E404",
            Self::ForbiddenAutoRelease => "E405",
            Self::SessionIdMissing => "E501",
            Self::SessionMismatch { .. } => "E502",
            Self::TaskNotFound(_) | Self::InvalidTransition { .. } | Self::AlreadyClaimed(_) => "E105",
            Self::ChannelClosed | Self::Io(_) | Self::Json(_) | Self::Sqlite(_) => "E105",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
