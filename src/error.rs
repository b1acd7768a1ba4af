use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `palaver`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; composition code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The requested session does not exist. Surfaced to the caller, not
    /// retried.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Malformed input from the caller (bad identifiers, empty message).
    /// Non-fatal; the front-end reports it and keeps going.
    #[error("validation: {0}")]
    Validation(String),

    /// Completion backend failure. Never committed a partial assistant turn
    /// before surfacing.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// Persistence failure. When raised while appending the user turn, the
    /// backend was never contacted.
    #[error("store: {0}")]
    Store(StoreError),

    /// Cooperative cancellation. Distinct from `Backend` so callers can tell
    /// "you stopped it" from "it broke".
    #[error("exchange cancelled")]
    Cancelled,

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Completion backend errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} returned HTTP {status}: {message}")]
    Api {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend} request failed: {message}")]
    Transport { backend: String, message: String },

    #[error("{backend} sent an unintelligible frame: {message}")]
    Protocol { backend: String, message: String },
}

// ─── History store errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for ChatError {
    fn from(error: StoreError) -> Self {
        // A missing session is a caller-visible condition, not a storage
        // fault; keep the taxonomy flat for matchers.
        match error {
            StoreError::SessionNotFound(id) => ChatError::SessionNotFound(id),
            other => ChatError::Store(other),
        }
    }
}

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
