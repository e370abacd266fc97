use thiserror::Error;

/// Errors surfaced by user-initiated operations (`activate`, `send`).
///
/// Background work (live refreshes, mark-read side effects) never returns
/// these; it logs and keeps the last good state instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Rejected before reaching the store. Not retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// No signed-in user, or acting on behalf of someone else.
    #[error("not signed in")]
    Unauthenticated,

    /// The store or the network failed. Retrying is left to the user.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
