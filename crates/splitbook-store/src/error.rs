use thiserror::Error;

/// Store-level errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A registry or balance invariant no longer holds at read time. The
    /// caller should alert rather than silently pick a survivor.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage error: {0}")]
    Storage(String),
}
