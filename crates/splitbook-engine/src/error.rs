use splitbook_store::StoreError;
use thiserror::Error;

/// Settlement engine errors.
///
/// Per-record problems never surface here; they are collected as rejected
/// records in the run report. These variants are the fatal kinds.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Structural misuse, e.g. split rules invoked with a participant count
    /// other than three. Never silently papered over with an even split.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
