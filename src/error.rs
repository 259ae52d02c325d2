use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
///
/// Access checks never surface these; they resolve to a deny decision instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Backing store was unreachable or a query failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}
