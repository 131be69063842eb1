use thiserror::Error;

/// Failures surfaced by the statistics engine and its store.
///
/// Callers should match on the variant, not the message: `Validation` means
/// the request was malformed, `Store` means the data could not be fetched or
/// persisted, `Computation` is reserved for states that should not occur in
/// normal operation (e.g. histogram serialization failure).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("computation error: {0}")]
    Computation(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
