//! Error types for the association stores.

/// Errors that can occur while reading or writing association state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database operation failed.
    #[error("association store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("association store pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A stored signed association could not be encoded or decoded.
    #[error("association store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
