//! Error taxonomy shared by the embedding, store, and ingestion layers.
//!
//! Every component exposes `try_*` methods returning [`RagError`] and a
//! simplified surface (`bool`, `Option`, empty `Vec`) built on top of them.
//! The simplified surface logs the error before dropping it.

use thiserror::Error;

/// Failure reasons for embedding, storage, and retrieval operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// An embedding was requested from a model that has not been loaded.
    #[error("model not loaded; call load() first")]
    NotLoaded,

    /// A store or component was used before its client/collection was set up.
    #[error("not initialized: {0}")]
    NotInitialized(&'static str),

    /// The embedding backend returned an error or an unusable vector.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// Loading the embedding model failed.
    #[error("failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    /// The store rejected or failed a write.
    #[error("store write failed: {0}")]
    StoreWriteFailure(String),

    /// The store failed a k-NN query.
    #[error("store query failed: {0}")]
    StoreQueryFailure(String),

    /// The parallel id/text/embedding/metadata sequences had different lengths.
    #[error(
        "parallel sequences differ in length: ids={ids} texts={texts} embeddings={embeddings} metadatas={metadatas}"
    )]
    LengthMismatch {
        ids: usize,
        texts: usize,
        embeddings: usize,
        metadatas: usize,
    },

    /// An embedding did not match the dimension fixed for its collection.
    #[error("embedding dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Metadata contained a value the store cannot persist.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        RagError::StoreWriteFailure(e.to_string())
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_names_every_sequence() {
        let err = RagError::LengthMismatch {
            ids: 2,
            texts: 2,
            embeddings: 1,
            metadatas: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("embeddings=1"));
        assert!(msg.contains("ids=2"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: RagError = io.into();
        assert!(matches!(err, RagError::Io(_)));
    }
}
