use crate::embeddings::EmbeddingError;
use crate::engine::scores::ItemId;

/// Errors returned by search and feedback operations.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("cannot encode query: {0}")]
    Encoding(#[from] EmbeddingError),

    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("session {0} has no candidate set to give feedback on")]
    NoCandidates(String),

    #[error("item {0} is not in the last candidate set")]
    InvalidCandidateReference(ItemId),

    #[error("item {id} is outside the corpus (0..{len})")]
    CorpusIndexOutOfRange { id: ItemId, len: usize },

    #[error("temporal query must have exactly two clauses separated by '>', got {0:?}")]
    MalformedTemporalQuery(String),

    #[error("internal error: {0}")]
    Internal(String),
}
