use crate::types::SegmentId;
use thiserror::Error;

/// Failures while evaluating a segment definition against its data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connection `{name}` failed: {reason}")]
    ConnectionFailed { name: String, reason: String },

    #[error("malformed query: {0}")]
    QueryMalformed(String),

    #[error("no lookup method `{source_name}.{method}`")]
    MethodNotFound { source_name: String, method: String },

    #[error("ambiguous empty result from `{source_name}.{method}`")]
    EmptyResultAmbiguous { source_name: String, method: String },
}

/// The member-set store could not be reached or refused an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("member-set store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn unavailable(reason: impl ToString) -> Self {
        StoreError::Unavailable(reason.to_string())
    }
}

/// Failures surfaced to `refresh` callers. A failed refresh never disturbs
/// the previously promoted member set.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("unknown segment {0}")]
    UnknownSegment(SegmentId),

    #[error("refresh already in progress for segment {0}")]
    AlreadyInProgress(SegmentId),

    #[error("source evaluation failed: {0}")]
    Source(#[from] SourceError),

    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Failures surfaced to membership and set-algebra callers. Concurrent
/// refresh activity never produces one of these.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("unknown segment {0}")]
    UnknownSegment(SegmentId),

    #[error(transparent)]
    Store(#[from] StoreError),
}
