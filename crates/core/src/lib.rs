//! Shared types, configuration, and error taxonomy for the segment
//! resolution and caching engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::SegmentsConfig;
pub use error::{RefreshError, SegmentError, SourceError, StoreError};
pub use types::{
    MemberId, RefreshResult, RefreshSummary, Segment, SegmentDefinition, SegmentId,
    SegmentSubject, SetOp,
};
