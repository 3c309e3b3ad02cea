//! Segment resolution engine — evaluates segment definitions into member
//! sets, materializes them in the member-set store behind an atomic
//! version swap, and answers membership and set-algebra queries.

pub mod coordinator;
pub mod resolver;
pub mod source;

pub use coordinator::RefreshCoordinator;
pub use resolver::SegmentResolver;
pub use source::{DataSourceAdapter, ManagerSource, QueryConnection};
