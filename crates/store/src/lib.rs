//! Member Set Store — versioned, atomically promotable member sets.
//!
//! Each segment owns a sequence of immutable member-set versions plus a
//! single "current" pointer. Writing a new version is invisible to readers;
//! `promote` swaps the pointer atomically and is the sole visibility
//! boundary. Two implementations: an in-process DashMap store and a
//! Redis-backed store.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryMemberStore;
pub use redis_store::RedisMemberStore;

use async_trait::async_trait;
use segments_core::{MemberId, SegmentId, SetOp, StoreError};
use std::collections::BTreeSet;

#[async_trait]
pub trait MemberSetStore: Send + Sync {
    /// Durably persist a brand-new member-set version for the segment.
    /// Readers cannot observe it until `promote` is called.
    async fn write_new_version(
        &self,
        segment: SegmentId,
        members: &[MemberId],
    ) -> Result<u64, StoreError>;

    /// Atomically swap the segment's current-version pointer. A promote that
    /// would move the pointer backwards is refused, keeping visibility
    /// monotonic.
    async fn promote(&self, segment: SegmentId, version: u64) -> Result<(), StoreError>;

    async fn current_version(&self, segment: SegmentId) -> Result<Option<u64>, StoreError>;

    /// Membership against the current version. `false` when no version was
    /// ever promoted.
    async fn is_member(&self, segment: SegmentId, member: MemberId) -> Result<bool, StoreError>;

    async fn member_count(&self, segment: SegmentId) -> Result<u64, StoreError>;

    /// Snapshot of the current version's members.
    async fn members(&self, segment: SegmentId) -> Result<BTreeSet<MemberId>, StoreError>;

    /// Combine the current versions of the named segments. Computed on
    /// demand, never cached. Never-promoted segments contribute the empty
    /// set. `Difference` is a left fold: the first operand minus the rest.
    async fn set_algebra(
        &self,
        op: SetOp,
        segments: &[SegmentId],
    ) -> Result<BTreeSet<MemberId>, StoreError>;

    /// Drop every version except `keep_version`. Implementations must not
    /// free a version an in-flight reader still holds (refcount or grace
    /// window).
    async fn gc(&self, segment: SegmentId, keep_version: u64) -> Result<(), StoreError>;

    /// Remove all stored state for a segment.
    async fn delete_segment(&self, segment: SegmentId) -> Result<(), StoreError>;
}
