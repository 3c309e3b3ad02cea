//! In-process member-set store backed by DashMap.
//!
//! Version sets are held behind `Arc`, so a reader that grabbed a snapshot
//! keeps it alive through gc; dropping a version from the slot only releases
//! the store's own reference.

use crate::MemberSetStore;
use async_trait::async_trait;
use dashmap::DashMap;
use segments_core::{MemberId, SegmentId, SetOp, StoreError};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

#[derive(Default)]
struct Slot {
    next_version: u64,
    current: Option<u64>,
    versions: HashMap<u64, Arc<BTreeSet<MemberId>>>,
}

/// Lock-free in-memory store. The implementation used by tests and by hosts
/// that do not need cross-process sharing.
#[derive(Default)]
pub struct MemoryMemberStore {
    slots: DashMap<SegmentId, Slot>,
}

impl MemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_set(&self, segment: SegmentId) -> Option<Arc<BTreeSet<MemberId>>> {
        let slot = self.slots.get(&segment)?;
        let current = slot.current?;
        slot.versions.get(&current).cloned()
    }
}

#[async_trait]
impl MemberSetStore for MemoryMemberStore {
    async fn write_new_version(
        &self,
        segment: SegmentId,
        members: &[MemberId],
    ) -> Result<u64, StoreError> {
        let mut slot = self.slots.entry(segment).or_default();
        slot.next_version += 1;
        let version = slot.next_version;
        slot.versions
            .insert(version, Arc::new(members.iter().copied().collect()));
        Ok(version)
    }

    async fn promote(&self, segment: SegmentId, version: u64) -> Result<(), StoreError> {
        let mut slot = self
            .slots
            .get_mut(&segment)
            .ok_or_else(|| StoreError::unavailable(format!("segment {segment} has no versions")))?;
        if !slot.versions.contains_key(&version) {
            return Err(StoreError::unavailable(format!(
                "segment {segment} has no version {version}"
            )));
        }
        if let Some(current) = slot.current {
            if version <= current {
                warn!(segment_id = %segment, version, current, "Refusing out-of-order promote");
                return Ok(());
            }
        }
        slot.current = Some(version);
        Ok(())
    }

    async fn current_version(&self, segment: SegmentId) -> Result<Option<u64>, StoreError> {
        Ok(self.slots.get(&segment).and_then(|slot| slot.current))
    }

    async fn is_member(&self, segment: SegmentId, member: MemberId) -> Result<bool, StoreError> {
        Ok(self
            .current_set(segment)
            .map(|set| set.contains(&member))
            .unwrap_or(false))
    }

    async fn member_count(&self, segment: SegmentId) -> Result<u64, StoreError> {
        Ok(self
            .current_set(segment)
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }

    async fn members(&self, segment: SegmentId) -> Result<BTreeSet<MemberId>, StoreError> {
        Ok(self
            .current_set(segment)
            .map(|set| set.as_ref().clone())
            .unwrap_or_default())
    }

    async fn set_algebra(
        &self,
        op: SetOp,
        segments: &[SegmentId],
    ) -> Result<BTreeSet<MemberId>, StoreError> {
        let sets: Vec<Arc<BTreeSet<MemberId>>> = segments
            .iter()
            .map(|id| self.current_set(*id).unwrap_or_default())
            .collect();

        let Some((first, rest)) = sets.split_first() else {
            return Ok(BTreeSet::new());
        };

        let mut result = first.as_ref().clone();
        match op {
            SetOp::Union => {
                for set in rest {
                    result.extend(set.iter().copied());
                }
            }
            SetOp::Intersect => {
                for set in rest {
                    result.retain(|m| set.contains(m));
                }
            }
            SetOp::Difference => {
                for set in rest {
                    result.retain(|m| !set.contains(m));
                }
            }
        }
        Ok(result)
    }

    async fn gc(&self, segment: SegmentId, keep_version: u64) -> Result<(), StoreError> {
        if let Some(mut slot) = self.slots.get_mut(&segment) {
            slot.versions.retain(|version, _| *version == keep_version);
        }
        Ok(())
    }

    async fn delete_segment(&self, segment: SegmentId) -> Result<(), StoreError> {
        self.slots.remove(&segment);
        Ok(())
    }
}
