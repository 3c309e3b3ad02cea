//! Consistency Coordinator — at most one in-flight refresh per segment.
//!
//! `begin` either hands out a permit or reports the segment busy; the
//! resolver maps the latter to `RefreshError::AlreadyInProgress` (fail fast
//! rather than queueing behind a source query of unknown duration).
//! Refreshes for different segments never contend.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use segments_core::SegmentId;

#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: DashMap<SegmentId, ()>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the refresh slot for a segment. Returns `None` while another
    /// refresh holds it.
    pub fn begin(&self, segment: SegmentId) -> Option<RefreshPermit<'_>> {
        match self.in_flight.entry(segment) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(RefreshPermit {
                    in_flight: &self.in_flight,
                    segment,
                })
            }
        }
    }

    pub fn is_refreshing(&self, segment: SegmentId) -> bool {
        self.in_flight.contains_key(&segment)
    }
}

/// Held for the duration of evaluate + write + promote. Dropping it releases
/// the slot on every exit path, including errors and cancellation.
pub struct RefreshPermit<'a> {
    in_flight: &'a DashMap<SegmentId, ()>,
    segment: SegmentId,
}

impl Drop for RefreshPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_is_refused_while_permit_held() {
        let coordinator = RefreshCoordinator::new();
        let seg = SegmentId::new_v4();

        let permit = coordinator.begin(seg);
        assert!(permit.is_some());
        assert!(coordinator.is_refreshing(seg));
        assert!(coordinator.begin(seg).is_none());

        drop(permit);
        assert!(!coordinator.is_refreshing(seg));
        assert!(coordinator.begin(seg).is_some());
    }

    #[test]
    fn segments_do_not_contend() {
        let coordinator = RefreshCoordinator::new();
        let a = SegmentId::new_v4();
        let b = SegmentId::new_v4();

        let _pa = coordinator.begin(a).unwrap();
        assert!(coordinator.begin(b).is_some());
    }
}
