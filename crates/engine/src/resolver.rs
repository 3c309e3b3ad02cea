//! Segment Resolver — owns segment lifecycle: runs refreshes through the
//! adapter and store, and answers membership and set-algebra queries.

use chrono::Utc;
use dashmap::DashMap;
use segments_core::{
    MemberId, RefreshError, RefreshResult, RefreshSummary, Segment, SegmentDefinition,
    SegmentError, SegmentId, SegmentSubject, SetOp,
};
use segments_store::MemberSetStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::coordinator::RefreshCoordinator;
use crate::source::DataSourceAdapter;

/// Constructed with explicit collaborators — the chosen data-source
/// connections (inside the adapter) and the chosen member-set store. No
/// ambient resolution by name.
pub struct SegmentResolver {
    adapter: DataSourceAdapter,
    store: Arc<dyn MemberSetStore>,
    segments: DashMap<SegmentId, Segment>,
    coordinator: RefreshCoordinator,
}

impl SegmentResolver {
    pub fn new(adapter: DataSourceAdapter, store: Arc<dyn MemberSetStore>) -> Self {
        Self {
            adapter,
            store,
            segments: DashMap::new(),
            coordinator: RefreshCoordinator::new(),
        }
    }

    // ─── Segment lifecycle ─────────────────────────────────────────────────

    pub fn create_segment(
        &self,
        name: impl Into<String>,
        definition: SegmentDefinition,
    ) -> Segment {
        let segment = Segment::new(name, definition);
        info!(segment_id = %segment.id, name = %segment.name, kind = segment.definition.kind(), "Segment created");
        self.segments.insert(segment.id, segment.clone());
        segment
    }

    pub fn segment(&self, id: SegmentId) -> Option<Segment> {
        self.segments.get(&id).map(|s| s.clone())
    }

    pub fn list_segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self.segments.iter().map(|s| s.clone()).collect();
        segments.sort_by(|a, b| a.name.cmp(&b.name));
        segments
    }

    /// Replace a segment's definition. The member set is untouched; the
    /// segment reads as stale until the next refresh.
    pub fn set_definition(
        &self,
        id: SegmentId,
        definition: SegmentDefinition,
    ) -> Result<(), SegmentError> {
        let mut segment = self
            .segments
            .get_mut(&id)
            .ok_or(SegmentError::UnknownSegment(id))?;
        segment.definition = definition;
        Ok(())
    }

    /// True when the definition changed since the promoted set was computed
    /// (or no refresh ever ran).
    pub fn is_stale(&self, id: SegmentId) -> Result<bool, SegmentError> {
        self.segments
            .get(&id)
            .map(|s| s.is_stale())
            .ok_or(SegmentError::UnknownSegment(id))
    }

    /// Dry-run the definition against its source without touching the
    /// store. Returns the member count it would produce.
    pub async fn validate_definition(&self, id: SegmentId) -> Result<usize, RefreshError> {
        let definition = self
            .segments
            .get(&id)
            .map(|s| s.definition.clone())
            .ok_or(RefreshError::UnknownSegment(id))?;
        Ok(self.adapter.evaluate(&definition).await?.len())
    }

    pub async fn delete_segment(&self, id: SegmentId) -> Result<(), SegmentError> {
        self.segments
            .remove(&id)
            .ok_or(SegmentError::UnknownSegment(id))?;
        self.store.delete_segment(id).await?;
        info!(segment_id = %id, "Segment deleted");
        Ok(())
    }

    // ─── Refresh ───────────────────────────────────────────────────────────

    /// Re-evaluate the definition and atomically swap in the new member set.
    ///
    /// At most one refresh runs per segment; a concurrent call fails fast
    /// with `AlreadyInProgress`. On any failure the previously promoted
    /// version keeps serving readers untouched.
    pub async fn refresh(&self, id: SegmentId) -> Result<RefreshResult, RefreshError> {
        let definition = self
            .segments
            .get(&id)
            .map(|s| s.definition.clone())
            .ok_or(RefreshError::UnknownSegment(id))?;

        let _permit = self
            .coordinator
            .begin(id)
            .ok_or(RefreshError::AlreadyInProgress(id))?;

        let started = Instant::now();
        match self.run_refresh(id, &definition).await {
            Ok((version, member_count)) => {
                let duration = started.elapsed();
                metrics::counter!("segments.refresh.completed").increment(1);
                metrics::histogram!("segments.refresh.duration_ms")
                    .record(duration.as_millis() as f64);
                info!(
                    segment_id = %id,
                    version,
                    member_count,
                    duration_ms = duration.as_millis() as u64,
                    "Segment refreshed"
                );
                Ok(RefreshResult {
                    segment_id: id,
                    version,
                    member_count,
                    duration,
                })
            }
            Err(e) => {
                metrics::counter!("segments.refresh.failed").increment(1);
                warn!(segment_id = %id, error = %e, "Segment refresh failed; previous version keeps serving");
                Err(e)
            }
        }
    }

    async fn run_refresh(
        &self,
        id: SegmentId,
        definition: &SegmentDefinition,
    ) -> Result<(u64, u64), RefreshError> {
        let members = self.adapter.evaluate(definition).await?;
        let version = self.store.write_new_version(id, &members).await?;
        self.store.promote(id, version).await?;

        if let Some(mut segment) = self.segments.get_mut(&id) {
            segment.last_refreshed_at = Some(Utc::now());
            // Hash of the definition that produced this set; a concurrent
            // edit still reads as stale afterwards.
            segment.definition_hash = Some(definition.content_hash());
            segment.member_count = members.len() as u64;
        }

        // The new version is already promoted; a gc hiccup only delays
        // cleanup and must not fail the refresh.
        if let Err(e) = self.store.gc(id, version).await {
            warn!(segment_id = %id, error = %e, "Post-promote gc failed");
        }
        Ok((version, members.len() as u64))
    }

    /// Refresh every registered segment, sequentially. Individual failures
    /// are logged and counted, never propagated.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let started = Instant::now();
        let ids: Vec<SegmentId> = self.segments.iter().map(|s| s.id).collect();

        let mut refreshed = 0;
        let mut failed = 0;
        for id in ids {
            match self.refresh(id).await {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    warn!(segment_id = %id, error = %e, "Bulk refresh: segment failed");
                    failed += 1;
                }
            }
        }

        let duration = started.elapsed();
        info!(
            refreshed,
            failed,
            duration_ms = duration.as_millis() as u64,
            "Bulk segment refresh complete"
        );
        RefreshSummary {
            refreshed,
            failed,
            duration,
        }
    }

    // ─── Membership queries ────────────────────────────────────────────────

    /// Membership against the current promoted set. A never-refreshed
    /// segment answers `false`; an unregistered id is `UnknownSegment`.
    pub async fn is_member(&self, id: SegmentId, member: MemberId) -> Result<bool, SegmentError> {
        if !self.segments.contains_key(&id) {
            return Err(SegmentError::UnknownSegment(id));
        }
        Ok(self.store.is_member(id, member).await?)
    }

    /// Convenience boundary for user-like entities.
    pub async fn subject_is_member<S: SegmentSubject + ?Sized>(
        &self,
        id: SegmentId,
        subject: &S,
    ) -> Result<bool, SegmentError> {
        self.is_member(id, subject.member_id()).await
    }

    pub async fn members(&self, id: SegmentId) -> Result<BTreeSet<MemberId>, SegmentError> {
        if !self.segments.contains_key(&id) {
            return Err(SegmentError::UnknownSegment(id));
        }
        Ok(self.store.members(id).await?)
    }

    pub async fn member_count(&self, id: SegmentId) -> Result<u64, SegmentError> {
        if !self.segments.contains_key(&id) {
            return Err(SegmentError::UnknownSegment(id));
        }
        Ok(self.store.member_count(id).await?)
    }

    /// Set algebra over the current sets of the named segments. Any
    /// unregistered id is `UnknownSegment`; never-refreshed segments
    /// contribute empty sets.
    pub async fn combine(
        &self,
        op: SetOp,
        ids: &[SegmentId],
    ) -> Result<BTreeSet<MemberId>, SegmentError> {
        for id in ids {
            if !self.segments.contains_key(id) {
                return Err(SegmentError::UnknownSegment(*id));
            }
        }
        Ok(self.store.set_algebra(op, ids).await?)
    }

    /// All segments whose current set contains the member. Derived by
    /// probing each segment's promoted set — membership is never a stored
    /// join.
    pub async fn segments_of(&self, member: MemberId) -> Result<Vec<SegmentId>, SegmentError> {
        let ids: Vec<SegmentId> = self.segments.iter().map(|s| s.id).collect();
        let mut matches = Vec::new();
        for id in ids {
            if self.store.is_member(id, member).await? {
                matches.push(id);
            }
        }
        Ok(matches)
    }
}
