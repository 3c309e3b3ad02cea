//! Redis-backed member-set store.
//!
//! Key scheme, per segment id:
//! - `seg:{id}:v:{n}`     SET of member ids for version `n`
//! - `seg:{id}:cur`       current-version pointer
//! - `seg:{id}:next`      version allocator (INCR)
//! - `seg:{id}:versions`  SET of live version numbers
//!
//! The pointer swap is a plain `SET`, atomic as seen by all readers. gc does
//! not delete superseded version keys outright; it puts a short TTL on them
//! so a reader mid-scan finishes against the version it started on.

use crate::MemberSetStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use segments_core::config::StoreConfig;
use segments_core::{MemberId, SegmentId, SetOp, StoreError};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

pub struct RedisMemberStore {
    client: redis::Client,
    write_chunk_size: usize,
    gc_grace_secs: u64,
}

impl RedisMemberStore {
    /// Connect and verify the store is reachable.
    pub async fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        info!(url = %config.url, "Connecting to member-set store");

        let client = redis::Client::open(config.url.as_str()).map_err(StoreError::unavailable)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::unavailable)?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        info!(response = %pong, "Member-set store connection established");

        Ok(Self {
            client,
            write_chunk_size: config.write_chunk_size.max(1),
            gc_grace_secs: config.gc_grace_secs,
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::unavailable)
    }

    fn version_key(segment: SegmentId, version: u64) -> String {
        format!("seg:{segment}:v:{version}")
    }

    fn cur_key(segment: SegmentId) -> String {
        format!("seg:{segment}:cur")
    }

    fn next_key(segment: SegmentId) -> String {
        format!("seg:{segment}:next")
    }

    fn versions_key(segment: SegmentId) -> String {
        format!("seg:{segment}:versions")
    }

    async fn current(
        &self,
        conn: &mut MultiplexedConnection,
        segment: SegmentId,
    ) -> Result<Option<u64>, StoreError> {
        conn.get(Self::cur_key(segment))
            .await
            .map_err(StoreError::unavailable)
    }
}

#[async_trait]
impl MemberSetStore for RedisMemberStore {
    async fn write_new_version(
        &self,
        segment: SegmentId,
        members: &[MemberId],
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;

        let version: u64 = conn
            .incr(Self::next_key(segment), 1u64)
            .await
            .map_err(StoreError::unavailable)?;
        let key = Self::version_key(segment, version);

        // An empty member set is simply an absent key; SISMEMBER and SMEMBERS
        // treat it as empty.
        for chunk in members.chunks(self.write_chunk_size) {
            conn.sadd::<_, _, ()>(&key, chunk)
                .await
                .map_err(StoreError::unavailable)?;
        }
        conn.sadd::<_, _, ()>(Self::versions_key(segment), version)
            .await
            .map_err(StoreError::unavailable)?;

        metrics::counter!("segments.store.versions_written").increment(1);
        debug!(segment_id = %segment, version, member_count = members.len(), "Wrote member-set version");
        Ok(version)
    }

    async fn promote(&self, segment: SegmentId, version: u64) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        if let Some(current) = self.current(&mut conn, segment).await? {
            if version <= current {
                warn!(segment_id = %segment, version, current, "Refusing out-of-order promote");
                return Ok(());
            }
        }
        conn.set::<_, _, ()>(Self::cur_key(segment), version)
            .await
            .map_err(StoreError::unavailable)?;

        metrics::counter!("segments.store.promotes").increment(1);
        Ok(())
    }

    async fn current_version(&self, segment: SegmentId) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn().await?;
        self.current(&mut conn, segment).await
    }

    async fn is_member(&self, segment: SegmentId, member: MemberId) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        match self.current(&mut conn, segment).await? {
            Some(version) => conn
                .sismember(Self::version_key(segment, version), member)
                .await
                .map_err(StoreError::unavailable),
            None => Ok(false),
        }
    }

    async fn member_count(&self, segment: SegmentId) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        match self.current(&mut conn, segment).await? {
            Some(version) => conn
                .scard(Self::version_key(segment, version))
                .await
                .map_err(StoreError::unavailable),
            None => Ok(0),
        }
    }

    async fn members(&self, segment: SegmentId) -> Result<BTreeSet<MemberId>, StoreError> {
        let mut conn = self.conn().await?;
        match self.current(&mut conn, segment).await? {
            Some(version) => conn
                .smembers(Self::version_key(segment, version))
                .await
                .map_err(StoreError::unavailable),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn set_algebra(
        &self,
        op: SetOp,
        segments: &[SegmentId],
    ) -> Result<BTreeSet<MemberId>, StoreError> {
        if segments.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut conn = self.conn().await?;

        let mut keys = Vec::with_capacity(segments.len());
        for segment in segments {
            // Versions start at 1, so v:0 never exists and reads as the
            // empty set for never-promoted segments.
            let version = self.current(&mut conn, *segment).await?.unwrap_or(0);
            keys.push(Self::version_key(*segment, version));
        }

        let command = match op {
            SetOp::Union => "SUNION",
            SetOp::Intersect => "SINTER",
            SetOp::Difference => "SDIFF",
        };
        redis::cmd(command)
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn gc(&self, segment: SegmentId, keep_version: u64) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let versions: Vec<u64> = conn
            .smembers(Self::versions_key(segment))
            .await
            .map_err(StoreError::unavailable)?;

        let mut expired = 0usize;
        for version in versions {
            if version == keep_version {
                continue;
            }
            // Grace window instead of DEL: in-flight readers keep their
            // version until the TTL runs out.
            conn.expire::<_, ()>(Self::version_key(segment, version), self.gc_grace_secs as i64)
                .await
                .map_err(StoreError::unavailable)?;
            conn.srem::<_, _, ()>(Self::versions_key(segment), version)
                .await
                .map_err(StoreError::unavailable)?;
            expired += 1;
        }
        if expired > 0 {
            debug!(segment_id = %segment, expired, keep_version, "Expired superseded member-set versions");
        }
        Ok(())
    }

    async fn delete_segment(&self, segment: SegmentId) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let versions: Vec<u64> = conn
            .smembers(Self::versions_key(segment))
            .await
            .map_err(StoreError::unavailable)?;

        let mut keys: Vec<String> = versions
            .into_iter()
            .map(|version| Self::version_key(segment, version))
            .collect();
        keys.push(Self::cur_key(segment));
        keys.push(Self::next_key(segment));
        keys.push(Self::versions_key(segment));

        conn.del::<_, ()>(keys)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(())
    }
}
