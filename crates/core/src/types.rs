use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// Member identifiers are integral user ids — the shape raw queries and
/// manager lookups are required to return.
pub type MemberId = u64;

pub type SegmentId = Uuid;

/// How a segment's member set is computed. A closed set: the adapter
/// dispatches over these variants with a single match, and adding a kind
/// means adding an arm there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentDefinition {
    /// Verbatim SQL executed against the configured read-only connection.
    /// The query passes through unchanged — the author is trusted, and no
    /// construction or escaping happens on this side of the boundary.
    RawQuery(String),
    /// A literal list of member ids.
    StaticList(Vec<MemberId>),
    /// A named method on a named external collection. The method returns an
    /// enumerable of member ids, or of objects exposing an `id` field.
    ManagerLookup {
        source: String,
        method: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },
}

impl SegmentDefinition {
    /// Content hash of this definition, compared against the hash recorded
    /// at the last successful refresh to detect staleness.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        // Serializing a plain enum of strings/ints/JSON values cannot fail.
        hasher.update(serde_json::to_vec(self).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SegmentDefinition::RawQuery(_) => "raw_query",
            SegmentDefinition::StaticList(_) => "static_list",
            SegmentDefinition::ManagerLookup { .. } => "manager_lookup",
        }
    }
}

/// A named user population plus metadata about its materialized member set.
///
/// The definition is mutable through `SegmentResolver::set_definition`; the
/// remaining fields change only on a successful refresh. Editing a
/// definition never touches the member set — it only makes the segment
/// stale until the next refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub name: String,
    pub definition: SegmentDefinition,
    pub created_at: DateTime<Utc>,
    /// None until the first successful refresh.
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Hash of the definition as of the last successful refresh.
    pub definition_hash: Option<String>,
    /// Member count as of the last successful refresh.
    pub member_count: u64,
}

impl Segment {
    pub fn new(name: impl Into<String>, definition: SegmentDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            definition,
            created_at: Utc::now(),
            last_refreshed_at: None,
            definition_hash: None,
            member_count: 0,
        }
    }

    /// True when the current definition no longer matches the one that
    /// produced the promoted member set (or no refresh ever ran).
    pub fn is_stale(&self) -> bool {
        match &self.definition_hash {
            Some(hash) => *hash != self.definition.content_hash(),
            None => true,
        }
    }
}

/// Set-algebra operations over the current member sets of multiple segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOp {
    Union,
    Intersect,
    /// Left fold: the first segment's members minus all the rest.
    Difference,
}

/// Outcome of a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub segment_id: SegmentId,
    pub version: u64,
    pub member_count: u64,
    pub duration: Duration,
}

/// Outcome of a bulk refresh across all registered segments.
#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Anything with a member identity can ask about its own membership.
pub trait SegmentSubject {
    fn member_id(&self) -> MemberId;
}
