//! Row versions and per-row version chains.

use crate::types::{Timestamp, TransactionId};
use crate::value::Row;

/// One version of a row.
///
/// Versions are immutable: committing a pending version produces a new
/// committed version, and later writes supersede rather than modify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowVersion {
    /// Row contents; `None` marks a deletion.
    row: Option<Row>,
    /// Transaction that wrote this version.
    created_by: TransactionId,
    /// Commit timestamp; `None` while pending in a write set.
    commit_ts: Option<Timestamp>,
}

impl RowVersion {
    /// Creates a pending version carrying row contents.
    #[must_use]
    pub fn pending(created_by: TransactionId, row: Row) -> Self {
        Self {
            row: Some(row),
            created_by,
            commit_ts: None,
        }
    }

    /// Creates a pending deletion marker.
    #[must_use]
    pub fn tombstone(created_by: TransactionId) -> Self {
        Self {
            row: None,
            created_by,
            commit_ts: None,
        }
    }

    /// Produces the committed form of this version.
    #[must_use]
    pub fn commit(self, ts: Timestamp) -> Self {
        Self {
            commit_ts: Some(ts),
            ..self
        }
    }

    /// Returns the row contents, `None` for a deletion.
    #[must_use]
    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    /// Returns true for a deletion marker.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.row.is_none()
    }

    /// Returns the writing transaction.
    #[must_use]
    pub fn created_by(&self) -> TransactionId {
        self.created_by
    }

    /// Returns the commit timestamp, if committed.
    #[must_use]
    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    fn committed_at_or_before(&self, ts: Timestamp) -> bool {
        self.commit_ts.is_some_and(|c| c <= ts)
    }
}

/// Committed history of one row.
///
/// Versions are appended in commit order; iteration is newest first.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    // oldest first; the head is the last element
    versions: Vec<RowVersion>,
}

impl VersionChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a committed version as the new head.
    pub(crate) fn push(&mut self, version: RowVersion) {
        debug_assert!(version.commit_ts.is_some(), "only committed versions enter a chain");
        debug_assert!(
            self.head_ts() <= version.commit_ts,
            "chain must stay in commit order"
        );
        self.versions.push(version);
    }

    /// Returns the number of versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if the chain holds no versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Iterates versions newest first.
    pub fn iter(&self) -> impl Iterator<Item = &RowVersion> {
        self.versions.iter().rev()
    }

    /// Returns the newest version.
    #[must_use]
    pub fn head(&self) -> Option<&RowVersion> {
        self.versions.last()
    }

    /// Returns the commit timestamp of the newest version.
    #[must_use]
    pub fn head_ts(&self) -> Option<Timestamp> {
        self.head().and_then(RowVersion::commit_ts)
    }

    /// Returns the newest version if it is live.
    #[must_use]
    pub fn latest(&self) -> Option<&RowVersion> {
        self.head().filter(|v| !v.is_deleted())
    }

    /// Returns the version a snapshot taken at `snapshot` sees.
    ///
    /// That is the newest version committed at or before the snapshot, unless
    /// it is a deletion, in which case the row did not exist for the snapshot.
    #[must_use]
    pub fn visible(&self, snapshot: Timestamp) -> Option<&RowVersion> {
        self.iter()
            .find(|v| v.committed_at_or_before(snapshot))
            .filter(|v| !v.is_deleted())
    }

    /// Drops versions no snapshot at or after `horizon` can see.
    ///
    /// Keeps every version newer than the horizon plus the newest version at
    /// or below it. Returns the number of versions removed.
    pub(crate) fn prune(&mut self, horizon: Timestamp) -> usize {
        let Some(base) = self
            .versions
            .iter()
            .rposition(|v| v.committed_at_or_before(horizon))
        else {
            return 0;
        };
        self.versions.drain(..base);
        base
    }

    /// Returns true if the chain is a lone deletion no snapshot can observe.
    pub(crate) fn is_dead(&self, horizon: Timestamp) -> bool {
        self.versions.len() == 1
            && self.versions[0].is_deleted()
            && self.versions[0].committed_at_or_before(horizon)
    }
}
