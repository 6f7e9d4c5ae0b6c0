//! The change-set model: an ordered batch of [`Change`]s produced together,
//! optionally carrying a sorted/paged/virtualised snapshot.
//!
//! Rather than a family of unrelated types (`SortedChangeSet`,
//! `PagedChangeSet`, `VirtualChangeSet`) inheriting from a common base, this
//! crate follows a single tagged-variant design (see `DESIGN.md`): one
//! `ChangeSet<K, V>` whose [`ChangeSetKind`] records whether, and how, it
//! also carries an ordered snapshot. Operators that only care about presence
//! (`Filter`, `Transform`, `Group`, ...) never look at `kind`; operators that
//! care about order (`Sort`, `Page`, `Virtualise`, the binding adaptors)
//! match on it.

use serde::{Deserialize, Serialize};

use crate::change::{Change, ChangeReason};

/// Request parameters for [`crate::operators::page::Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(page: usize, page_size: usize) -> Self {
        PageRequest { page, page_size }
    }
}

/// Response metadata attached to a `Paged` change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResponse {
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_count: usize,
}

/// Request parameters for [`crate::operators::virtualise::Virtualise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualRequest {
    pub start_index: usize,
    pub size: usize,
}

impl VirtualRequest {
    pub fn new(start_index: usize, size: usize) -> Self {
        VirtualRequest { start_index, size }
    }
}

/// Response metadata attached to a `Virtual` change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualResponse {
    pub start_index: usize,
    pub size: usize,
    pub total_count: usize,
}

/// What ordering metadata, if any, a [`ChangeSet`] carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSetKind<K> {
    /// No ordering is implied; `Moved` never appears.
    Unsorted,
    /// `sorted_keys` is the full ordered key sequence after this change set
    /// was applied.
    Sorted { sorted_keys: Vec<K> },
    /// As `Sorted`, but `sorted_keys` is only the current page's slice.
    Paged { sorted_keys: Vec<K>, response: PageResponse },
    /// As `Sorted`, but `sorted_keys` is only the current window's slice.
    Virtual { sorted_keys: Vec<K>, response: VirtualResponse },
}

impl<K> ChangeSetKind<K> {
    pub fn is_sorted(&self) -> bool {
        !matches!(self, ChangeSetKind::Unsorted)
    }

    pub fn sorted_keys(&self) -> Option<&[K]> {
        match self {
            ChangeSetKind::Unsorted => None,
            ChangeSetKind::Sorted { sorted_keys }
            | ChangeSetKind::Paged { sorted_keys, .. }
            | ChangeSetKind::Virtual { sorted_keys, .. } => Some(sorted_keys),
        }
    }
}

/// Per-reason counters, maintained incrementally as changes are pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
    pub refreshes: usize,
    pub moves: usize,
}

impl Counts {
    fn record(&mut self, reason: ChangeReason) {
        match reason {
            ChangeReason::Add => self.adds += 1,
            ChangeReason::Update => self.updates += 1,
            ChangeReason::Remove => self.removes += 1,
            ChangeReason::Refresh => self.refreshes += 1,
            ChangeReason::Moved => self.moves += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.adds + self.updates + self.removes + self.refreshes + self.moves
    }
}

/// An ordered, non-empty* batch of [`Change`]s produced by one edit scope or
/// one operator re-evaluation.
///
/// (*) Operators never emit empty change sets; an empty
/// [`ChangeSetBuilder`] simply yields `None` instead of `Some(ChangeSet)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet<K, V> {
    changes: Vec<Change<K, V>>,
    counts: Counts,
    kind: ChangeSetKind<K>,
}

impl<K, V> ChangeSet<K, V> {
    pub fn changes(&self) -> &[Change<K, V>] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<Change<K, V>> {
        self.changes
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn kind(&self) -> &ChangeSetKind<K> {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change<K, V>> {
        self.changes.iter()
    }

    /// Rebuilds this change set with different ordering metadata, keeping
    /// the same changes and counts. Used by `Sort`/`Page`/`Virtualise` when
    /// forwarding a change set they did not themselves create the changes
    /// for (e.g. a downstream re-page of unchanged data).
    #[must_use]
    pub fn with_kind(mut self, kind: ChangeSetKind<K>) -> Self {
        self.kind = kind;
        self
    }
}

impl<'a, K, V> IntoIterator for &'a ChangeSet<K, V> {
    type Item = &'a Change<K, V>;
    type IntoIter = std::slice::Iter<'a, Change<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl<K, V> IntoIterator for ChangeSet<K, V> {
    type Item = Change<K, V>;
    type IntoIter = std::vec::IntoIter<Change<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Accumulates [`Change`]s (not yet consolidated) and finalises them into at
/// most one [`ChangeSet`].
///
/// Operators push changes as they process upstream events, then call
/// [`ChangeSetBuilder::build`] once per upstream change set / re-evaluation.
/// Builders never hand back an empty change set.
#[derive(Debug)]
pub struct ChangeSetBuilder<K, V> {
    changes: Vec<Change<K, V>>,
    counts: Counts,
}

impl<K, V> Default for ChangeSetBuilder<K, V> {
    fn default() -> Self {
        ChangeSetBuilder { changes: Vec::new(), counts: Counts::default() }
    }
}

impl<K, V> ChangeSetBuilder<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ChangeSetBuilder { changes: Vec::with_capacity(capacity), counts: Counts::default() }
    }

    pub fn push(&mut self, change: Change<K, V>) -> &mut Self {
        self.counts.record(change.reason());
        self.changes.push(change);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Finalises the accumulated changes into a `ChangeSet` with the given
    /// ordering metadata, or `None` if nothing was accumulated.
    pub fn build(self, kind: ChangeSetKind<K>) -> Option<ChangeSet<K, V>> {
        if self.changes.is_empty() {
            None
        } else {
            Some(ChangeSet { changes: self.changes, counts: self.counts, kind })
        }
    }

    /// Convenience for the common unsorted case.
    pub fn build_unsorted(self) -> Option<ChangeSet<K, V>> {
        self.build(ChangeSetKind::Unsorted)
    }
}
