//! # unstable
//!
//! why: hold the log suffix that has not been confirmed durable yet
//! relations: wrapped by raft-storage's RaftLog, which falls back to stable storage on None
//! what: UnstableLog with index/term queries, leader overwrites, snapshot restore, stabilization
//!
//! `entries[i]` sits at log index `offset + i`. When `entries` is empty,
//! `offset` is the next index to be appended. An index below `offset` is
//! known here only when it is exactly the pending snapshot's index.
//!
//! Queries answer `None` for anything this segment does not cover; the caller
//! is expected to ask stable storage instead. Out-of-range slicing and
//! malformed appends are caller bugs and panic.

use tracing::debug;

use crate::config::LogConfig;
use crate::log::{Entry, Snapshot};

/// In-memory, not yet persisted tail of the raft log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnstableLog {
    /// Incoming snapshot waiting to be applied by stable storage
    snapshot: Option<Snapshot>,
    /// Entries not yet written to stable storage
    entries: Vec<Entry>,
    offset: u64,
    tag: String,
    shrink_multiple: usize,
}

impl UnstableLog {
    /// Create an empty segment whose next index is `offset`,
    /// normally the last index of stable storage plus one
    pub fn new(offset: u64, config: &LogConfig) -> Self {
        Self {
            snapshot: None,
            entries: Vec::new(),
            offset,
            tag: config.tag.clone(),
            shrink_multiple: config.shrink_multiple,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The pending snapshot, if one has been restored and not yet stabilized
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// True when neither entries nor a snapshot are buffered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.snapshot.is_none()
    }

    /// Index right after the pending snapshot, if there is one.
    pub fn maybe_first_index(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|snap| snap.index() + 1)
    }

    /// Last buffered entry index, else the pending snapshot index.
    pub fn maybe_last_index(&self) -> Option<u64> {
        match self.entries.len() {
            0 => self.snapshot.as_ref().map(Snapshot::index),
            len => Some(self.offset + len as u64 - 1),
        }
    }

    /// Term of the entry at `index` if this segment covers it.
    pub fn maybe_term(&self, index: u64) -> Option<u64> {
        if index < self.offset {
            return self
                .snapshot
                .as_ref()
                .filter(|snap| snap.index() == index)
                .map(Snapshot::term);
        }

        let last = self.maybe_last_index()?;
        if index > last {
            return None;
        }
        self.entries
            .get((index - self.offset) as usize)
            .map(|entry| entry.term)
    }

    /// Mark entries up to `index` as persisted.
    ///
    /// Ignored unless `term` still matches the term buffered at `index`:
    /// after a leader change the same index may hold a different entry, and
    /// an acknowledgment for the old one must not retire the new one.
    pub fn stable_to(&mut self, index: u64, term: u64) {
        let Some(current) = self.maybe_term(index) else {
            debug!(
                "tag={}, message=\"ignored stable_to({}, {}): index not tracked\"",
                self.tag, index, term
            );
            return;
        };

        if current != term || index < self.offset {
            debug!(
                "tag={}, message=\"ignored stable_to({}, {}): buffered term {}, offset {}\"",
                self.tag, index, term, current, self.offset
            );
            return;
        }

        let stabilized = (index + 1 - self.offset) as usize;
        self.entries.drain(..stabilized);
        self.offset = index + 1;
        self.shrink_entries();
        debug!(
            "tag={}, message=\"stabilized entries up to {} at term {}\", offset={}, remaining={}",
            self.tag,
            index,
            term,
            self.offset,
            self.entries.len()
        );
    }

    /// Release the allocation once most of it is slack left behind by `stable_to`.
    fn shrink_entries(&mut self) {
        if self.entries.is_empty() {
            self.entries = Vec::new();
        } else if self.entries.len().saturating_mul(self.shrink_multiple)
            < self.entries.capacity()
        {
            self.entries.shrink_to_fit();
        }
    }

    /// Drop the pending snapshot once stable storage has applied it.
    pub fn stable_snapshot_to(&mut self, index: u64) {
        match self.snapshot.as_ref().map(Snapshot::index) {
            Some(pending) if pending == index => {
                self.snapshot = None;
                debug!(
                    "tag={}, message=\"stabilized snapshot at {}\"",
                    self.tag, index
                );
            }
            Some(pending) => debug!(
                "tag={}, message=\"ignored stable_snapshot_to({}): pending snapshot is at {}\"",
                self.tag, index, pending
            ),
            None => debug!(
                "tag={}, message=\"ignored stable_snapshot_to({}): no pending snapshot\"",
                self.tag, index
            ),
        }
    }

    /// Replace everything with `snapshot`.
    pub fn restore(&mut self, snapshot: Snapshot) {
        debug!(
            "tag={}, message=\"restoring snapshot at ({}, {})\", discarded={}",
            self.tag,
            snapshot.index(),
            snapshot.term(),
            self.entries.len()
        );
        self.offset = snapshot.index() + 1;
        self.entries = Vec::new();
        self.snapshot = Some(snapshot);
    }

    /// Merge entries received from the leader.
    ///
    /// # Panics
    ///
    /// If `entries` is empty, its indices are not consecutive, or it starts
    /// past the end of the buffer.
    pub fn truncate_and_append(&mut self, entries: Vec<Entry>) {
        let Some(first) = entries.first() else {
            panic!("{} truncate_and_append called with no entries", self.tag);
        };
        let after = first.index;
        if let Some(pair) = entries.windows(2).find(|w| w[1].index != w[0].index + 1) {
            panic!(
                "{} truncate_and_append given non-contiguous entries: {} followed by {}",
                self.tag, pair[0].index, pair[1].index
            );
        }

        let end = self.offset + self.entries.len() as u64;
        if after == end {
            // directly extends the buffer
            debug!(
                "tag={}, message=\"appending {} entries at {}\"",
                self.tag,
                entries.len(),
                after
            );
            self.entries.extend(entries);
        } else if after <= self.offset {
            // leader rewrote everything we buffered
            debug!(
                "tag={}, message=\"replacing unstable entries from {}\", previous_offset={}",
                self.tag, after, self.offset
            );
            self.offset = after;
            self.entries = entries;
        } else {
            // keep [offset, after), replace the conflicting suffix
            let kept = self.slice(self.offset, after).len();
            debug!(
                "tag={}, message=\"truncating unstable entries to {} then appending {}\"",
                self.tag,
                after,
                entries.len()
            );
            self.entries.truncate(kept);
            self.entries.extend(entries);
        }
    }

    /// Entries in `[lo, hi)`.
    ///
    /// # Panics
    ///
    /// If `lo > hi` or the range is not inside `[offset, offset + len)`.
    pub fn slice(&self, lo: u64, hi: u64) -> &[Entry] {
        self.must_check_out_of_bounds(lo, hi);
        let start = (lo - self.offset) as usize;
        let end = (hi - self.offset) as usize;
        &self.entries[start..end]
    }

    fn must_check_out_of_bounds(&self, lo: u64, hi: u64) {
        if lo > hi {
            panic!("{} invalid unstable.slice {} > {}", self.tag, lo, hi);
        }
        let upper = self.offset + self.entries.len() as u64;
        if lo < self.offset || hi > upper {
            panic!(
                "{} unstable.slice[{}, {}) out of bound [{}, {}]",
                self.tag, lo, hi, self.offset, upper
            );
        }
    }
}
