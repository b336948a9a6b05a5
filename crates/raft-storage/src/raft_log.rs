//! # raft_log
//!
//! why: give the consensus driver one view over stable storage and the unstable segment
//! relations: wraps raft-core's UnstableLog around any Storage implementation
//! what: RaftLog with index/term lookups, follower append, commit tracking, persistence

use raft_core::{Entry, LogConfig, Snapshot, UnstableLog};
use tracing::debug;

use crate::{Result, Storage, StorageError};

/// the full raft log: persisted prefix plus unstable tail
pub struct RaftLog<S: Storage> {
    /// everything persisted so far
    storage: S,
    /// entries and snapshot not yet persisted
    unstable: UnstableLog,
    /// highest index known to be replicated on a quorum
    committed: u64,
    tag: String,
}

impl<S: Storage> RaftLog<S> {
    /// create a log whose unstable segment starts right after `storage`
    pub fn new(storage: S, config: &LogConfig) -> Result<Self> {
        let first_index = storage.first_index()?;
        let last_index = storage.last_index()?;
        Ok(Self {
            unstable: UnstableLog::new(last_index + 1, config),
            committed: first_index - 1,
            tag: config.tag.clone(),
            storage,
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn unstable(&self) -> &UnstableLog {
        &self.unstable
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn first_index(&self) -> Result<u64> {
        match self.unstable.maybe_first_index() {
            Some(index) => Ok(index),
            None => self.storage.first_index(),
        }
    }

    pub fn last_index(&self) -> Result<u64> {
        match self.unstable.maybe_last_index() {
            Some(index) => Ok(index),
            None => self.storage.last_index(),
        }
    }

    /// term at `index`, 0 when `index` lies outside `[first_index - 1, last_index]`
    pub fn term(&self, index: u64) -> Result<u64> {
        // the entry before the first one is still valid for matching
        let dummy_index = self.first_index()? - 1;
        if index < dummy_index || index > self.last_index()? {
            return Ok(0);
        }

        match self.unstable.maybe_term(index) {
            Some(term) => Ok(term),
            None => self.storage.term(index),
        }
    }

    pub fn last_term(&self) -> Result<u64> {
        self.term(self.last_index()?)
    }

    pub fn match_term(&self, index: u64, term: u64) -> bool {
        matches!(self.term(index), Ok(t) if t == term)
    }

    /// index of the first entry in `entries` that is new or conflicts, 0 if none
    pub fn find_conflict(&self, entries: &[Entry]) -> u64 {
        entries
            .iter()
            .find(|entry| !self.match_term(entry.index, entry.term))
            .map_or(0, |entry| entry.index)
    }

    /// follower side of AppendEntries
    ///
    /// returns the last index covered by the message when the previous
    /// entry matches, `None` otherwise
    pub fn maybe_append(
        &mut self,
        prev_index: u64,
        prev_term: u64,
        committed: u64,
        mut entries: Vec<Entry>,
    ) -> Result<Option<u64>> {
        if !self.match_term(prev_index, prev_term) {
            debug!(
                "tag={}, message=\"rejected append: no entry at ({}, {})\"",
                self.tag, prev_index, prev_term
            );
            return Ok(None);
        }

        if let Some(first) = entries.first() {
            if first.index != prev_index + 1 {
                panic!(
                    "{} appended entries start at {}, expected {} after ({}, {})",
                    self.tag,
                    first.index,
                    prev_index + 1,
                    prev_index,
                    prev_term
                );
            }
        }

        let last_new_index = prev_index + entries.len() as u64;
        let conflict = self.find_conflict(&entries);
        if conflict != 0 {
            if conflict <= self.committed {
                panic!(
                    "{} entry {} conflict with committed entry [committed({})]",
                    self.tag, conflict, self.committed
                );
            }
            let start = (conflict - (prev_index + 1)) as usize;
            self.append(entries.split_off(start))?;
        }
        self.commit_to(committed.min(last_new_index))?;
        Ok(Some(last_new_index))
    }

    /// buffer entries in the unstable segment and return the new last index
    ///
    /// panics if the batch would rewrite committed entries
    pub fn append(&mut self, entries: Vec<Entry>) -> Result<u64> {
        let Some(first) = entries.first() else {
            return self.last_index();
        };
        if first.index <= self.committed {
            panic!(
                "{} after({}) is out of range [committed({})]",
                self.tag,
                first.index.saturating_sub(1),
                self.committed
            );
        }
        self.unstable.truncate_and_append(entries);
        self.last_index()
    }

    /// advance the commit index; never moves backwards
    pub fn commit_to(&mut self, to_commit: u64) -> Result<()> {
        if self.committed >= to_commit {
            return Ok(());
        }
        let last_index = self.last_index()?;
        if last_index < to_commit {
            panic!(
                "{} to_commit({}) is out of range [last_index({})]",
                self.tag, to_commit, last_index
            );
        }
        self.committed = to_commit;
        Ok(())
    }

    /// entries waiting to be written to storage
    pub fn unstable_entries(&self) -> &[Entry] {
        self.unstable.entries()
    }

    /// entries in `[lo, hi)`, read from storage and/or the unstable segment
    pub fn slice(&self, lo: u64, hi: u64) -> Result<Vec<Entry>> {
        self.must_check_out_of_bounds(lo, hi)?;
        if lo == hi {
            return Ok(Vec::new());
        }

        let offset = self.unstable.offset();
        let mut entries = if lo < offset {
            self.storage.entries(lo, hi.min(offset))?
        } else {
            Vec::new()
        };
        if hi > offset {
            entries.extend_from_slice(self.unstable.slice(lo.max(offset), hi));
        }
        Ok(entries)
    }

    /// every entry from `index` to the end of the log
    pub fn entries_from(&self, index: u64) -> Result<Vec<Entry>> {
        let last_index = self.last_index()?;
        if index > last_index {
            return Ok(Vec::new());
        }
        self.slice(index, last_index + 1)
    }

    fn must_check_out_of_bounds(&self, lo: u64, hi: u64) -> Result<()> {
        if lo > hi {
            panic!("{} invalid slice {} > {}", self.tag, lo, hi);
        }
        let first_index = self.first_index()?;
        if lo < first_index {
            return Err(StorageError::Compacted(lo));
        }
        let upper = self.last_index()? + 1;
        if hi > upper {
            panic!(
                "{} slice[{}, {}) out of bound [{}, {}]",
                self.tag, lo, hi, first_index, upper
            );
        }
        Ok(())
    }

    /// install a leader snapshot, superseding the whole log
    ///
    /// a snapshot at or below the commit index is ignored and `false` returned
    pub fn restore(&mut self, snapshot: Snapshot) -> bool {
        if snapshot.index() <= self.committed {
            debug!(
                "tag={}, message=\"ignored stale snapshot\", index={}, term={}, committed={}",
                self.tag,
                snapshot.index(),
                snapshot.term(),
                self.committed
            );
            return false;
        }
        debug!(
            "tag={}, message=\"log restoring snapshot\", index={}, term={}, committed={}",
            self.tag,
            snapshot.index(),
            snapshot.term(),
            self.committed
        );
        self.committed = snapshot.index();
        self.unstable.restore(snapshot);
        true
    }

    /// the pending snapshot if any, else the one in storage
    pub fn snapshot(&self) -> Result<Snapshot> {
        match self.unstable.snapshot() {
            Some(snapshot) => Ok(snapshot.clone()),
            None => self.storage.snapshot(),
        }
    }

    /// acknowledge that entries up to `index` at `term` were persisted
    pub fn stable_to(&mut self, index: u64, term: u64) {
        self.unstable.stable_to(index, term);
    }

    /// acknowledge that the snapshot at `index` was applied
    pub fn stable_snapshot_to(&mut self, index: u64) {
        self.unstable.stable_snapshot_to(index);
    }

    /// write the unstable segment to storage and acknowledge it
    ///
    /// the pending snapshot goes first, since unstable entries
    /// always continue from it
    pub fn persist(&mut self) -> Result<()> {
        if let Some(snapshot) = self.unstable.snapshot().cloned() {
            let index = snapshot.index();
            self.storage.apply_snapshot(snapshot)?;
            self.unstable.stable_snapshot_to(index);
        }

        if let Some(last) = self.unstable.entries().last() {
            let (index, term) = (last.index, last.term);
            self.storage.append(self.unstable.entries())?;
            self.unstable.stable_to(index, term);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    fn entry(index: u64, term: u64) -> Entry {
        Entry::new(term, index, Vec::new())
    }

    fn log_with(persisted: &[Entry], pending: Vec<Entry>) -> RaftLog<MemoryStorage> {
        let mut storage = MemoryStorage::new();
        storage.append(persisted).unwrap();
        let mut log = RaftLog::new(storage, &LogConfig::with_tag("node-1")).unwrap();
        if !pending.is_empty() {
            log.append(pending).unwrap();
        }
        log
    }

    #[test]
    fn find_conflict() {
        let previous = vec![entry(1, 1), entry(2, 2), entry(3, 3)];
        let cases = vec![
            // no conflict, empty ent
            (vec![], 0),
            // no conflict
            (vec![entry(1, 1), entry(2, 2), entry(3, 3)], 0),
            (vec![entry(2, 2), entry(3, 3)], 0),
            (vec![entry(3, 3)], 0),
            // no conflict, but has new entries
            (vec![entry(1, 1), entry(2, 2), entry(3, 3), entry(4, 4), entry(5, 4)], 4),
            (vec![entry(2, 2), entry(3, 3), entry(4, 4), entry(5, 4)], 4),
            (vec![entry(3, 3), entry(4, 4), entry(5, 4)], 4),
            (vec![entry(4, 4), entry(5, 4)], 4),
            // conflicts with existing entries
            (vec![entry(1, 4), entry(2, 4)], 1),
            (vec![entry(2, 1), entry(3, 4), entry(4, 4)], 2),
            (vec![entry(3, 1), entry(4, 2), entry(5, 4), entry(6, 4)], 3),
        ];

        for (i, (entries, want)) in cases.into_iter().enumerate() {
            let log = log_with(&[], previous.clone());
            assert_eq!(log.find_conflict(&entries), want, "case #{}", i);
        }
    }

    #[test]
    fn term_falls_back_to_storage() {
        let log = log_with(&[entry(1, 1), entry(2, 1)], vec![entry(3, 2)]);
        assert_eq!(log.term(0).unwrap(), 0);
        assert_eq!(log.term(2).unwrap(), 1);
        assert_eq!(log.term(3).unwrap(), 2);
        assert_eq!(log.term(4).unwrap(), 0);
        assert_eq!(log.last_term().unwrap(), 2);
    }

    #[test]
    fn commit_to_never_decreases() {
        let mut log = log_with(&[], vec![entry(1, 1), entry(2, 1), entry(3, 1)]);
        log.commit_to(3).unwrap();
        log.commit_to(1).unwrap();
        assert_eq!(log.committed(), 3);
    }

    #[test]
    #[should_panic(expected = "node-1 to_commit(4) is out of range [last_index(3)]")]
    fn commit_past_last_index_panics() {
        let mut log = log_with(&[], vec![entry(1, 1), entry(2, 1), entry(3, 1)]);
        log.commit_to(4).unwrap();
    }

    #[test]
    #[should_panic(expected = "node-1 after(1) is out of range [committed(2)]")]
    fn append_below_commit_panics() {
        let mut log = log_with(&[], vec![entry(1, 1), entry(2, 1), entry(3, 1)]);
        log.commit_to(2).unwrap();
        log.append(vec![entry(2, 2)]).unwrap();
    }

    #[test]
    fn restore_never_moves_commit_backwards() {
        let entries: Vec<Entry> = (1..=10).map(|i| entry(i, 1)).collect();
        let mut log = log_with(&[], entries);
        log.commit_to(10).unwrap();

        assert!(!log.restore(Snapshot::new(3, 1)));
        assert!(!log.restore(Snapshot::new(10, 1)));

        assert_eq!(log.committed(), 10);
        assert!(log.unstable().snapshot().is_none());
        assert_eq!(log.last_index().unwrap(), 10);
    }

    #[test]
    fn restore_past_commit_is_installed() {
        let mut log = log_with(&[], vec![entry(1, 1), entry(2, 1)]);
        log.commit_to(1).unwrap();

        assert!(log.restore(Snapshot::new(5, 2)));
        assert_eq!(log.committed(), 5);
        assert_eq!(log.first_index().unwrap(), 6);
    }

    #[test]
    #[should_panic(expected = "node-1 appended entries start at 4, expected 3 after (2, 1)")]
    fn maybe_append_rejects_batch_not_following_prev() {
        let mut log = log_with(&[], vec![entry(1, 1), entry(2, 1)]);
        let _ = log.maybe_append(2, 1, 0, vec![entry(4, 1)]);
    }

    #[test]
    fn slice_rejects_compacted_range() {
        let mut storage = MemoryStorage::new();
        storage.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]).unwrap();
        storage.compact(2).unwrap();
        let log = RaftLog::new(storage, &LogConfig::default()).unwrap();

        assert_eq!(log.slice(1, 3), Err(StorageError::Compacted(1)));
        assert_eq!(log.slice(3, 4).unwrap(), vec![entry(3, 1)]);
    }
}
