//! # memory
//!
//! why: keep the stable log in memory for tests and embedders without a disk engine
//! relations: implements the Storage trait from lib.rs
//! what: MemoryStorage

use raft_core::{Entry, Snapshot};
use tracing::debug;

use crate::{Result, Storage, StorageError};

/// in-memory storage
///
/// `entries[0]` is a dummy holding the index and term of the last
/// compacted position, so `term(first_index - 1)` always resolves
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    snapshot: Snapshot,
    entries: Vec<Entry>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            snapshot: Snapshot::default(),
            entries: vec![Entry::default()],
        }
    }
}

impl MemoryStorage {
    /// create an empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// index of the dummy entry
    fn offset(&self) -> u64 {
        self.entries[0].index
    }

    /// discard entries up to and including `index`
    ///
    /// panics if `index` is past the last entry
    pub fn compact(&mut self, index: u64) -> Result<()> {
        let offset = self.offset();
        if index <= offset {
            return Err(StorageError::Compacted(index));
        }
        let last = offset + self.entries.len() as u64 - 1;
        if index > last {
            panic!("compact {} is out of bound lastindex({})", index, last);
        }

        let pos = (index - offset) as usize;
        let dummy = Entry::new(self.entries[pos].term, index, Vec::new());
        let mut remaining = Vec::with_capacity(self.entries.len() - pos);
        remaining.push(dummy);
        remaining.extend_from_slice(&self.entries[pos + 1..]);
        self.entries = remaining;
        debug!("compacted memory storage to {}", index);
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn first_index(&self) -> Result<u64> {
        Ok(self.offset() + 1)
    }

    fn last_index(&self) -> Result<u64> {
        Ok(self.offset() + self.entries.len() as u64 - 1)
    }

    fn term(&self, index: u64) -> Result<u64> {
        let offset = self.offset();
        if index < offset {
            return Err(StorageError::Compacted(index));
        }
        self.entries
            .get((index - offset) as usize)
            .map(|entry| entry.term)
            .ok_or(StorageError::Unavailable(index))
    }

    fn entries(&self, lo: u64, hi: u64) -> Result<Vec<Entry>> {
        let offset = self.offset();
        if lo <= offset {
            return Err(StorageError::Compacted(lo));
        }
        if lo > hi {
            return Err(StorageError::Unavailable(lo));
        }
        let last = self.last_index()?;
        if hi > last + 1 {
            return Err(StorageError::Unavailable(hi - 1));
        }
        Ok(self.entries[(lo - offset) as usize..(hi - offset) as usize].to_vec())
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.snapshot.clone())
    }

    fn append(&mut self, entries: &[Entry]) -> Result<()> {
        let Some(head) = entries.first() else {
            return Ok(());
        };

        let first = self.first_index()?;
        let last = head.index + entries.len() as u64 - 1;

        // everything is already compacted
        if last < first {
            return Ok(());
        }

        // skip the part that is already compacted
        let entries = if first > head.index {
            &entries[(first - head.index) as usize..]
        } else {
            entries
        };

        let offset = (entries[0].index - self.offset()) as usize;
        if self.entries.len() > offset {
            // overwrite the conflicting suffix
            self.entries.truncate(offset);
            self.entries.extend_from_slice(entries);
        } else if self.entries.len() == offset {
            self.entries.extend_from_slice(entries);
        } else {
            let stored_last = self.offset() + self.entries.len() as u64 - 1;
            panic!(
                "missing log entry [last: {}, append at: {}]",
                stored_last, entries[0].index
            );
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        let current = self.snapshot.index();
        if current >= snapshot.index() {
            return Err(StorageError::SnapshotOutOfDate {
                requested: snapshot.index(),
                current,
            });
        }

        debug!(
            "applied snapshot at ({}, {}) to memory storage",
            snapshot.index(),
            snapshot.term()
        );
        self.entries = vec![Entry::new(snapshot.term(), snapshot.index(), Vec::new())];
        self.snapshot = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64) -> Entry {
        Entry::new(term, index, Vec::new())
    }

    /// dummy at (3, 3) followed by entries 4 and 5
    fn storage() -> MemoryStorage {
        MemoryStorage {
            snapshot: Snapshot::default(),
            entries: vec![entry(3, 3), entry(4, 4), entry(5, 5)],
        }
    }

    #[test]
    fn empty_storage_bounds() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.first_index().unwrap(), 1);
        assert_eq!(storage.last_index().unwrap(), 0);
        assert_eq!(storage.term(0).unwrap(), 0);
        assert_eq!(storage.snapshot().unwrap(), Snapshot::default());
    }

    #[test]
    fn term_lookup() {
        let storage = storage();
        assert_eq!(storage.term(2), Err(StorageError::Compacted(2)));
        assert_eq!(storage.term(3), Ok(3));
        assert_eq!(storage.term(4), Ok(4));
        assert_eq!(storage.term(5), Ok(5));
        assert_eq!(storage.term(6), Err(StorageError::Unavailable(6)));
    }

    #[test]
    fn entries_lookup() {
        let storage = storage();
        assert_eq!(storage.entries(2, 6), Err(StorageError::Compacted(2)));
        assert_eq!(storage.entries(3, 4), Err(StorageError::Compacted(3)));
        assert_eq!(storage.entries(4, 5).unwrap(), vec![entry(4, 4)]);
        assert_eq!(storage.entries(4, 6).unwrap(), vec![entry(4, 4), entry(5, 5)]);
        assert_eq!(storage.entries(4, 7), Err(StorageError::Unavailable(6)));
    }

    #[test]
    fn append() {
        let cases = vec![
            (
                vec![entry(3, 3), entry(4, 4), entry(5, 5)],
                vec![entry(3, 3), entry(4, 4), entry(5, 5)],
            ),
            // overwrite the conflicting suffix
            (
                vec![entry(3, 3), entry(4, 6), entry(5, 6)],
                vec![entry(3, 3), entry(4, 6), entry(5, 6)],
            ),
            (
                vec![entry(3, 3), entry(4, 4), entry(5, 5), entry(6, 5)],
                vec![entry(3, 3), entry(4, 4), entry(5, 5), entry(6, 5)],
            ),
            // truncate incoming entries below the compaction point
            (
                vec![entry(2, 3), entry(3, 3), entry(4, 5)],
                vec![entry(3, 3), entry(4, 5)],
            ),
            // truncate the existing entries and append
            (vec![entry(4, 5)], vec![entry(3, 3), entry(4, 5)]),
            // direct append
            (
                vec![entry(6, 5)],
                vec![entry(3, 3), entry(4, 4), entry(5, 5), entry(6, 5)],
            ),
            // fully compacted batch is ignored
            (vec![entry(1, 1), entry(2, 2)], vec![entry(3, 3), entry(4, 4), entry(5, 5)]),
        ];

        for (i, (to_append, want)) in cases.into_iter().enumerate() {
            let mut storage = storage();
            storage.append(&to_append).unwrap();
            assert_eq!(storage.entries, want, "case #{}", i);
        }
    }

    #[test]
    #[should_panic(expected = "missing log entry [last: 5, append at: 7]")]
    fn append_with_gap_panics() {
        let mut storage = storage();
        storage.append(&[entry(7, 5)]).unwrap();
    }

    #[test]
    fn compact_keeps_term_of_new_dummy() {
        let mut storage = storage();
        storage.compact(4).unwrap();
        assert_eq!(storage.first_index().unwrap(), 5);
        assert_eq!(storage.term(4), Ok(4));
        assert_eq!(storage.compact(4), Err(StorageError::Compacted(4)));
    }

    #[test]
    fn apply_snapshot_rejects_older_snapshot() {
        let mut storage = MemoryStorage::new();
        storage.apply_snapshot(Snapshot::new(4, 4)).unwrap();
        assert_eq!(storage.first_index().unwrap(), 5);
        assert_eq!(storage.last_index().unwrap(), 4);
        assert_eq!(storage.term(4), Ok(4));

        let err = storage.apply_snapshot(Snapshot::new(3, 3)).unwrap_err();
        assert_eq!(err, StorageError::SnapshotOutOfDate { requested: 3, current: 4 });
    }
}
