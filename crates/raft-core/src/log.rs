//! # log
//!
//! why: define the replicated values that flow through the unstable log
//! relations: buffered by unstable.rs, persisted via raft-storage
//! what: Entry, Snapshot, SnapshotMetadata

use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// Opaque command bytes, never inspected by the log
    pub payload: Vec<u8>,
}

impl Entry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, payload: Vec<u8>) -> Self {
        Self { term, index, payload }
    }
}

/// Position covered by a snapshot plus the membership it was taken under
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Last index included in the snapshot
    pub index: u64,
    /// Term of the entry at `index`
    pub term: u64,
    /// Member ids at `index`, forwarded untouched
    pub configuration: Vec<u64>,
}

/// Everything up to and including `metadata.index`, compacted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    /// Opaque state machine image
    pub data: Vec<u8>,
}

impl Snapshot {
    /// Create a snapshot with no configuration and no data
    pub fn new(index: u64, term: u64) -> Self {
        Self {
            metadata: SnapshotMetadata {
                index,
                term,
                configuration: Vec::new(),
            },
            data: Vec::new(),
        }
    }

    pub fn index(&self) -> u64 {
        self.metadata.index
    }

    pub fn term(&self) -> u64 {
        self.metadata.term
    }
}
