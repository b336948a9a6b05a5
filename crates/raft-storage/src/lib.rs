//! # raft-storage
//!
//! why: define the stable side of the raft log that the unstable segment falls back to
//! relations: uses raft-core for entries, snapshots and the unstable segment
//! what: Storage trait, StorageError, MemoryStorage, RaftLog

use raft_core::{Entry, Snapshot};
use thiserror::Error;

mod memory;
mod raft_log;

pub use memory::MemoryStorage;
pub use raft_log::RaftLog;

/// errors reported by stable storage
///
/// these are recoverable conditions; broken invariants panic instead
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("requested index {0} is unavailable due to compaction")]
    Compacted(u64),

    #[error("requested entry at index {0} is unavailable")]
    Unavailable(u64),

    #[error("snapshot at index {requested} is not newer than current snapshot at {current}")]
    SnapshotOutOfDate { requested: u64, current: u64 },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// trait for the durable prefix of the raft log
///
/// consulted whenever the unstable segment answers `None`.
/// this abstraction allows the same log code to work with:
/// - in-memory storage (testing, embedding)
/// - any durable engine the embedder provides
pub trait Storage {
    /// index of the first entry still available (snapshot index + 1)
    fn first_index(&self) -> Result<u64>;

    /// index of the last persisted entry
    fn last_index(&self) -> Result<u64>;

    /// term of the entry at `index`, valid for `[first_index - 1, last_index]`
    fn term(&self, index: u64) -> Result<u64>;

    /// entries in `[lo, hi)`
    fn entries(&self, lo: u64, hi: u64) -> Result<Vec<Entry>>;

    /// most recently applied snapshot
    fn snapshot(&self) -> Result<Snapshot>;

    /// persist entries, overwriting any conflicting suffix
    fn append(&mut self, entries: &[Entry]) -> Result<()>;

    /// replace all persisted state with `snapshot`
    fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<()>;
}
