//! # raft-core
//!
//! why: track the not-yet-durable tail of the raft log in pure, portable rust
//! relations: used by raft-storage, which pairs it with stable storage
//! what: log value types, unstable log segment, log configuration

pub mod config;
pub mod log;
pub mod unstable;

pub use config::{ConfigError, LogConfig};
pub use log::{Entry, Snapshot, SnapshotMetadata};
pub use unstable::UnstableLog;
