//! Persistence layer for retained messages
//!
//! The retained table is written to a single versioned binary file at
//! checkpoints and on shutdown, and read back at startup.
//!
//! # Architecture
//!
//! - `PersistenceFile`: magic header, big-endian primitives, atomic commit
//! - `RetainedMessagesDb`: the retained message format on top of it
//! - `Checkpointer`: snapshots the live table on a timer and at shutdown

mod checkpoint;
mod error;
mod file;
mod retained_db;

pub use checkpoint::{CheckpointHandle, Checkpointer};
pub use error::{PersistenceError, Result};
pub use file::{PersistenceFile, DEFAULT_MAX_FILE_SIZE, MAGIC_STRING_LEN};
pub use retained_db::{
    RetainedDbVersion, RetainedMessagesDb, PLACEHOLDER_PACKET_ID, RESERVED_SPACE,
};
