//! The abstract transactional store: one trait per repository, plus an
//! in-memory implementation used by the single-binary engine and by tests.
//!
//! Unique indexes (`sources.name`, `items.url_hash`, `(goal_id, item_id)`,
//! `decisions.dedupe_key`, `(user_id, date)`) are enforced by the
//! implementation's conditional inserts, mirroring what the relational
//! schema's constraints give a SQL-backed implementation.

pub mod kv;
pub mod memory;
pub mod traits;

pub use kv::{KvStore, MemoryKv};
pub use memory::MemoryStore;
pub use traits::*;
