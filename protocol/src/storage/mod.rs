//! # Storage Module
//!
//! Everything the chain persists, and the layers that sit between a block
//! and the disk.
//!
//! ## Architecture
//!
//! ```text
//! db.rs        - Database trait + sled backend
//! versiondb.rs - copy-on-write overlay (one per verified block)
//! keys.rs      - prefix layout of the single chain tree
//! state.rs     - typed accessors: values, tx markers, balances, blocks
//! cache.rs     - linked-value LRU used when reading blocks back
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Transaction::execute ──▶ state::* ──▶ VersionDb (block diff)
//!                                            │ accept: commit
//!                                            ▼
//!                                      SledDatabase
//! ```
//!
//! Nothing reaches sled except through a commit at accept time (and the
//! one-off genesis load). Verification of competing blocks therefore never
//! touches durable state.

pub mod cache;
pub mod db;
pub mod keys;
pub mod state;
pub mod versiondb;

pub use cache::LinkedValueCache;
pub use db::{Database, DbError, DbResult, SledDatabase, WriteBatch};
pub use state::{BalanceChange, ValueMeta};
pub use versiondb::VersionDb;
