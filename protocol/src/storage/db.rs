//! # Database Contract & sled Backend
//!
//! The chain only needs six things from a key-value store: point reads and
//! writes, existence checks, deletes, ordered iteration from a start key,
//! and an atomic batch. [`Database`] is exactly that contract. Everything
//! above this file (the versioned diff, the typed state accessors, block
//! verification) talks to `dyn Database` and never to sled directly.
//!
//! ## Key Layout
//!
//! All chain data lives in one sled tree. Partitioning is done with one-byte
//! key prefixes (see [`keys`](super::keys)), so a single `apply_batch` on a
//! single tree covers an entire accepted block, atomically.

use sled::{Batch, Db, Tree};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt record under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl DbError {
    pub(crate) fn corrupt(key: &[u8], reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: hex::encode(key),
            reason: reason.into(),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// A key/value pair yielded by iteration.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Ordered iterator over `(key, value)` pairs, ascending by key.
pub type KvIter = Box<dyn Iterator<Item = DbResult<KvPair>>>;

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// An ordered list of puts and deletes applied atomically by
/// [`Database::write_batch`]. Later operations on the same key win.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push((key.to_vec(), Some(value.to_vec())));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.ops.push((key.to_vec(), None));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.ops
    }
}

impl FromIterator<(Vec<u8>, Option<Vec<u8>>)> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database trait
// ---------------------------------------------------------------------------

/// The key-value contract the chain is written against.
///
/// Implementations must be shareable across threads: sibling blocks verify
/// concurrently against diffs that all read the same base.
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()>;

    fn delete(&self, key: &[u8]) -> DbResult<()>;

    /// Iterates every key `>= start` in ascending byte order.
    fn iter_from(&self, start: &[u8]) -> KvIter;

    /// Applies all operations or none of them.
    fn write_batch(&self, batch: WriteBatch) -> DbResult<()>;

    /// Makes previously applied writes durable. No-op for in-memory layers.
    fn flush(&self) -> DbResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SledDatabase
// ---------------------------------------------------------------------------

/// sled-backed durable store.
///
/// sled is internally synchronized, so `SledDatabase` is shared as
/// `Arc<SledDatabase>` (or `Arc<dyn Database>`) with no extra locking.
#[derive(Debug, Clone)]
pub struct SledDatabase {
    db: Db,
    /// The single tree holding every chain key.
    chain: Tree,
}

impl SledDatabase {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway database removed when the last handle drops. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let chain = db.open_tree("chain")?;
        Ok(Self { db, chain })
    }
}

impl Database for SledDatabase {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.chain.get(key)?.map(|v| v.to_vec()))
    }

    fn has(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.chain.contains_key(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.chain.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        self.chain.remove(key)?;
        Ok(())
    }

    fn iter_from(&self, start: &[u8]) -> KvIter {
        let iter = self.chain.range(start.to_vec()..).map(|item| {
            item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(DbError::from)
        });
        Box::new(iter)
    }

    fn write_batch(&self, batch: WriteBatch) -> DbResult<()> {
        let mut sled_batch = Batch::default();
        for (key, value) in batch.into_ops() {
            match value {
                Some(v) => sled_batch.insert(key, v),
                None => sled_batch.remove(key),
            }
        }
        self.chain.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> SledDatabase {
        SledDatabase::open_temporary().unwrap()
    }

    #[test]
    fn put_get_has_delete() {
        let db = temp_db();
        assert_eq!(db.get(b"k").unwrap(), None);
        assert!(!db.has(b"k").unwrap());

        db.put(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(db.has(b"k").unwrap());

        db.delete(b"k").unwrap();
        assert!(!db.has(b"k").unwrap());
    }

    #[test]
    fn iter_from_is_ordered_and_inclusive() {
        let db = temp_db();
        for k in [b"a", b"c", b"b", b"d"] {
            db.put(k, k).unwrap();
        }
        let keys: Vec<Vec<u8>> = db.iter_from(b"b").map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn write_batch_applies_puts_and_deletes() {
        let db = temp_db();
        db.put(b"gone", b"1").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"x", b"1");
        batch.put(b"y", b"2");
        batch.delete(b"gone");
        batch.put(b"x", b"3");
        db.write_batch(batch).unwrap();

        assert_eq!(db.get(b"x").unwrap(), Some(b"3".to_vec()));
        assert_eq!(db.get(b"y").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.get(b"gone").unwrap(), None);
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = SledDatabase::open(dir.path()).unwrap();
            db.put(b"persist", b"me").unwrap();
            db.flush().unwrap();
        }
        let db = SledDatabase::open(dir.path()).unwrap();
        assert_eq!(db.get(b"persist").unwrap(), Some(b"me".to_vec()));
    }
}
