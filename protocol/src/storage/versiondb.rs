//! # Versioned Diff
//!
//! A copy-on-write overlay over another [`Database`]. Reads fall through to
//! the base; writes and deletes land in an in-memory map and stay invisible
//! to everyone else until [`VersionDb::commit`].
//!
//! ```text
//!   child block diff   ──▶  VersionDb { mem }
//!                             │ base
//!   parent block diff  ──▶  VersionDb { mem }
//!                             │ base
//!   accepted state     ──▶  SledDatabase
//! ```
//!
//! Block verification builds exactly this stack. When the parent is
//! accepted its diff is committed into sled and the child is re-pointed at
//! sled with [`VersionDb::set_base`]; the child's own overlay is untouched.
//!
//! Deletes are recorded as tombstones (`None`) so they shadow base entries
//! both for point reads and during iteration.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::sync::Arc;

use super::db::{Database, DbResult, KvIter, KvPair, WriteBatch};

type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Copy-on-write overlay. See the module docs.
pub struct VersionDb {
    base: RwLock<Arc<dyn Database>>,
    mem: RwLock<Overlay>,
}

impl VersionDb {
    pub fn new(base: Arc<dyn Database>) -> Self {
        Self {
            base: RwLock::new(base),
            mem: RwLock::new(BTreeMap::new()),
        }
    }

    /// The layer this overlay reads through to.
    pub fn base(&self) -> Arc<dyn Database> {
        Arc::clone(&self.base.read())
    }

    /// Re-points the overlay at a new base. Used once the old base has been
    /// committed into the new one.
    pub fn set_base(&self, base: Arc<dyn Database>) {
        *self.base.write() = base;
    }

    /// Applies every pending write to the base as one batch, then clears
    /// the overlay. If the batch fails the overlay is left intact.
    pub fn commit(&self) -> DbResult<()> {
        let batch: WriteBatch = self
            .mem
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !batch.is_empty() {
            self.base().write_batch(batch)?;
        }
        self.mem.write().clear();
        Ok(())
    }

    /// Drops every pending write.
    pub fn abort(&self) {
        self.mem.write().clear();
    }

    /// Number of keys written (including tombstones).
    pub fn len(&self) -> usize {
        self.mem.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.read().is_empty()
    }
}

impl Database for VersionDb {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        if let Some(entry) = self.mem.read().get(key) {
            return Ok(entry.clone());
        }
        self.base().get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.mem.write().insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        self.mem.write().insert(key.to_vec(), None);
        Ok(())
    }

    fn iter_from(&self, start: &[u8]) -> KvIter {
        // Snapshot the overlay so the iterator holds no lock.
        let overlay: Vec<(Vec<u8>, Option<Vec<u8>>)> = self
            .mem
            .read()
            .range(start.to_vec()..)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(MergeIter {
            overlay: overlay.into_iter().peekable(),
            base: self.base().iter_from(start).peekable(),
        })
    }

    fn write_batch(&self, batch: WriteBatch) -> DbResult<()> {
        let mut mem = self.mem.write();
        for (key, value) in batch.into_ops() {
            mem.insert(key, value);
        }
        Ok(())
    }
}

/// Merges the overlay snapshot with the base iterator. On equal keys the
/// overlay wins; tombstones swallow the base entry.
struct MergeIter {
    overlay: Peekable<std::vec::IntoIter<(Vec<u8>, Option<Vec<u8>>)>>,
    base: Peekable<KvIter>,
}

impl Iterator for MergeIter {
    type Item = DbResult<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let ordering = match (self.overlay.peek(), self.base.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                // Surface base errors immediately.
                (Some(_), Some(Err(_))) => Ordering::Greater,
                (Some((ok, _)), Some(Ok((bk, _)))) => ok.cmp(bk),
            };

            match ordering {
                Ordering::Greater => return self.base.next(),
                Ordering::Equal => {
                    self.base.next();
                }
                Ordering::Less => {}
            }

            if let Some((key, Some(value))) = self.overlay.next() {
                return Some(Ok((key, value)));
            }
        }
    }
}
