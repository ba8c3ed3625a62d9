//! Priority-ordered transaction pool.
//!
//! Holds signed transactions that passed trial execution and are waiting
//! for a block. Entries are indexed by id for O(1) lookups and sorted by
//! offered price in a B-tree for block building.
//!
//! ## Design
//!
//! - One `parking_lot::Mutex` guards every index. Drains must remove a
//!   consistent subset atomically, so there is no point splitting the lock.
//! - Ordering is price descending, then arrival order. A monotonically
//!   increasing sequence number stands in for arrival time so that ties are
//!   broken deterministically even within one clock tick.
//! - Eviction targets the lowest-priority entry when the pool is full and
//!   an incoming transaction offers a strictly higher price.
//! - A separate FIFO of ids tracks entries that have never been handed to
//!   outbound gossip. [`Mempool::drain_new`] consumes it; block building
//!   never does.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::chain::genesis::Genesis;
use crate::chain::transaction::Transaction;
use crate::config::DEFAULT_MEMPOOL_SIZE;
use crate::types::{BlockId, TxId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for mempool behaviour.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of transactions the pool will hold.
    pub max_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MEMPOOL_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// FeeKey - B-tree ordering key
// ---------------------------------------------------------------------------

/// Composite key for the priority index.
///
/// Price is stored inverted (`u64::MAX - price`) so the default ascending
/// B-tree order yields highest-price-first iteration. The transaction id
/// is the final tiebreaker; `BTreeMap` requires unique keys.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FeeKey {
    inverted_price: u64,
    /// Arrival sequence. Earlier entries win ties.
    seq: u64,
    tx_id: TxId,
}

impl Ord for FeeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inverted_price
            .cmp(&other.inverted_price)
            .then_with(|| self.seq.cmp(&other.seq))
            .then_with(|| self.tx_id.cmp(&other.tx_id))
    }
}

impl PartialOrd for FeeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// MempoolEntry
// ---------------------------------------------------------------------------

/// A transaction together with pool-management metadata.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub transaction: Transaction,
    /// Offered price per fee unit.
    pub price: u64,
    /// Fee units, computed once on insertion.
    pub units: u64,
    seq: u64,
}

impl MempoolEntry {
    fn key(&self) -> FeeKey {
        FeeKey {
            inverted_price: u64::MAX - self.price,
            seq: self.seq,
            tx_id: self.transaction.id(),
        }
    }
}

// ---------------------------------------------------------------------------
// MempoolError
// ---------------------------------------------------------------------------

/// Errors returned by mempool operations.
#[derive(Debug)]
pub enum MempoolError {
    /// A transaction with the same id is already in the pool.
    DuplicateTransaction(TxId),

    /// The pool is at capacity and the incoming transaction does not outbid
    /// the lowest-priced entry.
    MempoolFull { size: usize },
}

impl fmt::Display for MempoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTransaction(id) => {
                write!(f, "transaction {} already exists in mempool", id)
            }
            Self::MempoolFull { size } => {
                write!(f, "mempool is full ({} transactions)", size)
            }
        }
    }
}

impl std::error::Error for MempoolError {}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    entries: HashMap<TxId, MempoolEntry>,
    fee_index: BTreeMap<FeeKey, TxId>,
    /// Ids not yet handed to outbound gossip, oldest first. May contain ids
    /// that have since left the pool; those are skipped lazily.
    fresh: VecDeque<TxId>,
    next_seq: u64,
}

impl Inner {
    fn remove(&mut self, tx_id: &TxId) -> Option<MempoolEntry> {
        let entry = self.entries.remove(tx_id)?;
        self.fee_index.remove(&entry.key());
        Some(entry)
    }
}

/// A thread-safe transaction mempool.
pub struct Mempool {
    genesis: Arc<Genesis>,
    config: MempoolConfig,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mempool")
            .field("size", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Mempool {
    /// Creates a new mempool. `genesis` prices fee units.
    pub fn new(genesis: Arc<Genesis>, config: MempoolConfig) -> Self {
        Self {
            genesis,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Adds a transaction.
    ///
    /// 1. **Duplicate**: reject if the id is already pooled.
    /// 2. **Capacity**: if full, evict the lowest-priority entry, but only
    ///    when the incoming price is strictly higher than its price.
    ///
    /// Returns the id of the evicted entry, if any.
    pub fn add(&self, tx: Transaction) -> Result<Option<TxId>, MempoolError> {
        let tx_id = tx.id();
        let price = tx.price();
        let units = tx.fee_units(&self.genesis);

        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&tx_id) {
            return Err(MempoolError::DuplicateTransaction(tx_id));
        }

        let mut evicted = None;
        if inner.entries.len() >= self.config.max_size {
            let lowest = match inner.fee_index.iter().next_back() {
                Some((key, id)) if u64::MAX - key.inverted_price < price => *id,
                _ => {
                    return Err(MempoolError::MempoolFull {
                        size: self.config.max_size,
                    })
                }
            };
            inner.remove(&lowest);
            debug!(evicted = %lowest, incoming = %tx_id, "mempool full, evicted lowest-priced transaction");
            evicted = Some(lowest);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = MempoolEntry {
            transaction: tx,
            price,
            units,
            seq,
        };
        inner.fee_index.insert(entry.key(), tx_id);
        inner.entries.insert(tx_id, entry);
        inner.fresh.push_back(tx_id);

        Ok(evicted)
    }

    /// Removes a transaction by id and returns it.
    pub fn remove(&self, tx_id: &TxId) -> Option<Transaction> {
        self.inner.lock().remove(tx_id).map(|e| e.transaction)
    }

    /// Batch-removes transactions, typically the contents of an accepted
    /// block. Missing ids are ignored.
    pub fn remove_batch<'a>(&self, tx_ids: impl IntoIterator<Item = &'a TxId>) {
        let mut inner = self.inner.lock();
        for id in tx_ids {
            inner.remove(id);
        }
    }

    pub fn get(&self, tx_id: &TxId) -> Option<Transaction> {
        self.inner.lock().entries.get(tx_id).map(|e| e.transaction.clone())
    }

    pub fn has(&self, tx_id: &TxId) -> bool {
        self.inner.lock().entries.contains_key(tx_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Lowest price currently pooled.
    pub fn min_price(&self) -> Option<u64> {
        self.inner
            .lock()
            .fee_index
            .keys()
            .next_back()
            .map(|k| u64::MAX - k.inverted_price)
    }

    /// Removes and returns the highest-priority transactions whose fee
    /// units fit in `max_units`, best first. Entries that do not fit are
    /// skipped, so a smaller one further down may still be taken.
    pub fn drain(&self, max_units: u64) -> Vec<Transaction> {
        let mut inner = self.inner.lock();
        let picked = select(&inner, max_units);
        picked
            .iter()
            .filter_map(|id| inner.remove(id))
            .map(|e| e.transaction)
            .collect()
    }

    /// Like [`drain`](Self::drain), without removing anything.
    pub fn peek(&self, max_units: u64) -> Vec<Transaction> {
        let inner = self.inner.lock();
        select(&inner, max_units)
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.transaction.clone())
            .collect()
    }

    /// Hands out pooled transactions never handed out before, oldest
    /// first, up to `max_units`. Each transaction is returned at most once;
    /// it stays in the pool. An entry larger than `max_units` on its own is
    /// skipped and never handed out.
    pub fn drain_new(&self, max_units: u64) -> Vec<Transaction> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut out = Vec::new();
        let mut used = 0u64;
        while let Some(id) = inner.fresh.front().copied() {
            let Some(entry) = inner.entries.get(&id) else {
                inner.fresh.pop_front();
                continue;
            };
            if entry.units > max_units {
                // Larger than any batch of this size.
                inner.fresh.pop_front();
                continue;
            }
            if used.saturating_add(entry.units) > max_units {
                break;
            }
            used += entry.units;
            out.push(entry.transaction.clone());
            inner.fresh.pop_front();
        }
        out
    }

    /// Drops every transaction whose block reference is not in
    /// `recent_block_ids`. Such transactions can never execute again.
    pub fn prune(&self, recent_block_ids: &HashSet<BlockId>) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<TxId> = inner
            .entries
            .values()
            .filter(|e| !recent_block_ids.contains(&e.transaction.unsigned().block_id()))
            .map(|e| e.transaction.id())
            .collect();
        for id in &stale {
            inner.remove(id);
        }
        if !stale.is_empty() {
            debug!(pruned = stale.len(), "pruned stale mempool transactions");
        }
        stale.len()
    }
}

/// Greedy selection over the priority index.
fn select(inner: &Inner, max_units: u64) -> Vec<TxId> {
    let mut picked = Vec::new();
    let mut used = 0u64;
    for id in inner.fee_index.values() {
        let Some(entry) = inner.entries.get(id) else {
            continue;
        };
        if used.saturating_add(entry.units) > max_units {
            continue;
        }
        used += entry.units;
        picked.push(*id);
        if used == max_units {
            break;
        }
    }
    picked
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
