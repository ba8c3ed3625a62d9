//! # Typed State Accessors
//!
//! Every read and write the chain performs goes through a function in this
//! file. They all take `&dyn Database`, so the same code runs against a
//! block's [`VersionDb`](super::versiondb::VersionDb) diff during
//! verification and against sled at genesis and startup.
//!
//! ## Content addressing
//!
//! A stored value lives in two places:
//!
//! ```text
//! 0x03/keccak256(value) -> ValueMeta { size, tx_id, created }
//! 0x02/tx_id            -> value bytes
//! ```
//!
//! The metadata record is write-once: a second SetTx for the same bytes
//! fails with `KeyExists` no matter who signs it.
//!
//! ## Linking
//!
//! Blocks are persisted with every SetTx value replaced by its own
//! transaction id. The payload is already stored under `0x02/tx_id`, so
//! writing it again inside the block body would double the disk footprint
//! of every blob. [`get_block`] reverses the substitution, memoizing the
//! pointer lookups in a [`LinkedValueCache`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cache::LinkedValueCache;
use super::db::{Database, DbError};
use super::keys;
use crate::chain::block::{StatefulBlock, StatelessBlock};
use crate::chain::transaction::Transaction;
use crate::chain::unsigned::UnsignedTransaction;
use crate::codec;
use crate::crypto::keccak256;
use crate::error::{ChainError, ChainResult};
use crate::types::{Address, BlockId, ContentKey, TxId};

// ---------------------------------------------------------------------------
// ValueMeta
// ---------------------------------------------------------------------------

/// Metadata recorded the first time a value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMeta {
    /// Length of the value in bytes.
    pub size: u64,
    /// The SetTx that stored it. Never changes after creation.
    pub tx_id: TxId,
    /// Timestamp of the block that included the SetTx.
    pub created: u64,
}

pub fn get_value_meta(db: &dyn Database, key: &ContentKey) -> ChainResult<Option<ValueMeta>> {
    match db.get(&keys::value_key(key))? {
        Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn has_value(db: &dyn Database, key: &ContentKey) -> ChainResult<bool> {
    Ok(db.has(&keys::value_key(key))?)
}

/// Records metadata for a new value. Fails with `KeyExists` if the content
/// key is already present.
pub fn put_value_meta(db: &dyn Database, key: &ContentKey, meta: &ValueMeta) -> ChainResult<()> {
    let k = keys::value_key(key);
    if db.has(&k)? {
        return Err(ChainError::KeyExists(*key));
    }
    db.put(&k, &codec::encode(meta)?)?;
    Ok(())
}

/// Stores the literal bytes of a SetTx under its transaction id.
pub fn put_linked_value(db: &dyn Database, tx_id: &TxId, value: &[u8]) -> ChainResult<()> {
    db.put(&keys::tx_value_key(tx_id), value)?;
    Ok(())
}

pub fn get_linked_value(db: &dyn Database, tx_id: &TxId) -> ChainResult<Option<Vec<u8>>> {
    Ok(db.get(&keys::tx_value_key(tx_id))?)
}

/// Resolves a content key to its bytes and metadata.
pub fn get_value(db: &dyn Database, key: &ContentKey) -> ChainResult<Option<(Vec<u8>, ValueMeta)>> {
    let Some(meta) = get_value_meta(db, key)? else {
        return Ok(None);
    };
    let value = get_linked_value(db, &meta.tx_id)?
        .ok_or(ChainError::MissingLinkedValue(meta.tx_id))?;
    Ok(Some((value, meta)))
}

// ---------------------------------------------------------------------------
// Transaction markers
// ---------------------------------------------------------------------------

/// Marks a transaction as executed. The marker has an empty value.
pub fn set_transaction(db: &dyn Database, tx_id: &TxId) -> ChainResult<()> {
    db.put(&keys::tx_key(tx_id), &[])?;
    Ok(())
}

pub fn has_transaction(db: &dyn Database, tx_id: &TxId) -> ChainResult<bool> {
    Ok(db.has(&keys::tx_key(tx_id))?)
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

/// A signed balance adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    Credit(u64),
    Debit(u64),
}

/// Balance of `address`. Unknown addresses hold zero.
pub fn get_balance(db: &dyn Database, address: &Address) -> ChainResult<u64> {
    let key = keys::balance_key(address);
    match db.get(&key)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| DbError::corrupt(&key, format!("balance is {} bytes", bytes.len())))?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

pub fn set_balance(db: &dyn Database, address: &Address, balance: u64) -> ChainResult<()> {
    db.put(&keys::balance_key(address), &balance.to_be_bytes())?;
    Ok(())
}

/// Applies a checked credit or debit and returns the new balance. On
/// overflow or underflow nothing is written.
pub fn modify_balance(db: &dyn Database, address: &Address, change: BalanceChange) -> ChainResult<u64> {
    let balance = get_balance(db, address)?;
    let (updated, amount) = match change {
        BalanceChange::Credit(n) => (balance.checked_add(n), n),
        BalanceChange::Debit(n) => (balance.checked_sub(n), n),
    };
    let updated = updated.ok_or(ChainError::InvalidBalance {
        address: *address,
        balance,
        change: amount,
    })?;
    set_balance(db, address, updated)?;
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

pub fn get_last_accepted(db: &dyn Database) -> ChainResult<Option<BlockId>> {
    match db.get(keys::LAST_ACCEPTED_KEY)? {
        Some(bytes) => {
            let id = BlockId::from_slice(&bytes)
                .map_err(|e| DbError::corrupt(keys::LAST_ACCEPTED_KEY, e.to_string()))?;
            Ok(Some(id))
        }
        None => Ok(None),
    }
}

/// Persists the block body in linked form and moves the last-accepted
/// pointer. Written into `db`, which is normally the block's own diff so
/// that both land in the same atomic commit.
pub fn set_last_accepted(db: &dyn Database, block: &StatelessBlock) -> ChainResult<()> {
    let stateful = block.stateful();
    let linked = stateful.with_txs(stateful.txs.iter().map(link).collect());
    db.put(&keys::block_key(&block.id()), &codec::encode(&linked)?)?;
    db.put(keys::LAST_ACCEPTED_KEY, block.id().as_bytes())?;
    Ok(())
}

/// Loads an accepted block and restores every linked SetTx value. The
/// transactions are returned uninitialized; callers run `init` on them.
pub fn get_block(
    db: &dyn Database,
    id: &BlockId,
    cache: &LinkedValueCache,
) -> ChainResult<Option<StatefulBlock>> {
    let Some(bytes) = db.get(&keys::block_key(id))? else {
        return Ok(None);
    };
    let mut block: StatefulBlock = codec::decode(&bytes)?;
    for tx in block.txs.iter_mut() {
        *tx = unlink(db, tx, cache)?;
    }
    Ok(Some(block))
}

fn link(tx: &Transaction) -> Transaction {
    let unsigned = match tx.unsigned() {
        UnsignedTransaction::Set(set) => {
            let mut linked = set.clone();
            linked.value = tx.id().as_bytes().to_vec();
            UnsignedTransaction::Set(linked)
        }
        other => other.clone(),
    };
    Transaction::raw(unsigned, tx.signature().clone())
}

fn unlink(db: &dyn Database, tx: &Transaction, cache: &LinkedValueCache) -> ChainResult<Transaction> {
    let UnsignedTransaction::Set(set) = tx.unsigned() else {
        return Ok(tx.clone());
    };
    let pointer = TxId::from_slice(&set.value).map_err(|e| {
        DbError::corrupt(&set.value, format!("linked value pointer: {e}"))
    })?;

    let value = match cache.get(&pointer) {
        Some(v) => v,
        None => {
            let v = get_linked_value(db, &pointer)?.ok_or(ChainError::MissingLinkedValue(pointer))?;
            cache.put(pointer, v.clone());
            v
        }
    };

    let mut restored = set.clone();
    restored.value = value;
    Ok(Transaction::raw(
        UnsignedTransaction::Set(restored),
        tx.signature().clone(),
    ))
}

// ---------------------------------------------------------------------------
// Access proof key selection
// ---------------------------------------------------------------------------

/// Picks a stored content key from `seed`.
///
/// Returns the first value key at or after `keccak256(seed)`, wrapping to
/// the smallest value key when the hash lands past the end. An empty store
/// yields [`ContentKey::zero`].
pub fn select_random_key(db: &dyn Database, seed: &[u8]) -> ChainResult<ContentKey> {
    let prefix = keys::value_prefix();
    let start = keys::value_key(&ContentKey(keccak256(seed)));

    if let Some(key) = first_value_key(db, &start)? {
        return Ok(key);
    }
    debug!("access proof key selection wrapped around");
    Ok(first_value_key(db, &prefix)?.unwrap_or_else(ContentKey::zero))
}

/// The first key at or after `start`, if it is a value key.
fn first_value_key(db: &dyn Database, start: &[u8]) -> ChainResult<Option<ContentKey>> {
    match db.iter_from(start).next() {
        Some(entry) => {
            let (key, _) = entry?;
            Ok(keys::content_key_from_value_key(&key))
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
