//! # Transaction Gossip
//!
//! Pushes pending transactions to peers and admits transactions peers push
//! to us. Blocks are not gossiped here; the consensus host moves those.
//!
//! ## Wire format
//!
//! ```text
//! u32 BE  count
//! repeat count times:
//!     u32 BE  length
//!     [u8]    canonical transaction bytes
//! ```
//!
//! ## Deduplication
//!
//! Outbound, each transaction is announced once by the periodic gossip
//! (the mempool hands out fresh transactions at most once, and a bounded
//! LRU of gossiped ids skips anything we already pushed or received).
//! The slower regossip re-announces the best-paying pending transactions
//! regardless, so a peer that missed them still catches up.
//!
//! Inbound transactions go through `Vm::submit`, the same path as local
//! clients: duplicates, already accepted transactions and transactions
//! referencing a block that left the window are all rejected there.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::chain::{ChainVm, Transaction};
use crate::config::{GOSSIPED_TX_LRU_SIZE, MAX_ENCODED_SIZE, MAX_GOSSIP_BATCH_TXS};
use crate::types::TxId;
use crate::vm::Vm;

/// Identifies the peer a payload came from. Only used for logging.
pub type NodeId = String;

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("gossip payload truncated")]
    Truncated,

    #[error("gossip batch of {count} transactions exceeds limit {max}")]
    TooManyTxs { count: usize, max: usize },

    #[error("gossip payload of {size} bytes exceeds limit {max}")]
    TooLarge { size: usize, max: u64 },

    #[error("{0} trailing bytes after gossip batch")]
    TrailingBytes(usize),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound transport. Fire-and-forget: delivery is never confirmed.
pub trait AppSender: Send + Sync {
    fn send_app_gossip(&self, payload: Vec<u8>) -> Result<(), GossipError>;
}

/// Encodes `txs` in the batch wire format.
pub fn encode_batch(txs: &[Transaction]) -> Vec<u8> {
    let body: usize = txs.iter().map(|tx| 4 + tx.bytes().len()).sum();
    let mut out = Vec::with_capacity(4 + body);
    out.extend_from_slice(&(txs.len() as u32).to_be_bytes());
    for tx in txs {
        out.extend_from_slice(&(tx.bytes().len() as u32).to_be_bytes());
        out.extend_from_slice(tx.bytes());
    }
    out
}

fn read_u32(payload: &[u8], offset: &mut usize) -> Result<u32, GossipError> {
    let end = offset.checked_add(4).ok_or(GossipError::Truncated)?;
    let bytes = payload.get(*offset..end).ok_or(GossipError::Truncated)?;
    *offset = end;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(u32::from_be_bytes(buf))
}

/// Splits a batch into the raw bytes of each transaction. The
/// transactions themselves are not decoded.
pub fn decode_batch(payload: &[u8]) -> Result<Vec<&[u8]>, GossipError> {
    if payload.len() as u64 > MAX_ENCODED_SIZE {
        return Err(GossipError::TooLarge {
            size: payload.len(),
            max: MAX_ENCODED_SIZE,
        });
    }

    let mut offset = 0usize;
    let count = read_u32(payload, &mut offset)? as usize;
    if count > MAX_GOSSIP_BATCH_TXS {
        return Err(GossipError::TooManyTxs {
            count,
            max: MAX_GOSSIP_BATCH_TXS,
        });
    }

    let mut txs = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(payload, &mut offset)? as usize;
        let end = offset.checked_add(len).ok_or(GossipError::Truncated)?;
        let bytes = payload.get(offset..end).ok_or(GossipError::Truncated)?;
        txs.push(bytes);
        offset = end;
    }

    if offset != payload.len() {
        return Err(GossipError::TrailingBytes(payload.len() - offset));
    }
    Ok(txs)
}

pub struct Gossiper {
    vm: Arc<Vm>,
    sender: Arc<dyn AppSender>,
    gossiped: Mutex<LruCache<TxId, ()>>,
}

impl Gossiper {
    pub fn new(vm: Arc<Vm>, sender: Arc<dyn AppSender>) -> Self {
        let capacity = NonZeroUsize::new(GOSSIPED_TX_LRU_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            vm,
            sender,
            gossiped: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Sends the transactions in `batch` not gossiped before. Returns how
    /// many were sent.
    pub fn gossip_new_transactions(&self, batch: Vec<Transaction>) -> Result<usize, GossipError> {
        let fresh: Vec<Transaction> = {
            let mut gossiped = self.gossiped.lock();
            batch
                .into_iter()
                .filter(|tx| gossiped.put(tx.id(), ()).is_none())
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }
        self.sender.send_app_gossip(encode_batch(&fresh))?;
        debug!(txs = fresh.len(), "gossiped new transactions");
        Ok(fresh.len())
    }

    /// Gossips whatever the mempool has not handed out yet.
    pub fn gossip_pending(&self) -> Result<usize, GossipError> {
        let max_units = self.vm.genesis().max_block_size;
        let batch = self.vm.mempool().drain_new(max_units);
        self.gossip_new_transactions(batch)
    }

    /// Re-announces the highest-priced pending transactions, whether or not
    /// they were gossiped before.
    pub fn regossip(&self) -> Result<usize, GossipError> {
        let max_units = self.vm.genesis().max_block_size;
        let txs = self.vm.mempool().peek(max_units);
        if txs.is_empty() {
            return Ok(0);
        }
        {
            let mut gossiped = self.gossiped.lock();
            for tx in &txs {
                gossiped.put(tx.id(), ());
            }
        }
        self.sender.send_app_gossip(encode_batch(&txs))?;
        debug!(txs = txs.len(), "regossiped pending transactions");
        Ok(txs.len())
    }

    /// Submits every transaction in a peer's payload. Returns how many made
    /// it into the mempool; individual rejections are logged, not returned.
    pub fn on_gossip(&self, from: &NodeId, payload: &[u8]) -> Result<usize, GossipError> {
        let raw = decode_batch(payload).inspect_err(|e| {
            warn!(peer = %from, error = %e, "dropping malformed gossip payload");
        })?;

        let mut admitted = 0usize;
        for bytes in raw {
            let tx = match Transaction::decode(bytes) {
                Ok(tx) => tx,
                Err(e) => {
                    debug!(peer = %from, error = %e, "undecodable gossiped transaction");
                    continue;
                }
            };
            let id = tx.id();
            // Never echo a peer's transaction back to the network.
            self.gossiped.lock().put(id, ());
            match self.vm.submit(tx) {
                Ok(_) => admitted += 1,
                Err(e) => trace!(peer = %from, tx = %id, error = %e, "gossiped transaction rejected"),
            }
        }

        if admitted > 0 {
            debug!(peer = %from, admitted, "admitted gossiped transactions");
        }
        Ok(admitted)
    }

    /// Runs the gossip and regossip timers until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let config = self.vm.config().clone();
        let mut gossip = tokio::time::interval(config.gossip_interval());
        let mut regossip = tokio::time::interval(config.regossip_interval());
        gossip.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        regossip.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            gossip = ?config.gossip_interval(),
            regossip = ?config.regossip_interval(),
            "gossip loop starting"
        );

        loop {
            tokio::select! {
                _ = gossip.tick() => {
                    if let Err(e) = self.gossip_pending() {
                        warn!(error = %e, "gossip failed");
                    }
                }
                _ = regossip.tick() => {
                    if let Err(e) = self.regossip() {
                        warn!(error = %e, "regossip failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("gossip loop shutting down");
                    return;
                }
            }
        }
    }
}
