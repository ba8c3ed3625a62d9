//! # Blocks
//!
//! Two shapes of the same block:
//!
//! - [`StatefulBlock`] is the consensus payload: header fields plus the
//!   transactions. Its canonical encoding is what peers exchange, and its
//!   BLAKE3 hash is the block id.
//! - [`StatelessBlock`] wraps it with what a node derives locally: id,
//!   bytes, lifecycle status, the diff produced by verification, and the
//!   verified children stacked on that diff.
//!
//! ## Lifecycle
//!
//! ```text
//!                 verify ok
//!   Processing ────────────▶ Processing (diff held)
//!        │                      │ accept        │ reject
//!        │                      ▼               ▼
//!        └──── reject ───▶  Rejected         Accepted
//! ```
//!
//! Accept commits the diff into durable state and re-points every verified
//! child at durable state, so a chain of verified-but-undecided blocks keeps
//! working as its ancestors are accepted one by one.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::fees;
use super::transaction::Transaction;
use super::ChainVm;
use crate::codec;
use crate::config::FUTURE_BOUND_SECS;
use crate::crypto::{blake3_hash, keccak256_concat};
use crate::error::{ChainError, ChainResult};
use crate::storage::state;
use crate::storage::{Database, DbError, VersionDb};
use crate::types::{BlockId, Id};

// ---------------------------------------------------------------------------
// StatefulBlock
// ---------------------------------------------------------------------------

/// The consensus payload of a block. Field order is part of the block id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatefulBlock {
    pub parent: BlockId,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub height: u64,
    /// Minimum per-unit price of every included transaction.
    pub price: u64,
    /// Surcharge the transactions' surplus has to cover.
    pub cost: u64,
    /// Proof that the builder held a pseudo-randomly chosen stored value.
    pub access_proof: Id,
    pub txs: Vec<Transaction>,
}

impl StatefulBlock {
    /// Same header, different transactions.
    pub fn with_txs(&self, txs: Vec<Transaction>) -> Self {
        Self {
            parent: self.parent,
            timestamp: self.timestamp,
            height: self.height,
            price: self.price,
            cost: self.cost,
            access_proof: self.access_proof,
            txs,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockStatus {
    Processing,
    Accepted,
    Rejected,
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockStatus::Processing => "processing",
            BlockStatus::Accepted => "accepted",
            BlockStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Access proof
// ---------------------------------------------------------------------------

/// Seed for the access proof of the block at `height` on `parent`.
pub fn access_seed(height: u64, parent: &BlockId) -> Vec<u8> {
    let mut seed = Vec::with_capacity(8 + BlockId::LEN);
    seed.extend_from_slice(&height.to_be_bytes());
    seed.extend_from_slice(parent.as_bytes());
    seed
}

/// `keccak256(seed ‖ value)` for the value [`state::select_random_key`]
/// picks out of `db`, or the zero id when nothing is stored yet.
pub fn access_proof(db: &dyn Database, height: u64, parent: &BlockId) -> ChainResult<Id> {
    let seed = access_seed(height, parent);
    let key = state::select_random_key(db, &seed)?;
    if key.is_zero() {
        return Ok(Id::zero());
    }
    let (value, _) = state::get_value(db, &key)?
        .ok_or_else(|| DbError::corrupt(key.as_bytes(), "selected value key has no metadata"))?;
    Ok(Id::from(keccak256_concat(&[&seed, &value])))
}

// ---------------------------------------------------------------------------
// StatelessBlock
// ---------------------------------------------------------------------------

/// A block plus everything this node derived from it.
pub struct StatelessBlock {
    stateful: StatefulBlock,
    id: BlockId,
    bytes: Vec<u8>,

    status: RwLock<BlockStatus>,
    /// Writes produced by verification. `Some` between a successful verify
    /// and accept or reject.
    on_accept: RwLock<Option<Arc<VersionDb>>>,
    /// Verified children whose diffs sit on top of `on_accept`.
    children: Mutex<Vec<Arc<StatelessBlock>>>,
}

impl StatelessBlock {
    /// Encodes and hashes a block whose transactions are already
    /// initialized.
    pub fn sealed(stateful: StatefulBlock, status: BlockStatus) -> ChainResult<Self> {
        let bytes = codec::encode(&stateful)?;
        let id = BlockId::from(blake3_hash(&bytes));
        Ok(Self {
            stateful,
            id,
            bytes,
            status: RwLock::new(status),
            on_accept: RwLock::new(None),
            children: Mutex::new(Vec::new()),
        })
    }

    /// Initializes every transaction, then seals.
    pub fn from_stateful(mut stateful: StatefulBlock, status: BlockStatus) -> ChainResult<Self> {
        for tx in stateful.txs.iter_mut() {
            tx.init()?;
        }
        Self::sealed(stateful, status)
    }

    /// Decodes a block received from a peer.
    pub fn parse(bytes: &[u8], status: BlockStatus) -> ChainResult<Self> {
        let stateful: StatefulBlock = codec::decode(bytes)?;
        Self::from_stateful(stateful, status)
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn parent(&self) -> BlockId {
        self.stateful.parent
    }

    pub fn height(&self) -> u64 {
        self.stateful.height
    }

    pub fn timestamp(&self) -> u64 {
        self.stateful.timestamp
    }

    pub fn price(&self) -> u64 {
        self.stateful.price
    }

    pub fn cost(&self) -> u64 {
        self.stateful.cost
    }

    pub fn access_proof(&self) -> Id {
        self.stateful.access_proof
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.stateful.txs
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn stateful(&self) -> &StatefulBlock {
        &self.stateful
    }

    pub fn status(&self) -> BlockStatus {
        *self.status.read()
    }

    /// Sum of the transactions' fee units.
    pub fn units(&self, vm: &dyn ChainVm) -> u64 {
        let g = vm.genesis();
        self.txs()
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.fee_units(g)))
    }

    /// The state this block's children build on: durable state once
    /// accepted, the verification diff while processing.
    pub fn state(&self, vm: &dyn ChainVm) -> ChainResult<Arc<dyn Database>> {
        match self.status() {
            BlockStatus::Accepted => Ok(vm.state()),
            BlockStatus::Rejected => Err(ChainError::BlockRejected(self.id)),
            BlockStatus::Processing => match self.on_accept.read().as_ref() {
                Some(diff) => Ok(Arc::clone(diff) as Arc<dyn Database>),
                None => Err(ChainError::NotVerified(self.id)),
            },
        }
    }

    fn add_child(&self, child: Arc<StatelessBlock>) {
        self.children.lock().push(child);
    }

    /// Checks the block against its parent and executes it on a fresh diff.
    /// On success the diff is held until accept or reject.
    ///
    /// Verifying an already verified block is a no-op.
    pub fn verify(self: &Arc<Self>, vm: &dyn ChainVm) -> ChainResult<()> {
        if self.on_accept.read().is_some() || self.status() == BlockStatus::Accepted {
            return Ok(());
        }
        if self.status() == BlockStatus::Rejected {
            return Err(ChainError::BlockRejected(self.id));
        }

        let g = vm.genesis();
        let parent = vm.get_stateless_block(&self.parent())?;

        let expected_height = parent.height().saturating_add(1);
        if self.height() != expected_height {
            return Err(ChainError::InvalidHeight {
                expected: expected_height,
                found: self.height(),
            });
        }

        if self.timestamp() < parent.timestamp() {
            return Err(ChainError::TimestampTooEarly {
                found: self.timestamp(),
                parent: parent.timestamp(),
            });
        }
        let now = Utc::now().timestamp().max(0) as u64;
        if self.timestamp() > now.saturating_add(FUTURE_BOUND_SECS) {
            return Err(ChainError::TimestampTooLate {
                found: self.timestamp(),
                now,
            });
        }

        if self.txs().is_empty() {
            return Err(ChainError::NoTransactions);
        }
        let units = self.units(vm);
        if units > g.max_block_size {
            return Err(ChainError::BlockTooBig {
                units,
                max: g.max_block_size,
            });
        }

        let ctx = vm.execution_context(self.timestamp(), &parent)?;
        if self.price() != ctx.next_price {
            return Err(ChainError::PriceMismatch {
                expected: ctx.next_price,
                found: self.price(),
            });
        }
        if self.cost() != ctx.next_cost {
            return Err(ChainError::CostMismatch {
                expected: ctx.next_cost,
                found: self.cost(),
            });
        }

        let parent_state = parent.state(vm).map_err(|e| match e {
            ChainError::NotVerified(id) => ChainError::ParentNotVerified(id),
            other => other,
        })?;

        let expected_proof = access_proof(&*parent_state, self.height(), &parent.id())?;
        if self.access_proof() != expected_proof {
            return Err(ChainError::InvalidAccessProof {
                expected: expected_proof,
                found: self.access_proof(),
            });
        }

        let diff = Arc::new(VersionDb::new(parent_state));
        for tx in self.txs() {
            tx.execute(g, &*diff, self.timestamp(), &ctx).inspect_err(|e| {
                debug!(block = %self.id, tx = %tx.id(), error = %e, "transaction failed verification");
            })?;
        }

        fees::verify_surplus(g, self.price(), self.cost(), self.txs())?;

        *self.on_accept.write() = Some(diff);
        if parent.status() == BlockStatus::Processing {
            parent.add_child(Arc::clone(self));
        }

        debug!(
            block = %self.id,
            height = self.height(),
            txs = self.txs().len(),
            units,
            "verified block"
        );
        vm.verified(Arc::clone(self));
        Ok(())
    }

    /// Makes the block's writes durable and advances last-accepted.
    pub fn accept(self: &Arc<Self>, vm: &dyn ChainVm) -> ChainResult<()> {
        let diff = self
            .on_accept
            .read()
            .clone()
            .ok_or(ChainError::NotVerified(self.id))?;
        let parent = vm.get_stateless_block(&self.parent())?;
        if parent.status() != BlockStatus::Accepted {
            return Err(ChainError::ParentNotAccepted(parent.id()));
        }

        state::set_last_accepted(&*diff, self)?;
        diff.commit()?;

        for child in self.children.lock().drain(..) {
            if let Some(child_diff) = child.on_accept.read().as_ref() {
                child_diff.set_base(vm.state());
            }
        }

        *self.on_accept.write() = None;
        *self.status.write() = BlockStatus::Accepted;

        info!(
            block = %self.id,
            height = self.height(),
            txs = self.txs().len(),
            price = self.price(),
            cost = self.cost(),
            "accepted block"
        );
        vm.accepted(Arc::clone(self));
        Ok(())
    }

    /// Drops the diff. Nothing this block wrote is ever visible.
    pub fn reject(self: &Arc<Self>, vm: &dyn ChainVm) -> ChainResult<()> {
        if self.status() == BlockStatus::Accepted {
            warn!(block = %self.id, "refusing to reject an accepted block");
            return Ok(());
        }
        *self.status.write() = BlockStatus::Rejected;
        *self.on_accept.write() = None;
        self.children.lock().clear();

        info!(block = %self.id, height = self.height(), "rejected block");
        vm.rejected(Arc::clone(self));
        Ok(())
    }
}

impl fmt::Debug for StatelessBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatelessBlock")
            .field("id", &self.id)
            .field("parent", &self.stateful.parent)
            .field("height", &self.stateful.height)
            .field("txs", &self.stateful.txs.len())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::value_hash;
    use crate::storage::state::ValueMeta;
    use crate::storage::SledDatabase;
    use crate::types::TxId;

    fn header(height: u64, parent: BlockId) -> StatefulBlock {
        StatefulBlock {
            parent,
            timestamp: 10,
            height,
            price: 1,
            cost: 0,
            access_proof: Id::zero(),
            txs: Vec::new(),
        }
    }

    use crate::chain::{BaseTx, CustomAllocation, Genesis, SetTx, UnsignedTransaction};
    use crate::config::VmConfig;
    use crate::crypto::Keypair;
    use crate::vm::{NoopTrigger, Vm};

    const MAGIC: u64 = 3;

    fn chain(key: &Keypair) -> Arc<Vm> {
        let mut g = Genesis::default_with_magic(MAGIC);
        g.custom_allocation = vec![CustomAllocation {
            address: key.address(),
            balance: 10_000_000,
        }];
        let db: Arc<dyn Database> = Arc::new(SledDatabase::open_temporary().unwrap());
        Vm::new(g, VmConfig::default(), db, &[], Arc::new(NoopTrigger)).unwrap()
    }

    fn blob(vm: &Vm, key: &Keypair, value: Vec<u8>) -> Transaction {
        let utx = UnsignedTransaction::Set(SetTx {
            base: BaseTx {
                magic: MAGIC,
                block_id: vm.last_accepted(),
                price: 1,
            },
            value,
        });
        Transaction::sign(utx, key).unwrap()
    }

    /// A valid block at t=100 on genesis: price 1, cost 0, zero proof.
    fn honest(vm: &Arc<Vm>, key: &Keypair) -> StatefulBlock {
        vm.submit(blob(vm, key, b"honest".to_vec())).unwrap();
        vm.build_block_at(100).unwrap().block().stateful().clone()
    }

    fn verify_block(vm: &Vm, block: StatefulBlock) -> ChainResult<()> {
        Arc::new(StatelessBlock::sealed(block, BlockStatus::Processing).unwrap()).verify(vm)
    }

    #[test]
    fn verify_rejects_wrong_fee_fields_and_proof() {
        let key = Keypair::from_seed(&[5; 32]);
        let vm = chain(&key);
        let good = honest(&vm, &key);

        let mut block = good.clone();
        block.price = 2;
        assert!(matches!(
            verify_block(&vm, block),
            Err(ChainError::PriceMismatch { expected: 1, found: 2 })
        ));

        let mut block = good.clone();
        block.cost = 5;
        assert!(matches!(
            verify_block(&vm, block),
            Err(ChainError::CostMismatch { expected: 0, found: 5 })
        ));

        let mut block = good;
        block.access_proof = Id::from([9; 32]);
        assert!(matches!(
            verify_block(&vm, block),
            Err(ChainError::InvalidAccessProof { found, .. }) if found == Id::from([9; 32])
        ));
    }

    #[test]
    fn verify_rejects_wrong_height_and_future_timestamp() {
        let key = Keypair::from_seed(&[5; 32]);
        let vm = chain(&key);
        let good = honest(&vm, &key);

        let mut block = good.clone();
        block.height = 2;
        assert!(matches!(
            verify_block(&vm, block),
            Err(ChainError::InvalidHeight { expected: 1, found: 2 })
        ));

        let mut block = good;
        block.timestamp = Utc::now().timestamp() as u64 + 3_600;
        assert!(matches!(
            verify_block(&vm, block),
            Err(ChainError::TimestampTooLate { .. })
        ));
    }

    #[test]
    fn verify_rejects_timestamp_before_parent() {
        let key = Keypair::from_seed(&[5; 32]);
        let vm = chain(&key);
        vm.submit(blob(&vm, &key, b"parent".to_vec())).unwrap();
        let parent = vm.build_block_at(100).unwrap();
        parent.accept().unwrap();

        let child = StatefulBlock {
            parent: parent.id(),
            timestamp: 99,
            height: 2,
            price: 1,
            cost: 0,
            access_proof: Id::zero(),
            txs: vec![blob(&vm, &key, b"child".to_vec())],
        };
        assert!(matches!(
            verify_block(&vm, child),
            Err(ChainError::TimestampTooEarly { found: 99, parent: 100 })
        ));
    }

    #[test]
    fn verify_rejects_empty_parsed_block() {
        let key = Keypair::from_seed(&[5; 32]);
        let vm = chain(&key);
        let empty = StatefulBlock {
            parent: vm.last_accepted(),
            timestamp: 100,
            height: 1,
            price: 1,
            cost: 0,
            access_proof: Id::zero(),
            txs: Vec::new(),
        };
        let bytes = codec::encode(&empty).unwrap();
        let parsed = vm.parse_block(&bytes).unwrap();
        assert!(matches!(parsed.verify(), Err(ChainError::NoTransactions)));
        assert_eq!(vm.processing(), 0);
    }

    #[test]
    fn verify_rejects_oversized_block() {
        let key = Keypair::from_seed(&[5; 32]);
        let vm = chain(&key);
        let mut block = honest(&vm, &key);
        // 201 units each against a 246-unit block.
        block.txs = vec![
            blob(&vm, &key, vec![1; 200 * 1024]),
            blob(&vm, &key, vec![2; 200 * 1024]),
        ];
        assert!(matches!(
            verify_block(&vm, block),
            Err(ChainError::BlockTooBig { units: 402, max: 246 })
        ));
    }

    #[test]
    fn verify_rejects_block_that_does_not_cover_its_cost() {
        let key = Keypair::from_seed(&[5; 32]);
        let vm = chain(&key);
        // Same second as genesis: cost 1, and a min-price tx pays no surplus.
        let mut block = honest(&vm, &key);
        block.timestamp = 0;
        block.cost = 1;
        assert!(matches!(
            verify_block(&vm, block),
            Err(ChainError::InsufficientSurplus { required: 1, found: 0 })
        ));
    }

    #[test]
    fn id_is_hash_of_bytes_and_parse_round_trips() {
        let block = StatelessBlock::sealed(header(1, BlockId::from([3; 32])), BlockStatus::Processing)
            .unwrap();
        assert_eq!(block.id(), BlockId::from(blake3_hash(block.bytes())));

        let parsed = StatelessBlock::parse(block.bytes(), BlockStatus::Processing).unwrap();
        assert_eq!(parsed.id(), block.id());
        assert_eq!(parsed.height(), 1);
    }

    #[test]
    fn header_fields_change_the_id() {
        let a = StatelessBlock::sealed(header(1, BlockId::zero()), BlockStatus::Processing).unwrap();
        let b = StatelessBlock::sealed(header(2, BlockId::zero()), BlockStatus::Processing).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn access_proof_is_zero_on_empty_store() {
        let db = SledDatabase::open_temporary().unwrap();
        assert_eq!(access_proof(&db, 1, &BlockId::zero()).unwrap(), Id::zero());
    }

    #[test]
    fn access_proof_commits_to_the_selected_value() {
        let db = SledDatabase::open_temporary().unwrap();
        let value = b"stored".to_vec();
        let tx_id = TxId::from([1; 32]);
        state::put_value_meta(
            &db,
            &value_hash(&value),
            &ValueMeta {
                size: value.len() as u64,
                tx_id,
                created: 0,
            },
        )
        .unwrap();
        state::put_linked_value(&db, &tx_id, &value).unwrap();

        let parent = BlockId::from([4; 32]);
        let seed = access_seed(7, &parent);
        let expected = Id::from(keccak256_concat(&[&seed, &value]));
        assert_eq!(access_proof(&db, 7, &parent).unwrap(), expected);
        assert_ne!(access_proof(&db, 8, &parent).unwrap(), expected);
    }
}
