//! # VM
//!
//! The object a consensus host drives. It owns durable state, the mempool,
//! the set of verified-but-undecided blocks and the accepted-block cache,
//! and it implements [`ChainVm`] so blocks can reach back into it during
//! verify and accept.
//!
//! ```text
//!   submit ──▶ mempool ──trigger──▶ host ──build_block──▶ BlockHandle
//!                                    │                      │ verify
//!                                    └──── accept/reject ◀──┘
//! ```
//!
//! The host serializes accept and reject. Verification of sibling blocks
//! may run concurrently; each gets its own diff.

use chrono::Utc;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::builder;
use crate::chain::fees::{self, ExecutionContext};
use crate::chain::{
    Activity, ActivityLog, BlockStatus, ChainVm, Genesis, StatelessBlock, Transaction,
};
use crate::config::{VmConfig, ACCEPTED_BLOCK_LRU_SIZE};
use crate::error::{ChainError, ChainResult};
use crate::network::mempool::{Mempool, MempoolConfig, MempoolError};
use crate::storage::{state, Database, LinkedValueCache, VersionDb};
use crate::types::{BlockId, TxId};

pub mod service;
pub mod trigger;

pub use service::ChainService;
pub use trigger::{BuildTrigger, EngineMessage, ManualTrigger, NoopTrigger, TimedTrigger};

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

pub struct Vm {
    genesis: Arc<Genesis>,
    config: VmConfig,
    db: Arc<dyn Database>,
    linked_values: LinkedValueCache,
    mempool: Mempool,
    trigger: Arc<dyn BuildTrigger>,

    /// Blocks that passed verify and are waiting for a decision.
    verified: RwLock<HashMap<BlockId, Arc<StatelessBlock>>>,
    accepted_blocks: Mutex<LruCache<BlockId, Arc<StatelessBlock>>>,
    last_accepted: RwLock<Arc<StatelessBlock>>,
    preferred: RwLock<BlockId>,

    activity: ActivityLog,
}

impl Vm {
    /// Opens the chain stored in `db`, or initializes it from `genesis` and
    /// `airdrop` when `db` holds no accepted block yet.
    pub fn new(
        genesis: Genesis,
        config: VmConfig,
        db: Arc<dyn Database>,
        airdrop: &[u8],
        trigger: Arc<dyn BuildTrigger>,
    ) -> ChainResult<Arc<Self>> {
        genesis.verify()?;
        let genesis = Arc::new(genesis);
        let linked_values = LinkedValueCache::default();

        let last_accepted = match state::get_last_accepted(&*db)? {
            Some(id) => {
                let stateful = state::get_block(&*db, &id, &linked_values)?
                    .ok_or(ChainError::UnknownBlock(id))?;
                let block = StatelessBlock::from_stateful(stateful, BlockStatus::Accepted)?;
                info!(block = %block.id(), height = block.height(), "restored last accepted block");
                block
            }
            None => {
                genesis.load(Arc::clone(&db), airdrop)?;
                let block = StatelessBlock::sealed(genesis.genesis_block(), BlockStatus::Accepted)?;
                let vdb = VersionDb::new(Arc::clone(&db));
                state::set_last_accepted(&vdb, &block)?;
                vdb.commit()?;
                db.flush()?;
                info!(block = %block.id(), magic = genesis.magic, "initialized chain from genesis");
                block
            }
        };
        let last_accepted = Arc::new(last_accepted);

        let capacity = NonZeroUsize::new(ACCEPTED_BLOCK_LRU_SIZE).unwrap_or(NonZeroUsize::MIN);
        let mut accepted_blocks = LruCache::new(capacity);
        accepted_blocks.put(last_accepted.id(), Arc::clone(&last_accepted));

        let mempool = Mempool::new(
            Arc::clone(&genesis),
            MempoolConfig {
                max_size: config.mempool_size,
            },
        );
        let activity = ActivityLog::new(config.activity_cache_size);

        Ok(Arc::new(Self {
            genesis,
            db,
            linked_values,
            mempool,
            trigger,
            verified: RwLock::new(HashMap::new()),
            accepted_blocks: Mutex::new(accepted_blocks),
            preferred: RwLock::new(last_accepted.id()),
            last_accepted: RwLock::new(last_accepted),
            activity,
            config,
        }))
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn genesis_arc(&self) -> Arc<Genesis> {
        Arc::clone(&self.genesis)
    }

    // -- Consensus host contract --------------------------------------------

    /// Builds and verifies a block on the preferred block, stamped with the
    /// current time (never earlier than the parent).
    pub fn build_block(self: &Arc<Self>) -> ChainResult<BlockHandle> {
        let preferred = self.get_stateless_block(&self.preferred())?;
        let timestamp = unix_now().max(preferred.timestamp());
        self.build_block_at(timestamp)
    }

    /// [`Vm::build_block`] with an explicit timestamp.
    pub fn build_block_at(self: &Arc<Self>, timestamp: u64) -> ChainResult<BlockHandle> {
        let preferred = self.get_stateless_block(&self.preferred())?;
        let block = match builder::build_block(self.as_ref(), &preferred, timestamp) {
            Ok(block) => Arc::new(block),
            Err(e) => {
                // Requeued transactions may fit once price and cost decay.
                if !self.mempool.is_empty() {
                    debug!(error = %e, pending = self.mempool.len(), "build failed, retrying later");
                    self.trigger.trigger_build();
                }
                return Err(e);
            }
        };

        if let Err(e) = block.verify(self.as_ref()) {
            warn!(block = %block.id(), error = %e, "built block failed verification");
            self.requeue(block.txs());
            return Err(e);
        }
        if !self.mempool.is_empty() {
            self.trigger.trigger_build();
        }

        info!(
            block = %block.id(),
            height = block.height(),
            txs = block.txs().len(),
            price = block.price(),
            "built block"
        );
        Ok(self.handle(block))
    }

    /// Decodes a block received from a peer. A block this node already
    /// knows is returned as the existing instance.
    pub fn parse_block(self: &Arc<Self>, bytes: &[u8]) -> ChainResult<BlockHandle> {
        let block = StatelessBlock::parse(bytes, BlockStatus::Processing)?;
        match self.get_stateless_block(&block.id()) {
            Ok(known) => Ok(self.handle(known)),
            Err(ChainError::UnknownBlock(_)) => Ok(self.handle(Arc::new(block))),
            Err(e) => Err(e),
        }
    }

    pub fn get_block(self: &Arc<Self>, id: &BlockId) -> ChainResult<BlockHandle> {
        let block = self.get_stateless_block(id)?;
        Ok(self.handle(block))
    }

    pub fn set_preference(&self, id: BlockId) {
        debug!(block = %id, "set preference");
        *self.preferred.write() = id;
    }

    pub fn preferred(&self) -> BlockId {
        *self.preferred.read()
    }

    pub fn last_accepted(&self) -> BlockId {
        self.last_accepted.read().id()
    }

    pub fn last_accepted_block(&self) -> Arc<StatelessBlock> {
        Arc::clone(&self.last_accepted.read())
    }

    /// Number of verified blocks awaiting a decision.
    pub fn processing(&self) -> usize {
        self.verified.read().len()
    }

    fn handle(self: &Arc<Self>, block: Arc<StatelessBlock>) -> BlockHandle {
        BlockHandle {
            vm: Arc::clone(self),
            block,
        }
    }

    // -- Transactions -------------------------------------------------------

    /// Admits a transaction into the mempool after a trial execution against
    /// the preferred block's state.
    pub fn submit(&self, tx: Transaction) -> ChainResult<TxId> {
        let id = tx.id();
        if self.mempool.has(&id) {
            return Err(MempoolError::DuplicateTransaction(id).into());
        }
        if state::has_transaction(&*self.db, &id)? {
            return Err(ChainError::AlreadyAccepted(id));
        }

        let units = tx.fee_units(&self.genesis);
        if units > self.genesis.max_block_size {
            return Err(ChainError::TxTooBig {
                units,
                max: self.genesis.max_block_size,
            });
        }

        let preferred = self.get_stateless_block(&self.preferred())?;
        let now = unix_now().max(preferred.timestamp());
        let ctx = self.execution_context(now, &preferred)?;
        let trial = VersionDb::new(preferred.state(self)?);
        tx.execute(&self.genesis, &trial, now, &ctx)?;

        if let Some(evicted) = self.mempool.add(tx)? {
            debug!(tx = %evicted, "evicted by higher-priced transaction");
        }
        self.trigger.trigger_build();
        Ok(id)
    }

    /// Submits each transaction independently.
    pub fn submit_batch(&self, txs: Vec<Transaction>) -> Vec<ChainResult<TxId>> {
        txs.into_iter().map(|tx| self.submit(tx)).collect()
    }

    /// Returns transactions (typically from a rejected block) to the
    /// mempool, skipping any that are already durable.
    pub fn requeue(&self, txs: &[Transaction]) {
        let mut requeued = 0usize;
        for tx in txs {
            match state::has_transaction(&*self.db, &tx.id()) {
                Ok(false) => {}
                Ok(true) => continue,
                Err(e) => {
                    warn!(tx = %tx.id(), error = %e, "could not check transaction before requeue");
                    continue;
                }
            }
            match self.mempool.add(tx.clone()) {
                Ok(_) => requeued += 1,
                Err(e) => debug!(tx = %tx.id(), error = %e, "transaction not requeued"),
            }
        }
        if requeued > 0 {
            debug!(requeued, "returned transactions to mempool");
            self.trigger.trigger_build();
        }
    }

    /// `(price, cost)` a block built now on the preferred block would carry.
    pub fn next_fee(&self) -> ChainResult<(u64, u64)> {
        let preferred = self.get_stateless_block(&self.preferred())?;
        let now = unix_now().max(preferred.timestamp());
        let ctx = self.execution_context(now, &preferred)?;
        Ok((ctx.next_price, ctx.next_cost))
    }

    pub fn recent_activity(&self) -> Vec<Activity> {
        self.activity.recent()
    }
}

impl ChainVm for Vm {
    fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    fn state(&self) -> Arc<dyn Database> {
        Arc::clone(&self.db)
    }

    fn linked_values(&self) -> &LinkedValueCache {
        &self.linked_values
    }

    fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    fn get_stateless_block(&self, id: &BlockId) -> ChainResult<Arc<StatelessBlock>> {
        if let Some(block) = self.verified.read().get(id) {
            return Ok(Arc::clone(block));
        }
        if let Some(block) = self.accepted_blocks.lock().get(id) {
            return Ok(Arc::clone(block));
        }
        {
            let last = self.last_accepted.read();
            if last.id() == *id {
                return Ok(Arc::clone(&last));
            }
        }

        let stateful = state::get_block(&*self.db, id, &self.linked_values)?
            .ok_or(ChainError::UnknownBlock(*id))?;
        let block = Arc::new(StatelessBlock::from_stateful(stateful, BlockStatus::Accepted)?);
        self.accepted_blocks.lock().put(*id, Arc::clone(&block));
        Ok(block)
    }

    fn execution_context(
        &self,
        current_time: u64,
        parent: &StatelessBlock,
    ) -> ChainResult<ExecutionContext> {
        let g = &*self.genesis;
        let mut ancestors = Vec::new();
        let mut height = parent.height();
        let mut next = parent.parent();
        while height > 0 {
            let block = self.get_stateless_block(&next)?;
            if current_time.saturating_sub(block.timestamp()) > g.lookback_window {
                break;
            }
            height = block.height();
            next = block.parent();
            ancestors.push(block);
        }
        Ok(fees::build_context(g, current_time, parent, &ancestors))
    }

    fn verified(&self, block: Arc<StatelessBlock>) {
        self.verified.write().insert(block.id(), block);
    }

    fn accepted(&self, block: Arc<StatelessBlock>) {
        let id = block.id();
        self.verified.write().remove(&id);
        self.accepted_blocks.lock().put(id, Arc::clone(&block));
        *self.last_accepted.write() = Arc::clone(&block);
        {
            // Keep building on the accepted tip unless the host moved on.
            let mut preferred = self.preferred.write();
            if *preferred == block.parent() {
                *preferred = id;
            }
        }

        for tx in block.txs() {
            self.activity.record(tx.activity(block.timestamp()));
        }
        let included: Vec<TxId> = block.txs().iter().map(Transaction::id).collect();
        self.mempool.remove_batch(&included);

        match self.execution_context(block.timestamp(), &block) {
            Ok(ctx) => {
                let pruned = self.mempool.prune(&ctx.recent_block_ids);
                if pruned > 0 {
                    debug!(pruned, "pruned transactions with stale block references");
                }
            }
            Err(e) => warn!(block = %id, error = %e, "skipping mempool prune after accept"),
        }

        if let Err(e) = self.db.flush() {
            warn!(block = %id, error = %e, "flush after accept failed");
        }
        if !self.mempool.is_empty() {
            self.trigger.trigger_build();
        }
    }

    fn rejected(&self, block: Arc<StatelessBlock>) {
        self.verified.write().remove(&block.id());
    }
}

/// A block as seen by the consensus host.
#[derive(Clone)]
pub struct BlockHandle {
    vm: Arc<Vm>,
    block: Arc<StatelessBlock>,
}

impl BlockHandle {
    pub fn verify(&self) -> ChainResult<()> {
        self.block.verify(self.vm.as_ref())
    }

    pub fn accept(&self) -> ChainResult<()> {
        self.block.accept(self.vm.as_ref())
    }

    pub fn reject(&self) -> ChainResult<()> {
        self.block.reject(self.vm.as_ref())
    }

    pub fn status(&self) -> BlockStatus {
        self.block.status()
    }

    pub fn id(&self) -> BlockId {
        self.block.id()
    }

    pub fn parent_id(&self) -> BlockId {
        self.block.parent()
    }

    pub fn height(&self) -> u64 {
        self.block.height()
    }

    pub fn timestamp(&self) -> u64 {
        self.block.timestamp()
    }

    pub fn bytes(&self) -> &[u8] {
        self.block.bytes()
    }

    pub fn transactions(&self) -> &[Transaction] {
        self.block.txs()
    }

    pub fn block(&self) -> &Arc<StatelessBlock> {
        &self.block
    }
}

impl std::fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.block, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BaseTx, CustomAllocation, SetTx, TransferTx, UnsignedTransaction};
    use crate::crypto::{value_hash, Keypair};
    use crate::storage::db::{DbError, DbResult, KvIter, WriteBatch};
    use crate::storage::SledDatabase;
    use crate::types::Address;
    use std::sync::atomic::{AtomicBool, Ordering};

    const MAGIC: u64 = 42;

    fn genesis_for(keys: &[&Keypair]) -> Genesis {
        let mut g = Genesis::default_with_magic(MAGIC);
        g.custom_allocation = keys
            .iter()
            .map(|k| CustomAllocation {
                address: k.address(),
                balance: 10_000_000,
            })
            .collect();
        g
    }

    fn new_vm(keys: &[&Keypair]) -> Arc<Vm> {
        let db: Arc<dyn Database> = Arc::new(SledDatabase::open_temporary().unwrap());
        Vm::new(genesis_for(keys), VmConfig::default(), db, &[], Arc::new(NoopTrigger)).unwrap()
    }

    fn vm_with_trigger(
        g: Genesis,
    ) -> (Arc<Vm>, tokio::sync::mpsc::Receiver<EngineMessage>) {
        let db: Arc<dyn Database> = Arc::new(SledDatabase::open_temporary().unwrap());
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let vm = Vm::new(g, VmConfig::default(), db, &[], Arc::new(ManualTrigger::new(tx))).unwrap();
        (vm, rx)
    }

    fn base(vm: &Vm) -> BaseTx {
        BaseTx {
            magic: MAGIC,
            block_id: vm.last_accepted(),
            price: 1,
        }
    }

    fn set_tx(vm: &Vm, key: &Keypair, value: &[u8]) -> Transaction {
        let utx = UnsignedTransaction::Set(SetTx {
            base: base(vm),
            value: value.to_vec(),
        });
        Transaction::sign(utx, key).unwrap()
    }

    fn transfer_tx(vm: &Vm, key: &Keypair, to: Address, units: u64) -> Transaction {
        let utx = UnsignedTransaction::Transfer(TransferTx {
            base: base(vm),
            to,
            units,
        });
        Transaction::sign(utx, key).unwrap()
    }

    #[test]
    fn starts_at_genesis() {
        let vm = new_vm(&[]);
        let tip = vm.last_accepted_block();
        assert_eq!(tip.height(), 0);
        assert_eq!(tip.status(), BlockStatus::Accepted);
        assert_eq!(vm.preferred(), tip.id());
        assert_eq!(vm.get_block(&tip.id()).unwrap().height(), 0);
    }

    #[test]
    fn build_with_empty_mempool_fails() {
        let vm = new_vm(&[]);
        assert!(matches!(vm.build_block_at(100), Err(ChainError::NoTransactions)));
    }

    #[test]
    fn submit_build_accept() {
        let alice = Keypair::from_seed(&[1; 32]);
        let vm = new_vm(&[&alice]);

        let tx = set_tx(&vm, &alice, b"hello blob");
        let tx_id = vm.submit(tx).unwrap();
        assert_eq!(vm.mempool().len(), 1);

        let block = vm.build_block_at(100).unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(block.transactions().len(), 1);
        assert_eq!(vm.processing(), 1);
        assert!(vm.mempool().is_empty());

        block.accept().unwrap();
        assert_eq!(block.status(), BlockStatus::Accepted);
        assert_eq!(vm.last_accepted(), block.id());
        assert_eq!(vm.preferred(), block.id());
        assert_eq!(vm.processing(), 0);

        let (value, meta) = state::get_value(&*vm.state(), &value_hash(b"hello blob"))
            .unwrap()
            .unwrap();
        assert_eq!(value, b"hello blob");
        assert_eq!(meta.tx_id, tx_id);

        let activity = vm.recent_activity();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].tx_id, tx_id);
    }

    #[test]
    fn submit_rejects_duplicates_and_accepted() {
        let alice = Keypair::from_seed(&[1; 32]);
        let vm = new_vm(&[&alice]);
        let tx = set_tx(&vm, &alice, b"once");

        vm.submit(tx.clone()).unwrap();
        assert!(matches!(
            vm.submit(tx.clone()),
            Err(ChainError::Mempool(MempoolError::DuplicateTransaction(_)))
        ));

        vm.build_block_at(100).unwrap().accept().unwrap();
        assert!(matches!(vm.submit(tx), Err(ChainError::AlreadyAccepted(_))));
    }

    #[test]
    fn submit_rejects_what_fails_trial_execution() {
        let alice = Keypair::from_seed(&[1; 32]);
        let broke = Keypair::from_seed(&[2; 32]);
        let vm = new_vm(&[&alice]);

        let tx = transfer_tx(&vm, &broke, alice.address(), 5);
        assert!(matches!(vm.submit(tx), Err(ChainError::InvalidBalance { .. })));

        let mut utx = UnsignedTransaction::Set(SetTx {
            base: base(&vm),
            value: b"x".to_vec(),
        });
        utx.set_magic(MAGIC + 1);
        let tx = Transaction::sign(utx, &alice).unwrap();
        assert!(matches!(vm.submit(tx), Err(ChainError::MagicMismatch { .. })));
        assert!(vm.mempool().is_empty());
    }

    #[test]
    fn reject_and_requeue() {
        let alice = Keypair::from_seed(&[1; 32]);
        let vm = new_vm(&[&alice]);
        vm.submit(set_tx(&vm, &alice, b"maybe")).unwrap();

        let block = vm.build_block_at(100).unwrap();
        block.reject().unwrap();
        assert_eq!(block.status(), BlockStatus::Rejected);
        assert_eq!(vm.processing(), 0);
        assert!(matches!(block.accept(), Err(ChainError::NotVerified(_))));

        vm.requeue(block.transactions());
        assert_eq!(vm.mempool().len(), 1);
        let again = vm.build_block_at(101).unwrap();
        again.accept().unwrap();
        assert!(state::has_value(&*vm.state(), &value_hash(b"maybe")).unwrap());
    }

    #[test]
    fn chained_verified_blocks_accept_in_order() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[3; 32]);
        let vm = new_vm(&[&alice]);

        vm.submit(transfer_tx(&vm, &alice, bob.address(), 100)).unwrap();
        let first = vm.build_block_at(100).unwrap();
        vm.set_preference(first.id());

        // Second block sits on the first one's diff before either is accepted.
        let utx = UnsignedTransaction::Transfer(TransferTx {
            base: BaseTx {
                magic: MAGIC,
                block_id: first.id(),
                price: 1,
            },
            to: bob.address(),
            units: 50,
        });
        vm.submit(Transaction::sign(utx, &alice).unwrap()).unwrap();
        let second = vm.build_block_at(101).unwrap();
        assert_eq!(second.parent_id(), first.id());
        assert_eq!(vm.processing(), 2);

        first.accept().unwrap();
        second.accept().unwrap();
        assert_eq!(state::get_balance(&*vm.state(), &bob.address()).unwrap(), 150);
        assert_eq!(vm.last_accepted(), second.id());
    }

    #[test]
    fn peer_parses_and_verifies_built_block() {
        let alice = Keypair::from_seed(&[1; 32]);
        let builder = new_vm(&[&alice]);
        let peer = new_vm(&[&alice]);
        assert_eq!(builder.last_accepted(), peer.last_accepted());

        builder.submit(set_tx(&builder, &alice, b"shared")).unwrap();
        let built = builder.build_block_at(100).unwrap();

        let parsed = peer.parse_block(built.bytes()).unwrap();
        assert_eq!(parsed.id(), built.id());
        parsed.verify().unwrap();
        parsed.accept().unwrap();
        assert!(state::has_value(&*peer.state(), &value_hash(b"shared")).unwrap());

        // Parsing a known block hands back the same instance.
        let again = peer.parse_block(built.bytes()).unwrap();
        assert_eq!(again.status(), BlockStatus::Accepted);
    }

    #[test]
    fn restores_last_accepted_after_restart() {
        let alice = Keypair::from_seed(&[1; 32]);
        let dir = tempfile::tempdir().unwrap();

        let accepted = {
            let db: Arc<dyn Database> = Arc::new(SledDatabase::open(dir.path()).unwrap());
            let vm = Vm::new(
                genesis_for(&[&alice]),
                VmConfig::default(),
                db,
                &[],
                Arc::new(NoopTrigger),
            )
            .unwrap();
            vm.submit(set_tx(&vm, &alice, b"durable")).unwrap();
            let block = vm.build_block_at(100).unwrap();
            block.accept().unwrap();
            block.id()
        };

        let db: Arc<dyn Database> = Arc::new(SledDatabase::open(dir.path()).unwrap());
        let vm = Vm::new(
            genesis_for(&[&alice]),
            VmConfig::default(),
            db,
            &[],
            Arc::new(NoopTrigger),
        )
        .unwrap();
        assert_eq!(vm.last_accepted(), accepted);

        let block = vm.get_block(&accepted).unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(block.transactions().len(), 1);
    }

    #[test]
    fn failed_build_with_pending_txs_notifies_engine() {
        let alice = Keypair::from_seed(&[1; 32]);
        let (vm, mut engine) = vm_with_trigger(genesis_for(&[&alice]));

        vm.submit(set_tx(&vm, &alice, b"first")).unwrap();
        vm.build_block_at(100).unwrap().accept().unwrap();
        while engine.try_recv().is_ok() {}

        // Same second as the parent: the cost rises and a min-price tx
        // leaves no surplus.
        vm.submit(set_tx(&vm, &alice, b"second")).unwrap();
        while engine.try_recv().is_ok() {}
        assert!(matches!(
            vm.build_block_at(100),
            Err(ChainError::InsufficientSurplus { required: 1, found: 0 })
        ));
        assert_eq!(vm.mempool().len(), 1);
        assert_eq!(engine.try_recv().unwrap(), EngineMessage::PendingTxs);

        // Cost has decayed by the next attempt.
        let block = vm.build_block_at(105).unwrap();
        assert_eq!(block.transactions().len(), 1);
    }

    #[test]
    fn submit_rejects_transactions_no_block_can_hold() {
        let alice = Keypair::from_seed(&[1; 32]);
        let mut g = genesis_for(&[&alice]);
        g.max_block_size = 5;
        g.max_value_size = 4 * 1024;
        let (vm, _engine) = vm_with_trigger(g);

        let big = set_tx(&vm, &alice, &vec![7u8; 10 * 1024]);
        assert!(matches!(
            vm.submit(big),
            Err(ChainError::TxTooBig { units: 11, max: 5 })
        ));
        assert!(vm.mempool().is_empty());

        vm.submit(transfer_tx(&vm, &alice, Address([9; 20]), 1)).unwrap();
        assert_eq!(vm.mempool().drain_new(5).len(), 1);
    }

    #[test]
    fn sibling_blocks_verify_independently() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let vm = new_vm(&[&alice, &bob]);
        let genesis_id = vm.last_accepted();

        // Both siblings claim the same content key on top of genesis.
        vm.submit(set_tx(&vm, &alice, b"contested")).unwrap();
        let left = vm.build_block_at(100).unwrap();
        vm.submit(set_tx(&vm, &bob, b"contested")).unwrap();
        let right = vm.build_block_at(101).unwrap();

        assert_eq!(left.parent_id(), genesis_id);
        assert_eq!(right.parent_id(), genesis_id);
        assert_ne!(left.id(), right.id());
        assert_eq!(vm.processing(), 2);
        left.verify().unwrap();
        right.verify().unwrap();

        // Nothing is durable until a decision.
        assert!(!state::has_value(&*vm.state(), &value_hash(b"contested")).unwrap());

        right.accept().unwrap();
        left.reject().unwrap();
        assert_eq!(vm.last_accepted(), right.id());
        assert_eq!(vm.processing(), 0);

        let (_, meta) = state::get_value(&*vm.state(), &value_hash(b"contested"))
            .unwrap()
            .unwrap();
        assert_eq!(meta.tx_id, right.transactions()[0].id());
        assert_eq!(
            state::get_balance(&*vm.state(), &alice.address()).unwrap(),
            10_000_000
        );
    }

    #[test]
    fn child_cannot_be_accepted_before_its_parent() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[3; 32]);
        let vm = new_vm(&[&alice]);
        let genesis_id = vm.last_accepted();

        vm.submit(transfer_tx(&vm, &alice, bob.address(), 100)).unwrap();
        let first = vm.build_block_at(100).unwrap();
        vm.set_preference(first.id());
        let utx = UnsignedTransaction::Transfer(TransferTx {
            base: BaseTx {
                magic: MAGIC,
                block_id: first.id(),
                price: 1,
            },
            to: bob.address(),
            units: 50,
        });
        vm.submit(Transaction::sign(utx, &alice).unwrap()).unwrap();
        let second = vm.build_block_at(101).unwrap();

        assert!(matches!(
            second.accept(),
            Err(ChainError::ParentNotAccepted(id)) if id == first.id()
        ));
        assert_eq!(second.status(), BlockStatus::Processing);
        assert_eq!(vm.last_accepted(), genesis_id);
        assert_eq!(state::get_balance(&*vm.state(), &bob.address()).unwrap(), 0);

        first.accept().unwrap();
        second.accept().unwrap();
        assert_eq!(state::get_balance(&*vm.state(), &bob.address()).unwrap(), 150);
    }

    /// sled store whose flush can be switched to fail.
    struct FlakyFlush {
        inner: SledDatabase,
        fail: AtomicBool,
    }

    impl Database for FlakyFlush {
        fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
            self.inner.put(key, value)
        }

        fn delete(&self, key: &[u8]) -> DbResult<()> {
            self.inner.delete(key)
        }

        fn iter_from(&self, start: &[u8]) -> KvIter {
            self.inner.iter_from(start)
        }

        fn write_batch(&self, batch: WriteBatch) -> DbResult<()> {
            self.inner.write_batch(batch)
        }

        fn flush(&self) -> DbResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DbError::corrupt(b"flush", "device unavailable"));
            }
            self.inner.flush()
        }
    }

    #[test]
    fn accept_succeeds_when_post_commit_flush_fails() {
        let alice = Keypair::from_seed(&[1; 32]);
        let store = Arc::new(FlakyFlush {
            inner: SledDatabase::open_temporary().unwrap(),
            fail: AtomicBool::new(false),
        });
        let vm = Vm::new(
            genesis_for(&[&alice]),
            VmConfig::default(),
            Arc::clone(&store) as Arc<dyn Database>,
            &[],
            Arc::new(NoopTrigger),
        )
        .unwrap();

        vm.submit(set_tx(&vm, &alice, b"committed")).unwrap();
        let block = vm.build_block_at(100).unwrap();
        store.fail.store(true, Ordering::SeqCst);

        block.accept().unwrap();
        assert_eq!(block.status(), BlockStatus::Accepted);
        assert_eq!(vm.last_accepted(), block.id());
        assert!(state::has_value(&*vm.state(), &value_hash(b"committed")).unwrap());
    }

    #[test]
    fn next_fee_starts_at_min_price() {
        let vm = new_vm(&[]);
        let (price, cost) = vm.next_fee().unwrap();
        assert_eq!(price, vm.genesis().min_price);
        assert_eq!(cost, vm.genesis().min_block_cost);
    }
}
