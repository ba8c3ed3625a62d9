//! # Chain Module
//!
//! The state-transition rules: what a transaction is, what executing one
//! does, how blocks are priced, built, verified, accepted and rejected.
//!
//! ## Architecture
//!
//! ```text
//! genesis.rs     - chain parameters, initial allocations
//! unsigned.rs    - SetTx / TransferTx and their execution
//! transaction.rs - signed wrapper, id derivation, common pipeline
//! fees.rs        - lookback window, price, cost, surplus
//! block.rs       - StatefulBlock / StatelessBlock lifecycle, access proof
//! builder.rs     - assembling a block out of the mempool
//! input.rs       - client request shapes and typed intents
//! activity.rs    - bounded history of accepted transactions
//! ```
//!
//! Blocks reach back into the VM that owns them (parent lookup, durable
//! state, fee context) through [`ChainVm`], so this module never depends on
//! the concrete VM.

use std::sync::Arc;

pub mod activity;
pub mod block;
pub mod builder;
pub mod fees;
pub mod genesis;
pub mod input;
pub mod transaction;
pub mod unsigned;

pub use activity::{Activity, ActivityLog};
pub use block::{BlockStatus, StatefulBlock, StatelessBlock};
pub use fees::ExecutionContext;
pub use genesis::{Airdrop, CustomAllocation, Genesis};
pub use input::{parse_typed_intent, Input, TypedIntent};
pub use transaction::Transaction;
pub use unsigned::{BaseTx, SetTx, TransferTx, TxContext, TxKind, UnsignedTransaction};

use crate::error::ChainResult;
use crate::network::mempool::Mempool;
use crate::storage::{Database, LinkedValueCache};
use crate::types::BlockId;

/// What a block needs from the VM that owns it.
pub trait ChainVm: Send + Sync {
    fn genesis(&self) -> &Genesis;

    /// Durable (accepted) state.
    fn state(&self) -> Arc<dyn Database>;

    fn linked_values(&self) -> &LinkedValueCache;

    fn mempool(&self) -> &Mempool;

    /// A verified or accepted block. `UnknownBlock` otherwise.
    fn get_stateless_block(&self, id: &BlockId) -> ChainResult<Arc<StatelessBlock>>;

    /// Fee context for a block at `current_time` on top of `parent`.
    fn execution_context(&self, current_time: u64, parent: &StatelessBlock)
        -> ChainResult<ExecutionContext>;

    /// Called once a block has verified.
    fn verified(&self, block: Arc<StatelessBlock>);

    /// Called once a block's writes are durable. The block is accepted by
    /// then, so bookkeeping failures here are logged, not returned.
    fn accepted(&self, block: Arc<StatelessBlock>);

    fn rejected(&self, block: Arc<StatelessBlock>);
}
