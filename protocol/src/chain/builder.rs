//! Block assembly.
//!
//! Pulls the best-paying transactions out of the mempool, executes each on
//! a scratch diff over the preferred block's state, and keeps the ones that
//! succeed. The result still has to pass [`StatelessBlock::verify`]; the
//! builder only decides what goes in.

use std::sync::Arc;
use tracing::{debug, warn};

use super::block::{access_proof, BlockStatus, StatefulBlock, StatelessBlock};
use super::fees;
use super::transaction::Transaction;
use super::ChainVm;
use crate::error::{ChainError, ChainResult};
use crate::storage::{Database, VersionDb};

/// Builds a block at `timestamp` on top of `preferred`.
///
/// - transactions priced below the block price go back to the pool,
/// - transactions that fail execution are dropped,
/// - if nothing executes, `NoTransactions`,
/// - if the survivors cannot cover the block cost they go back to the pool
///   and the build fails with `InsufficientSurplus`.
pub fn build_block(
    vm: &dyn ChainVm,
    preferred: &Arc<StatelessBlock>,
    timestamp: u64,
) -> ChainResult<StatelessBlock> {
    let g = vm.genesis();
    let mempool = vm.mempool();

    let ctx = vm.execution_context(timestamp, preferred)?;
    let parent_state = preferred.state(vm)?;

    mempool.prune(&ctx.recent_block_ids);
    let candidates = mempool.drain(g.max_block_size);

    let height = preferred.height().saturating_add(1);
    let proof = access_proof(&*parent_state, height, &preferred.id())?;

    let diff = Arc::new(VersionDb::new(parent_state));
    let mut txs: Vec<Transaction> = Vec::with_capacity(candidates.len());
    for tx in candidates {
        if tx.price() < ctx.next_price {
            requeue(vm, tx);
            continue;
        }

        let scratch = VersionDb::new(Arc::clone(&diff) as Arc<dyn Database>);
        match tx.execute(g, &scratch, timestamp, &ctx) {
            Ok(()) => {
                scratch.commit()?;
                txs.push(tx);
            }
            Err(e) => {
                debug!(tx = %tx.id(), error = %e, "dropping transaction that failed execution");
            }
        }
    }

    if txs.is_empty() {
        return Err(ChainError::NoTransactions);
    }

    if let Err(e) = fees::verify_surplus(g, ctx.next_price, ctx.next_cost, &txs) {
        for tx in txs {
            requeue(vm, tx);
        }
        return Err(e);
    }

    let stateful = StatefulBlock {
        parent: preferred.id(),
        timestamp,
        height,
        price: ctx.next_price,
        cost: ctx.next_cost,
        access_proof: proof,
        txs,
    };
    StatelessBlock::sealed(stateful, BlockStatus::Processing)
}

fn requeue(vm: &dyn ChainVm, tx: Transaction) {
    let id = tx.id();
    if let Err(e) = vm.mempool().add(tx) {
        warn!(tx = %id, error = %e, "could not return transaction to mempool");
    }
}
