//! # Fee Market
//!
//! Price and cost for the next block are a pure function of genesis and a
//! short window of recent blocks. Every node recomputes them during
//! verification and rejects a block whose header disagrees.
//!
//! ## Window
//!
//! Starting at the parent and walking back, every ancestor whose timestamp
//! is within `lookback_window` seconds of the new block is included. The
//! parent is always included. The window yields:
//!
//! - `recent_units`: fee units consumed, used to steer the price,
//! - `recent_block_ids`: blocks a transaction may reference,
//! - `recent_tx_ids`: transactions that may not be replayed.
//!
//! ## Price
//!
//! ```text
//! window_target = target_block_size * lookback_window / target_block_rate
//! step          = max(1, parent_price / 8)
//! recent_units > window_target  -> parent_price + step
//! recent_units < window_target  -> max(min_price, parent_price - step)
//! otherwise                     -> parent_price
//! ```
//!
//! ## Cost
//!
//! Blocks arriving faster than `target_block_rate` pay a growing surcharge;
//! slower blocks let it decay back to `min_block_cost`. The surcharge has
//! to be covered by what transactions offer above the block price.

use std::collections::HashSet;
use std::sync::Arc;

use super::block::StatelessBlock;
use super::genesis::Genesis;
use super::transaction::Transaction;
use crate::config::PRICE_CHANGE_DENOMINATOR;
use crate::error::{ChainError, ChainResult};
use crate::types::{BlockId, TxId};

/// Fee-market state for one block position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub chain_price: u64,
    pub chain_cost: u64,
    /// Price the next block must carry; every tx must offer at least this.
    pub next_price: u64,
    /// Cost the next block must carry.
    pub next_cost: u64,
    pub recent_block_ids: HashSet<BlockId>,
    pub recent_tx_ids: HashSet<TxId>,
    pub recent_units: u64,
}

/// Builds the context for a block at `current_time` on top of `parent`.
///
/// `ancestors` are the parent's ancestors, newest first. Iteration stops at
/// the first one outside the lookback window.
pub fn build_context(
    g: &Genesis,
    current_time: u64,
    parent: &StatelessBlock,
    ancestors: &[Arc<StatelessBlock>],
) -> ExecutionContext {
    let mut ctx = ExecutionContext {
        chain_price: parent.price(),
        chain_cost: parent.cost(),
        ..ExecutionContext::default()
    };

    let include = |block: &StatelessBlock, ctx: &mut ExecutionContext| {
        ctx.recent_block_ids.insert(block.id());
        for tx in block.txs() {
            ctx.recent_tx_ids.insert(tx.id());
            ctx.recent_units = ctx.recent_units.saturating_add(tx.fee_units(g));
        }
    };

    include(parent, &mut ctx);
    for ancestor in ancestors {
        if current_time.saturating_sub(ancestor.timestamp()) > g.lookback_window {
            break;
        }
        include(ancestor, &mut ctx);
    }

    ctx.next_price = next_price(g, parent.price(), ctx.recent_units);
    let elapsed = current_time.saturating_sub(parent.timestamp());
    ctx.next_cost = next_cost(g, parent.cost(), elapsed);
    ctx
}

/// Fee units a full window would consume at target size and rate.
pub fn window_target(g: &Genesis) -> u64 {
    let target = u128::from(g.target_block_size) * u128::from(g.lookback_window)
        / u128::from(g.target_block_rate.max(1));
    u64::try_from(target).unwrap_or(u64::MAX)
}

pub fn next_price(g: &Genesis, parent_price: u64, recent_units: u64) -> u64 {
    let step = (parent_price / PRICE_CHANGE_DENOMINATOR).max(1);
    let target = window_target(g);
    let price = if recent_units > target {
        parent_price.saturating_add(step)
    } else if recent_units < target {
        parent_price.saturating_sub(step)
    } else {
        parent_price
    };
    price.max(g.min_price)
}

/// `elapsed` is the gap between the new block and its parent, in seconds.
pub fn next_cost(g: &Genesis, parent_cost: u64, elapsed: u64) -> u64 {
    if g.block_cost_enabled && elapsed < g.target_block_rate {
        parent_cost.saturating_add(g.target_block_rate - elapsed)
    } else {
        let decay = elapsed.saturating_sub(g.target_block_rate);
        parent_cost.saturating_sub(decay).max(g.min_block_cost)
    }
}

/// `Σ (tx.price - block_price) * tx.units` over `txs`.
pub fn surplus(g: &Genesis, block_price: u64, txs: &[Transaction]) -> u64 {
    txs.iter().fold(0u64, |acc, tx| {
        let extra = tx.price().saturating_sub(block_price);
        acc.saturating_add(extra.saturating_mul(tx.fee_units(g)))
    })
}

/// Fails with `InsufficientSurplus` unless the transactions pay for the
/// block cost.
pub fn verify_surplus(g: &Genesis, price: u64, cost: u64, txs: &[Transaction]) -> ChainResult<()> {
    let required = price.saturating_mul(cost);
    let found = surplus(g, price, txs);
    if found < required {
        return Err(ChainError::InsufficientSurplus { required, found });
    }
    Ok(())
}

/// Per-unit price a tx of `units` should offer so that, alone in a block,
/// it covers the block cost: `price + ceil(price * cost / units)`.
pub fn suggested_price(price: u64, cost: u64, units: u64) -> u64 {
    let surcharge = u128::from(price) * u128::from(cost);
    let per_unit = surcharge.div_ceil(u128::from(units.max(1)));
    price.saturating_add(u64::try_from(per_unit).unwrap_or(u64::MAX))
}
