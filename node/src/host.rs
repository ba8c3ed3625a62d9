//! # Single-node host
//!
//! Stands in for a consensus engine: every time the VM signals pending
//! transactions it builds a block on the preferred tip and accepts it
//! immediately. There are no competing proposals, so nothing is ever
//! rejected.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use blobchain_protocol::chain::ChainVm;
use blobchain_protocol::network::{AppSender, GossipError};
use blobchain_protocol::types::BlockId;
use blobchain_protocol::vm::{EngineMessage, Vm};
use blobchain_protocol::ChainError;

use crate::metrics::NodeMetrics;

/// Gossip transport for a node without peers: logs what would be sent.
pub struct LoggingSender;

impl AppSender for LoggingSender {
    fn send_app_gossip(&self, payload: Vec<u8>) -> Result<(), GossipError> {
        debug!(bytes = payload.len(), "gossip payload (no peers)");
        Ok(())
    }
}

/// Builds and accepts one block. `Ok(None)` when there was nothing worth
/// building.
pub fn build_and_accept(vm: &Arc<Vm>, metrics: &NodeMetrics) -> anyhow::Result<Option<BlockId>> {
    let timer = Instant::now();
    let block = match vm.build_block() {
        Ok(block) => block,
        Err(ChainError::NoTransactions) => {
            debug!("nothing to build");
            metrics.block_build_failures_total.inc();
            return Ok(None);
        }
        Err(e @ ChainError::InsufficientSurplus { .. }) => {
            debug!(error = %e, "pending transactions do not cover block cost yet");
            metrics.block_build_failures_total.inc();
            return Ok(None);
        }
        Err(e) => {
            metrics.block_build_failures_total.inc();
            return Err(e.into());
        }
    };
    metrics.block_build_seconds.observe(timer.elapsed().as_secs_f64());

    block.accept()?;
    vm.set_preference(block.id());

    metrics.blocks_accepted_total.inc();
    metrics
        .transactions_accepted_total
        .inc_by(block.transactions().len() as u64);
    metrics.block_height.set(block.height() as i64);
    metrics.transactions_in_mempool.set(vm.mempool().len() as i64);
    Ok(Some(block.id()))
}

/// Reacts to engine messages until `shutdown` flips or the channel closes.
pub async fn run(
    vm: Arc<Vm>,
    metrics: Arc<NodeMetrics>,
    mut engine: mpsc::Receiver<EngineMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(height = vm.last_accepted_block().height(), "host loop starting");
    loop {
        tokio::select! {
            msg = engine.recv() => match msg {
                Some(EngineMessage::PendingTxs) => {
                    metrics.transactions_in_mempool.set(vm.mempool().len() as i64);
                    if let Err(e) = build_and_accept(&vm, &metrics) {
                        warn!(error = %e, "block production failed");
                    }
                }
                None => {
                    info!("engine channel closed, host loop exiting");
                    return;
                }
            },
            _ = shutdown.changed() => {
                info!("host loop shutting down");
                return;
            }
        }
    }
}
