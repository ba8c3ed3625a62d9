//! Read and submit operations exposed to clients.
//!
//! `ChainService` is transport-agnostic: every method takes and returns
//! plain Rust values (all serde-friendly), so an RPC layer can wrap it
//! without touching chain logic.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::Vm;
use crate::chain::fees;
use crate::chain::{parse_typed_intent, Activity, ChainVm, Genesis, Input, Transaction, TypedIntent};
use crate::crypto::{value_hash, Signature};
use crate::error::{ChainError, ChainResult};
use crate::storage::state::{self, ValueMeta};
use crate::types::{Address, BlockId, ContentKey, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAccepted {
    pub height: u64,
    #[serde(rename = "blockID")]
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedRawFee {
    pub price: u64,
    pub cost: u64,
}

/// A ready-to-sign intent and what it will burn from the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedFee {
    pub typed_data: TypedIntent,
    pub total_cost: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    #[serde(with = "crate::types::hex_bytes")]
    pub value: Vec<u8>,
    pub meta: ValueMeta,
}

#[derive(Clone)]
pub struct ChainService {
    vm: Arc<Vm>,
}

impl ChainService {
    pub fn new(vm: Arc<Vm>) -> Self {
        Self { vm }
    }

    pub fn ping(&self) -> bool {
        true
    }

    pub fn genesis(&self) -> Genesis {
        self.vm.genesis().clone()
    }

    pub fn last_accepted(&self) -> LastAccepted {
        let block = self.vm.last_accepted_block();
        LastAccepted {
            height: block.height(),
            block_id: block.id(),
        }
    }

    pub fn suggested_raw_fee(&self) -> ChainResult<SuggestedRawFee> {
        let (price, cost) = self.vm.next_fee()?;
        Ok(SuggestedRawFee { price, cost })
    }

    /// Completes `input` with magic, the preferred block and a price that
    /// covers the current block cost on its own.
    pub fn suggested_fee(&self, input: &Input) -> ChainResult<SuggestedFee> {
        let mut utx = input.decode()?;
        let (price, cost) = self.vm.next_fee()?;
        let g = self.vm.genesis();
        let units = utx.fee_units(g);
        let offered = fees::suggested_price(price, cost, units);

        utx.set_magic(g.magic);
        utx.set_block_id(self.vm.preferred());
        utx.set_price(offered);

        Ok(SuggestedFee {
            typed_data: utx.typed_intent(),
            total_cost: units.saturating_mul(offered),
        })
    }

    pub fn issue_raw_tx(&self, bytes: &[u8]) -> ChainResult<TxId> {
        let tx = Transaction::decode(bytes)?;
        debug!(tx = %tx.id(), sender = %tx.sender(), "raw transaction issued");
        self.vm.submit(tx)
    }

    /// Rebuilds the unsigned transaction from `intent`, attaches
    /// `signature` and submits it.
    pub fn issue_tx(&self, intent: &TypedIntent, signature: Signature) -> ChainResult<TxId> {
        let utx = parse_typed_intent(intent)?;
        let tx = Transaction::new(utx, signature)?;
        debug!(tx = %tx.id(), sender = %tx.sender(), "typed transaction issued");
        self.vm.submit(tx)
    }

    /// Whether `tx_id` is part of an accepted block.
    pub fn has_tx(&self, tx_id: &TxId) -> ChainResult<bool> {
        state::has_transaction(&*self.vm.state(), tx_id)
    }

    pub fn resolve(&self, key: &ContentKey) -> ChainResult<Option<Resolved>> {
        Ok(state::get_value(&*self.vm.state(), key)?.map(|(value, meta)| Resolved { value, meta }))
    }

    pub fn balance(&self, address: &Address) -> ChainResult<u64> {
        state::get_balance(&*self.vm.state(), address)
    }

    pub fn recent_activity(&self) -> Vec<Activity> {
        self.vm.recent_activity()
    }
}

/// Client-side check that `value` is what `key` addresses.
pub fn verify_resolved(key: &ContentKey, value: &[u8]) -> ChainResult<()> {
    let actual = value_hash(value);
    if actual != *key {
        return Err(ChainError::IntegrityFailure {
            expected: *key,
            actual,
        });
    }
    Ok(())
}
