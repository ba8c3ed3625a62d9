//! # Genesis
//!
//! The immutable chain configuration. Every parameter in here is
//! consensus-relevant: two nodes that disagree on any of them will compute
//! different block prices, reject each other's transactions, or both.
//!
//! Genesis is read from camelCase JSON. Missing fields take the defaults
//! below, so a genesis file only has to name what it changes (in practice
//! at least `magic`, which has no usable default).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::block::StatefulBlock;
use crate::config::{
    DEFAULT_LOOKBACK_WINDOW, DEFAULT_MAX_VALUE_SIZE, DEFAULT_VALUE_UNIT_SIZE, MIN_BLOCK_COST,
};
use crate::crypto::keccak256;
use crate::error::{ChainError, ChainResult};
use crate::storage::state;
use crate::storage::{Database, VersionDb};
use crate::types::{Address, Id};

/// One airdrop recipient. Every recipient receives `airdrop_units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airdrop {
    pub address: Address,
}

/// An explicit starting balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomAllocation {
    pub address: Address,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Genesis {
    /// Chain identifier. Every transaction must carry it.
    pub magic: u64,

    // -- Transaction parameters ---------------------------------------------
    /// Fee units every transaction pays before its variant-specific units.
    pub base_tx_units: u64,

    // -- SetTx parameters ---------------------------------------------------
    pub value_unit_size: u64,
    pub max_value_size: u64,

    // -- Fee market ---------------------------------------------------------
    pub min_price: u64,
    /// Seconds of history considered by the fee market.
    pub lookback_window: u64,
    /// Target seconds between blocks.
    pub target_block_rate: u64,
    /// Target fee units per block.
    pub target_block_size: u64,
    /// Hard cap on fee units per block.
    pub max_block_size: u64,
    pub block_cost_enabled: bool,
    pub min_block_cost: u64,

    // -- Allocations --------------------------------------------------------
    pub custom_allocation: Vec<CustomAllocation>,
    /// `0x`-prefixed keccak256 of the airdrop JSON. Empty disables the
    /// airdrop.
    pub airdrop_hash: String,
    pub airdrop_units: u64,
}

impl Default for Genesis {
    fn default() -> Self {
        Self {
            magic: 0,
            base_tx_units: 1,
            value_unit_size: DEFAULT_VALUE_UNIT_SIZE,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            min_price: 1,
            lookback_window: DEFAULT_LOOKBACK_WINDOW,
            target_block_rate: 1,
            target_block_size: 225,
            max_block_size: 246,
            block_cost_enabled: true,
            min_block_cost: MIN_BLOCK_COST,
            custom_allocation: Vec::new(),
            airdrop_hash: String::new(),
            airdrop_units: 0,
        }
    }
}

impl Genesis {
    /// Default parameters under the given chain magic.
    pub fn default_with_magic(magic: u64) -> Self {
        Self {
            magic,
            ..Self::default()
        }
    }

    pub fn verify(&self) -> ChainResult<()> {
        if self.magic == 0 {
            return Err(ChainError::InvalidMagic);
        }
        if self.target_block_rate == 0 {
            return Err(ChainError::InvalidBlockRate);
        }
        if self.value_unit_size == 0 {
            return Err(ChainError::InvalidGenesis(
                "valueUnitSize must be non-zero".into(),
            ));
        }
        if self.max_block_size < self.base_tx_units {
            return Err(ChainError::InvalidGenesis(
                "maxBlockSize cannot fit a single transaction".into(),
            ));
        }
        let largest_set = self
            .base_tx_units
            .saturating_add(self.max_value_size.div_ceil(self.value_unit_size).max(1));
        if largest_set > self.max_block_size {
            return Err(ChainError::InvalidGenesis(format!(
                "a maxValueSize SetTx needs {largest_set} units, maxBlockSize is {}",
                self.max_block_size
            )));
        }
        Ok(())
    }

    /// The height-zero block every chain starts from.
    pub fn genesis_block(&self) -> StatefulBlock {
        StatefulBlock {
            parent: Id::zero(),
            timestamp: 0,
            height: 0,
            price: self.min_price,
            cost: self.min_block_cost,
            access_proof: Id::zero(),
            txs: Vec::new(),
        }
    }

    /// Writes the initial balances into `db` as a single atomic batch.
    ///
    /// When `airdrop_hash` is set, `airdrop` must hash to it (compared
    /// case-insensitively) and parse as `[{"address": "0x.."}]`. Custom
    /// allocations are applied afterwards, so they override an airdrop
    /// entry for the same address.
    pub fn load(&self, db: Arc<dyn Database>, airdrop: &[u8]) -> ChainResult<()> {
        let start = Instant::now();
        let vdb = VersionDb::new(db);

        if !self.airdrop_hash.is_empty() {
            let actual = format!("0x{}", hex::encode(keccak256(airdrop)));
            let expected = self.airdrop_hash.to_lowercase();
            if expected.trim_start_matches("0x") != actual.trim_start_matches("0x") {
                return Err(ChainError::AirdropMismatch { expected, actual });
            }

            let recipients: Vec<Airdrop> = serde_json::from_slice(airdrop)?;
            for alloc in &recipients {
                state::set_balance(&vdb, &alloc.address, self.airdrop_units)?;
            }
            debug!(
                hash = %actual,
                addrs = recipients.len(),
                balance = self.airdrop_units,
                "applied airdrop allocation"
            );
        }

        for alloc in &self.custom_allocation {
            state::set_balance(&vdb, &alloc.address, alloc.balance)?;
            debug!(addr = %alloc.address, balance = alloc.balance, "applied custom allocation");
        }

        vdb.commit()?;
        info!(elapsed = ?start.elapsed(), "loaded genesis allocations");
        Ok(())
    }
}
