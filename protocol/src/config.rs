//! # Protocol Configuration & Constants
//!
//! Every magic number in the core lives here. Consensus-relevant chain
//! parameters (prices, block sizes, lookback window) are *not* here: they
//! belong to [`Genesis`](crate::chain::genesis::Genesis), because two nodes
//! disagreeing about them is a fork. What remains are node-local knobs and
//! wire/storage limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate/protocol version string reported by the node and the API.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Genesis Defaults
// ---------------------------------------------------------------------------

/// Bytes per value unit. A SetTx pays one fee unit per started KiB.
pub const DEFAULT_VALUE_UNIT_SIZE: u64 = 1024;

/// Largest value a single SetTx may store: 200 KiB.
pub const DEFAULT_MAX_VALUE_SIZE: u64 = 200 * 1024;

/// Seconds of history the fee market looks at.
pub const DEFAULT_LOOKBACK_WINDOW: u64 = 60;

/// Floor for the block cost surcharge.
pub const MIN_BLOCK_COST: u64 = 0;

/// Divisor for the per-block price step: price moves by at most 1/8
/// of itself per block, and by at least one unit.
pub const PRICE_CHANGE_DENOMINATOR: u64 = 8;

// ---------------------------------------------------------------------------
// Block Validation
// ---------------------------------------------------------------------------

/// How far into the future (seconds, by the verifier's clock) a block
/// timestamp may be.
pub const FUTURE_BOUND_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Storage & Caching
// ---------------------------------------------------------------------------

/// Entries in the pointer -> bytes cache used when unlinking stored blocks.
pub const LINKED_VALUE_LRU_SIZE: usize = 512;

/// Accepted blocks kept decoded in memory. The fee-market lookback walks
/// these on every build and verify.
pub const ACCEPTED_BLOCK_LRU_SIZE: usize = 128;

/// Upper bound on any canonically encoded object (block, tx, gossip batch).
pub const MAX_ENCODED_SIZE: u64 = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Gossip
// ---------------------------------------------------------------------------

/// Most transactions accepted in one inbound gossip payload.
pub const MAX_GOSSIP_BATCH_TXS: usize = 1024;

/// Transaction ids remembered as "already gossiped".
pub const GOSSIPED_TX_LRU_SIZE: usize = 4096;

// ---------------------------------------------------------------------------
// Node Runtime Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_BUILD_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REGOSSIP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MEMPOOL_SIZE: usize = 1024;
pub const DEFAULT_ACTIVITY_CACHE_SIZE: usize = 128;

/// Node-local runtime settings. Unlike genesis, these may differ between
/// nodes without affecting consensus.
///
/// Loaded from JSON by the node binary. Missing fields take their defaults,
/// so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmConfig {
    /// Minimum spacing between two build notifications to the host.
    pub build_interval_ms: u64,
    /// Period of the outbound gossip of fresh transactions.
    pub gossip_interval_ms: u64,
    /// Period of the regossip of the highest-priced pending transactions.
    pub regossip_interval_ms: u64,
    /// Mempool capacity, in transactions.
    pub mempool_size: usize,
    /// Activity records retained for the API.
    pub activity_cache_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            build_interval_ms: DEFAULT_BUILD_INTERVAL.as_millis() as u64,
            gossip_interval_ms: DEFAULT_GOSSIP_INTERVAL.as_millis() as u64,
            regossip_interval_ms: DEFAULT_REGOSSIP_INTERVAL.as_millis() as u64,
            mempool_size: DEFAULT_MEMPOOL_SIZE,
            activity_cache_size: DEFAULT_ACTIVITY_CACHE_SIZE,
        }
    }
}

impl VmConfig {
    pub fn build_interval(&self) -> Duration {
        Duration::from_millis(self.build_interval_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn regossip_interval(&self) -> Duration {
        Duration::from_millis(self.regossip_interval_ms)
    }
}
