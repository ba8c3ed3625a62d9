//! Chain-level error type shared by storage accessors, transaction
//! execution, block verification and the API surface.
//!
//! Every variant is local to one transaction or block attempt. Nothing here
//! is retried internally: callers decide what to do with a failure.

use crate::codec::CodecError;
use crate::crypto::KeyError;
use crate::network::mempool::MempoolError;
use crate::storage::db::DbError;
use crate::types::{Address, BlockId, ContentKey, TxId};

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    // -- Value constraints --------------------------------------------------
    #[error("value is empty")]
    ValueEmpty,

    #[error("value too big: {size} bytes > {max} bytes")]
    ValueTooBig { size: u64, max: u64 },

    #[error("content key {0} already exists")]
    KeyExists(ContentKey),

    // -- Balances -----------------------------------------------------------
    #[error("invalid balance change for {address}: balance {balance}, change {change}")]
    InvalidBalance {
        address: Address,
        balance: u64,
        change: u64,
    },

    #[error("transfer of zero units")]
    InvalidTransferUnits,

    // -- Genesis ------------------------------------------------------------
    #[error("genesis magic must be non-zero")]
    InvalidMagic,

    #[error("genesis target block rate must be non-zero")]
    InvalidBlockRate,

    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("airdrop hash mismatch: expected {expected}, got {actual}")]
    AirdropMismatch { expected: String, actual: String },

    // -- Intents ------------------------------------------------------------
    #[error("invalid transaction type: {0}")]
    InvalidType(String),

    #[error("typed data key missing: {0}")]
    TypedDataKeyMissing(String),

    #[error("typed data field {key} is malformed: {reason}")]
    InvalidTypedField { key: String, reason: String },

    // -- Transaction execution ----------------------------------------------
    #[error("magic mismatch: expected {expected}, got {got}")]
    MagicMismatch { expected: u64, got: u64 },

    #[error("transaction references unknown or stale block {0}")]
    InvalidBlockId(BlockId),

    #[error("transaction {0} was already executed")]
    DuplicateTx(TxId),

    #[error("transaction {0} is already accepted")]
    AlreadyAccepted(TxId),

    #[error("insufficient price: required {required}, offered {offered}")]
    InsufficientPrice { required: u64, offered: u64 },

    #[error("transaction uses {units} fee units, a block holds at most {max}")]
    TxTooBig { units: u64, max: u64 },

    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] KeyError),

    // -- Block verification -------------------------------------------------
    #[error("block contains no transactions")]
    NoTransactions,

    #[error("block timestamp {found} is before parent timestamp {parent}")]
    TimestampTooEarly { found: u64, parent: u64 },

    #[error("block timestamp {found} is too far in the future (now {now})")]
    TimestampTooLate { found: u64, now: u64 },

    #[error("invalid block height: expected {expected}, found {found}")]
    InvalidHeight { expected: u64, found: u64 },

    #[error("block uses {units} fee units, max is {max}")]
    BlockTooBig { units: u64, max: u64 },

    #[error("block price mismatch: expected {expected}, found {found}")]
    PriceMismatch { expected: u64, found: u64 },

    #[error("block cost mismatch: expected {expected}, found {found}")]
    CostMismatch { expected: u64, found: u64 },

    #[error("invalid access proof: expected {expected}, found {found}")]
    InvalidAccessProof { expected: BlockId, found: BlockId },

    #[error("insufficient block surplus: required {required}, found {found}")]
    InsufficientSurplus { required: u64, found: u64 },

    // -- Block lookup / lifecycle -------------------------------------------
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("parent block {0} has not been verified")]
    ParentNotVerified(BlockId),

    #[error("block {0} has not been verified")]
    NotVerified(BlockId),

    #[error("parent block {0} has not been accepted")]
    ParentNotAccepted(BlockId),

    #[error("block {0} was rejected")]
    BlockRejected(BlockId),

    #[error("linked value for transaction {0} is missing")]
    MissingLinkedValue(TxId),

    // -- Client-side checks -------------------------------------------------
    #[error("integrity failure: requested {expected}, content hashes to {actual}")]
    IntegrityFailure {
        expected: ContentKey,
        actual: ContentKey,
    },

    // -- Plumbing -----------------------------------------------------------
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),
}
