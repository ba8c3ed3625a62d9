//! # Unsigned Transactions
//!
//! The closed set of things a transaction can do. Adding a variant means
//! adding an arm to every `match` below, which is the point: nothing can be
//! silently left unhandled.
//!
//! ## Canonical encoding
//!
//! ```text
//! u32 variant index | BaseTx { magic, block_id, price } | variant payload
//! ```
//!
//! `magic` is the first field of every variant. Field order is part of the
//! transaction id; never reorder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::activity::Activity;
use super::genesis::Genesis;
use super::input::TypedIntent;
use crate::codec;
use crate::crypto::{keccak256, value_hash};
use crate::error::{ChainError, ChainResult};
use crate::storage::state::{self, BalanceChange, ValueMeta};
use crate::storage::Database;
use crate::types::{hex_bytes, Address, BlockId, Id, TxId};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Set,
    Transfer,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Set => "set",
            TxKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(TxKind::Set),
            "transfer" => Ok(TxKind::Transfer),
            other => Err(ChainError::InvalidType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Everything a variant may read while executing. Execution is a pure
/// function of these inputs and the contents of `db`.
pub struct TxContext<'a> {
    pub genesis: &'a Genesis,
    pub db: &'a dyn Database,
    /// Timestamp of the enclosing block.
    pub block_time: u64,
    pub tx_id: TxId,
    /// Address recovered from the signature.
    pub sender: Address,
}

// ---------------------------------------------------------------------------
// Digest fields
// ---------------------------------------------------------------------------

/// A typed value in the ordered field list a signer is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestField {
    U64(u64),
    Bytes(Vec<u8>),
    Id(Id),
    Address(Address),
}

impl DigestField {
    /// Type name as it appears in a typed intent.
    pub fn type_name(&self) -> &'static str {
        match self {
            DigestField::U64(_) => "uint64",
            DigestField::Bytes(_) => "bytes",
            DigestField::Id(_) => "string",
            DigestField::Address(_) => "address",
        }
    }

    /// String rendering used in typed intent messages: decimal for
    /// integers, `0x` hex for everything else.
    pub fn render(&self) -> String {
        match self {
            DigestField::U64(n) => n.to_string(),
            DigestField::Bytes(b) => format!("0x{}", hex::encode(b)),
            DigestField::Id(id) => id.to_hex(),
            DigestField::Address(a) => a.to_hex(),
        }
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Fields shared by every variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseTx {
    pub magic: u64,
    /// A recent block the signer built on. Bounds the lifetime of the tx.
    pub block_id: BlockId,
    /// Offered price per fee unit.
    pub price: u64,
}

/// Stores `value` under `keccak256(value)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTx {
    pub base: BaseTx,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// Moves `units` from the signer to `to`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTx {
    pub base: BaseTx,
    pub to: Address,
    pub units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsignedTransaction {
    Set(SetTx),
    Transfer(TransferTx),
}

impl UnsignedTransaction {
    fn base(&self) -> &BaseTx {
        match self {
            UnsignedTransaction::Set(tx) => &tx.base,
            UnsignedTransaction::Transfer(tx) => &tx.base,
        }
    }

    fn base_mut(&mut self) -> &mut BaseTx {
        match self {
            UnsignedTransaction::Set(tx) => &mut tx.base,
            UnsignedTransaction::Transfer(tx) => &mut tx.base,
        }
    }

    pub fn set_magic(&mut self, magic: u64) {
        self.base_mut().magic = magic;
    }

    pub fn set_block_id(&mut self, block_id: BlockId) {
        self.base_mut().block_id = block_id;
    }

    pub fn set_price(&mut self, price: u64) {
        self.base_mut().price = price;
    }

    pub fn magic(&self) -> u64 {
        self.base().magic
    }

    pub fn block_id(&self) -> BlockId {
        self.base().block_id
    }

    pub fn price(&self) -> u64 {
        self.base().price
    }

    pub fn kind(&self) -> TxKind {
        match self {
            UnsignedTransaction::Set(_) => TxKind::Set,
            UnsignedTransaction::Transfer(_) => TxKind::Transfer,
        }
    }

    /// Fee units charged for this transaction.
    ///
    /// SetTx pays one extra unit per started `value_unit_size` bytes (at
    /// least one).
    pub fn fee_units(&self, g: &Genesis) -> u64 {
        match self {
            UnsignedTransaction::Set(tx) => {
                let len = tx.value.len() as u64;
                let value_units = len.div_ceil(g.value_unit_size.max(1)).max(1);
                g.base_tx_units.saturating_add(value_units)
            }
            UnsignedTransaction::Transfer(_) => g.base_tx_units,
        }
    }

    /// Applies the variant-specific state change. The common checks (magic,
    /// block reference, replay, fee) are done by the signed
    /// [`Transaction`](super::transaction::Transaction) before this runs.
    pub fn execute(&self, ctx: &TxContext<'_>) -> ChainResult<()> {
        match self {
            UnsignedTransaction::Set(tx) => {
                let size = tx.value.len() as u64;
                if size == 0 {
                    return Err(ChainError::ValueEmpty);
                }
                if size > ctx.genesis.max_value_size {
                    return Err(ChainError::ValueTooBig {
                        size,
                        max: ctx.genesis.max_value_size,
                    });
                }

                let key = value_hash(&tx.value);
                let meta = ValueMeta {
                    size,
                    tx_id: ctx.tx_id,
                    created: ctx.block_time,
                };
                state::put_value_meta(ctx.db, &key, &meta)?;
                state::put_linked_value(ctx.db, &ctx.tx_id, &tx.value)
            }
            UnsignedTransaction::Transfer(tx) => {
                if tx.units == 0 {
                    return Err(ChainError::InvalidTransferUnits);
                }
                if tx.to != ctx.sender {
                    let balance = state::get_balance(ctx.db, &tx.to)?;
                    if balance.checked_add(tx.units).is_none() {
                        return Err(ChainError::InvalidBalance {
                            address: tx.to,
                            balance,
                            change: tx.units,
                        });
                    }
                }
                state::modify_balance(ctx.db, &ctx.sender, BalanceChange::Debit(tx.units))?;
                state::modify_balance(ctx.db, &tx.to, BalanceChange::Credit(tx.units))?;
                Ok(())
            }
        }
    }

    /// The ordered, named field list a signer is shown.
    pub fn digest_fields(&self) -> Vec<(&'static str, DigestField)> {
        let base = self.base();
        let mut fields = vec![
            ("magic", DigestField::U64(base.magic)),
            ("blockID", DigestField::Id(base.block_id)),
            ("price", DigestField::U64(base.price)),
        ];
        match self {
            UnsignedTransaction::Set(tx) => {
                fields.push(("value", DigestField::Bytes(tx.value.clone())));
            }
            UnsignedTransaction::Transfer(tx) => {
                fields.push(("to", DigestField::Address(tx.to)));
                fields.push(("units", DigestField::U64(tx.units)));
            }
        }
        fields
    }

    /// The 32-byte digest a signature covers: keccak256 of the canonical
    /// encoding.
    pub fn digest(&self) -> ChainResult<[u8; 32]> {
        Ok(keccak256(&codec::encode(self)?))
    }

    /// Typed-intent rendering of [`digest_fields`](Self::digest_fields).
    pub fn typed_intent(&self) -> TypedIntent {
        let message = self
            .digest_fields()
            .into_iter()
            .filter(|(name, _)| *name != "magic")
            .map(|(name, field)| (name.to_string(), field.render()))
            .collect();
        TypedIntent {
            magic: self.magic(),
            primary_type: self.kind(),
            message,
        }
    }

    pub fn activity(&self, timestamp: u64, sender: Address, tx_id: TxId) -> Activity {
        let mut activity = Activity {
            timestamp,
            sender,
            tx_id,
            kind: self.kind(),
            key: None,
            size: None,
            to: None,
            units: None,
        };
        match self {
            UnsignedTransaction::Set(tx) => {
                activity.key = Some(value_hash(&tx.value));
                activity.size = Some(tx.value.len() as u64);
            }
            UnsignedTransaction::Transfer(tx) => {
                activity.to = Some(tx.to);
                activity.units = Some(tx.units);
            }
        }
        activity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
