//! Client-facing request shapes.
//!
//! - [`Input`]: what a client asks for before it knows the price or the
//!   block to reference. The node fills those in (see
//!   `ChainService::suggested_fee`).
//! - [`TypedIntent`]: a flat, human-readable rendering of an unsigned
//!   transaction. A wallet can show it to the signer, and the node can
//!   turn it back into the exact same unsigned transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::unsigned::{BaseTx, SetTx, TransferTx, TxKind, UnsignedTransaction};
use crate::error::{ChainError, ChainResult};
use crate::types::{hex_bytes, Address, BlockId};

/// A transaction request without magic, block reference or price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Input {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub to: Address,
    pub units: u64,
}

impl Input {
    /// The unsigned transaction this input describes, with a zeroed base.
    pub fn decode(&self) -> ChainResult<UnsignedTransaction> {
        match self.kind.parse::<TxKind>()? {
            TxKind::Set => Ok(UnsignedTransaction::Set(SetTx {
                base: BaseTx::default(),
                value: self.value.clone(),
            })),
            TxKind::Transfer => Ok(UnsignedTransaction::Transfer(TransferTx {
                base: BaseTx::default(),
                to: self.to,
                units: self.units,
            })),
        }
    }
}

/// Flat string rendering of an unsigned transaction.
///
/// `message` holds every digest field except `magic`, keyed by field name
/// (`blockID`, `price`, then `value` or `to`/`units`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedIntent {
    pub magic: u64,
    pub primary_type: TxKind,
    pub message: BTreeMap<String, String>,
}

fn field<'a>(intent: &'a TypedIntent, key: &str) -> ChainResult<&'a str> {
    intent
        .message
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ChainError::TypedDataKeyMissing(key.to_string()))
}

fn malformed(key: &str, reason: impl ToString) -> ChainError {
    ChainError::InvalidTypedField {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_u64(intent: &TypedIntent, key: &str) -> ChainResult<u64> {
    field(intent, key)?.parse().map_err(|e| malformed(key, e))
}

/// Rebuilds the unsigned transaction a typed intent renders.
pub fn parse_typed_intent(intent: &TypedIntent) -> ChainResult<UnsignedTransaction> {
    let block_id: BlockId = field(intent, "blockID")?
        .parse()
        .map_err(|e| malformed("blockID", e))?;
    let base = BaseTx {
        magic: intent.magic,
        block_id,
        price: parse_u64(intent, "price")?,
    };

    match intent.primary_type {
        TxKind::Set => {
            let raw = field(intent, "value")?;
            let value = hex::decode(raw.trim_start_matches("0x")).map_err(|e| malformed("value", e))?;
            Ok(UnsignedTransaction::Set(SetTx { base, value }))
        }
        TxKind::Transfer => {
            let to: Address = field(intent, "to")?.parse().map_err(|e| malformed("to", e))?;
            Ok(UnsignedTransaction::Transfer(TransferTx {
                base,
                to,
                units: parse_u64(intent, "units")?,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> UnsignedTransaction {
        UnsignedTransaction::Transfer(TransferTx {
            base: BaseTx {
                magic: 9,
                block_id: BlockId::from([1; 32]),
                price: 3,
            },
            to: Address([2; 20]),
            units: 100,
        })
    }

    #[test]
    fn input_decodes_by_type() {
        let input: Input = serde_json::from_str(r#"{"type":"set","value":"0x0102"}"#).unwrap();
        let utx = input.decode().unwrap();
        assert!(matches!(&utx, UnsignedTransaction::Set(s) if s.value == vec![1, 2]));

        let bad = Input {
            kind: "burn".into(),
            ..Input::default()
        };
        assert!(matches!(bad.decode(), Err(ChainError::InvalidType(t)) if t == "burn"));
    }

    #[test]
    fn typed_intent_round_trips() {
        let utx = transfer();
        let intent = utx.typed_intent();
        assert_eq!(intent.message["units"], "100");
        assert_eq!(parse_typed_intent(&intent).unwrap(), utx);

        let set = UnsignedTransaction::Set(SetTx {
            base: BaseTx::default(),
            value: b"blob".to_vec(),
        });
        assert_eq!(parse_typed_intent(&set.typed_intent()).unwrap(), set);
    }

    #[test]
    fn missing_and_malformed_fields() {
        let mut intent = transfer().typed_intent();
        intent.message.remove("to");
        assert!(matches!(
            parse_typed_intent(&intent),
            Err(ChainError::TypedDataKeyMissing(k)) if k == "to"
        ));

        let mut intent = transfer().typed_intent();
        intent.message.insert("price".into(), "cheap".into());
        assert!(matches!(
            parse_typed_intent(&intent),
            Err(ChainError::InvalidTypedField { key, .. }) if key == "price"
        ));
    }
}
