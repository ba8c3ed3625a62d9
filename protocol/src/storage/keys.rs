//! Key layout of the chain tree.
//!
//! ```text
//! 0x00 '/' block_id      -> stateful block bytes (values linked)
//! 0x01 '/' tx_id         -> empty (existence marker)
//! 0x02 '/' tx_id         -> literal SetTx value
//! 0x03 '/' content_key   -> ValueMeta
//! 0x04 '/' address       -> balance (u64 big-endian)
//! "last_accepted"        -> block_id
//! ```
//!
//! `last_accepted` starts with `l` (0x6c) and cannot collide with a prefix.

use crate::types::{Address, BlockId, ContentKey, TxId};

pub const BLOCK_PREFIX: u8 = 0x00;
pub const TX_PREFIX: u8 = 0x01;
pub const TX_VALUE_PREFIX: u8 = 0x02;
pub const VALUE_PREFIX: u8 = 0x03;
pub const BALANCE_PREFIX: u8 = 0x04;

pub const DELIMITER: u8 = b'/';

pub const LAST_ACCEPTED_KEY: &[u8] = b"last_accepted";

fn prefixed(prefix: u8, body: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(2 + body.len());
    k.push(prefix);
    k.push(DELIMITER);
    k.extend_from_slice(body);
    k
}

pub fn block_key(id: &BlockId) -> Vec<u8> {
    prefixed(BLOCK_PREFIX, id.as_bytes())
}

pub fn tx_key(id: &TxId) -> Vec<u8> {
    prefixed(TX_PREFIX, id.as_bytes())
}

pub fn tx_value_key(id: &TxId) -> Vec<u8> {
    prefixed(TX_VALUE_PREFIX, id.as_bytes())
}

pub fn value_key(key: &ContentKey) -> Vec<u8> {
    prefixed(VALUE_PREFIX, key.as_bytes())
}

pub fn balance_key(address: &Address) -> Vec<u8> {
    prefixed(BALANCE_PREFIX, address.as_bytes())
}

/// The two-byte prefix shared by every value-metadata key.
pub fn value_prefix() -> [u8; 2] {
    [VALUE_PREFIX, DELIMITER]
}

/// Extracts the content key from a value-metadata key.
pub fn content_key_from_value_key(key: &[u8]) -> Option<ContentKey> {
    key.strip_prefix(&value_prefix())
        .and_then(|body| ContentKey::from_slice(body).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_partition_the_keyspace() {
        let id = BlockId::from([9u8; 32]);
        let keys = [
            block_key(&id),
            tx_key(&id),
            tx_value_key(&id),
            value_key(&ContentKey(id.0)),
        ];
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(k.len(), 34);
            assert_eq!(k[0] as usize, i);
            assert_eq!(k[1], DELIMITER);
        }
        assert_eq!(balance_key(&Address([1u8; 20])).len(), 22);
    }

    #[test]
    fn value_key_round_trips() {
        let key = ContentKey([0x42; 32]);
        assert_eq!(content_key_from_value_key(&value_key(&key)), Some(key));
        assert_eq!(content_key_from_value_key(&tx_key(&BlockId::zero())), None);
    }
}
