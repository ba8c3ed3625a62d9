// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Blobchain Protocol - Core Library
//!
//! A small chain whose only job is to store blobs under their own hash and
//! move a native balance around to pay for it. A `SetTx` writes a value
//! once, keyed by `keccak256(value)`; a `TransferTx` moves units between
//! addresses. Every transaction burns `fee_units * price` from its sender,
//! and a fee market prices block space from recent history.
//!
//! ## Architecture
//!
//! - **types** - fixed-size ids, content keys and addresses.
//! - **codec** - the canonical binary encoding. Ids are hashes of it.
//! - **crypto** - keccak256, BLAKE3 and Ed25519 signatures.
//! - **storage** - key-value contract, sled backend, copy-on-write diffs,
//!   and the typed accessors for values, balances and blocks.
//! - **chain** - transactions, fee market, block lifecycle and builder.
//! - **network** - mempool and transaction gossip.
//! - **vm** - the object a consensus host drives, plus the client API.
//! - **config** - protocol constants and node-local runtime settings.
//!
//! Consensus itself is out of scope: a host decides which blocks to accept
//! and tells the VM through [`vm::BlockHandle`].
//!
//! ## Ground rules
//!
//! 1. Nothing is durable until a block is accepted. Verification only ever
//!    writes to a diff.
//! 2. A stored value is never overwritten or deleted.
//! 3. Balance changes are checked; overflow and underflow are errors.

pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod network;
pub mod storage;
pub mod types;
pub mod vm;

pub use error::{ChainError, ChainResult};
