//! # Signed Transactions
//!
//! A [`Transaction`] is an [`UnsignedTransaction`] plus a signature
//! envelope. Everything else on the struct is derived by [`Transaction::init`]
//! and never serialized:
//!
//! | Field    | Derivation                                   |
//! |----------|----------------------------------------------|
//! | `bytes`  | canonical encoding of `(unsigned, signature)`|
//! | `id`     | `blake3(bytes)`                              |
//! | `digest` | `keccak256(encode(unsigned))`                |
//! | `sender` | address recovered from `(digest, signature)` |
//!
//! A transaction off the wire is useless until `init` succeeds; the
//! constructors that return one to callers always run it.

use serde::{Deserialize, Serialize};

use super::activity::Activity;
use super::fees::ExecutionContext;
use super::genesis::Genesis;
use super::unsigned::{TxContext, UnsignedTransaction};
use crate::codec;
use crate::crypto::{blake3_hash, Keypair, Signature};
use crate::error::{ChainError, ChainResult};
use crate::storage::state::{self, BalanceChange};
use crate::storage::Database;
use crate::types::{Address, TxId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    unsigned: UnsignedTransaction,
    signature: Signature,

    #[serde(skip)]
    id: TxId,
    #[serde(skip)]
    sender: Address,
    #[serde(skip)]
    bytes: Vec<u8>,
    #[serde(skip)]
    digest: [u8; 32],
}

impl Transaction {
    /// Wraps and initializes. Fails if the signature does not verify.
    pub fn new(unsigned: UnsignedTransaction, signature: Signature) -> ChainResult<Self> {
        let mut tx = Self::raw(unsigned, signature);
        tx.init()?;
        Ok(tx)
    }

    /// Wraps without deriving anything. Only storage uses this, to build
    /// the linked form of a block body.
    pub(crate) fn raw(unsigned: UnsignedTransaction, signature: Signature) -> Self {
        Self {
            unsigned,
            signature,
            id: TxId::zero(),
            sender: Address::zero(),
            bytes: Vec::new(),
            digest: [0u8; 32],
        }
    }

    /// Signs `unsigned` with `keypair`.
    pub fn sign(unsigned: UnsignedTransaction, keypair: &Keypair) -> ChainResult<Self> {
        let digest = unsigned.digest()?;
        let signature = keypair.sign_digest(&digest);
        Self::new(unsigned, signature)
    }

    /// Decodes canonical bytes and initializes.
    pub fn decode(bytes: &[u8]) -> ChainResult<Self> {
        let mut tx: Self = codec::decode(bytes)?;
        tx.init()?;
        Ok(tx)
    }

    /// Derives bytes, id, digest and sender.
    pub fn init(&mut self) -> ChainResult<()> {
        self.bytes = codec::encode(self)?;
        self.id = TxId::from(blake3_hash(&self.bytes));
        self.digest = self.unsigned.digest()?;
        self.sender = self.signature.recover(&self.digest)?;
        Ok(())
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn unsigned(&self) -> &UnsignedTransaction {
        &self.unsigned
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn price(&self) -> u64 {
        self.unsigned.price()
    }

    pub fn fee_units(&self, g: &Genesis) -> u64 {
        self.unsigned.fee_units(g)
    }

    /// Runs the full pipeline against `db`:
    ///
    /// 1. magic matches genesis
    /// 2. `block_id` is inside the lookback window
    /// 3. not executed inside the window or durably before
    /// 4. fee (`units * price`) burned from the sender
    /// 5. price covers the block price
    /// 6. variant execution
    /// 7. executed marker written
    ///
    /// On error `db` may hold partial writes; callers run this on a diff
    /// they are prepared to throw away.
    pub fn execute(
        &self,
        g: &Genesis,
        db: &dyn Database,
        block_time: u64,
        ctx: &ExecutionContext,
    ) -> ChainResult<()> {
        let magic = self.unsigned.magic();
        if magic != g.magic {
            return Err(ChainError::MagicMismatch {
                expected: g.magic,
                got: magic,
            });
        }

        let block_id = self.unsigned.block_id();
        if !ctx.recent_block_ids.contains(&block_id) {
            return Err(ChainError::InvalidBlockId(block_id));
        }

        if ctx.recent_tx_ids.contains(&self.id) || state::has_transaction(db, &self.id)? {
            return Err(ChainError::DuplicateTx(self.id));
        }

        let units = self.fee_units(g);
        let price = self.price();
        // A saturated fee can never be paid, so the debit rejects it.
        let fee = units.saturating_mul(price);
        state::modify_balance(db, &self.sender, BalanceChange::Debit(fee))?;

        if price < ctx.next_price {
            return Err(ChainError::InsufficientPrice {
                required: ctx.next_price,
                offered: price,
            });
        }

        self.unsigned.execute(&TxContext {
            genesis: g,
            db,
            block_time,
            tx_id: self.id,
            sender: self.sender,
        })?;

        state::set_transaction(db, &self.id)
    }

    pub fn activity(&self, timestamp: u64) -> Activity {
        self.unsigned.activity(timestamp, self.sender, self.id)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}
