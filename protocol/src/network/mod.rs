//! # Network Module
//!
//! Everything between a transaction leaving a client and landing in a
//! block: the pending pool and the peer-to-peer gossip that keeps every
//! node's pool roughly in sync.
//!
//! ## Architecture
//!
//! ```text
//! mempool.rs - bounded, price-ordered pool of pending transactions
//! gossip.rs  - batch wire format, outbound gossip/regossip, inbound admit
//! ```
//!
//! The transport itself lives behind [`gossip::AppSender`]; the protocol
//! crate never opens a socket.

pub mod gossip;
pub mod mempool;

pub use gossip::{decode_batch, encode_batch, AppSender, GossipError, Gossiper, NodeId};
pub use mempool::{Mempool, MempoolConfig, MempoolEntry, MempoolError};
