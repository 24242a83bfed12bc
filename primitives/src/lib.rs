//! `webz-primitives`: foundational types for the WebZ wallet sandbox.
//!
//! This crate provides the canonical types, error codes, address encoding,
//! cryptographic operations, PCZT data model, and serialization shared by
//! the wallet engine, the block source, and the sandbox host.

pub mod types;
pub mod error;
pub mod crypto;
pub mod address;
pub mod block;
pub mod pczt;
pub mod codec;

// Re-export commonly used types at the crate root for convenience.
pub use types::{
    AccountId, BlockHeight, Hash, Network, OutPoint, Pool, TxId, Zatoshis, ZERO_HASH,
};
pub use error::{ErrorCode, WalletError, WalletResult};
pub use address::Address;
pub use block::{CompactBlock, CompactTx, Output, Transaction};
pub use pczt::{Pczt, PcztOutput, Proof, ShieldedSpend, Signature, TransparentInput};
