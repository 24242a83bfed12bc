//! Core type aliases and constants for the WebZ wallet layer.
//!
//! These types are shared by the wallet engine, the block source, and the
//! sandbox host.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, WalletError};

/// 32-byte hash used for block hashes, txids, commitments, and nullifiers.
pub type Hash = [u8; 32];

/// Transaction identifier (BLAKE3 of the raw transaction encoding).
pub type TxId = [u8; 32];

/// Block height (monotonically increasing).
pub type BlockHeight = u32;

/// Sequential account identifier assigned by the wallet.
pub type AccountId = u32;

/// Amount in zatoshis (1 ZEC = 10^8 zatoshis).
pub type Zatoshis = u64;

/// A zero-valued hash (32 zero bytes).
pub const ZERO_HASH: Hash = [0u8; 32];

/// Zatoshis per coin.
pub const COIN: Zatoshis = 100_000_000;

/// Largest representable amount.
pub const MAX_MONEY: Zatoshis = 21_000_000 * COIN;

/// Marginal fee per logical action.
pub const MARGINAL_FEE: Zatoshis = 5_000;

/// Actions charged for even when a transaction has fewer.
pub const GRACE_ACTIONS: usize = 2;

/// Blocks between a transaction's target height and its expiry.
pub const DEFAULT_EXPIRY_DELTA: BlockHeight = 40;

/// Note commitments per note-commitment-tree subtree.
pub const SUBTREE_SIZE: u64 = 1 << 16;

/// Version byte of the persisted wallet database format.
pub const DB_FORMAT_VERSION: u8 = 1;

/// Version byte of the serialized PCZT format.
pub const PCZT_FORMAT_VERSION: u8 = 1;

/// Consensus network a wallet operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
}

impl Network {
    /// The wire name accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Test => "test",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Main => 0,
            Self::Test => 1,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Main),
            1 => Some(Self::Test),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "test" => Ok(Self::Test),
            other => Err(WalletError::new(
                ErrorCode::InvalidNetwork,
                format!("invalid network: {other:?}, expected \"main\" or \"test\""),
            )),
        }
    }
}

/// Value pool a note or output belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Transparent,
    Sapling,
    Orchard,
}

impl Pool {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Transparent => 0,
            Self::Sapling => 1,
            Self::Orchard => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Transparent),
            1 => Some(Self::Sapling),
            2 => Some(Self::Orchard),
            _ => None,
        }
    }

    /// Shielded pools carry notes with nullifiers; the transparent pool
    /// carries outpoints.
    pub fn is_shielded(self) -> bool {
        !matches!(self, Self::Transparent)
    }
}

/// Reference to a transparent output: the creating transaction and the
/// output's index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: u32,
}

/// Convert a `Hash` to a hex string for display purposes.
pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Copy the first 32 bytes of `bytes` into a `Hash`.
pub fn hash_from_slice(bytes: &[u8]) -> Option<Hash> {
    bytes.get(..32)?.try_into().ok()
}
