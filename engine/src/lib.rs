//! `webz-engine`: the wallet logic that runs inside the sandbox.
//!
//! Everything here is synchronous and deterministic given its inputs (seed
//! generation aside). Networking, locking, and thread placement belong to
//! the sandbox host; this crate only computes.
//!
//! ## Architecture
//!
//! - [`keys`]: seed phrases, spending/viewing/proof-generation keys
//! - [`scan`]: per-block trial decryption, safe to run in parallel
//! - [`wallet::WalletDb`]: accounts, notes, UTXOs, scan progress, summaries
//! - [`proposal`]: note selection and conventional fees
//! - [`pczt`]: create, sign, prove, combine, and extract PCZTs
//! - [`storage`]: the persisted database format

pub mod keys;
pub mod scan;
pub mod wallet;
pub mod proposal;
pub mod pczt;
pub mod storage;

// Re-export key types for convenience
pub use keys::{ProofGenerationKey, SeedFingerprint, SpendingKey, ViewingKey};
pub use proposal::Proposal;
pub use scan::{scan_block, ScanKey, ScannedBlock};
pub use wallet::{AccountBalance, AccountPurpose, WalletDb, WalletSummary};
