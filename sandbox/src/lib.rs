//! `webz-sandbox`: the boundary between host code and the wallet sandbox.
//!
//! All wallet logic lives behind a shared linear memory. Host calls cross
//! that boundary through a small set of mechanisms:
//!
//! - **Value transcoding:** strings, byte buffers, wide integers, optional
//!   integers, and string-table enums are copied into and out of linear
//!   memory ([`transcode`])
//! - **Handles:** sandbox objects are referenced by generation-checked ids,
//!   each held by exactly one owning wrapper ([`registry`])
//! - **External references:** host values the sandbox holds without copying,
//!   such as errors and handle arrays ([`externref`])
//! - **Error bridge:** every guest export returns an [`AbiRet`]; failures
//!   travel through an external reference slot and are rebuilt on the host
//! - **Worker pool:** [`init_thread_pool`] attaches worker contexts to the
//!   shared memory and waits on an atomic readiness cell ([`pool`])
//!
//! The primary entry point is [`WebWallet`].

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod alloc;
pub mod externref;
pub mod registry;
pub mod transcode;
pub mod pool;
pub mod runtime;
pub mod guest;
pub mod bindings;
pub mod wallet;

pub use bindings::{
    generate_seed_phrase, init_thread_pool, pczt_sign, AccountBalance, Pczt, ProofGenerationKey, Proposal,
    SeedFingerprint, UnifiedFullViewingKey, UnifiedSpendingKey, WalletSummary,
};
pub use config::{SandboxConfig, WalletConfig};
pub use error::{Result, SandboxError};
pub use guest::AbiRet;
pub use registry::{HandleId, Owned, Resource, ResourceClass};
pub use runtime::Sandbox;
pub use wallet::WebWallet;
