//! Host-side types for sandbox resources.
//!
//! Each resource class has exactly one owning wrapper type, an alias of
//! [`Owned`]. Methods here transcode their arguments into linear memory,
//! call the matching guest export, rebuild its result, and free every
//! transient buffer before returning.
//!
//! Methods that take a wrapper by value consume it: the wrapper is released
//! before the guest call, so the handle can never be used again from the
//! host, and the guest takes the object out of its table.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Result, SandboxError};
use crate::guest::exports;
use crate::registry::{Owned, Resource, ResourceClass};
use crate::runtime::Sandbox;
use crate::transcode::{enum_to_index, pass_bytes, pass_string, take_bytes, take_string, NETWORK_VARIANTS};

macro_rules! resource {
    ($(#[$doc:meta])* $marker:ident => $alias:ident, $class:ident) => {
        #[doc(hidden)]
        #[derive(Debug)]
        pub enum $marker {}

        impl Resource for $marker {
            const CLASS: ResourceClass = ResourceClass::$class;
        }

        $(#[$doc])*
        pub type $alias = Owned<$marker>;
    };
}

resource!(
    /// A partially created transaction.
    PcztResource => Pczt, Pczt
);
resource!(
    /// A planned transfer awaiting authorization.
    ProposalResource => Proposal, Proposal
);
resource!(UnifiedSpendingKeyResource => UnifiedSpendingKey, UnifiedSpendingKey);
resource!(UnifiedFullViewingKeyResource => UnifiedFullViewingKey, UnifiedFullViewingKey);
resource!(SeedFingerprintResource => SeedFingerprint, SeedFingerprint);
resource!(
    /// Key material needed to prove Sapling spends.
    ProofGenerationKeyResource => ProofGenerationKey, ProofGenerationKey
);
resource!(
    /// Point-in-time balances and sync progress.
    WalletSummaryResource => WalletSummary, WalletSummary
);

pub(crate) fn network_index(network: &str) -> u32 {
    enum_to_index(NETWORK_VARIANTS, network)
}

/// Fail unless two handles live in the same sandbox.
pub(crate) fn same_sandbox(a: &Arc<Sandbox>, b: &Arc<Sandbox>) -> Result<()> {
    if !Arc::ptr_eq(a, b) {
        return Err(SandboxError::lifecycle(
            "handles from different sandboxes cannot be combined in one call",
        ));
    }
    Ok(())
}

/// Generate a fresh 24-word seed phrase.
///
/// Entropy comes from the OS generator; treat phrases generated this way as
/// unsuitable for production funds.
pub fn generate_seed_phrase(sandbox: &Arc<Sandbox>) -> Result<String> {
    let ret = exports::generate_seed_phrase(sandbox).into_result(sandbox)?;
    take_string(sandbox, ret.ptr(), ret.len)
}

/// Start `threads` worker contexts and wait until all of them are attached.
pub async fn init_thread_pool(sandbox: &Arc<Sandbox>, threads: usize) -> Result<()> {
    sandbox.init_thread_pool(threads).await
}

/// Sign `pczt` with `usk`, consuming all three handles.
pub async fn pczt_sign(
    network: &str,
    pczt: Pczt,
    usk: UnifiedSpendingKey,
    seed_fp: SeedFingerprint,
) -> Result<Pczt> {
    let sandbox = Arc::clone(pczt.sandbox());
    same_sandbox(&sandbox, usk.sandbox())?;
    same_sandbox(&sandbox, seed_fp.sandbox())?;

    let (pczt, usk, seed_fp) = (pczt.release(), usk.release(), seed_fp.release());
    let ret = exports::pczt_sign(
        &sandbox,
        network_index(network),
        pczt.raw(),
        usk.raw(),
        seed_fp.raw(),
    )
    .await
    .into_result(&sandbox)?;
    tracing::debug!(pczt = %pczt, signed = %ret.handle_id(), "PCZT signed");
    Owned::wrap(&sandbox, ret.handle_id())
}

impl Owned<PcztResource> {
    /// The binary encoding of this PCZT.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let sb = self.sandbox();
        let ret = exports::pczt_serialize(sb, self.id().raw()).into_result(sb)?;
        take_bytes(sb, ret.ptr(), ret.len)
    }

    pub fn from_bytes(sandbox: &Arc<Sandbox>, bytes: &[u8]) -> Result<Pczt> {
        let buf = pass_bytes(sandbox, bytes)?;
        let ret = exports::pczt_from_bytes(sandbox, buf.ptr(), buf.len()).into_result(sandbox)?;
        Owned::wrap(sandbox, ret.handle_id())
    }

    pub fn to_json(&self) -> Result<String> {
        let sb = self.sandbox();
        let ret = exports::pczt_to_json(sb, self.id().raw()).into_result(sb)?;
        take_string(sb, ret.ptr(), ret.len)
    }

    pub fn from_json(sandbox: &Arc<Sandbox>, json: &str) -> Result<Pczt> {
        let buf = pass_string(sandbox, json)?;
        let ret = exports::pczt_from_json(sandbox, buf.ptr(), buf.len()).into_result(sandbox)?;
        Owned::wrap(sandbox, ret.handle_id())
    }
}

impl Owned<ProposalResource> {
    pub fn to_json(&self) -> Result<String> {
        let sb = self.sandbox();
        let ret = exports::proposal_to_json(sb, self.id().raw()).into_result(sb)?;
        take_string(sb, ret.ptr(), ret.len)
    }

    /// Fee the proposed transaction pays, in zatoshis.
    pub fn fee(&self) -> Result<u64> {
        let sb = self.sandbox();
        Ok(exports::proposal_fee(sb, self.id().raw()).into_result(sb)?.as_wide())
    }
}

impl Owned<UnifiedSpendingKeyResource> {
    /// Derive the spending key at `hd_index` from raw seed bytes (at least
    /// 32 of them).
    pub fn new(sandbox: &Arc<Sandbox>, network: &str, seed: &[u8], hd_index: u32) -> Result<Self> {
        let buf = pass_bytes(sandbox, seed)?;
        let ret = exports::usk_new(sandbox, network_index(network), buf.ptr(), buf.len(), hd_index)
            .into_result(sandbox)?;
        Owned::wrap(sandbox, ret.handle_id())
    }

    pub fn to_unified_full_viewing_key(&self) -> Result<UnifiedFullViewingKey> {
        let sb = self.sandbox();
        let ret = exports::usk_to_ufvk(sb, self.id().raw()).into_result(sb)?;
        Owned::wrap(sb, ret.handle_id())
    }

    pub fn to_sapling_proof_generation_key(&self) -> Result<ProofGenerationKey> {
        let sb = self.sandbox();
        let ret = exports::usk_to_proof_generation_key(sb, self.id().raw()).into_result(sb)?;
        Owned::wrap(sb, ret.handle_id())
    }
}

impl Owned<UnifiedFullViewingKeyResource> {
    /// Parse an encoded viewing key.
    pub fn new(sandbox: &Arc<Sandbox>, network: &str, encoding: &str) -> Result<Self> {
        let buf = pass_string(sandbox, encoding)?;
        let ret = exports::ufvk_new(sandbox, network_index(network), buf.ptr(), buf.len())
            .into_result(sandbox)?;
        Owned::wrap(sandbox, ret.handle_id())
    }

    pub fn encode(&self, network: &str) -> Result<String> {
        let sb = self.sandbox();
        let ret = exports::ufvk_encode(sb, self.id().raw(), network_index(network)).into_result(sb)?;
        take_string(sb, ret.ptr(), ret.len)
    }
}

impl Owned<SeedFingerprintResource> {
    pub fn new(sandbox: &Arc<Sandbox>, seed: &[u8]) -> Result<Self> {
        let buf = pass_bytes(sandbox, seed)?;
        let ret = exports::seed_fingerprint_new(sandbox, buf.ptr(), buf.len()).into_result(sandbox)?;
        Owned::wrap(sandbox, ret.handle_id())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let sb = self.sandbox();
        let ret = exports::seed_fingerprint_to_bytes(sb, self.id().raw()).into_result(sb)?;
        take_bytes(sb, ret.ptr(), ret.len)
    }

    pub fn from_bytes(sandbox: &Arc<Sandbox>, bytes: &[u8]) -> Result<Self> {
        let buf = pass_bytes(sandbox, bytes)?;
        let ret =
            exports::seed_fingerprint_from_bytes(sandbox, buf.ptr(), buf.len()).into_result(sandbox)?;
        Owned::wrap(sandbox, ret.handle_id())
    }
}

/// Spendable balance of one account, by pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AccountBalance {
    pub sapling_balance: u64,
    pub orchard_balance: u64,
    pub unshielded_balance: u64,
}

impl AccountBalance {
    pub fn total(&self) -> u64 {
        self.sapling_balance + self.orchard_balance + self.unshielded_balance
    }
}

impl Owned<WalletSummaryResource> {
    pub fn chain_tip_height(&self) -> Result<u32> {
        let sb = self.sandbox();
        let ret = exports::summary_chain_tip_height(sb, self.id().raw()).into_result(sb)?;
        Ok(ret.value as u32)
    }

    pub fn fully_scanned_height(&self) -> Result<u32> {
        let sb = self.sandbox();
        let ret = exports::summary_fully_scanned_height(sb, self.id().raw()).into_result(sb)?;
        Ok(ret.value as u32)
    }

    pub fn next_sapling_subtree_index(&self) -> Result<u64> {
        let sb = self.sandbox();
        Ok(exports::summary_next_sapling_subtree_index(sb, self.id().raw())
            .into_result(sb)?
            .as_wide())
    }

    pub fn next_orchard_subtree_index(&self) -> Result<u64> {
        let sb = self.sandbox();
        Ok(exports::summary_next_orchard_subtree_index(sb, self.id().raw())
            .into_result(sb)?
            .as_wide())
    }

    pub fn account_balances(&self) -> Result<BTreeMap<u32, AccountBalance>> {
        let sb = self.sandbox();
        let ret = exports::summary_account_balances(sb, self.id().raw()).into_result(sb)?;
        let json = take_bytes(sb, ret.ptr(), ret.len)?;
        serde_json::from_slice(&json)
            .map_err(|e| SandboxError::marshal(format!("invalid account balances: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        let sb = self.sandbox();
        let ret = exports::summary_to_json(sb, self.id().raw()).into_result(sb)?;
        take_string(sb, ret.ptr(), ret.len)
    }
}
