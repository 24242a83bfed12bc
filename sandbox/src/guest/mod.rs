//! The sandbox side of the boundary.
//!
//! Guest exports see only raw values: handle ids as `u64`, buffers as
//! `(ptr, len)` in linear memory, wide integers as `(lo, hi)` halves. Each
//! returns an [`AbiRet`]. A failure is parked in an external reference slot
//! and the return value marks it; the host takes it back out with
//! [`AbiRet::into_result`], so the error arrives with its message intact.

pub mod exports;
pub(crate) mod wallet;

use std::sync::Arc;

use webz_engine::{ProofGenerationKey, Proposal, SeedFingerprint, SpendingKey, ViewingKey, WalletSummary};
use webz_primitives::Pczt;

use crate::error::{Result, SandboxError};
use crate::registry::{HandleId, HandleTable, ResourceClass};
use crate::runtime::Sandbox;
use crate::transcode::join_u64;

pub(crate) use wallet::GuestWallet;

/// Return value of every guest export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[must_use]
pub struct AbiRet {
    /// Scalar result, handle id, or buffer pointer.
    pub value: u64,
    /// Buffer length, or the high half of a wide result.
    pub len: u32,
    /// External reference slot holding the error when `is_err`.
    pub err_slot: u32,
    pub is_err: bool,
}

impl AbiRet {
    pub fn unit() -> Self {
        Self::default()
    }

    pub fn value(value: u64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn buffer(ptr: u32, len: u32) -> Self {
        Self {
            value: u64::from(ptr),
            len,
            ..Self::default()
        }
    }

    pub fn handle(id: HandleId) -> Self {
        Self::value(id.raw())
    }

    /// A 64-bit result split into halves.
    pub fn wide(value: u64) -> Self {
        Self {
            value: u64::from(value as u32),
            len: (value >> 32) as u32,
            ..Self::default()
        }
    }

    /// Park `error` in an external reference slot.
    pub fn error(sandbox: &Sandbox, error: SandboxError) -> Self {
        Self {
            err_slot: sandbox.externrefs().insert(error),
            is_err: true,
            ..Self::default()
        }
    }

    /// Rebuild the host-side result, taking the error out of its slot.
    pub fn into_result(self, sandbox: &Sandbox) -> Result<AbiRet> {
        if !self.is_err {
            return Ok(self);
        }
        Err(sandbox
            .externrefs()
            .take::<SandboxError>(self.err_slot)
            .unwrap_or_else(|lost| lost))
    }

    pub fn ptr(&self) -> u32 {
        self.value as u32
    }

    pub fn handle_id(&self) -> HandleId {
        HandleId::from_raw(self.value)
    }

    pub fn as_wide(&self) -> u64 {
        join_u64(self.value as u32, self.len)
    }
}

/// Turn a guest-side `Result` into an [`AbiRet`].
pub(crate) fn bridge(sandbox: &Sandbox, result: Result<AbiRet>) -> AbiRet {
    result.unwrap_or_else(|error| AbiRet::error(sandbox, error))
}

/// Every object reachable through a handle.
pub(crate) struct Resources {
    pub wallets: HandleTable<Arc<GuestWallet>>,
    pub pczts: HandleTable<Pczt>,
    pub proposals: HandleTable<Proposal>,
    pub spending_keys: HandleTable<SpendingKey>,
    pub viewing_keys: HandleTable<ViewingKey>,
    pub seed_fingerprints: HandleTable<SeedFingerprint>,
    pub proof_keys: HandleTable<ProofGenerationKey>,
    pub summaries: HandleTable<WalletSummary>,
}

impl Resources {
    pub fn new() -> Self {
        Self {
            wallets: HandleTable::new(ResourceClass::Wallet),
            pczts: HandleTable::new(ResourceClass::Pczt),
            proposals: HandleTable::new(ResourceClass::Proposal),
            spending_keys: HandleTable::new(ResourceClass::UnifiedSpendingKey),
            viewing_keys: HandleTable::new(ResourceClass::UnifiedFullViewingKey),
            seed_fingerprints: HandleTable::new(ResourceClass::SeedFingerprint),
            proof_keys: HandleTable::new(ResourceClass::ProofGenerationKey),
            summaries: HandleTable::new(ResourceClass::WalletSummary),
        }
    }

    pub fn contains(&self, id: HandleId) -> bool {
        match id.class() {
            Some(ResourceClass::Wallet) => self.wallets.contains(id),
            Some(ResourceClass::Pczt) => self.pczts.contains(id),
            Some(ResourceClass::Proposal) => self.proposals.contains(id),
            Some(ResourceClass::UnifiedSpendingKey) => self.spending_keys.contains(id),
            Some(ResourceClass::UnifiedFullViewingKey) => self.viewing_keys.contains(id),
            Some(ResourceClass::SeedFingerprint) => self.seed_fingerprints.contains(id),
            Some(ResourceClass::ProofGenerationKey) => self.proof_keys.contains(id),
            Some(ResourceClass::WalletSummary) => self.summaries.contains(id),
            None => false,
        }
    }

    /// Drop the object behind `id`.
    pub fn free(&self, id: HandleId) -> Result<()> {
        match id.class() {
            Some(ResourceClass::Wallet) => self.wallets.take(id).map(drop),
            Some(ResourceClass::Pczt) => self.pczts.take(id).map(drop),
            Some(ResourceClass::Proposal) => self.proposals.take(id).map(drop),
            Some(ResourceClass::UnifiedSpendingKey) => self.spending_keys.take(id).map(drop),
            Some(ResourceClass::UnifiedFullViewingKey) => self.viewing_keys.take(id).map(drop),
            Some(ResourceClass::SeedFingerprint) => self.seed_fingerprints.take(id).map(drop),
            Some(ResourceClass::ProofGenerationKey) => self.proof_keys.take(id).map(drop),
            Some(ResourceClass::WalletSummary) => self.summaries.take(id).map(drop),
            None if id.is_null() => Err(SandboxError::lifecycle("cannot free a null handle")),
            None => Err(SandboxError::lifecycle(format!("{id} is not a handle"))),
        }
    }

    pub fn live_count(&self) -> usize {
        self.wallets.len()
            + self.pczts.len()
            + self.proposals.len()
            + self.spending_keys.len()
            + self.viewing_keys.len()
            + self.seed_fingerprints.len()
            + self.proof_keys.len()
            + self.summaries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;

    #[test]
    fn test_error_crosses_with_message() {
        let sb = Sandbox::new(SandboxConfig {
            initial_memory_pages: 1,
            ..SandboxConfig::default()
        })
        .unwrap();
        let ret = bridge(&sb, Err(SandboxError::Pool("no workers".into())));
        assert!(ret.is_err);
        assert_eq!(sb.externrefs().live_count(), 1);

        let err = ret.into_result(&sb).unwrap_err();
        assert_eq!(err.to_string(), "worker pool error: no workers");
        assert_eq!(sb.externrefs().live_count(), 0);
    }

    #[test]
    fn test_wide_value_halves() {
        let ret = AbiRet::wide(0x0000_0007_0000_0009);
        assert_eq!(ret.value, 9);
        assert_eq!(ret.len, 7);
        assert_eq!(ret.as_wide(), 0x0000_0007_0000_0009);
    }

    #[test]
    fn test_free_dispatches_by_class() {
        let resources = Resources::new();
        let id = resources.proof_keys.insert(
            SpendingKey::from_seed(webz_primitives::Network::Test, &[7u8; 32], 0)
                .unwrap()
                .proof_generation_key(),
        );
        assert!(resources.contains(id));
        assert_eq!(resources.live_count(), 1);
        resources.free(id).unwrap();
        assert!(!resources.contains(id));
        assert!(resources.free(id).is_err());
        assert!(resources.free(HandleId::NULL).is_err());
    }
}
