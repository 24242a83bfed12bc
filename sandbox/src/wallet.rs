//! The wallet facade.
//!
//! [`WebWallet`] owns one wallet handle in the sandbox. Every method
//! transcodes its arguments, awaits the matching guest export, and decodes
//! the result; there is no wallet logic on this side of the boundary.

use std::sync::Arc;

use webz_hostapi::BlockSource;

use crate::bindings::{
    self, network_index, same_sandbox, Pczt, ProofGenerationKey, Proposal, SeedFingerprint,
    UnifiedSpendingKey, WalletSummary,
};
use crate::config::WalletConfig;
use crate::error::{Result, SandboxError};
use crate::guest::exports;
use crate::registry::{HandleId, Owned, Resource, ResourceClass};
use crate::runtime::Sandbox;
use crate::transcode::{
    encode_optional_u32, pass_bytes, pass_handle_array, pass_optional_bytes, pass_string,
    split_u64, take_bytes, take_string,
};

#[doc(hidden)]
#[derive(Debug)]
pub enum WalletResource {}

impl Resource for WalletResource {
    const CLASS: ResourceClass = ResourceClass::Wallet;
}

/// A wallet living in the sandbox.
///
/// Calls may be issued concurrently from many tasks. Reads run in parallel;
/// mutating calls (account creation, sync, transaction creation, sending)
/// are serialized by the wallet.
#[derive(Debug)]
pub struct WebWallet {
    handle: Owned<WalletResource>,
    network: String,
}

impl WebWallet {
    /// Open a wallet that reads chain data from `source`.
    ///
    /// With `restore`, the wallet is rebuilt from bytes produced by
    /// [`db_to_bytes`](Self::db_to_bytes); the bytes must be for the same
    /// network as `config`.
    pub fn new(
        sandbox: &Arc<Sandbox>,
        config: WalletConfig,
        source: Arc<dyn BlockSource>,
        restore: Option<&[u8]>,
    ) -> Result<Self> {
        config.validate()?;
        let url = pass_string(sandbox, &config.service_url)?;
        let restore = pass_optional_bytes(sandbox, restore)?;
        let source_slot = sandbox.externrefs().insert(source);

        let ret = exports::webwallet_new(
            sandbox,
            network_index(&config.network),
            url.ptr(),
            url.len(),
            config.min_confirmations,
            config.scan_batch_size,
            restore.ptr(),
            restore.len(),
            source_slot,
        )
        .into_result(sandbox)?;

        Ok(Self {
            handle: Owned::wrap(sandbox, ret.handle_id())?,
            network: config.network,
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        self.handle.sandbox()
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle.id()
    }

    fn id(&self) -> u64 {
        self.handle.id().raw()
    }

    fn owns<R: Resource>(&self, owned: &Owned<R>) -> Result<()> {
        same_sandbox(self.sandbox(), owned.sandbox())
    }

    // ── Accounts ──

    /// Add an account derived from `seed_phrase` at `hd_index`.
    ///
    /// Without a birthday, scanning starts a little before the current tip.
    pub async fn create_account(
        &self,
        account_name: &str,
        seed_phrase: &str,
        hd_index: u32,
        birthday_height: Option<u32>,
    ) -> Result<u32> {
        let sb = self.sandbox();
        let name = pass_string(sb, account_name)?;
        let phrase = pass_string(sb, seed_phrase)?;
        let ret = exports::webwallet_create_account(
            sb,
            self.id(),
            name.ptr(),
            name.len(),
            phrase.ptr(),
            phrase.len(),
            hd_index,
            encode_optional_u32(birthday_height),
        )
        .await
        .into_result(sb)?;
        Ok(ret.value as u32)
    }

    /// Import a spending account by viewing key. Consumes `seed_fingerprint`.
    pub async fn create_account_ufvk(
        &self,
        account_name: &str,
        encoded_ufvk: &str,
        seed_fingerprint: SeedFingerprint,
        hd_index: u32,
        birthday_height: Option<u32>,
    ) -> Result<u32> {
        self.owns(&seed_fingerprint)?;
        let sb = self.sandbox();
        let name = pass_string(sb, account_name)?;
        let ufvk = pass_string(sb, encoded_ufvk)?;
        let fingerprint = seed_fingerprint.release();
        let ret = exports::webwallet_create_account_ufvk(
            sb,
            self.id(),
            name.ptr(),
            name.len(),
            ufvk.ptr(),
            ufvk.len(),
            fingerprint.raw(),
            hd_index,
            encode_optional_u32(birthday_height),
        )
        .await
        .into_result(sb)?;
        Ok(ret.value as u32)
    }

    /// Import a watch-only account.
    pub async fn create_account_view_ufvk(
        &self,
        account_name: &str,
        encoded_ufvk: &str,
        birthday_height: Option<u32>,
    ) -> Result<u32> {
        let sb = self.sandbox();
        let name = pass_string(sb, account_name)?;
        let ufvk = pass_string(sb, encoded_ufvk)?;
        let ret = exports::webwallet_create_account_view_ufvk(
            sb,
            self.id(),
            name.ptr(),
            name.len(),
            ufvk.ptr(),
            ufvk.len(),
            encode_optional_u32(birthday_height),
        )
        .await
        .into_result(sb)?;
        Ok(ret.value as u32)
    }

    // ── Sync and queries ──

    /// Scan the chain up to the current tip.
    pub async fn sync(&self) -> Result<()> {
        let sb = self.sandbox();
        exports::webwallet_sync(sb, self.id()).await.into_result(sb)?;
        Ok(())
    }

    /// Balances and sync progress, or `None` before the first sync.
    pub async fn get_wallet_summary(&self) -> Result<Option<WalletSummary>> {
        let sb = self.sandbox();
        let ret = exports::webwallet_get_wallet_summary(sb, self.id())
            .await
            .into_result(sb)?;
        match ret.handle_id() {
            id if id.is_null() => Ok(None),
            id => Owned::wrap(sb, id).map(Some),
        }
    }

    pub async fn get_current_address(&self, account_id: u32) -> Result<String> {
        self.current_address(account_id, false).await
    }

    pub async fn get_current_address_transparent(&self, account_id: u32) -> Result<String> {
        self.current_address(account_id, true).await
    }

    async fn current_address(&self, account_id: u32, transparent: bool) -> Result<String> {
        let sb = self.sandbox();
        let ret = exports::webwallet_get_current_address(sb, self.id(), account_id, transparent)
            .await
            .into_result(sb)?;
        take_string(sb, ret.ptr(), ret.len)
    }

    /// Height of the block source's chain tip.
    pub async fn get_latest_block(&self) -> Result<u32> {
        let sb = self.sandbox();
        let ret = exports::webwallet_get_latest_block(sb, self.id())
            .await
            .into_result(sb)?;
        Ok(ret.value as u32)
    }

    /// Serialize the wallet database.
    pub async fn db_to_bytes(&self) -> Result<Vec<u8>> {
        let sb = self.sandbox();
        let ret = exports::webwallet_db_to_bytes(sb, self.id()).await.into_result(sb)?;
        take_bytes(sb, ret.ptr(), ret.len)
    }

    // ── Transfers ──

    pub async fn propose_transfer(
        &self,
        account_id: u32,
        to_address: &str,
        value: u64,
    ) -> Result<Proposal> {
        let sb = self.sandbox();
        let to = pass_string(sb, to_address)?;
        let (lo, hi) = split_u64(value);
        let ret = exports::webwallet_propose_transfer(sb, self.id(), account_id, to.ptr(), to.len(), lo, hi)
            .await
            .into_result(sb)?;
        Owned::wrap(sb, ret.handle_id())
    }

    /// Sign, prove, and store the transactions in `proposal`, consuming it.
    /// Returns the concatenated 32-byte txids.
    pub async fn create_proposed_transactions(
        &self,
        proposal: Proposal,
        seed_phrase: &str,
        account_hd_index: u32,
    ) -> Result<Vec<u8>> {
        self.owns(&proposal)?;
        let sb = self.sandbox();
        let phrase = pass_string(sb, seed_phrase)?;
        let proposal = proposal.release();
        let ret = exports::webwallet_create_proposed_transactions(
            sb,
            self.id(),
            proposal.raw(),
            phrase.ptr(),
            phrase.len(),
            account_hd_index,
        )
        .await
        .into_result(sb)?;
        take_bytes(sb, ret.ptr(), ret.len)
    }

    /// Broadcast transactions by txid. `txids` is a concatenation of 32-byte
    /// ids as returned by
    /// [`create_proposed_transactions`](Self::create_proposed_transactions).
    pub async fn send_authorized_transactions(&self, txids: &[u8]) -> Result<()> {
        let sb = self.sandbox();
        let buf = pass_bytes(sb, txids)?;
        exports::webwallet_send_authorized_transactions(sb, self.id(), buf.ptr(), buf.len())
            .await
            .into_result(sb)?;
        Ok(())
    }

    // ── PCZT ──

    /// Create an unsigned, unproved PCZT paying `value` to `to_address`.
    pub async fn pczt_create(&self, account_id: u32, to_address: &str, value: u64) -> Result<Pczt> {
        let sb = self.sandbox();
        let to = pass_string(sb, to_address)?;
        let (lo, hi) = split_u64(value);
        let ret = exports::webwallet_pczt_create(sb, self.id(), account_id, to.ptr(), to.len(), lo, hi)
            .await
            .into_result(sb)?;
        Owned::wrap(sb, ret.handle_id())
    }

    /// Create a PCZT moving the account's transparent funds into the
    /// shielded pool.
    pub async fn pczt_shield(&self, account_id: u32) -> Result<Pczt> {
        let sb = self.sandbox();
        let ret = exports::webwallet_pczt_shield(sb, self.id(), account_id)
            .await
            .into_result(sb)?;
        Owned::wrap(sb, ret.handle_id())
    }

    /// Sign on this wallet's network. See [`bindings::pczt_sign`].
    pub async fn pczt_sign(
        &self,
        pczt: Pczt,
        usk: UnifiedSpendingKey,
        seed_fp: SeedFingerprint,
    ) -> Result<Pczt> {
        self.owns(&pczt)?;
        bindings::pczt_sign(&self.network, pczt, usk, seed_fp).await
    }

    /// Add proofs, consuming `pczt` and `sapling_proof_gen_key`.
    pub async fn pczt_prove(
        &self,
        pczt: Pczt,
        sapling_proof_gen_key: Option<ProofGenerationKey>,
    ) -> Result<Pczt> {
        self.owns(&pczt)?;
        if let Some(pgk) = &sapling_proof_gen_key {
            self.owns(pgk)?;
        }
        let sb = self.sandbox();
        let pczt = pczt.release();
        let pgk = sapling_proof_gen_key.map_or(HandleId::NULL, Owned::release);
        let ret = exports::webwallet_pczt_prove(sb, self.id(), pczt.raw(), pgk.raw())
            .await
            .into_result(sb)?;
        Owned::wrap(sb, ret.handle_id())
    }

    /// Merge PCZTs that describe the same transaction, consuming them all.
    pub fn pczt_combine(&self, pczts: Vec<Pczt>) -> Result<Pczt> {
        if pczts.is_empty() {
            return Err(SandboxError::marshal("no PCZTs to combine"));
        }
        for pczt in &pczts {
            self.owns(pczt)?;
        }
        let sb = self.sandbox();
        let ids: Vec<HandleId> = pczts.into_iter().map(Owned::release).collect();
        let array = pass_handle_array(sb, &ids)?;
        let ret = exports::webwallet_pczt_combine(sb, self.id(), array.ptr(), array.len())
            .into_result(sb)?;
        Owned::wrap(sb, ret.handle_id())
    }

    /// Extract and broadcast a fully authorized PCZT, consuming it.
    pub async fn pczt_send(&self, pczt: Pczt) -> Result<()> {
        self.owns(&pczt)?;
        let sb = self.sandbox();
        let pczt = pczt.release();
        exports::webwallet_pczt_send(sb, self.id(), pczt.raw())
            .await
            .into_result(sb)?;
        Ok(())
    }
}
