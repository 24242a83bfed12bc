//! Wallet state held inside the sandbox.
//!
//! One `WalletDb` per wallet handle, behind an async read/write lock.
//! Mutations (account creation, sync, transaction creation and
//! submission) hold the write lock for their whole duration, so a reader
//! observes the state from before or after a mutation, never between.

use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::sync::RwLock;

use webz_engine::pczt::{combine_pczts, create_pczt, extract_transaction, prove_pczt, sign_pczt, ProofJob};
use webz_engine::proposal::{propose_shielding, propose_transfer};
use webz_engine::wallet::BIRTHDAY_LOOKBACK;
use webz_engine::{
    keys, scan_block, AccountPurpose, ProofGenerationKey, Proposal, SeedFingerprint,
    SpendingKey, ViewingKey, WalletDb, WalletSummary,
};
use webz_hostapi::{BlockSource, NetworkError};
use webz_primitives::{
    AccountId, BlockHeight, ErrorCode, Network, Pczt, TxId, WalletError, Zatoshis,
};

use crate::error::{Result, SandboxError};
use crate::runtime::Sandbox;

fn join_error(e: tokio::task::JoinError) -> SandboxError {
    SandboxError::Pool(format!("background task failed: {e}"))
}

/// Add proofs to `pczt` on the worker pool.
pub(crate) async fn prove(
    sandbox: &Arc<Sandbox>,
    pczt: Pczt,
    pgk: Option<ProofGenerationKey>,
) -> Result<Pczt> {
    let sandbox = Arc::clone(sandbox);
    let proved = tokio::task::spawn_blocking(move || {
        prove_pczt(pczt, pgk.as_ref(), |jobs| sandbox.par_map(jobs, ProofJob::prove))
    })
    .await
    .map_err(join_error)??;
    tracing::debug!(target_height = proved.target_height, "PCZT proved");
    Ok(proved)
}

/// Sign `pczt` off the calling task.
pub(crate) async fn sign(pczt: Pczt, usk: SpendingKey, fingerprint: SeedFingerprint) -> Result<Pczt> {
    let signed = tokio::task::spawn_blocking(move || sign_pczt(pczt, &usk, &fingerprint))
        .await
        .map_err(join_error)??;
    Ok(signed)
}

pub(crate) fn combine(pczts: Vec<Pczt>) -> Result<Pczt> {
    let count = pczts.len();
    let combined = combine_pczts(pczts)?;
    tracing::debug!(count, "PCZTs combined");
    Ok(combined)
}

pub(crate) struct GuestWallet {
    network: Network,
    min_confirmations: NonZeroU32,
    scan_batch_size: u32,
    service_url: String,
    db: RwLock<WalletDb>,
    source: Arc<dyn BlockSource>,
}

impl GuestWallet {
    pub fn new(
        db: WalletDb,
        service_url: String,
        min_confirmations: NonZeroU32,
        scan_batch_size: u32,
        source: Arc<dyn BlockSource>,
    ) -> Self {
        Self {
            network: db.network(),
            min_confirmations,
            scan_batch_size: scan_batch_size.max(1),
            service_url,
            db: RwLock::new(db),
            source,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    async fn birthday_or_default(&self, birthday: Option<BlockHeight>) -> Result<BlockHeight> {
        match birthday {
            Some(height) => Ok(height),
            None => {
                let tip = self.source.get_latest_block().await?;
                Ok(tip.saturating_sub(BIRTHDAY_LOOKBACK).max(1))
            }
        }
    }

    // ── Accounts ──

    pub async fn create_account(
        &self,
        name: &str,
        seed_phrase: &str,
        hd_index: u32,
        birthday: Option<BlockHeight>,
    ) -> Result<AccountId> {
        let seed = keys::seed_from_phrase(seed_phrase)?;
        let birthday = self.birthday_or_default(birthday).await?;
        let mut db = self.db.write().await;
        let (id, _usk) = db.create_account(name, &seed, hd_index, birthday)?;
        Ok(id)
    }

    pub async fn create_account_ufvk(
        &self,
        name: &str,
        encoded_ufvk: &str,
        fingerprint: SeedFingerprint,
        hd_index: u32,
        birthday: Option<BlockHeight>,
    ) -> Result<AccountId> {
        let ufvk = ViewingKey::decode(self.network, encoded_ufvk)?;
        let birthday = self.birthday_or_default(birthday).await?;
        let mut db = self.db.write().await;
        Ok(db.import_account(
            name,
            ufvk,
            AccountPurpose::Spending,
            Some(fingerprint),
            Some(hd_index),
            birthday,
        )?)
    }

    pub async fn create_account_view_ufvk(
        &self,
        name: &str,
        encoded_ufvk: &str,
        birthday: Option<BlockHeight>,
    ) -> Result<AccountId> {
        let ufvk = ViewingKey::decode(self.network, encoded_ufvk)?;
        let birthday = self.birthday_or_default(birthday).await?;
        let mut db = self.db.write().await;
        Ok(db.import_account(name, ufvk, AccountPurpose::ViewOnly, None, None, birthday)?)
    }

    // ── Sync ──

    /// Scan from the wallet's scan position up to the current chain tip.
    ///
    /// Blocks are fetched in batches and trial-decrypted on the worker pool.
    pub async fn sync(&self, sandbox: &Arc<Sandbox>) -> Result<()> {
        let mut db = self.db.write().await;
        let tip = self.source.get_latest_block().await?;
        db.set_chain_tip(tip);

        let mut scanned = 0u64;
        while let Some(start) = db.scan_start().filter(|&start| start <= tip) {
            let end = start.saturating_add(self.scan_batch_size - 1).min(tip);
            let blocks = self.source.get_block_range(start, end).await?;
            if blocks.is_empty() {
                return Err(NetworkError::InvalidResponse(format!(
                    "no blocks returned for {start}..={end}"
                ))
                .into());
            }
            if let Some(stray) = blocks.iter().find(|b| !(start..=end).contains(&b.height)) {
                return Err(NetworkError::InvalidResponse(format!(
                    "block {} is outside the requested range {start}..={end}",
                    stray.height
                ))
                .into());
            }

            let keys = db.scan_keys();
            let worker = Arc::clone(sandbox);
            let results = tokio::task::spawn_blocking(move || {
                worker.par_map(&blocks, |block| scan_block(block, &keys))
            })
            .await
            .map_err(join_error)?;

            scanned += results.len() as u64;
            db.apply_scanned(results)?;
            if db.scan_start().is_some_and(|next| next <= start) {
                return Err(NetworkError::InvalidResponse(format!(
                    "blocks returned for {start}..={end} did not advance the scan"
                ))
                .into());
            }
            tracing::debug!(from = start, to = end, "scanned block range");
        }

        tracing::info!(
            tip,
            blocks = scanned,
            service = %self.service_url,
            "wallet synced"
        );
        Ok(())
    }

    // ── Queries ──

    pub async fn summary(&self) -> Option<WalletSummary> {
        self.db.read().await.summary(self.min_confirmations)
    }

    pub async fn to_bytes(&self) -> Vec<u8> {
        self.db.read().await.to_bytes()
    }

    pub async fn current_address(&self, account: AccountId, transparent: bool) -> Result<String> {
        let db = self.db.read().await;
        let ufvk = &db.account(account)?.viewing_key;
        let address = if transparent {
            ufvk.transparent_address()
        } else {
            ufvk.unified_address()
        };
        Ok(address.encode(self.network))
    }

    pub async fn latest_block(&self) -> Result<BlockHeight> {
        Ok(self.source.get_latest_block().await?)
    }

    // ── Proposals and transactions ──

    pub async fn propose_transfer(
        &self,
        account: AccountId,
        to: &str,
        amount: Zatoshis,
    ) -> Result<Proposal> {
        let db = self.db.read().await;
        let proposal = propose_transfer(&db, account, to, amount, self.min_confirmations)?;
        tracing::info!(account, amount, fee = proposal.fee, "transfer proposed");
        Ok(proposal)
    }

    /// Sign, prove, and store the transactions `proposal` describes.
    /// Returns their txids.
    pub async fn create_proposed_transactions(
        &self,
        sandbox: &Arc<Sandbox>,
        proposal: Proposal,
        seed_phrase: &str,
        hd_index: u32,
    ) -> Result<Vec<TxId>> {
        let seed = keys::seed_from_phrase(seed_phrase)?;
        let usk = SpendingKey::from_seed(self.network, &seed, hd_index)?;
        let fingerprint = usk.seed_fingerprint();
        let pgk = usk.proof_generation_key();

        let mut db = self.db.write().await;
        let account = db.account(proposal.account)?;
        if account.seed_fingerprint != Some(fingerprint) || account.hd_index != Some(hd_index) {
            return Err(WalletError::new(
                ErrorCode::InvalidKey,
                format!(
                    "seed phrase and hd index {hd_index} do not derive account {}",
                    proposal.account
                ),
            )
            .into());
        }

        let pczt = create_pczt(&db, &proposal)?;
        let signed = sign(pczt, usk, fingerprint).await?;
        let proved = prove(sandbox, signed, Some(pgk)).await?;
        let tx = extract_transaction(&proved)?;
        let txid = db.record_transaction(&tx, proposal.target_height);

        tracing::info!(
            account = proposal.account,
            txid = %hex::encode(txid),
            "transaction created"
        );
        Ok(vec![txid])
    }

    /// Broadcast transactions previously stored by
    /// [`create_proposed_transactions`](Self::create_proposed_transactions).
    pub async fn send_authorized_transactions(&self, txids: &[TxId]) -> Result<()> {
        let db = self.db.write().await;
        for txid in txids {
            let raw = db.transaction(txid)?.raw.clone();
            self.source.send_transaction(&raw).await?;
            tracing::info!(txid = %hex::encode(txid), "transaction sent");
        }
        Ok(())
    }

    // ── PCZT lifecycle ──

    pub async fn pczt_create(&self, account: AccountId, to: &str, amount: Zatoshis) -> Result<Pczt> {
        let db = self.db.read().await;
        let proposal = propose_transfer(&db, account, to, amount, self.min_confirmations)?;
        let pczt = create_pczt(&db, &proposal)?;
        tracing::info!(account, amount, fee = pczt.fee, "PCZT created");
        Ok(pczt)
    }

    pub async fn pczt_shield(&self, account: AccountId) -> Result<Pczt> {
        let db = self.db.read().await;
        let proposal = propose_shielding(&db, account, self.min_confirmations)?;
        let pczt = create_pczt(&db, &proposal)?;
        tracing::info!(account, value = proposal.change, "shielding PCZT created");
        Ok(pczt)
    }

    /// Extract, broadcast, and record a fully authorized PCZT.
    pub async fn pczt_send(&self, pczt: Pczt) -> Result<()> {
        let tx = extract_transaction(&pczt)?;
        let mut db = self.db.write().await;
        let txid = self.source.send_transaction(&tx.to_bytes()).await?;
        db.record_transaction(&tx, pczt.target_height);
        tracing::info!(txid = %hex::encode(txid), "PCZT sent");
        Ok(())
    }
}
