//! Guest exports.
//!
//! The complete ABI of the sandbox. Arguments are raw: handles as `u64`,
//! strings and byte buffers as `(ptr, len)` in linear memory, `u64`
//! amounts as `(lo, hi)`, optional heights as sentinel-encoded `u64`,
//! networks as variant indices. Every export returns an [`AbiRet`].
//!
//! Exports documented as consuming a handle take it out of its resource
//! table first: the id is invalid afterwards whether or not the call
//! succeeds.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

use webz_engine::{keys, SeedFingerprint, SpendingKey, ViewingKey, WalletDb};
use webz_hostapi::BlockSource;
use webz_primitives::codec::{decode_pczt, encode_pczt};
use webz_primitives::{ErrorCode, Network, Pczt, TxId, WalletError};

use super::wallet::{combine, prove, sign};
use super::{bridge, AbiRet, GuestWallet};
use crate::error::{Result, SandboxError};
use crate::registry::HandleId;
use crate::runtime::Sandbox;
use crate::transcode::{
    decode_optional_u32, enum_from_index, join_u64, read_bytes, read_handle_array,
    read_optional_bytes, read_string, return_bytes, NETWORK_VARIANTS,
};

fn guarded(sandbox: &Sandbox, f: impl FnOnce() -> Result<AbiRet>) -> AbiRet {
    bridge(sandbox, f())
}

fn network_from_index(index: u32) -> Result<Network> {
    let name = enum_from_index(NETWORK_VARIANTS, index)
        .ok_or_else(|| SandboxError::marshal(format!("invalid network index {index}")))?;
    Ok(Network::from_str(name)?)
}

fn return_string(sandbox: &Sandbox, s: &str) -> Result<AbiRet> {
    let (ptr, len) = return_bytes(sandbox, s.as_bytes())?;
    Ok(AbiRet::buffer(ptr, len))
}

fn return_json<T: serde::Serialize>(sandbox: &Sandbox, value: &T) -> Result<AbiRet> {
    let json = serde_json::to_vec(value)
        .map_err(|e| SandboxError::marshal(format!("cannot render JSON: {e}")))?;
    let (ptr, len) = return_bytes(sandbox, &json)?;
    Ok(AbiRet::buffer(ptr, len))
}

fn id(raw: u64) -> HandleId {
    HandleId::from_raw(raw)
}

fn wallet(sandbox: &Sandbox, raw: u64) -> Result<Arc<GuestWallet>> {
    sandbox.resources.wallets.get(id(raw))
}

// ── Resources ──

/// Free any object by handle.
pub fn resource_free(sandbox: &Sandbox, handle: u64) -> AbiRet {
    guarded(sandbox, || {
        sandbox.resources.free(id(handle))?;
        Ok(AbiRet::unit())
    })
}

pub fn generate_seed_phrase(sandbox: &Sandbox) -> AbiRet {
    guarded(sandbox, || return_string(sandbox, &keys::generate_seed_phrase()?))
}

// ── Keys ──

pub fn usk_new(sandbox: &Sandbox, network: u32, seed_ptr: u32, seed_len: u32, hd_index: u32) -> AbiRet {
    guarded(sandbox, || {
        let network = network_from_index(network)?;
        let seed = read_bytes(sandbox, seed_ptr, seed_len)?;
        let usk = SpendingKey::from_seed(network, &seed, hd_index)?;
        Ok(AbiRet::handle(sandbox.resources.spending_keys.insert(usk)))
    })
}

pub fn usk_to_ufvk(sandbox: &Sandbox, usk: u64) -> AbiRet {
    guarded(sandbox, || {
        let ufvk = sandbox.resources.spending_keys.with(id(usk), SpendingKey::to_viewing_key)?;
        Ok(AbiRet::handle(sandbox.resources.viewing_keys.insert(ufvk)))
    })
}

pub fn usk_to_proof_generation_key(sandbox: &Sandbox, usk: u64) -> AbiRet {
    guarded(sandbox, || {
        let pgk = sandbox
            .resources
            .spending_keys
            .with(id(usk), SpendingKey::proof_generation_key)?;
        Ok(AbiRet::handle(sandbox.resources.proof_keys.insert(pgk)))
    })
}

pub fn ufvk_new(sandbox: &Sandbox, network: u32, ptr: u32, len: u32) -> AbiRet {
    guarded(sandbox, || {
        let network = network_from_index(network)?;
        let encoded = read_string(sandbox, ptr, len)?;
        let ufvk = ViewingKey::decode(network, &encoded)?;
        Ok(AbiRet::handle(sandbox.resources.viewing_keys.insert(ufvk)))
    })
}

pub fn ufvk_encode(sandbox: &Sandbox, ufvk: u64, network: u32) -> AbiRet {
    guarded(sandbox, || {
        let network = network_from_index(network)?;
        let encoded = sandbox.resources.viewing_keys.with(id(ufvk), |k| k.encode(network))?;
        return_string(sandbox, &encoded)
    })
}

pub fn seed_fingerprint_new(sandbox: &Sandbox, seed_ptr: u32, seed_len: u32) -> AbiRet {
    guarded(sandbox, || {
        let seed = read_bytes(sandbox, seed_ptr, seed_len)?;
        let fingerprint = SeedFingerprint::from_seed(&seed)?;
        Ok(AbiRet::handle(sandbox.resources.seed_fingerprints.insert(fingerprint)))
    })
}

pub fn seed_fingerprint_to_bytes(sandbox: &Sandbox, fingerprint: u64) -> AbiRet {
    guarded(sandbox, || {
        let bytes = sandbox
            .resources
            .seed_fingerprints
            .with(id(fingerprint), SeedFingerprint::to_bytes)?;
        let (ptr, len) = return_bytes(sandbox, &bytes)?;
        Ok(AbiRet::buffer(ptr, len))
    })
}

pub fn seed_fingerprint_from_bytes(sandbox: &Sandbox, ptr: u32, len: u32) -> AbiRet {
    guarded(sandbox, || {
        let bytes = read_bytes(sandbox, ptr, len)?;
        let fingerprint = SeedFingerprint::from_bytes(&bytes)?;
        Ok(AbiRet::handle(sandbox.resources.seed_fingerprints.insert(fingerprint)))
    })
}

// ── PCZT ──

pub fn pczt_serialize(sandbox: &Sandbox, pczt: u64) -> AbiRet {
    guarded(sandbox, || {
        let bytes = sandbox.resources.pczts.with(id(pczt), encode_pczt)?;
        let (ptr, len) = return_bytes(sandbox, &bytes)?;
        Ok(AbiRet::buffer(ptr, len))
    })
}

pub fn pczt_from_bytes(sandbox: &Sandbox, ptr: u32, len: u32) -> AbiRet {
    guarded(sandbox, || {
        let pczt = decode_pczt(&read_bytes(sandbox, ptr, len)?)?;
        Ok(AbiRet::handle(sandbox.resources.pczts.insert(pczt)))
    })
}

pub fn pczt_to_json(sandbox: &Sandbox, pczt: u64) -> AbiRet {
    guarded(sandbox, || {
        let pczt = sandbox.resources.pczts.get(id(pczt))?;
        return_json(sandbox, &pczt)
    })
}

pub fn pczt_from_json(sandbox: &Sandbox, ptr: u32, len: u32) -> AbiRet {
    guarded(sandbox, || {
        let json = read_string(sandbox, ptr, len)?;
        let pczt: Pczt = serde_json::from_str(&json)
            .map_err(|e| SandboxError::marshal(format!("invalid PCZT JSON: {e}")))?;
        pczt.check_amounts()?;
        Ok(AbiRet::handle(sandbox.resources.pczts.insert(pczt)))
    })
}

/// Sign a PCZT. Consumes `pczt`, `usk`, and `fingerprint`.
pub async fn pczt_sign(
    sandbox: &Arc<Sandbox>,
    network: u32,
    pczt: u64,
    usk: u64,
    fingerprint: u64,
) -> AbiRet {
    let result = async {
        let resources = &sandbox.resources;
        let pczt = resources.pczts.take(id(pczt))?;
        let usk = resources.spending_keys.take(id(usk))?;
        let fingerprint = resources.seed_fingerprints.take(id(fingerprint))?;
        let network = network_from_index(network)?;
        if pczt.network != network {
            return Err(SandboxError::from(WalletError::new(
                ErrorCode::InvalidNetwork,
                format!("PCZT is for {} but signing was requested for {network}", pczt.network),
            )));
        }
        let signed = sign(pczt, usk, fingerprint).await?;
        Ok::<_, SandboxError>(AbiRet::handle(resources.pczts.insert(signed)))
    }
    .await;
    bridge(sandbox, result)
}

// ── Proposal ──

pub fn proposal_to_json(sandbox: &Sandbox, proposal: u64) -> AbiRet {
    guarded(sandbox, || {
        let proposal = sandbox.resources.proposals.get(id(proposal))?;
        return_json(sandbox, &proposal)
    })
}

pub fn proposal_fee(sandbox: &Sandbox, proposal: u64) -> AbiRet {
    guarded(sandbox, || {
        let fee = sandbox.resources.proposals.with(id(proposal), |p| p.fee)?;
        Ok(AbiRet::wide(fee))
    })
}

// ── Wallet summary ──

pub fn summary_chain_tip_height(sandbox: &Sandbox, summary: u64) -> AbiRet {
    guarded(sandbox, || {
        let height = sandbox.resources.summaries.with(id(summary), |s| s.chain_tip_height)?;
        Ok(AbiRet::value(u64::from(height)))
    })
}

pub fn summary_fully_scanned_height(sandbox: &Sandbox, summary: u64) -> AbiRet {
    guarded(sandbox, || {
        let height = sandbox
            .resources
            .summaries
            .with(id(summary), |s| s.fully_scanned_height)?;
        Ok(AbiRet::value(u64::from(height)))
    })
}

pub fn summary_next_sapling_subtree_index(sandbox: &Sandbox, summary: u64) -> AbiRet {
    guarded(sandbox, || {
        let index = sandbox
            .resources
            .summaries
            .with(id(summary), |s| s.next_sapling_subtree_index)?;
        Ok(AbiRet::wide(index))
    })
}

pub fn summary_next_orchard_subtree_index(sandbox: &Sandbox, summary: u64) -> AbiRet {
    guarded(sandbox, || {
        let index = sandbox
            .resources
            .summaries
            .with(id(summary), |s| s.next_orchard_subtree_index)?;
        Ok(AbiRet::wide(index))
    })
}

/// Per-account balances as a JSON object keyed by account id.
pub fn summary_account_balances(sandbox: &Sandbox, summary: u64) -> AbiRet {
    guarded(sandbox, || {
        let balances = sandbox.resources.summaries.with(id(summary), |s| {
            s.account_balances.iter().copied().collect::<BTreeMap<_, _>>()
        })?;
        return_json(sandbox, &balances)
    })
}

pub fn summary_to_json(sandbox: &Sandbox, summary: u64) -> AbiRet {
    guarded(sandbox, || {
        let summary = sandbox.resources.summaries.get(id(summary))?;
        return_json(sandbox, &summary)
    })
}

// ── Wallet ──

/// Open a wallet. The block source is passed in external reference slot
/// `source_slot`; the slot is emptied whether or not this succeeds.
#[allow(clippy::too_many_arguments)]
pub fn webwallet_new(
    sandbox: &Sandbox,
    network: u32,
    url_ptr: u32,
    url_len: u32,
    min_confirmations: u32,
    scan_batch_size: u32,
    restore_ptr: u32,
    restore_len: u32,
    source_slot: u32,
) -> AbiRet {
    guarded(sandbox, || {
        let source = sandbox.externrefs().take::<Arc<dyn BlockSource>>(source_slot)?;
        let network = network_from_index(network)?;
        let service_url = read_string(sandbox, url_ptr, url_len)?;
        let min_confirmations = NonZeroU32::new(min_confirmations)
            .ok_or_else(|| SandboxError::Config("min_confirmations must be non-zero".into()))?;
        if scan_batch_size == 0 {
            return Err(SandboxError::Config("scan_batch_size must be at least 1".into()));
        }

        let db = match read_optional_bytes(sandbox, restore_ptr, restore_len)? {
            Some(bytes) => {
                let db = WalletDb::from_bytes(&bytes).map_err(|e| {
                    SandboxError::marshal(format!("cannot restore wallet database: {}", e.message))
                })?;
                if db.network() != network {
                    return Err(SandboxError::Config(format!(
                        "wallet database is for {} but the wallet was opened on {network}",
                        db.network()
                    )));
                }
                tracing::info!(%network, accounts = db.accounts().count(), "wallet restored");
                db
            }
            None => {
                tracing::info!(%network, service = %service_url, "wallet created");
                WalletDb::new(network)
            }
        };

        let wallet = GuestWallet::new(db, service_url, min_confirmations, scan_batch_size, source);
        Ok(AbiRet::handle(sandbox.resources.wallets.insert(Arc::new(wallet))))
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn webwallet_create_account(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    name_ptr: u32,
    name_len: u32,
    phrase_ptr: u32,
    phrase_len: u32,
    hd_index: u32,
    birthday: u64,
) -> AbiRet {
    let result = async {
        let wallet = wallet(sandbox, wallet_id)?;
        let name = read_string(sandbox, name_ptr, name_len)?;
        let phrase = read_string(sandbox, phrase_ptr, phrase_len)?;
        let birthday = decode_optional_u32(birthday)?;
        let account = wallet.create_account(&name, &phrase, hd_index, birthday).await?;
        Ok::<_, SandboxError>(AbiRet::value(u64::from(account)))
    }
    .await;
    bridge(sandbox, result)
}

/// Import a spending account by viewing key. Consumes `fingerprint`.
#[allow(clippy::too_many_arguments)]
pub async fn webwallet_create_account_ufvk(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    name_ptr: u32,
    name_len: u32,
    ufvk_ptr: u32,
    ufvk_len: u32,
    fingerprint: u64,
    hd_index: u32,
    birthday: u64,
) -> AbiRet {
    let result = async {
        let fingerprint = sandbox.resources.seed_fingerprints.take(id(fingerprint))?;
        let wallet = wallet(sandbox, wallet_id)?;
        let name = read_string(sandbox, name_ptr, name_len)?;
        let ufvk = read_string(sandbox, ufvk_ptr, ufvk_len)?;
        let birthday = decode_optional_u32(birthday)?;
        let account = wallet
            .create_account_ufvk(&name, &ufvk, fingerprint, hd_index, birthday)
            .await?;
        Ok::<_, SandboxError>(AbiRet::value(u64::from(account)))
    }
    .await;
    bridge(sandbox, result)
}

pub async fn webwallet_create_account_view_ufvk(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    name_ptr: u32,
    name_len: u32,
    ufvk_ptr: u32,
    ufvk_len: u32,
    birthday: u64,
) -> AbiRet {
    let result = async {
        let wallet = wallet(sandbox, wallet_id)?;
        let name = read_string(sandbox, name_ptr, name_len)?;
        let ufvk = read_string(sandbox, ufvk_ptr, ufvk_len)?;
        let birthday = decode_optional_u32(birthday)?;
        let account = wallet.create_account_view_ufvk(&name, &ufvk, birthday).await?;
        Ok::<_, SandboxError>(AbiRet::value(u64::from(account)))
    }
    .await;
    bridge(sandbox, result)
}

pub async fn webwallet_sync(sandbox: &Arc<Sandbox>, wallet_id: u64) -> AbiRet {
    let result = async {
        wallet(sandbox, wallet_id)?.sync(sandbox).await?;
        Ok::<_, SandboxError>(AbiRet::unit())
    }
    .await;
    bridge(sandbox, result)
}

/// A summary handle, or the null handle before the chain tip is known.
pub async fn webwallet_get_wallet_summary(sandbox: &Arc<Sandbox>, wallet_id: u64) -> AbiRet {
    let result = async {
        let summary = wallet(sandbox, wallet_id)?.summary().await;
        let handle = summary.map_or(HandleId::NULL, |s| sandbox.resources.summaries.insert(s));
        Ok::<_, SandboxError>(AbiRet::handle(handle))
    }
    .await;
    bridge(sandbox, result)
}

#[allow(clippy::too_many_arguments)]
pub async fn webwallet_propose_transfer(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    account: u32,
    to_ptr: u32,
    to_len: u32,
    amount_lo: u32,
    amount_hi: u32,
) -> AbiRet {
    let result = async {
        let wallet = wallet(sandbox, wallet_id)?;
        let to = read_string(sandbox, to_ptr, to_len)?;
        let amount = join_u64(amount_lo, amount_hi);
        let proposal = wallet.propose_transfer(account, &to, amount).await?;
        Ok::<_, SandboxError>(AbiRet::handle(sandbox.resources.proposals.insert(proposal)))
    }
    .await;
    bridge(sandbox, result)
}

/// Consumes `proposal`. Returns the concatenated 32-byte txids.
pub async fn webwallet_create_proposed_transactions(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    proposal: u64,
    phrase_ptr: u32,
    phrase_len: u32,
    hd_index: u32,
) -> AbiRet {
    let result = async {
        let proposal = sandbox.resources.proposals.take(id(proposal))?;
        let wallet = wallet(sandbox, wallet_id)?;
        let phrase = read_string(sandbox, phrase_ptr, phrase_len)?;
        let txids = wallet
            .create_proposed_transactions(sandbox, proposal, &phrase, hd_index)
            .await?;
        let (ptr, len) = return_bytes(sandbox, &txids.concat())?;
        Ok::<_, SandboxError>(AbiRet::buffer(ptr, len))
    }
    .await;
    bridge(sandbox, result)
}

pub async fn webwallet_db_to_bytes(sandbox: &Arc<Sandbox>, wallet_id: u64) -> AbiRet {
    let result = async {
        let bytes = wallet(sandbox, wallet_id)?.to_bytes().await;
        let (ptr, len) = return_bytes(sandbox, &bytes)?;
        Ok::<_, SandboxError>(AbiRet::buffer(ptr, len))
    }
    .await;
    bridge(sandbox, result)
}

pub async fn webwallet_send_authorized_transactions(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    txids_ptr: u32,
    txids_len: u32,
) -> AbiRet {
    let result = async {
        let wallet = wallet(sandbox, wallet_id)?;
        let bytes = read_bytes(sandbox, txids_ptr, txids_len)?;
        if bytes.len() % 32 != 0 {
            return Err(SandboxError::marshal(format!(
                "txid buffer of {} bytes is not a whole number of 32-byte ids",
                bytes.len()
            )));
        }
        let txids: Vec<TxId> = bytes
            .chunks_exact(32)
            .map(|chunk| {
                let mut txid = [0u8; 32];
                txid.copy_from_slice(chunk);
                txid
            })
            .collect();
        wallet.send_authorized_transactions(&txids).await?;
        Ok::<_, SandboxError>(AbiRet::unit())
    }
    .await;
    bridge(sandbox, result)
}

pub async fn webwallet_get_current_address(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    account: u32,
    transparent: bool,
) -> AbiRet {
    let result = async {
        let address = wallet(sandbox, wallet_id)?
            .current_address(account, transparent)
            .await?;
        return_string(sandbox, &address)
    }
    .await;
    bridge(sandbox, result)
}

pub async fn webwallet_get_latest_block(sandbox: &Arc<Sandbox>, wallet_id: u64) -> AbiRet {
    let result = async {
        let height = wallet(sandbox, wallet_id)?.latest_block().await?;
        Ok::<_, SandboxError>(AbiRet::value(u64::from(height)))
    }
    .await;
    bridge(sandbox, result)
}

#[allow(clippy::too_many_arguments)]
pub async fn webwallet_pczt_create(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    account: u32,
    to_ptr: u32,
    to_len: u32,
    amount_lo: u32,
    amount_hi: u32,
) -> AbiRet {
    let result = async {
        let wallet = wallet(sandbox, wallet_id)?;
        let to = read_string(sandbox, to_ptr, to_len)?;
        let pczt = wallet
            .pczt_create(account, &to, join_u64(amount_lo, amount_hi))
            .await?;
        Ok::<_, SandboxError>(AbiRet::handle(sandbox.resources.pczts.insert(pczt)))
    }
    .await;
    bridge(sandbox, result)
}

pub async fn webwallet_pczt_shield(sandbox: &Arc<Sandbox>, wallet_id: u64, account: u32) -> AbiRet {
    let result = async {
        let pczt = wallet(sandbox, wallet_id)?.pczt_shield(account).await?;
        Ok::<_, SandboxError>(AbiRet::handle(sandbox.resources.pczts.insert(pczt)))
    }
    .await;
    bridge(sandbox, result)
}

/// Consumes `pczt` and, unless null, `pgk`.
pub async fn webwallet_pczt_prove(
    sandbox: &Arc<Sandbox>,
    wallet_id: u64,
    pczt: u64,
    pgk: u64,
) -> AbiRet {
    let result = async {
        let resources = &sandbox.resources;
        let pczt = resources.pczts.take(id(pczt))?;
        let pgk = match id(pgk) {
            key if key.is_null() => None,
            key => Some(resources.proof_keys.take(key)?),
        };
        wallet(sandbox, wallet_id)?;
        let proved = prove(sandbox, pczt, pgk).await?;
        Ok::<_, SandboxError>(AbiRet::handle(resources.pczts.insert(proved)))
    }
    .await;
    bridge(sandbox, result)
}

/// Consumes every PCZT in the handle array at `(ptr, len)`.
pub fn webwallet_pczt_combine(sandbox: &Sandbox, wallet_id: u64, ptr: u32, len: u32) -> AbiRet {
    guarded(sandbox, || {
        let ids = read_handle_array(sandbox, ptr, len)?;
        let pczts = ids
            .into_iter()
            .map(|pczt| sandbox.resources.pczts.take(pczt))
            .collect::<Result<Vec<_>>>()?;
        wallet(sandbox, wallet_id)?;
        let combined = combine(pczts)?;
        Ok(AbiRet::handle(sandbox.resources.pczts.insert(combined)))
    })
}

/// Consumes `pczt`.
pub async fn webwallet_pczt_send(sandbox: &Arc<Sandbox>, wallet_id: u64, pczt: u64) -> AbiRet {
    let result = async {
        let pczt = sandbox.resources.pczts.take(id(pczt))?;
        wallet(sandbox, wallet_id)?.pczt_send(pczt).await?;
        Ok::<_, SandboxError>(AbiRet::unit())
    }
    .await;
    bridge(sandbox, result)
}
