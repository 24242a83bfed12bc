//! Block scanning (trial decryption).
//!
//! [`scan_block`] is pure and independent per block, so callers can fan a
//! batch of blocks out across worker threads and feed the results to
//! [`WalletDb::apply_scanned`](crate::wallet::WalletDb::apply_scanned) in
//! one step.

use webz_primitives::address::pad_pubkey_hash;
use webz_primitives::crypto;
use webz_primitives::{AccountId, BlockHeight, CompactBlock, Hash, OutPoint, Pool, TxId};

use crate::wallet::{ReceivedNote, Utxo};

/// Per-account key material needed to recognise outputs and spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanKey {
    pub account: AccountId,
    pub receiver: Hash,
    pub nk: Hash,
    /// Zero-padded transparent pubkey hash, as it appears in outputs.
    pub transparent_recipient: Hash,
}

impl ScanKey {
    pub fn new(account: AccountId, ufvk: &crate::keys::ViewingKey) -> Self {
        Self {
            account,
            receiver: ufvk.receiver(),
            nk: ufvk.nk,
            transparent_recipient: pad_pubkey_hash(&ufvk.transparent_pubkey_hash()),
        }
    }
}

/// Everything one block contributes to wallet state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedBlock {
    pub height: BlockHeight,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub txids: Vec<TxId>,
    pub notes: Vec<ReceivedNote>,
    pub utxos: Vec<Utxo>,
    /// Every nullifier revealed in the block, ours or not.
    pub nullifiers: Vec<Hash>,
    pub transparent_spends: Vec<OutPoint>,
    pub sapling_outputs: u64,
    pub orchard_outputs: u64,
}

/// Trial-decrypt every output in `block` against `keys`.
pub fn scan_block(block: &CompactBlock, keys: &[ScanKey]) -> ScannedBlock {
    let mut scanned = ScannedBlock {
        height: block.height,
        hash: block.hash,
        prev_hash: block.prev_hash,
        sapling_outputs: block.output_count(Pool::Sapling),
        orchard_outputs: block.output_count(Pool::Orchard),
        ..Default::default()
    };

    for tx in &block.txs {
        scanned.txids.push(tx.txid);
        scanned.nullifiers.extend_from_slice(&tx.nullifiers);
        scanned.transparent_spends.extend_from_slice(&tx.transparent_spends);

        for (index, output) in tx.outputs.iter().enumerate() {
            for key in keys {
                if output.pool.is_shielded() && output.recipient == key.receiver {
                    scanned.notes.push(ReceivedNote {
                        account: key.account,
                        pool: output.pool,
                        value: output.value,
                        commitment: output.commitment,
                        nullifier: crypto::keyed_hash(&key.nk, &output.commitment),
                        height: block.height,
                        spent: None,
                    });
                } else if output.pool == Pool::Transparent
                    && output.recipient == key.transparent_recipient
                {
                    scanned.utxos.push(Utxo {
                        account: key.account,
                        outpoint: OutPoint {
                            txid: tx.txid,
                            index: index as u32,
                        },
                        value: output.value,
                        height: block.height,
                        spent: None,
                    });
                }
            }
        }
    }
    scanned
}
