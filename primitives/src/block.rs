//! Compact blocks and raw transactions.
//!
//! A compact block carries just enough of each transaction for a wallet to
//! find its notes (outputs) and notice when they are spent (nullifiers and
//! transparent outpoints).

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::crypto::hash_blake3;
use crate::types::{BlockHeight, Hash, OutPoint, Pool, TxId, Zatoshis};

/// A transaction output in any pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub pool: Pool,
    /// Shielded receiver, or a zero-padded transparent pubkey hash.
    pub recipient: Hash,
    pub value: Zatoshis,
    /// Note commitment. Unique per output on a chain.
    pub commitment: Hash,
}

/// One transaction as seen by a scanning wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactTx {
    pub txid: TxId,
    /// Nullifiers revealed by shielded spends.
    pub nullifiers: Vec<Hash>,
    /// Transparent outputs consumed.
    pub transparent_spends: Vec<OutPoint>,
    pub outputs: Vec<Output>,
}

/// A block reduced to wallet-relevant data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactBlock {
    pub height: BlockHeight,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub txs: Vec<CompactTx>,
}

impl CompactBlock {
    /// Build a block, deriving its hash from the height, parent, and txids.
    pub fn new(height: BlockHeight, prev_hash: Hash, txs: Vec<CompactTx>) -> Self {
        let mut preimage = Vec::with_capacity(36 + txs.len() * 32);
        preimage.extend_from_slice(&height.to_le_bytes());
        preimage.extend_from_slice(&prev_hash);
        for tx in &txs {
            preimage.extend_from_slice(&tx.txid);
        }
        Self {
            height,
            hash: hash_blake3(&preimage),
            prev_hash,
            txs,
        }
    }

    /// Number of shielded outputs in `pool` within this block.
    pub fn output_count(&self, pool: Pool) -> u64 {
        self.txs
            .iter()
            .flat_map(|tx| tx.outputs.iter())
            .filter(|o| o.pool == pool)
            .count() as u64
    }
}

/// A fully authorized transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub expiry_height: BlockHeight,
    pub fee: Zatoshis,
    pub nullifiers: Vec<(Pool, Hash)>,
    pub transparent_inputs: Vec<OutPoint>,
    pub outputs: Vec<Output>,
    /// Digest over every signature and proof that authorized the effects.
    pub auth_digest: Hash,
}

impl Transaction {
    /// Raw consensus encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode_transaction(self)
    }

    /// Transaction id: BLAKE3 of the raw encoding.
    pub fn txid(&self) -> TxId {
        hash_blake3(&self.to_bytes())
    }

    /// The compact form a scanning wallet receives once this is mined.
    pub fn to_compact(&self) -> CompactTx {
        CompactTx {
            txid: self.txid(),
            nullifiers: self.nullifiers.iter().map(|(_, nf)| *nf).collect(),
            transparent_spends: self.transparent_inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ZERO_HASH;

    fn output(pool: Pool, value: u64, tag: u8) -> Output {
        Output {
            pool,
            recipient: [tag; 32],
            value,
            commitment: [tag.wrapping_add(1); 32],
        }
    }

    #[test]
    fn test_block_hash_commits_to_contents() {
        let tx = CompactTx {
            txid: [1; 32],
            nullifiers: vec![],
            transparent_spends: vec![],
            outputs: vec![],
        };
        let a = CompactBlock::new(10, ZERO_HASH, vec![tx.clone()]);
        let b = CompactBlock::new(10, ZERO_HASH, vec![]);
        let c = CompactBlock::new(11, ZERO_HASH, vec![tx]);
        assert_ne!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_output_count_by_pool() {
        let tx = CompactTx {
            txid: [1; 32],
            nullifiers: vec![],
            transparent_spends: vec![],
            outputs: vec![
                output(Pool::Sapling, 1, 1),
                output(Pool::Orchard, 2, 2),
                output(Pool::Orchard, 3, 3),
            ],
        };
        let block = CompactBlock::new(1, ZERO_HASH, vec![tx]);
        assert_eq!(block.output_count(Pool::Sapling), 1);
        assert_eq!(block.output_count(Pool::Orchard), 2);
        assert_eq!(block.output_count(Pool::Transparent), 0);
    }

    #[test]
    fn test_compact_form_keeps_effects() {
        let tx = Transaction {
            expiry_height: 100,
            fee: 10_000,
            nullifiers: vec![(Pool::Sapling, [5; 32])],
            transparent_inputs: vec![OutPoint { txid: [6; 32], index: 1 }],
            outputs: vec![output(Pool::Orchard, 50, 7)],
            auth_digest: [0; 32],
        };
        let compact = tx.to_compact();
        assert_eq!(compact.txid, tx.txid());
        assert_eq!(compact.nullifiers, vec![[5; 32]]);
        assert_eq!(compact.transparent_spends.len(), 1);
        assert_eq!(compact.outputs, tx.outputs);
    }
}
