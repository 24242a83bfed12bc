//! In-memory chain for testing and local use.
//!
//! `MemChain` keeps every block in a `Vec`, accepts submitted transactions
//! into a mempool, and turns the mempool into a block on [`MemChain::mine`].
//! Funding helpers mine a block paying an address directly.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use webz_primitives::codec::decode_transaction;
use webz_primitives::crypto::hash_blake3;
use webz_primitives::{
    Address, BlockHeight, CompactBlock, CompactTx, Hash, Network, OutPoint, Output, Pool,
    Transaction, TxId, WalletError, WalletResult, ZERO_HASH,
};

use crate::error::NetworkError;
use crate::source::BlockSource;

#[derive(Debug)]
struct ChainState {
    network: Network,
    /// Height of `blocks[0]`.
    start_height: BlockHeight,
    blocks: Vec<CompactBlock>,
    mempool: Vec<Transaction>,
    submitted: Vec<TxId>,
    /// Nullifiers revealed on chain or in the mempool.
    nullifiers: BTreeSet<Hash>,
    spent_outpoints: BTreeSet<OutPoint>,
    offline: bool,
    latency: Option<Duration>,
    funding_nonce: u64,
}

impl ChainState {
    fn tip(&self) -> BlockHeight {
        (self.start_height + self.blocks.len() as BlockHeight).saturating_sub(1)
    }

    fn push_block(&mut self, txs: Vec<CompactTx>) -> BlockHeight {
        let height = self.start_height + self.blocks.len() as BlockHeight;
        let prev_hash = self.blocks.last().map(|b| b.hash).unwrap_or(ZERO_HASH);
        self.blocks.push(CompactBlock::new(height, prev_hash, txs));
        height
    }

    fn check_online(&self) -> Result<(), NetworkError> {
        if self.offline {
            return Err(NetworkError::unavailable("in-memory chain is offline"));
        }
        Ok(())
    }
}

/// In-memory [`BlockSource`].
#[derive(Debug)]
pub struct MemChain {
    state: Mutex<ChainState>,
}

impl MemChain {
    /// An empty chain whose first block will be at `start_height`.
    ///
    /// Until something is mined the reported tip is `start_height - 1`.
    pub fn new(network: Network, start_height: BlockHeight) -> Self {
        Self {
            state: Mutex::new(ChainState {
                network,
                start_height: start_height.max(1),
                blocks: Vec::new(),
                mempool: Vec::new(),
                submitted: Vec::new(),
                nullifiers: BTreeSet::new(),
                spent_outpoints: BTreeSet::new(),
                offline: false,
                latency: None,
                funding_nonce: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn network(&self) -> Network {
        self.state().network
    }

    /// Current tip height.
    pub fn tip(&self) -> BlockHeight {
        self.state().tip()
    }

    /// Mine a block with a single output paying `value` to `address` in `pool`.
    ///
    /// Unified addresses may be funded in either shielded pool; transparent
    /// addresses only in the transparent pool. Returns the new block height.
    pub fn fund(&self, address: &str, pool: Pool, value: u64) -> WalletResult<BlockHeight> {
        let mut state = self.state();
        let decoded = Address::decode(state.network, address)?;
        if pool.is_shielded() != matches!(decoded, Address::Unified { .. }) {
            return Err(WalletError::invalid_argument(format!(
                "cannot fund {address} in the {pool:?} pool"
            )));
        }
        state.funding_nonce += 1;
        let nonce = state.funding_nonce.to_le_bytes();
        let txid = hash_blake3(&[b"funding".as_slice(), &nonce].concat());
        let tx = CompactTx {
            txid,
            nullifiers: Vec::new(),
            transparent_spends: Vec::new(),
            outputs: vec![Output {
                pool,
                recipient: decoded.recipient(),
                value,
                commitment: hash_blake3(&[txid.as_slice(), b"cm"].concat()),
            }],
        };
        let height = state.push_block(vec![tx]);
        tracing::debug!(height, value, ?pool, "funded address");
        Ok(height)
    }

    /// Mine `count` empty blocks. Returns the new tip.
    pub fn mine_empty(&self, count: u32) -> BlockHeight {
        let mut state = self.state();
        for _ in 0..count {
            state.push_block(Vec::new());
        }
        state.tip()
    }

    /// Mine the mempool into one block. Returns the new block height.
    pub fn mine(&self) -> BlockHeight {
        let mut state = self.state();
        let txs: Vec<CompactTx> = state.mempool.drain(..).map(|tx| tx.to_compact()).collect();
        let count = txs.len();
        let height = state.push_block(txs);
        tracing::debug!(height, txs = count, "mined block");
        height
    }

    /// Transactions waiting to be mined.
    pub fn mempool_len(&self) -> usize {
        self.state().mempool.len()
    }

    /// Every txid accepted by [`BlockSource::send_transaction`], in order.
    pub fn submitted(&self) -> Vec<TxId> {
        self.state().submitted.clone()
    }

    /// Simulate a service outage.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Delay every block range response.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }
}

#[async_trait]
impl BlockSource for MemChain {
    async fn get_latest_block(&self) -> Result<BlockHeight, NetworkError> {
        let state = self.state();
        state.check_online()?;
        Ok(state.tip())
    }

    async fn get_block_range(
        &self,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<CompactBlock>, NetworkError> {
        let (latency, blocks) = {
            let state = self.state();
            state.check_online()?;
            if start > end {
                return Ok(Vec::new());
            }
            if start < state.start_height || end > state.tip() || state.blocks.is_empty() {
                return Err(NetworkError::MissingBlocks { start, end });
            }
            let from = (start - state.start_height) as usize;
            let to = (end - state.start_height) as usize;
            (state.latency, state.blocks[from..=to].to_vec())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(blocks)
    }

    async fn send_transaction(&self, raw: &[u8]) -> Result<TxId, NetworkError> {
        let tx = decode_transaction(raw).map_err(|e| NetworkError::rejected(e.message))?;
        let txid = tx.txid();
        let mut state = self.state();
        state.check_online()?;

        if state.mempool.iter().any(|pending| pending.txid() == txid) {
            return Err(NetworkError::rejected("transaction already in mempool"));
        }
        if tx.nullifiers.iter().any(|(_, nf)| state.nullifiers.contains(nf)) {
            return Err(NetworkError::rejected("nullifier already revealed"));
        }
        if tx.transparent_inputs.iter().any(|op| state.spent_outpoints.contains(op)) {
            return Err(NetworkError::rejected("transparent input already spent"));
        }
        if tx.expiry_height <= state.tip() {
            return Err(NetworkError::rejected(format!(
                "transaction expired at height {}",
                tx.expiry_height
            )));
        }

        state.nullifiers.extend(tx.nullifiers.iter().map(|(_, nf)| *nf));
        state.spent_outpoints.extend(tx.transparent_inputs.iter().copied());
        state.mempool.push(tx);
        state.submitted.push(txid);
        tracing::info!(txid = %webz_primitives::types::hash_to_hex(&txid), "accepted transaction");
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webz_primitives::address::encode_with_checksum;

    fn test_address() -> String {
        Address::Unified { receiver: [7; 32] }.encode(Network::Test)
    }

    fn sample_tx(nullifier: Hash, expiry_height: BlockHeight) -> Transaction {
        Transaction {
            expiry_height,
            fee: 10_000,
            nullifiers: vec![(Pool::Orchard, nullifier)],
            transparent_inputs: vec![],
            outputs: vec![Output {
                pool: Pool::Orchard,
                recipient: [1; 32],
                value: 5,
                commitment: [2; 32],
            }],
            auth_digest: [3; 32],
        }
    }

    #[tokio::test]
    async fn test_empty_chain_tip() {
        let chain = MemChain::new(Network::Test, 100);
        assert_eq!(chain.get_latest_block().await.unwrap(), 99);
        assert!(chain.get_block_range(100, 99).await.unwrap().is_empty());
        assert_eq!(
            chain.get_block_range(100, 100).await.unwrap_err(),
            NetworkError::MissingBlocks { start: 100, end: 100 }
        );
    }

    #[tokio::test]
    async fn test_fund_mines_linked_blocks() {
        let chain = MemChain::new(Network::Test, 10);
        assert_eq!(chain.fund(&test_address(), Pool::Orchard, 500).unwrap(), 10);
        assert_eq!(chain.fund(&test_address(), Pool::Sapling, 600).unwrap(), 11);
        assert_eq!(chain.mine_empty(3), 14);

        let blocks = chain.get_block_range(10, 14).await.unwrap();
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].prev_hash, ZERO_HASH);
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
        assert_ne!(blocks[0].txs[0].outputs[0].commitment, blocks[1].txs[0].outputs[0].commitment);
    }

    #[test]
    fn test_fund_rejects_wrong_pool_and_network() {
        let chain = MemChain::new(Network::Test, 10);
        assert!(chain.fund(&test_address(), Pool::Transparent, 1).is_err());
        let mainnet = Address::Unified { receiver: [7; 32] }.encode(Network::Main);
        assert!(chain.fund(&mainnet, Pool::Orchard, 1).is_err());
        let taddr = encode_with_checksum("tm", &[4u8; 20]);
        assert!(chain.fund(&taddr, Pool::Orchard, 1).is_err());
        assert_eq!(chain.fund(&taddr, Pool::Transparent, 1).unwrap(), 10);
    }

    #[tokio::test]
    async fn test_send_then_mine() {
        let chain = MemChain::new(Network::Test, 1);
        chain.mine_empty(1);
        let tx = sample_tx([9; 32], 50);
        let txid = chain.send_transaction(&tx.to_bytes()).await.unwrap();
        assert_eq!(txid, tx.txid());
        assert_eq!(chain.mempool_len(), 1);

        let height = chain.mine();
        assert_eq!(chain.mempool_len(), 0);
        let block = &chain.get_block_range(height, height).await.unwrap()[0];
        assert_eq!(block.txs[0].txid, txid);
        assert_eq!(chain.submitted(), vec![txid]);
    }

    #[tokio::test]
    async fn test_send_rejections() {
        let chain = MemChain::new(Network::Test, 1);
        chain.mine_empty(5);

        let err = chain.send_transaction(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, NetworkError::Rejected(_)));

        let tx = sample_tx([9; 32], 50);
        chain.send_transaction(&tx.to_bytes()).await.unwrap();
        let dup = chain.send_transaction(&tx.to_bytes()).await.unwrap_err();
        assert!(dup.to_string().contains("mempool"));

        let double_spend = sample_tx([9; 32], 51);
        let err = chain.send_transaction(&double_spend.to_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("nullifier"));

        let expired = sample_tx([8; 32], 5);
        let err = chain.send_transaction(&expired.to_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_offline_chain() {
        let chain = MemChain::new(Network::Test, 1);
        chain.set_offline(true);
        assert!(matches!(
            chain.get_latest_block().await.unwrap_err(),
            NetworkError::Unavailable(_)
        ));
        chain.set_offline(false);
        assert_eq!(chain.get_latest_block().await.unwrap(), 0);
    }
}
