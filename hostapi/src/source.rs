//! The block-data service interface.

use async_trait::async_trait;
use webz_primitives::{BlockHeight, CompactBlock, TxId};

use crate::error::NetworkError;

/// Host-side access to the chain.
///
/// Implementations must be shareable across tasks; each wallet holds one
/// behind an `Arc`.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Height of the most recent block the service knows about.
    async fn get_latest_block(&self) -> Result<BlockHeight, NetworkError>;

    /// Compact blocks `start..=end`, in height order.
    ///
    /// An empty range (`start > end`) yields no blocks.
    async fn get_block_range(
        &self,
        start: BlockHeight,
        end: BlockHeight,
    ) -> Result<Vec<CompactBlock>, NetworkError>;

    /// Submit a raw transaction for inclusion.
    async fn send_transaction(&self, raw: &[u8]) -> Result<TxId, NetworkError>;
}
