//! Shared helpers for the integration tests.
//!
//! Small sandboxes, an in-memory test-network chain, and wallets opened on
//! it, with a deterministic seed phrase so account addresses are stable.

#![allow(dead_code)]

use std::sync::Arc;

use webz_hostapi::{BlockSource, MemChain};
use webz_primitives::{Address, Network, Pool};
use webz_sandbox::{Sandbox, SandboxConfig, WalletConfig, WebWallet};

/// A valid 24-word phrase.
pub const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
    abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon \
    abandon abandon abandon abandon art";

/// A different valid phrase, for key-mismatch tests.
pub const OTHER_PHRASE: &str = "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo \
    zoo zoo zoo zoo zoo zoo zoo zoo vote";

/// Height of the first block on every test chain.
pub const CHAIN_START: u32 = 1;

// ── Sandboxes ──

pub fn small_config() -> SandboxConfig {
    SandboxConfig {
        initial_memory_pages: 16,
        max_memory_pages: 4_096,
        max_workers: 16,
        ..SandboxConfig::default()
    }
}

pub fn sandbox() -> Arc<Sandbox> {
    webz_sandbox::logging::init_logging();
    Sandbox::new(small_config()).expect("sandbox")
}

// ── Chain ──

/// A test-network chain with `blocks` empty blocks already mined.
pub fn chain(blocks: u32) -> Arc<MemChain> {
    let chain = Arc::new(MemChain::new(Network::Test, CHAIN_START));
    chain.mine_empty(blocks);
    chain
}

/// A test-network address no test wallet owns.
pub fn recipient() -> String {
    Address::Unified {
        receiver: [0x42; 32],
    }
    .encode(Network::Test)
}

// ── Wallets ──

pub fn wallet_config() -> WalletConfig {
    WalletConfig {
        min_confirmations: 1,
        scan_batch_size: 4,
        ..WalletConfig::testnet("http://localhost:9067")
    }
}

pub fn open_wallet(sandbox: &Arc<Sandbox>, chain: &Arc<MemChain>) -> WebWallet {
    let source: Arc<dyn BlockSource> = chain.clone();
    WebWallet::new(sandbox, wallet_config(), source, None).expect("wallet")
}

/// A synced wallet whose account 0 (from [`PHRASE`]) holds one note of
/// `value` in `pool`.
pub async fn funded_wallet(pool: Pool, value: u64) -> (Arc<Sandbox>, Arc<MemChain>, WebWallet) {
    let sandbox = sandbox();
    let chain = chain(3);
    let wallet = open_wallet(&sandbox, &chain);
    let account = wallet
        .create_account("primary", PHRASE, 0, Some(CHAIN_START))
        .await
        .expect("account");
    assert_eq!(account, 0);

    let address = if pool == Pool::Transparent {
        wallet.get_current_address_transparent(account).await
    } else {
        wallet.get_current_address(account).await
    }
    .expect("address");
    chain.fund(&address, pool, value).expect("fund");
    chain.mine_empty(1);
    wallet.sync().await.expect("sync");
    (sandbox, chain, wallet)
}

/// Raw seed bytes for [`PHRASE`], as the wallet derives them.
pub fn phrase_seed() -> [u8; 64] {
    webz_engine::keys::seed_from_phrase(PHRASE).expect("seed")
}
