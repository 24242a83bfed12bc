//! Wallet database persistence and wallet construction tests.

mod common;

use std::sync::Arc;

use webz_hostapi::BlockSource;
use webz_primitives::{ErrorCode, Pool};
use webz_sandbox::{SandboxError, WalletConfig, WebWallet};

use common::*;

fn source(chain: &Arc<webz_hostapi::MemChain>) -> Arc<dyn BlockSource> {
    chain.clone()
}

#[tokio::test]
async fn test_restore_preserves_accounts_and_notes() {
    let (_sb, chain, wallet) = funded_wallet(Pool::Orchard, 75_000).await;
    let bytes = wallet.db_to_bytes().await.unwrap();
    assert!(!bytes.is_empty());

    let other = sandbox();
    let restored = WebWallet::new(&other, wallet_config(), source(&chain), Some(&bytes)).unwrap();
    restored.sync().await.unwrap();

    let balances = restored
        .get_wallet_summary()
        .await
        .unwrap()
        .unwrap()
        .account_balances()
        .unwrap();
    assert_eq!(balances[&0].orchard_balance, 75_000);

    let err = restored
        .create_account("again", PHRASE, 0, Some(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::AccountExists));
    assert_eq!(
        restored.get_current_address(0).await.unwrap(),
        wallet.get_current_address(0).await.unwrap()
    );
}

#[tokio::test]
async fn test_restored_wallet_resumes_scanning() {
    let (_sb, chain, wallet) = funded_wallet(Pool::Orchard, 10_000).await;
    let bytes = wallet.db_to_bytes().await.unwrap();
    drop(wallet);

    let address = {
        let sb = sandbox();
        let restored = WebWallet::new(&sb, wallet_config(), source(&chain), Some(&bytes)).unwrap();
        restored.get_current_address(0).await.unwrap()
    };
    chain.fund(&address, Pool::Orchard, 5_000).unwrap();

    let sb = sandbox();
    let restored = WebWallet::new(&sb, wallet_config(), source(&chain), Some(&bytes)).unwrap();
    restored.sync().await.unwrap();
    let summary = restored.get_wallet_summary().await.unwrap().unwrap();
    assert_eq!(summary.fully_scanned_height().unwrap(), chain.tip());
    assert_eq!(summary.account_balances().unwrap()[&0].orchard_balance, 15_000);
}

#[test]
fn test_corrupt_blob_is_marshal_error() {
    let sb = sandbox();
    let chain = chain(1);
    let err = WebWallet::new(&sb, wallet_config(), source(&chain), Some(b"not a wallet")).unwrap_err();
    match err {
        SandboxError::Marshal(message) => {
            assert!(message.starts_with("cannot restore wallet database"), "{message}")
        }
        other => panic!("expected a marshal error, got {other:?}"),
    }
    assert_eq!(sb.live_handles(), 0);
    assert_eq!(sb.live_allocations(), 0);
    assert_eq!(sb.externrefs().live_count(), 0);
}

#[tokio::test]
async fn test_blob_from_other_network_rejected() {
    let (_sb, chain, wallet) = funded_wallet(Pool::Orchard, 1_000).await;
    let bytes = wallet.db_to_bytes().await.unwrap();

    let sb = sandbox();
    let config = WalletConfig {
        network: "main".into(),
        ..wallet_config()
    };
    let err = WebWallet::new(&sb, config, source(&chain), Some(&bytes)).unwrap_err();
    assert!(matches!(err, SandboxError::Config(_)), "{err:?}");
}

#[test]
fn test_invalid_config_rejected_before_crossing() {
    let sb = sandbox();
    let chain = chain(1);
    for config in [
        WalletConfig {
            min_confirmations: 0,
            ..wallet_config()
        },
        WalletConfig {
            scan_batch_size: 0,
            ..wallet_config()
        },
        WalletConfig {
            network: "regtest".into(),
            ..wallet_config()
        },
    ] {
        let err = WebWallet::new(&sb, config, source(&chain), None).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)), "{err:?}");
    }
    assert_eq!(sb.externrefs().live_count(), 0);
    assert_eq!(Arc::strong_count(&chain), 1);
}

#[tokio::test]
async fn test_dropping_wallet_frees_it() {
    let sb = sandbox();
    let chain = chain(1);
    let wallet = WebWallet::new(&sb, wallet_config(), source(&chain), None).unwrap();
    let id = wallet.handle_id();
    assert!(sb.is_live(id));
    drop(wallet);
    assert!(!sb.is_live(id));
    assert_eq!(Arc::strong_count(&chain), 1);
}
