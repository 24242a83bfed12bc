//! Handle ownership tests: single owner, consumption, stale ids, and
//! freeing on drop.

mod common;

use webz_sandbox::{
    HandleId, Owned, Pczt, ResourceClass, SandboxError, SeedFingerprint, UnifiedFullViewingKey,
    UnifiedSpendingKey,
};

use common::*;

fn lifecycle_error<T: std::fmt::Debug>(result: Result<T, SandboxError>) -> String {
    match result {
        Err(SandboxError::Lifecycle(message)) => message,
        other => panic!("expected a lifecycle error, got {other:?}"),
    }
}

#[test]
fn test_handle_carries_its_class() {
    let sb = sandbox();
    let usk = UnifiedSpendingKey::new(&sb, "test", &[1u8; 32], 0).unwrap();
    assert_eq!(usk.id().class(), Some(ResourceClass::UnifiedSpendingKey));
    assert!(!usk.id().is_null());
    assert!(sb.is_wrapped(usk.id()));
}

#[test]
fn test_second_wrapper_rejected() {
    let sb = sandbox();
    let usk = UnifiedSpendingKey::new(&sb, "test", &[1u8; 32], 0).unwrap();
    let message = lifecycle_error(UnifiedSpendingKey::wrap(&sb, usk.id()));
    assert!(message.contains("already wrapped"), "{message}");
}

#[test]
fn test_released_handle_can_be_rewrapped() {
    let sb = sandbox();
    let usk = UnifiedSpendingKey::new(&sb, "test", &[1u8; 32], 0).unwrap();
    let id = usk.release();
    assert!(!sb.is_wrapped(id));
    assert!(sb.is_live(id));

    let again = UnifiedSpendingKey::from_raw(&sb, id.raw()).unwrap();
    assert_eq!(again.id(), id);
}

#[test]
fn test_wrong_class_rejected() {
    let sb = sandbox();
    let usk = UnifiedSpendingKey::new(&sb, "test", &[1u8; 32], 0).unwrap();
    let id = usk.release();
    let message = lifecycle_error(UnifiedFullViewingKey::wrap(&sb, id));
    assert!(message.contains("cannot wrap"), "{message}");
    assert!(sb.is_live(id));
    sb.free_resource(id).unwrap();
}

#[test]
fn test_null_handle_cannot_be_wrapped_or_freed() {
    let sb = sandbox();
    lifecycle_error(Pczt::wrap(&sb, HandleId::NULL));
    let message = lifecycle_error(sb.free_resource(HandleId::NULL));
    assert_eq!(message, "cannot free a null handle");
}

#[test]
fn test_drop_frees_object() {
    let sb = sandbox();
    let id = {
        let fp = SeedFingerprint::new(&sb, &[4u8; 32]).unwrap();
        assert_eq!(sb.live_handles(), 1);
        fp.id()
    };
    assert_eq!(sb.live_handles(), 0);
    assert!(!sb.is_live(id));
    assert!(!sb.is_wrapped(id));
}

#[test]
fn test_destroy_then_free_again_fails() {
    let sb = sandbox();
    let fp = SeedFingerprint::new(&sb, &[4u8; 32]).unwrap();
    let id = fp.id();
    fp.destroy().unwrap();
    let message = lifecycle_error(sb.free_resource(id));
    assert!(message.contains("already consumed or freed"), "{message}");
}

#[test]
fn test_stale_id_does_not_reach_new_object() {
    let sb = sandbox();
    let first = SeedFingerprint::new(&sb, &[4u8; 32]).unwrap();
    let stale = first.id();
    first.destroy().unwrap();

    let second = SeedFingerprint::new(&sb, &[5u8; 32]).unwrap();
    assert_ne!(second.id(), stale);
    assert_ne!(second.id().generation(), stale.generation());
    assert!(!sb.is_live(stale));
    lifecycle_error(SeedFingerprint::wrap(&sb, stale));
}

#[test]
fn test_raw_bits_that_are_not_a_handle() {
    let sb = sandbox();
    let bogus = HandleId::from_raw(0xff00_0000_0000_0001);
    assert_eq!(bogus.class(), None);
    let message = lifecycle_error(sb.free_resource(bogus));
    assert!(message.contains("is not a handle"), "{message}");
}

#[tokio::test]
async fn test_ownership_taking_call_consumes_even_on_failure() {
    let sb = sandbox();
    let chain = chain(3);
    let wallet = open_wallet(&sb, &chain);
    let fp = SeedFingerprint::new(&sb, &phrase_seed()).unwrap();
    let fp_id = fp.id();

    let err = wallet
        .create_account_ufvk("imported", "not a viewing key", fp, 0, Some(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(webz_primitives::ErrorCode::InvalidKey));
    assert!(!sb.is_live(fp_id));
    assert!(!sb.is_wrapped(fp_id));
}

#[tokio::test]
async fn test_handles_from_another_sandbox_rejected() {
    let sb = sandbox();
    let other = sandbox();
    let chain = chain(3);
    let wallet = open_wallet(&sb, &chain);
    let foreign = SeedFingerprint::new(&other, &phrase_seed()).unwrap();
    let foreign_id = foreign.id();

    let message = lifecycle_error(
        wallet
            .create_account_ufvk("imported", "irrelevant", foreign, 0, Some(1))
            .await,
    );
    assert!(message.contains("different sandboxes"), "{message}");
    assert!(!other.is_live(foreign_id));
}

#[test]
fn test_wrappers_are_typed_by_class() {
    fn class_of<R: webz_sandbox::Resource>(_: &Owned<R>) -> ResourceClass {
        R::CLASS
    }
    let sb = sandbox();
    let usk = UnifiedSpendingKey::new(&sb, "main", &[2u8; 32], 0).unwrap();
    let ufvk = usk.to_unified_full_viewing_key().unwrap();
    let pgk = usk.to_sapling_proof_generation_key().unwrap();
    assert_eq!(class_of(&ufvk), ResourceClass::UnifiedFullViewingKey);
    assert_eq!(class_of(&pgk), ResourceClass::ProofGenerationKey);
    assert_eq!(sb.live_handles(), 3);
}
