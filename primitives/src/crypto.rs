//! Cryptographic operations for the WebZ wallet layer.
//!
//! - BLAKE3 for digests, key derivation, and keyed commitments
//! - SHA-256 for transparent address hashing
//! - Ed25519 for spend authorization signatures
//!
//! Everything here is deterministic. Randomness (seed generation) lives in
//! the engine's key module.

use crate::types::Hash;

/// Compute BLAKE3 hash of the input data.
pub fn hash_blake3(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Derive a 32-byte key from `material` under a domain-separation context.
///
/// Contexts are fixed strings; two different contexts never yield related
/// outputs for the same material.
pub fn derive_key(context: &str, material: &[u8]) -> Hash {
    blake3::derive_key(context, material)
}

/// Keyed BLAKE3 (MAC mode).
pub fn keyed_hash(key: &Hash, data: &[u8]) -> Hash {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Compute SHA-256 hash of the input data.
pub fn hash_sha256(data: &[u8]) -> Hash {
    use sha2::Digest;
    let result = sha2::Sha256::digest(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Public key for an Ed25519 secret scalar seed.
pub fn ed25519_public_key(secret: &[u8; 32]) -> [u8; 32] {
    ed25519_dalek::SigningKey::from_bytes(secret)
        .verifying_key()
        .to_bytes()
}

/// Sign a message with an Ed25519 secret key.
pub fn sign_ed25519(message: &[u8], secret: &[u8; 32]) -> [u8; 64] {
    use ed25519_dalek::Signer;
    ed25519_dalek::SigningKey::from_bytes(secret)
        .sign(message)
        .to_bytes()
}

/// Verify an Ed25519 signature.
///
/// Returns `true` if the signature is valid for the given message and
/// public key, `false` otherwise (including when the key does not decode).
pub fn verify_ed25519(message: &[u8], signature: &[u8; 64], public_key: &[u8; 32]) -> bool {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    verifying_key.verify(message, &sig).is_ok()
}

/// Returns true if `bytes` decode to a valid Ed25519 public key.
pub fn is_valid_public_key(bytes: &[u8; 32]) -> bool {
    ed25519_dalek::VerifyingKey::from_bytes(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_deterministic() {
        let h1 = hash_blake3(b"hello webz");
        let h2 = hash_blake3(b"hello webz");
        assert_eq!(h1, h2);
        assert_ne!(h1, hash_blake3(b"hello webz!"));
    }

    #[test]
    fn test_derive_key_domain_separation() {
        let a = derive_key("webz test context A", b"material");
        let b = derive_key("webz test context B", b"material");
        assert_ne!(a, b);
        assert_eq!(a, derive_key("webz test context A", b"material"));
    }

    #[test]
    fn test_keyed_hash_depends_on_key() {
        assert_ne!(keyed_hash(&[1; 32], b"x"), keyed_hash(&[2; 32], b"x"));
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("") = e3b0c442...7852b855
        let h = hash_sha256(b"");
        assert_eq!(h[0], 0xe3);
        assert_eq!(h[1], 0xb0);
        assert_eq!(h[31], 0x55);
    }

    #[test]
    fn test_ed25519_sign_verify_roundtrip() {
        let secret = [42u8; 32];
        let public = ed25519_public_key(&secret);
        let signature = sign_ed25519(b"spend authorization", &secret);
        assert!(verify_ed25519(b"spend authorization", &signature, &public));
        assert!(is_valid_public_key(&public));
    }

    #[test]
    fn test_ed25519_reject_wrong_message() {
        let secret = [7u8; 32];
        let public = ed25519_public_key(&secret);
        let signature = sign_ed25519(b"correct message", &secret);
        assert!(!verify_ed25519(b"wrong message", &signature, &public));
    }

    #[test]
    fn test_ed25519_reject_wrong_key() {
        let signature = sign_ed25519(b"msg", &[1u8; 32]);
        let other = ed25519_public_key(&[2u8; 32]);
        assert!(!verify_ed25519(b"msg", &signature, &other));
    }
}
