//! Key material: seed phrases, spending keys, viewing keys, proof
//! generation keys, and seed fingerprints.
//!
//! Derivation tree:
//!
//! ```text
//! seed ──► SeedFingerprint
//!   └──(network, hd_index)──► SpendingKey.sk
//!                               ├──► ak   (Ed25519 public key)
//!                               └──► nsk ──► nk
//! ViewingKey        = (ak, nk)
//! ProofGenerationKey = (ak, nsk)
//! ```

use rand::RngCore;
use serde::{Deserialize, Serialize};

use webz_primitives::address::{decode_with_checksum, encode_with_checksum, Address};
use webz_primitives::crypto::{self, derive_key};
use webz_primitives::{ErrorCode, Hash, Network, Signature, WalletError, WalletResult};

const SEED_FINGERPRINT_CONTEXT: &str = "webz 2024 seed fingerprint";
const SPENDING_KEY_CONTEXT: &str = "webz 2024 spending key";
const NSK_CONTEXT: &str = "webz 2024 proof generation key";
const NK_CONTEXT: &str = "webz 2024 nullifier deriving key";
const RECEIVER_CONTEXT: &str = "webz 2024 shielded receiver";

/// Smallest accepted seed, in bytes.
pub const MIN_SEED_LEN: usize = 32;

/// Largest accepted seed, in bytes.
pub const MAX_SEED_LEN: usize = 252;

/// Generate a fresh 24-word BIP-39 mnemonic from OS randomness.
pub fn generate_seed_phrase() -> WalletResult<String> {
    let mut entropy = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
        .map_err(|e| WalletError::new(ErrorCode::Internal, format!("mnemonic generation failed: {e}")))?;
    Ok(mnemonic.to_string())
}

/// Parse a BIP-39 mnemonic and derive its 64-byte seed (empty passphrase).
pub fn seed_from_phrase(phrase: &str) -> WalletResult<[u8; 64]> {
    let mnemonic = bip39::Mnemonic::parse(phrase)
        .map_err(|e| WalletError::new(ErrorCode::InvalidSeed, format!("invalid seed phrase: {e}")))?;
    Ok(mnemonic.to_seed(""))
}

fn check_seed(seed: &[u8]) -> WalletResult<()> {
    if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&seed.len()) {
        return Err(WalletError::new(
            ErrorCode::InvalidSeed,
            format!(
                "seed must be between {MIN_SEED_LEN} and {MAX_SEED_LEN} bytes, got {}",
                seed.len()
            ),
        ));
    }
    Ok(())
}

/// Identifies the seed an account was derived from without revealing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedFingerprint(Hash);

impl SeedFingerprint {
    pub fn from_seed(seed: &[u8]) -> WalletResult<Self> {
        check_seed(seed)?;
        Ok(Self(derive_key(SEED_FINGERPRINT_CONTEXT, seed)))
    }

    pub fn from_bytes(bytes: &[u8]) -> WalletResult<Self> {
        let hash: Hash = bytes.try_into().map_err(|_| {
            WalletError::new(
                ErrorCode::InvalidKey,
                format!("seed fingerprint must be 32 bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self(hash))
    }

    pub fn to_bytes(&self) -> Hash {
        self.0
    }
}

/// Unified spending key for one account.
#[derive(Clone, PartialEq, Eq)]
pub struct SpendingKey {
    network: Network,
    seed_fingerprint: SeedFingerprint,
    hd_index: u32,
    sk: [u8; 32],
}

impl std::fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpendingKey")
            .field("network", &self.network)
            .field("hd_index", &self.hd_index)
            .finish_non_exhaustive()
    }
}

impl SpendingKey {
    pub fn from_seed(network: Network, seed: &[u8], hd_index: u32) -> WalletResult<Self> {
        let seed_fingerprint = SeedFingerprint::from_seed(seed)?;
        let mut material = Vec::with_capacity(seed.len() + 5);
        material.extend_from_slice(seed);
        material.push(network.as_u8());
        material.extend_from_slice(&hd_index.to_le_bytes());
        Ok(Self {
            network,
            seed_fingerprint,
            hd_index,
            sk: derive_key(SPENDING_KEY_CONTEXT, &material),
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn hd_index(&self) -> u32 {
        self.hd_index
    }

    pub fn seed_fingerprint(&self) -> SeedFingerprint {
        self.seed_fingerprint
    }

    /// Spend authorization (public) key.
    pub fn ak(&self) -> [u8; 32] {
        crypto::ed25519_public_key(&self.sk)
    }

    pub fn proof_generation_key(&self) -> ProofGenerationKey {
        ProofGenerationKey {
            ak: self.ak(),
            nsk: derive_key(NSK_CONTEXT, &self.sk),
        }
    }

    pub fn to_viewing_key(&self) -> ViewingKey {
        ViewingKey {
            ak: self.ak(),
            nk: self.proof_generation_key().nk(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(crypto::sign_ed25519(message, &self.sk))
    }
}

/// Key material a prover needs to build Sapling spend proofs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofGenerationKey {
    ak: [u8; 32],
    nsk: Hash,
}

impl ProofGenerationKey {
    pub fn ak(&self) -> [u8; 32] {
        self.ak
    }

    /// Nullifier deriving key; must match the `nk` of every spend proven
    /// with this key.
    pub fn nk(&self) -> Hash {
        derive_key(NK_CONTEXT, &self.nsk)
    }
}

/// Unified full viewing key. Detects incoming notes and their spends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewingKey {
    pub ak: [u8; 32],
    pub nk: Hash,
}

impl ViewingKey {
    fn prefix(network: Network) -> &'static str {
        match network {
            Network::Main => "uview1",
            Network::Test => "uviewtest1",
        }
    }

    pub fn encode(&self, network: Network) -> String {
        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(&self.ak);
        payload.extend_from_slice(&self.nk);
        encode_with_checksum(Self::prefix(network), &payload)
    }

    pub fn decode(network: Network, s: &str) -> WalletResult<Self> {
        let other = match network {
            Network::Main => Network::Test,
            Network::Test => Network::Main,
        };
        if s.starts_with(Self::prefix(other)) {
            return Err(WalletError::new(
                ErrorCode::InvalidKey,
                format!("viewing key is not valid on the {network} network"),
            ));
        }
        let invalid = || WalletError::new(ErrorCode::InvalidKey, "invalid unified full viewing key");
        let payload = decode_with_checksum(Self::prefix(network), s).ok_or_else(invalid)?;
        if payload.len() != 64 {
            return Err(invalid());
        }
        let mut ak = [0u8; 32];
        let mut nk = [0u8; 32];
        ak.copy_from_slice(&payload[..32]);
        nk.copy_from_slice(&payload[32..]);
        if !crypto::is_valid_public_key(&ak) {
            return Err(invalid());
        }
        Ok(Self { ak, nk })
    }

    /// Shielded receiver that payments to this account land on.
    pub fn receiver(&self) -> Hash {
        let mut material = [0u8; 64];
        material[..32].copy_from_slice(&self.ak);
        material[32..].copy_from_slice(&self.nk);
        derive_key(RECEIVER_CONTEXT, &material)
    }

    pub fn transparent_pubkey_hash(&self) -> [u8; 20] {
        let digest = crypto::hash_sha256(&self.ak);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        out
    }

    pub fn unified_address(&self) -> Address {
        Address::Unified {
            receiver: self.receiver(),
        }
    }

    pub fn transparent_address(&self) -> Address {
        Address::Transparent {
            pubkey_hash: self.transparent_pubkey_hash(),
        }
    }

    /// Nullifier revealed when the note with `commitment` is spent.
    pub fn nullifier(&self, commitment: &Hash) -> Hash {
        crypto::keyed_hash(&self.nk, commitment)
    }
}
