//! Partially Created Zcash Transaction (PCZT) data model.
//!
//! A PCZT carries a transaction's effects (what it spends and creates)
//! together with the authorization gathered so far. Signers and provers
//! only fill in the optional authorization fields; they never touch the
//! effects, so [`Pczt::sighash`] is stable across the whole lifecycle.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec;
use crate::crypto::hash_blake3;
use crate::error::{WalletError, WalletResult};
use crate::types::{BlockHeight, Hash, Network, OutPoint, Pool, Zatoshis, MAX_MONEY};

/// A zero-knowledge proof stand-in: a 32-byte binding to the statement.
pub type Proof = Hash;

/// Ed25519 signature bytes. Serializes as a hex string.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let sig: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Self(sig))
    }
}

/// A shielded note being spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedSpend {
    pub pool: Pool,
    pub nullifier: Hash,
    pub value: Zatoshis,
    /// Spend authorization key; signatures verify against it.
    pub ak: [u8; 32],
    /// Nullifier deriving key; spend proofs bind to it.
    pub nk: Hash,
    pub spend_auth_sig: Option<Signature>,
    /// Required for Sapling spends. Orchard spends are covered by the
    /// bundle-level [`Pczt::orchard_proof`].
    pub proof: Option<Proof>,
}

/// A transparent UTXO being spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentInput {
    pub outpoint: OutPoint,
    pub value: Zatoshis,
    pub pubkey: [u8; 32],
    pub signature: Option<Signature>,
}

/// An output the transaction creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcztOutput {
    pub pool: Pool,
    pub recipient: Hash,
    pub value: Zatoshis,
    pub commitment: Hash,
    pub is_change: bool,
    /// Required for Sapling outputs only.
    pub proof: Option<Proof>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pczt {
    pub network: Network,
    pub target_height: BlockHeight,
    pub expiry_height: BlockHeight,
    pub fee: Zatoshis,
    pub spends: Vec<ShieldedSpend>,
    pub transparent_inputs: Vec<TransparentInput>,
    pub outputs: Vec<PcztOutput>,
    pub orchard_proof: Option<Proof>,
}

impl Pczt {
    /// Digest over the effects only. Identical for every partial
    /// authorization of the same draft.
    pub fn sighash(&self) -> Hash {
        hash_blake3(&codec::encode_pczt_effects(self))
    }

    pub fn total_input(&self) -> WalletResult<Zatoshis> {
        let spends = self.spends.iter().map(|s| s.value);
        let transparent = self.transparent_inputs.iter().map(|i| i.value);
        money_sum(spends.chain(transparent), "inputs")
    }

    pub fn total_output(&self) -> WalletResult<Zatoshis> {
        money_sum(self.outputs.iter().map(|o| o.value), "outputs")
    }

    /// Rejects any amount, or total of amounts, above [`MAX_MONEY`].
    pub fn check_amounts(&self) -> WalletResult<()> {
        if self.fee > MAX_MONEY {
            return Err(WalletError::invalid_argument(format!(
                "PCZT fee {} exceeds the maximum of {MAX_MONEY}",
                self.fee
            )));
        }
        self.total_input()?;
        self.total_output()?;
        Ok(())
    }

    /// True when inputs equal outputs plus fee, with every amount in range.
    pub fn is_balanced(&self) -> WalletResult<bool> {
        self.check_amounts()?;
        Ok(self.total_output()? + self.fee == self.total_input()?)
    }

    /// True when any spend or output lives in the Orchard pool.
    pub fn has_orchard(&self) -> bool {
        self.spends.iter().any(|s| s.pool == Pool::Orchard)
            || self.outputs.iter().any(|o| o.pool == Pool::Orchard)
    }

    pub fn is_signed(&self) -> bool {
        self.spends.iter().all(|s| s.spend_auth_sig.is_some())
            && self.transparent_inputs.iter().all(|i| i.signature.is_some())
    }

    pub fn is_proven(&self) -> bool {
        let sapling_spends = self
            .spends
            .iter()
            .filter(|s| s.pool == Pool::Sapling)
            .all(|s| s.proof.is_some());
        let sapling_outputs = self
            .outputs
            .iter()
            .filter(|o| o.pool == Pool::Sapling)
            .all(|o| o.proof.is_some());
        sapling_spends && sapling_outputs && (!self.has_orchard() || self.orchard_proof.is_some())
    }

    /// Binary serialization (see [`codec::encode_pczt`]).
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode_pczt(self)
    }
}

fn money_sum(values: impl Iterator<Item = Zatoshis>, what: &str) -> WalletResult<Zatoshis> {
    let mut total: Zatoshis = 0;
    for value in values {
        total = value
            .checked_add(total)
            .filter(|t| *t <= MAX_MONEY)
            .ok_or_else(|| {
                WalletError::invalid_argument(format!(
                    "PCZT {what} exceed the maximum of {MAX_MONEY}"
                ))
            })?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pczt {
        Pczt {
            network: Network::Test,
            target_height: 100,
            expiry_height: 140,
            fee: 10_000,
            spends: vec![ShieldedSpend {
                pool: Pool::Orchard,
                nullifier: [1; 32],
                value: 60_000,
                ak: [2; 32],
                nk: [3; 32],
                spend_auth_sig: None,
                proof: None,
            }],
            transparent_inputs: vec![],
            outputs: vec![PcztOutput {
                pool: Pool::Orchard,
                recipient: [4; 32],
                value: 50_000,
                commitment: [5; 32],
                is_change: false,
                proof: None,
            }],
            orchard_proof: None,
        }
    }

    #[test]
    fn test_sighash_ignores_authorization() {
        let mut p = sample();
        let before = p.sighash();
        p.spends[0].spend_auth_sig = Some(Signature([9; 64]));
        p.orchard_proof = Some([8; 32]);
        assert_eq!(p.sighash(), before);
    }

    #[test]
    fn test_sighash_commits_to_effects() {
        let mut p = sample();
        let before = p.sighash();
        p.outputs[0].value += 1;
        assert_ne!(p.sighash(), before);
    }

    #[test]
    fn test_balance_totals() {
        let p = sample();
        assert_eq!(p.total_input().unwrap(), 60_000);
        assert_eq!(p.total_output().unwrap() + p.fee, 60_000);
        assert!(p.is_balanced().unwrap());
    }

    #[test]
    fn test_out_of_range_amounts_rejected() {
        let mut p = sample();
        p.outputs.push(p.outputs[0].clone());
        p.outputs[0].value = u64::MAX;
        p.outputs[1].value = u64::MAX;
        let err = p.total_output().unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidArgument);
        assert!(p.is_balanced().is_err());

        let mut p = sample();
        p.spends[0].value = MAX_MONEY + 1;
        assert!(p.total_input().is_err());

        let mut p = sample();
        p.fee = u64::MAX;
        assert!(p.check_amounts().is_err());
    }

    #[test]
    fn test_authorization_flags() {
        let mut p = sample();
        assert!(!p.is_signed());
        assert!(!p.is_proven());
        p.spends[0].spend_auth_sig = Some(Signature([9; 64]));
        p.orchard_proof = Some([8; 32]);
        assert!(p.is_signed());
        assert!(p.is_proven());
    }

    #[test]
    fn test_signature_json_is_hex() {
        let json = serde_json::to_string(&Signature([0xab; 64])).unwrap();
        assert_eq!(json.len(), 130);
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Signature([0xab; 64]));
        assert!(serde_json::from_str::<Signature>("\"abcd\"").is_err());
    }
}
