//! Payment address encoding.
//!
//! Addresses render as `<prefix><hex(payload || checksum)>` where the
//! checksum is the first four bytes of `BLAKE3(prefix || payload)`. The
//! prefix identifies both the address kind and the network:
//!
//! | kind        | main | test     |
//! |-------------|------|----------|
//! | unified     | `u1` | `utest1` |
//! | transparent | `t1` | `tm`     |

use crate::crypto::hash_blake3;
use crate::error::{ErrorCode, WalletError, WalletResult};
use crate::types::{Hash, Network, Pool};

const CHECKSUM_LEN: usize = 4;

/// A decoded payment address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Shielded receiver usable in both the Sapling and Orchard pools.
    Unified { receiver: Hash },
    /// Transparent pay-to-pubkey-hash receiver.
    Transparent { pubkey_hash: [u8; 20] },
}

impl Address {
    fn prefix(&self, network: Network) -> &'static str {
        match (self, network) {
            (Self::Unified { .. }, Network::Main) => "u1",
            (Self::Unified { .. }, Network::Test) => "utest1",
            (Self::Transparent { .. }, Network::Main) => "t1",
            (Self::Transparent { .. }, Network::Test) => "tm",
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Unified { receiver } => receiver,
            Self::Transparent { pubkey_hash } => pubkey_hash,
        }
    }

    /// Render this address for `network`.
    pub fn encode(&self, network: Network) -> String {
        encode_with_checksum(self.prefix(network), self.payload())
    }

    /// Parse an address, rejecting malformed input and addresses that
    /// belong to the other network.
    pub fn decode(network: Network, s: &str) -> WalletResult<Self> {
        let candidates: [(&str, Network, bool); 4] = [
            ("utest1", Network::Test, true),
            ("u1", Network::Main, true),
            ("tm", Network::Test, false),
            ("t1", Network::Main, false),
        ];
        for (prefix, addr_network, unified) in candidates {
            if !s.starts_with(prefix) {
                continue;
            }
            if addr_network != network {
                return Err(WalletError::new(
                    ErrorCode::InvalidAddress,
                    format!("address {s} is not valid on the {network} network"),
                ));
            }
            let payload = decode_with_checksum(prefix, s)
                .ok_or_else(|| invalid_address(s))?;
            return if unified {
                let receiver: Hash = payload.try_into().map_err(|_| invalid_address(s))?;
                Ok(Self::Unified { receiver })
            } else {
                let pubkey_hash: [u8; 20] =
                    payload.try_into().map_err(|_| invalid_address(s))?;
                Ok(Self::Transparent { pubkey_hash })
            };
        }
        Err(invalid_address(s))
    }

    /// The 32-byte recipient field carried in outputs. Transparent hashes
    /// are zero-padded.
    pub fn recipient(&self) -> Hash {
        match self {
            Self::Unified { receiver } => *receiver,
            Self::Transparent { pubkey_hash } => pad_pubkey_hash(pubkey_hash),
        }
    }

    /// Pool that a payment to this address lands in.
    pub fn payment_pool(&self) -> Pool {
        match self {
            Self::Unified { .. } => Pool::Orchard,
            Self::Transparent { .. } => Pool::Transparent,
        }
    }
}

/// Zero-pad a transparent pubkey hash into an output recipient field.
pub fn pad_pubkey_hash(pubkey_hash: &[u8; 20]) -> Hash {
    let mut out = [0u8; 32];
    out[..20].copy_from_slice(pubkey_hash);
    out
}

fn invalid_address(s: &str) -> WalletError {
    WalletError::new(ErrorCode::InvalidAddress, format!("invalid address: {s}"))
}

/// Encode `payload` as `prefix || hex(payload || checksum)`.
pub fn encode_with_checksum(prefix: &str, payload: &[u8]) -> String {
    let mut body = payload.to_vec();
    body.extend_from_slice(&checksum(prefix, payload));
    format!("{prefix}{}", hex::encode(body))
}

/// Inverse of [`encode_with_checksum`]. Returns `None` on a prefix,
/// hex, or checksum mismatch.
pub fn decode_with_checksum(prefix: &str, s: &str) -> Option<Vec<u8>> {
    let body = hex::decode(s.strip_prefix(prefix)?).ok()?;
    if body.len() < CHECKSUM_LEN {
        return None;
    }
    let (payload, check) = body.split_at(body.len() - CHECKSUM_LEN);
    if check != checksum(prefix, payload) {
        return None;
    }
    Some(payload.to_vec())
}

fn checksum(prefix: &str, payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut data = prefix.as_bytes().to_vec();
    data.extend_from_slice(payload);
    let digest = hash_blake3(&data);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_prefixes() {
        let addr = Address::Unified { receiver: [9; 32] };
        assert!(addr.encode(Network::Main).starts_with("u1"));
        assert!(addr.encode(Network::Test).starts_with("utest1"));
    }

    #[test]
    fn test_decode_encoded_address() {
        let addr = Address::Transparent { pubkey_hash: [3; 20] };
        let s = addr.encode(Network::Test);
        assert!(s.starts_with("tm"));
        assert_eq!(Address::decode(Network::Test, &s).unwrap(), addr);
    }

    #[test]
    fn test_decode_rejects_other_network() {
        let s = Address::Unified { receiver: [1; 32] }.encode(Network::Main);
        let err = Address::decode(Network::Test, &s).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAddress);
        assert!(err.message.contains("test"));
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut s = Address::Unified { receiver: [1; 32] }.encode(Network::Main);
        let last = s.pop().unwrap();
        s.push(if last == '0' { '1' } else { '0' });
        assert_eq!(
            Address::decode(Network::Main, &s).unwrap_err().code,
            ErrorCode::InvalidAddress
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Address::decode(Network::Main, "").is_err());
        assert!(Address::decode(Network::Main, "zs1abc").is_err());
        assert!(Address::decode(Network::Main, "u1zz").is_err());
    }

    #[test]
    fn test_transparent_recipient_is_padded() {
        let addr = Address::Transparent { pubkey_hash: [0xff; 20] };
        let r = addr.recipient();
        assert_eq!(&r[..20], &[0xff; 20]);
        assert_eq!(&r[20..], &[0u8; 12]);
        assert_eq!(addr.payment_pool(), Pool::Transparent);
    }
}
