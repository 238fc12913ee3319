//! Wire-level identifiers: addresses, 32-byte values and participant identifiers.
//!
//! All three types serialize as strings so that stored state and protocol messages stay human-readable.

use crate::crypto::keys::{KeyError, PublicKey};
use crate::hashes::hash32;
use hex::FromHexError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

const IDENTIFIER_PREFIX: &str = "chan";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("Value must be 0x-prefixed")]
    MissingPrefix,
    #[error("Expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Invalid public identifier: {0}")]
    InvalidIdentifier(String),
}

impl From<FromHexError> for PrimitiveError {
    fn from(err: FromHexError) -> Self {
        PrimitiveError::InvalidHex(err.to_string())
    }
}

fn decode_prefixed<const N: usize>(s: &str) -> Result<[u8; N], PrimitiveError> {
    let hex_str = s.strip_prefix("0x").ok_or(PrimitiveError::MissingPrefix)?;
    if hex_str.len() != N * 2 {
        return Err(PrimitiveError::InvalidLength { expected: N, actual: hex_str.len() / 2 });
    }
    let mut result = [0u8; N];
    hex::decode_to_slice(hex_str, &mut result)?;
    Ok(result)
}

macro_rules! string_serde {
    ($t:ty) => {
        impl Serialize for $t {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$t>::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

//------------------------------------           Address          ------------------------------------------------//

/// A 20-byte address, used for channels, participants, assets and transfer definitions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address. As an asset id it denotes the chain's native asset.
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn new(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Derives an address from arbitrary bytes by taking the last 20 bytes of their hash.
    pub fn derive_from<B: AsRef<[u8]>>(input: B) -> Self {
        let hash = hash32(input);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[12..]);
        Address(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl FromStr for Address {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed::<20>(&s.to_ascii_lowercase()).map(Address)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

string_serde!(Address);

//------------------------------------           Bytes32          ------------------------------------------------//

/// A 32-byte value: hashes, Merkle roots, transfer ids and routing ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Bytes32([u8; 32]);

impl Bytes32 {
    pub const ZERO: Bytes32 = Bytes32([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Bytes32(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn random() -> Self {
        Bytes32(rand::random())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrimitiveError> {
        let arr: [u8; 32] =
            bytes.try_into().map_err(|_| PrimitiveError::InvalidLength { expected: 32, actual: bytes.len() })?;
        Ok(Bytes32(arr))
    }
}

impl FromStr for Bytes32 {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed::<32>(&s.to_ascii_lowercase()).map(Bytes32)
    }
}

impl Display for Bytes32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Bytes32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

string_serde!(Bytes32);

//------------------------------------       PublicIdentifier     ------------------------------------------------//

/// The public identity of a channel participant: `chan` followed by the hex-encoded Curve25519 public key.
///
/// Messages are routed by identifier, and signatures are verified against the key it embeds.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicIdentifier {
    key: PublicKey,
}

impl PublicIdentifier {
    pub fn from_public_key(key: PublicKey) -> Self {
        PublicIdentifier { key }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    /// The on-chain signing address belonging to this identifier.
    pub fn signer_address(&self) -> Address {
        Address::derive_from(self.key.as_bytes())
    }
}

impl FromStr for PublicIdentifier {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_key =
            s.strip_prefix(IDENTIFIER_PREFIX).ok_or_else(|| PrimitiveError::InvalidIdentifier(s.to_string()))?;
        let key = PublicKey::from_hex(hex_key)
            .map_err(|e: KeyError| PrimitiveError::InvalidIdentifier(e.to_string()))?;
        Ok(PublicIdentifier { key })
    }
}

impl Display for PublicIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{IDENTIFIER_PREFIX}{}", self.key.to_hex())
    }
}

impl Debug for PublicIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

string_serde!(PublicIdentifier);

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::keys::SecretKey;

    #[test]
    fn address_parsing() {
        let addr: Address = "0x00000000000000000000000000000000000000aB".parse().unwrap();
        assert_eq!(addr.to_string(), "0x00000000000000000000000000000000000000ab");
        assert!(matches!(
            "00000000000000000000000000000000000000ab".parse::<Address>(),
            Err(PrimitiveError::MissingPrefix)
        ));
        assert!(matches!("0x00ab".parse::<Address>(), Err(PrimitiveError::InvalidLength { expected: 20, .. })));
        assert!(matches!(
            "0x000000000000000000000000000000000000zzzz".parse::<Address>(),
            Err(PrimitiveError::InvalidHex(_))
        ));
        assert!(Address::ZERO.is_zero());
    }

    #[test]
    fn bytes32_parsing() {
        let s = "0x4dd896d542721742aff8671ba42aff0c4c846bea79065cf39a191bbeb11ea634";
        let b: Bytes32 = s.parse().unwrap();
        assert_eq!(b.to_string(), s);
        assert!(s[..60].parse::<Bytes32>().is_err());
        assert!(Bytes32::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn identifier_round_trip() {
        let key = SecretKey::generate(&mut rand::rng()).public_key();
        let id = PublicIdentifier::from_public_key(key);
        let s = id.to_string();
        assert!(s.starts_with("chan"));
        let parsed: PublicIdentifier = s.parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.signer_address(), id.signer_address());
        assert!("vector1234".parse::<PublicIdentifier>().is_err());
    }
}
