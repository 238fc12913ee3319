//! Curve25519 key material for channel participants.

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::{EdwardsPoint, Scalar};
use hex::FromHexError;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("A key is 32 bytes, hex-encoded")]
    InvalidLength,
    #[error("Invalid hex in key: {0}")]
    InvalidHex(#[from] FromHexError),
    #[error("Secret key is not a canonical scalar")]
    NonCanonicalScalar,
    #[error("Public key is not a point on the curve")]
    InvalidPoint,
}

fn decode_key_bytes(hex_str: &str) -> Result<[u8; 32], KeyError> {
    if hex_str.len() != 64 {
        return Err(KeyError::InvalidLength);
    }
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex_str, &mut bytes)?;
    Ok(bytes)
}

/// A participant's signing scalar. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Zeroizing<Scalar>);

impl SecretKey {
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut wide = Zeroizing::new([0u8; 64]);
        rng.fill_bytes(&mut wide[..]);
        SecretKey(Zeroizing::new(Scalar::from_bytes_mod_order_wide(&wide)))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(decode_key_bytes(hex_str)?);
        let scalar = Scalar::from_canonical_bytes(*bytes).into_option().ok_or(KeyError::NonCanonicalScalar)?;
        Ok(SecretKey(Zeroizing::new(scalar)))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.scalar() * ED25519_BASEPOINT_TABLE)
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.0
    }
}

impl Debug for SecretKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        SecretKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A participant's public key, kept in both compressed and decompressed form.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    compressed: CompressedEdwardsY,
    point: EdwardsPoint,
}

impl PublicKey {
    /// Fails unless `bytes` is a valid compressed point.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, KeyError> {
        let compressed = CompressedEdwardsY(bytes);
        let point = compressed.decompress().ok_or(KeyError::InvalidPoint)?;
        Ok(PublicKey { compressed, point })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        Self::from_bytes(decode_key_bytes(hex_str)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.compressed.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.compressed.as_bytes()
    }

    pub fn point(&self) -> EdwardsPoint {
        self.point
    }
}

impl From<EdwardsPoint> for PublicKey {
    fn from(point: EdwardsPoint) -> Self {
        PublicKey { compressed: point.compress(), point }
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.compressed.as_bytes().hash(state);
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_survive_hex() {
        let secret = SecretKey::generate(&mut rand::rng());
        let restored = SecretKey::from_hex(&secret.to_hex()).unwrap();
        assert_eq!(restored, secret);
        let public = secret.public_key();
        assert_eq!(restored.public_key(), public);
        assert_eq!(PublicKey::from_hex(&public.to_hex()).unwrap(), public);
        assert_eq!(PublicKey::from_bytes(*public.as_bytes()).unwrap(), public);
    }

    #[test]
    fn malformed_keys_are_refused() {
        // Above the group order
        assert!(matches!(SecretKey::from_hex(&"ff".repeat(32)), Err(KeyError::NonCanonicalScalar)));
        assert!(matches!(SecretKey::from_hex("0a0b0c"), Err(KeyError::InvalidLength)));
        let mut bad = SecretKey::generate(&mut rand::rng()).public_key().to_hex();
        bad.replace_range(0..1, "g");
        assert!(matches!(
            PublicKey::from_hex(&bad),
            Err(KeyError::InvalidHex(FromHexError::InvalidHexCharacter { c: 'g', index: 0 }))
        ));
    }
}
