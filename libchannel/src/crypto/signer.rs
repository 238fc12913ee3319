//! Signing and verification of channel commitments.
//!
//! Signatures are Schnorr signatures over Curve25519 with a Blake2b-512 challenge. The nonce is derived
//! deterministically from the secret key and the message, so signing needs no randomness.

use crate::crypto::keys::{PublicKey, SecretKey};
use crate::primitives::{Address, Bytes32, PrimitiveError, PublicIdentifier};
use blake2::{Blake2b512, Digest};
use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::Scalar;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Something that can sign channel commitments on behalf of one participant.
pub trait ChannelSigner: Send + Sync {
    /// The on-chain signing address.
    fn address(&self) -> Address;

    fn public_identifier(&self) -> &PublicIdentifier;

    fn sign_message(&self, hash: &Bytes32) -> ChannelSignature;
}

/// A 64-byte signature: the compressed public nonce followed by the response scalar.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelSignature {
    public_nonce: [u8; 32],
    s: [u8; 32],
}

impl ChannelSignature {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut result = [0u8; 64];
        result[..32].copy_from_slice(&self.public_nonce);
        result[32..].copy_from_slice(&self.s);
        result
    }
}

impl FromStr for ChannelSignature {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_str = s.strip_prefix("0x").ok_or(PrimitiveError::MissingPrefix)?;
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 64 {
            return Err(PrimitiveError::InvalidLength { expected: 64, actual: bytes.len() });
        }
        let mut public_nonce = [0u8; 32];
        let mut s = [0u8; 32];
        public_nonce.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(ChannelSignature { public_nonce, s })
    }
}

impl Display for ChannelSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl Debug for ChannelSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sig({}..)", &hex::encode(self.public_nonce)[..8])
    }
}

impl Serialize for ChannelSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChannelSignature::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn challenge(public_nonce: &[u8; 32], public_key: &PublicKey, message: &Bytes32) -> Scalar {
    let mut hasher = Blake2b512::new();
    hasher.update(b"ChannelSignature v1");
    hasher.update(public_nonce);
    hasher.update(public_key.as_bytes());
    hasher.update(message.as_bytes());
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn signing_nonce(secret: &SecretKey, message: &Bytes32) -> Scalar {
    let mut hasher = Blake2b512::new();
    hasher.update(b"ChannelSignature nonce");
    hasher.update(secret.scalar().as_bytes());
    hasher.update(message.as_bytes());
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Verifies `signature` over `hash` against the key embedded in `signer`.
pub fn verify_signature(hash: &Bytes32, signature: &ChannelSignature, signer: &PublicIdentifier) -> bool {
    let public_nonce = match PublicKey::from_bytes(signature.public_nonce) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let s = match Scalar::from_canonical_bytes(signature.s).into_option() {
        Some(s) => s,
        None => return false,
    };
    let key = signer.public_key();
    let c = challenge(&signature.public_nonce, key, hash);
    let lhs = &s * ED25519_BASEPOINT_TABLE;
    let rhs = public_nonce.point() + c * key.point();
    lhs == rhs
}

/// A [`ChannelSigner`] backed by an in-memory Curve25519 secret key.
#[derive(Clone)]
pub struct KeySigner {
    secret: SecretKey,
    identifier: PublicIdentifier,
}

impl KeySigner {
    pub fn new(secret: SecretKey) -> Self {
        KeySigner { identifier: PublicIdentifier::from_public_key(secret.public_key()), secret }
    }

    pub fn random() -> Self {
        KeySigner::new(SecretKey::generate(&mut rand::rng()))
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl Debug for KeySigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeySigner({})", self.identifier)
    }
}

impl ChannelSigner for KeySigner {
    fn address(&self) -> Address {
        self.identifier.signer_address()
    }

    fn public_identifier(&self) -> &PublicIdentifier {
        &self.identifier
    }

    fn sign_message(&self, hash: &Bytes32) -> ChannelSignature {
        let r = signing_nonce(&self.secret, hash);
        let public_nonce = (&r * ED25519_BASEPOINT_TABLE).compress().to_bytes();
        let c = challenge(&public_nonce, self.identifier.public_key(), hash);
        let s = r + c * self.secret.scalar();
        ChannelSignature { public_nonce, s: s.to_bytes() }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hashes::hash32;

    #[test]
    fn sign_and_verify() {
        let signer = KeySigner::random();
        let msg = hash32(b"state commitment");
        let sig = signer.sign_message(&msg);
        assert!(verify_signature(&msg, &sig, signer.public_identifier()));
        // Deterministic nonce
        assert_eq!(sig, signer.sign_message(&msg));
    }

    #[test]
    fn wrong_key_or_message_fails() {
        let alice = KeySigner::random();
        let bob = KeySigner::random();
        let msg = hash32(b"state commitment");
        let sig = alice.sign_message(&msg);
        assert!(!verify_signature(&msg, &sig, bob.public_identifier()));
        assert!(!verify_signature(&hash32(b"other"), &sig, alice.public_identifier()));
    }

    #[test]
    fn signature_string_round_trip() {
        let signer = KeySigner::random();
        let sig = signer.sign_message(&hash32(b"x"));
        let parsed: ChannelSignature = sig.to_string().parse().unwrap();
        assert_eq!(parsed, sig);
        assert!("0x1234".parse::<ChannelSignature>().is_err());
    }
}
