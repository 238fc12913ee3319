use crate::primitives::Bytes32;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Blake2b with a 32-byte output. All commitments in the channel protocol use this hash.
pub type Blake2b256 = Blake2b<U32>;

/// Hashes the input bytes to a [`Bytes32`].
pub fn hash32<B: AsRef<[u8]>>(input: B) -> Bytes32 {
    let mut hasher = Blake2b256::new();
    hasher.update(input.as_ref());
    finalize(hasher)
}

fn finalize(hasher: Blake2b256) -> Bytes32 {
    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Bytes32::new(bytes)
}

/// A labelled transcript for hashing structured values.
///
/// Every field is appended as `len(label) || label || len(value) || value`, with lengths as little-endian u64, so
/// two different field sequences can never produce the same byte stream. Both channel parties must append fields in
/// exactly the same order.
pub struct CommitmentHasher {
    hasher: Blake2b256,
}

impl CommitmentHasher {
    pub fn new(domain: &'static [u8]) -> Self {
        let mut result = CommitmentHasher { hasher: Blake2b256::new() };
        result.append(b"domain", domain);
        result
    }

    pub fn append<B: AsRef<[u8]>>(&mut self, label: &'static [u8], value: B) -> &mut Self {
        let value = value.as_ref();
        self.hasher.update((label.len() as u64).to_le_bytes());
        self.hasher.update(label);
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    pub fn append_u64(&mut self, label: &'static [u8], value: u64) -> &mut Self {
        self.append(label, value.to_le_bytes())
    }

    pub fn finish(self) -> Bytes32 {
        finalize(self.hasher)
    }
}
