//! A deterministic Merkle tree over the hashes of the open transfers in a channel.
//!
//! Leaves are deduplicated and sorted before the tree is built, and pairs are combined with
//! `hash(min(a, b) || max(a, b))`, so two parties enumerating the same set in different orders always agree on the
//! root. An empty set commits to the zero hash.

use crate::hashes::Blake2b256;
use crate::primitives::Bytes32;
use blake2::Digest;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Merkle leaf is not a 32-byte hex value: {0}")]
    InvalidLeaf(String),
    #[error("Element {0} is not a leaf of this tree")]
    ElementNotFound(Bytes32),
}

/// `hash(sort(a, b))`
pub fn combine(a: &Bytes32, b: &Bytes32) -> Bytes32 {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Blake2b256::new();
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Bytes32::new(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// The original (deduplicated, sorted) elements, before any zero-hash padding.
    elements: Vec<Bytes32>,
    /// `layers[0]` holds the padded leaves; the last layer holds the root.
    layers: Vec<Vec<Bytes32>>,
}

impl MerkleTree {
    pub fn new<I: IntoIterator<Item = Bytes32>>(hashes: I) -> Self {
        let mut elements: Vec<Bytes32> = hashes.into_iter().collect();
        elements.sort();
        elements.dedup();
        if elements.is_empty() {
            return MerkleTree { elements, layers: vec![vec![Bytes32::ZERO]] };
        }
        let mut leaves = elements.clone();
        if leaves.len() % 2 == 1 {
            leaves.push(Bytes32::ZERO);
        }
        let layers = build_layers(leaves);
        MerkleTree { elements, layers }
    }

    /// Builds a tree from hex-encoded leaves, rejecting anything that is not exactly 32 bytes.
    pub fn from_hex<S: AsRef<str>>(hashes: &[S]) -> Result<Self, MerkleError> {
        let leaves = hashes
            .iter()
            .map(|h| Bytes32::from_str(h.as_ref()).map_err(|_| MerkleError::InvalidLeaf(h.as_ref().to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(leaves))
    }

    pub fn root(&self) -> Bytes32 {
        self.layers.last().and_then(|l| l.first()).copied().unwrap_or(Bytes32::ZERO)
    }

    pub fn contains(&self, element: &Bytes32) -> bool {
        self.elements.binary_search(element).is_ok()
    }

    /// The sibling path from `element` up to (but excluding) the root.
    pub fn proof(&self, element: &Bytes32) -> Result<Vec<Bytes32>, MerkleError> {
        let mut index = self.elements.binary_search(element).map_err(|_| MerkleError::ElementNotFound(*element))?;
        let mut proof = Vec::with_capacity(self.layers.len());
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = index ^ 1;
            if sibling < layer.len() {
                proof.push(layer[sibling]);
            }
            index /= 2;
        }
        Ok(proof)
    }

    /// The proof for `element` in its flat wire form: the element followed by each sibling, 32 bytes apiece.
    pub fn proof_bytes(&self, element: &Bytes32) -> Result<Vec<u8>, MerkleError> {
        let siblings = self.proof(element)?;
        let mut result = Vec::with_capacity(32 * (siblings.len() + 1));
        result.extend_from_slice(element.as_bytes());
        siblings.iter().for_each(|s| result.extend_from_slice(s.as_bytes()));
        Ok(result)
    }

    /// Verifies a flat proof (see [`MerkleTree::proof_bytes`]) against this tree's root.
    ///
    /// A proof whose length is not a non-zero multiple of 32 bytes is simply invalid.
    pub fn verify(&self, proof: &[u8]) -> bool {
        if proof.is_empty() || proof.len() % 32 != 0 {
            return false;
        }
        let mut chunks = proof.chunks_exact(32).filter_map(|c| Bytes32::from_slice(c).ok());
        match chunks.next() {
            Some(leaf) => verify_proof(&self.root(), &leaf, &chunks.collect::<Vec<_>>()),
            None => false,
        }
    }
}

fn build_layers(leaves: Vec<Bytes32>) -> Vec<Vec<Bytes32>> {
    let mut layers = vec![leaves];
    while layers[layers.len() - 1].len() > 1 {
        let current = &layers[layers.len() - 1];
        let next = current
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => combine(a, b),
                // An unpaired element is carried forward unchanged
                [a] => *a,
                _ => unreachable!("chunks(2) yields one or two elements"),
            })
            .collect::<Vec<_>>();
        layers.push(next);
    }
    layers
}

/// Recombines `leaf` with each sibling in turn and compares the result with `root`.
pub fn verify_proof(root: &Bytes32, leaf: &Bytes32, siblings: &[Bytes32]) -> bool {
    let computed = siblings.iter().fold(*leaf, |acc, sibling| combine(&acc, sibling));
    &computed == root
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hashes::hash32;

    fn leaves(n: usize) -> Vec<Bytes32> {
        (0..n).map(|i| hash32(format!("transfer-{i}"))).collect()
    }

    #[test]
    fn empty_tree_is_zero() {
        let tree = MerkleTree::new(vec![]);
        assert_eq!(tree.root(), Bytes32::ZERO);
        assert!(tree.proof(&hash32(b"x")).is_err());
    }

    #[test]
    fn single_leaf_is_padded() {
        let leaf = hash32(b"only");
        let tree = MerkleTree::new(vec![leaf]);
        assert_eq!(tree.root(), combine(&leaf, &Bytes32::ZERO));
        assert_eq!(tree.proof(&leaf).unwrap(), vec![Bytes32::ZERO]);
    }

    #[test]
    fn every_element_proves_membership() {
        for n in 1..=9 {
            let set = leaves(n);
            let tree = MerkleTree::new(set.clone());
            for e in &set {
                let proof = tree.proof(e).unwrap();
                assert!(verify_proof(&tree.root(), e, &proof), "n={n}");
                assert!(tree.verify(&tree.proof_bytes(e).unwrap()), "n={n}");
            }
            let outsider = hash32(b"not in the set");
            assert_eq!(tree.proof(&outsider), Err(MerkleError::ElementNotFound(outsider)));
        }
    }

    #[test]
    fn root_is_independent_of_order_and_duplicates() {
        let set = leaves(7);
        let mut reversed = set.clone();
        reversed.reverse();
        reversed.push(set[3]);
        assert_eq!(MerkleTree::new(set).root(), MerkleTree::new(reversed).root());
    }

    #[test]
    fn different_sets_have_different_roots() {
        let a = MerkleTree::new(leaves(4));
        let b = MerkleTree::new(leaves(5));
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn malformed_proofs_are_rejected() {
        let set = leaves(4);
        let tree = MerkleTree::new(set.clone());
        let mut proof = tree.proof_bytes(&set[0]).unwrap();
        assert!(!tree.verify(&proof[..proof.len() - 1]));
        assert!(!tree.verify(&[]));
        proof[40] ^= 0xff;
        assert!(!tree.verify(&proof));
    }

    #[test]
    fn hex_leaves_are_validated() {
        let good = hash32(b"a").to_string();
        assert!(MerkleTree::from_hex(&[good.as_str()]).is_ok());
        let short = "0x1234";
        assert_eq!(MerkleTree::from_hex(&[short]), Err(MerkleError::InvalidLeaf(short.to_string())));
        assert!(MerkleTree::from_hex(&["not hex"]).is_err());
    }
}
