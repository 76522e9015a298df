//! MinHash signatures and LSH banding for near-duplicate lookup
//!
//! Signatures are built over word n-grams of normalized text. The LSH index
//! stores every signature in memory, indexed by insertion order, and returns
//! every candidate that shares a band. Queries are read-only, so a built
//! index can be shared across threads.

use ahash::RandomState;
use std::collections::HashSet;
use std::hash::{BuildHasher, Hash, Hasher};
use tracing::debug;

use crate::{Error, Result};

type AHashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// Mersenne prime 2^31 - 1; every signature value fits in a `u32`.
const PRIME: u64 = 2147483647;

/// MinHash signature for a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHashSignature {
    pub signature: Vec<u32>,
}

impl MinHashSignature {
    pub fn new(signature: Vec<u32>) -> Self {
        Self { signature }
    }

    pub fn num_hashes(&self) -> usize {
        self.signature.len()
    }

    /// Estimated Jaccard similarity: the share of positions that agree.
    pub fn jaccard_similarity(&self, other: &MinHashSignature) -> f64 {
        if self.signature.len() != other.signature.len() || self.signature.is_empty() {
            return 0.0;
        }

        let matches = self
            .signature
            .iter()
            .zip(other.signature.iter())
            .filter(|(a, b)| a == b)
            .count();

        matches as f64 / self.signature.len() as f64
    }
}

/// MinHash hasher over word shingles
#[derive(Debug, Clone)]
pub struct MinHasher {
    num_hashes: usize,
    /// Words per shingle
    shingle_size: usize,
    /// (a, b) coefficients of the universal hash family
    coefficients: Vec<(u64, u64)>,
    /// Fixed seeds so shingle hashes agree across runs and processes
    hash_builder: RandomState,
}

impl MinHasher {
    pub fn new(num_hashes: usize, shingle_size: usize) -> Self {
        let mut coefficients = Vec::with_capacity(num_hashes);
        let mut seed = 42u64;
        for _ in 0..num_hashes {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let a = seed % PRIME;
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let b = seed % PRIME;
            coefficients.push((a, b));
        }

        debug!(
            "Created MinHasher with {} hash functions over {}-word shingles",
            num_hashes, shingle_size
        );

        Self {
            num_hashes,
            shingle_size: shingle_size.max(1),
            coefficients,
            hash_builder: RandomState::with_seeds(
                0x517cc1b727220a95,
                0x8d8f5f3b12c4a6e1,
                0xbf58476d1ce4e5b9,
                0x94d049bb133111eb,
            ),
        }
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Signature of whitespace-tokenized, already normalized text.
    ///
    /// Texts shorter than one shingle hash as a single shingle; empty text
    /// yields an all-zero signature that callers should not index.
    pub fn compute_signature(&self, text: &str) -> MinHashSignature {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return MinHashSignature::new(vec![0u32; self.num_hashes]);
        }

        let mut shingle_hashes = HashSet::new();
        if words.len() < self.shingle_size {
            let mut hasher = self.hash_builder.build_hasher();
            for word in &words {
                word.hash(&mut hasher);
            }
            shingle_hashes.insert(hasher.finish());
        } else {
            for window in words.windows(self.shingle_size) {
                let mut hasher = self.hash_builder.build_hasher();
                for word in window {
                    word.hash(&mut hasher);
                }
                shingle_hashes.insert(hasher.finish());
            }
        }

        let mut signature = vec![u32::MAX; self.num_hashes];
        for &shingle_hash in &shingle_hashes {
            for (slot, &(a, b)) in signature.iter_mut().zip(&self.coefficients) {
                let value = ((a.wrapping_mul(shingle_hash).wrapping_add(b)) % PRIME) as u32;
                if value < *slot {
                    *slot = value;
                }
            }
        }

        MinHashSignature::new(signature)
    }

    pub fn jaccard_similarity(&self, text1: &str, text2: &str) -> f64 {
        self.compute_signature(text1)
            .jaccard_similarity(&self.compute_signature(text2))
    }
}

/// Hash a band slice down to a single u64 key.
fn hash_band_key(slice: &[u32], hash_builder: &RandomState) -> u64 {
    let mut hasher = hash_builder.build_hasher();
    slice.hash(&mut hasher);
    hasher.finish()
}

/// Whether banding is guaranteed to surface every pair at or above
/// `threshold`.
///
/// A pair agreeing on at least `ceil(threshold * n)` of `n` positions
/// disagrees on fewer than `num_bands` positions when
/// `n - ceil(threshold * n) < num_bands`, so at least one band matches in
/// full.
pub fn recall_guaranteed(num_hashes: usize, num_bands: usize, threshold: f64) -> bool {
    let min_agreeing = (threshold * num_hashes as f64).ceil() as usize;
    num_hashes.saturating_sub(min_agreeing) < num_bands
}

/// LSH index over MinHash signatures
#[derive(Debug)]
pub struct LSHIndex {
    num_bands: usize,
    rows_per_band: usize,
    /// Per band: band key -> document ids
    bands: Vec<AHashMap<u64, Vec<u32>>>,
    /// Signatures by document id (insertion order)
    signatures: Vec<MinHashSignature>,
    band_hash_builder: RandomState,
}

impl LSHIndex {
    pub fn new(num_bands: usize, rows_per_band: usize) -> Self {
        Self::with_capacity(num_bands, rows_per_band, 0)
    }

    pub fn with_capacity(num_bands: usize, rows_per_band: usize, expected_records: usize) -> Self {
        let hash_builder = RandomState::with_seeds(
            0xa1b2c3d4e5f60718,
            0x9182736455463728,
            0xdeadbeefcafebabe,
            0x0123456789abcdef,
        );
        let per_band_capacity = expected_records;
        let bands = (0..num_bands)
            .map(|_| AHashMap::with_capacity_and_hasher(per_band_capacity, hash_builder.clone()))
            .collect();

        Self {
            num_bands,
            rows_per_band,
            bands,
            signatures: Vec::with_capacity(expected_records),
            band_hash_builder: hash_builder,
        }
    }

    fn band_keys<'s>(&'s self, signature: &'s MinHashSignature) -> impl Iterator<Item = u64> + 's {
        signature
            .signature
            .chunks_exact(self.rows_per_band)
            .take(self.num_bands)
            .map(move |band| hash_band_key(band, &self.band_hash_builder))
    }

    /// Add a signature; returns its document id.
    pub fn insert(&mut self, signature: MinHashSignature) -> Result<usize> {
        let expected = self.num_bands * self.rows_per_band;
        if signature.num_hashes() != expected {
            return Err(Error::InvalidConfig(format!(
                "signature size {} does not match {} bands x {} rows",
                signature.num_hashes(),
                self.num_bands,
                self.rows_per_band
            )));
        }

        let id = self.signatures.len();
        let id32 = u32::try_from(id)
            .map_err(|_| Error::InvalidConfig("LSH index holds at most u32::MAX documents".to_string()))?;
        let keys: Vec<u64> = self.band_keys(&signature).collect();
        for (band, key) in self.bands.iter_mut().zip(keys) {
            band.entry(key).or_default().push(id32);
        }
        self.signatures.push(signature);
        Ok(id)
    }

    /// Every document sharing at least one full band with `signature`,
    /// sorted by id.
    pub fn query(&self, signature: &MinHashSignature) -> Vec<usize> {
        if signature.num_hashes() != self.num_bands * self.rows_per_band {
            return Vec::new();
        }

        let mut candidates = HashSet::new();
        for (band, key) in self.bands.iter().zip(self.band_keys(signature)) {
            if let Some(ids) = band.get(&key) {
                candidates.extend(ids.iter().map(|&id| id as usize));
            }
        }

        let mut result: Vec<usize> = candidates.into_iter().collect();
        result.sort_unstable();
        result
    }

    pub fn get_signature(&self, id: usize) -> Option<&MinHashSignature> {
        self.signatures.get(id)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts() {
        let hasher = MinHasher::new(128, 2);
        let text = "die brücke ist heute wegen bauarbeiten geschlossen";
        assert_eq!(hasher.jaccard_similarity(text, text), 1.0);
    }

    #[test]
    fn test_different_texts() {
        let hasher = MinHasher::new(128, 2);
        let sim = hasher.jaccard_similarity(
            "die brücke ist heute wegen bauarbeiten geschlossen",
            "nehmen sie zweimal täglich eine tablette",
        );
        assert!(sim < 0.1, "similarity {} too high", sim);
    }

    #[test]
    fn test_signature_consistency() {
        let a = MinHasher::new(64, 2);
        let b = MinHasher::new(64, 2);
        let text = "der zug fährt um acht uhr ab";
        assert_eq!(a.compute_signature(text), b.compute_signature(text));
    }

    #[test]
    fn test_short_and_empty_text() {
        let hasher = MinHasher::new(32, 2);
        assert_eq!(hasher.compute_signature("").signature, vec![0u32; 32]);
        let single = hasher.compute_signature("hallo");
        assert!(single.signature.iter().all(|&v| v < u32::MAX));
    }

    #[test]
    fn test_recall_guarantee() {
        assert!(recall_guaranteed(128, 64, 0.6));
        assert!(!recall_guaranteed(128, 32, 0.6));
        assert!(recall_guaranteed(128, 32, 0.8));
    }

    #[test]
    fn test_lsh_insert_and_query() {
        let hasher = MinHasher::new(128, 2);
        let mut index = LSHIndex::new(64, 2);
        let a = index
            .insert(hasher.compute_signature("die brücke ist heute geschlossen"))
            .unwrap();
        index
            .insert(hasher.compute_signature("nehmen sie eine tablette täglich"))
            .unwrap();

        let hits = index.query(&hasher.compute_signature("die brücke ist heute geschlossen"));
        assert_eq!(hits.first(), Some(&a));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_lsh_finds_near_duplicates() {
        let hasher = MinHasher::new(128, 2);
        let mut index = LSHIndex::new(64, 2);
        let original = "the bridge is closed today because of construction work die brücke ist heute wegen bauarbeiten geschlossen";
        let id = index.insert(hasher.compute_signature(original)).unwrap();

        let variant = "the bridge is closed today because of construction work die brücke ist heute wegen der bauarbeiten geschlossen";
        let sig = hasher.compute_signature(variant);
        let hits = index.query(&sig);
        assert!(hits.contains(&id));
        assert!(index.get_signature(id).unwrap().jaccard_similarity(&sig) > 0.6);
    }

    #[test]
    fn test_insert_rejects_wrong_size() {
        let mut index = LSHIndex::new(8, 2);
        assert!(index.insert(MinHashSignature::new(vec![1; 10])).is_err());
        assert!(index.is_empty());
    }
}
