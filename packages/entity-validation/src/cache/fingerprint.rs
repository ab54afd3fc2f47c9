//! Content-addressed block fingerprints and near-duplicate clustering.
//!
//! A fingerprint depends only on what a block says and where it sits
//! structurally. Ids, timestamps and page positions never enter it, so an
//! unchanged section on a re-crawled page produces the same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::features::lexicon::tokenize;
use crate::types::ContentBlock;

/// Words per shingle fed to the SimHash.
const SHINGLE_WORDS: usize = 3;

/// Highest length bucket; longer texts share it.
const MAX_LENGTH_BUCKET: u8 = 15;

/// Coarse structural position of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralTuple {
    pub depth: usize,
    pub has_heading: bool,

    /// `floor(log2(chars)) + 1`, 0 for empty text
    pub length_bucket: u8,
}

/// Fingerprint of one block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFingerprint {
    pub structure: StructuralTuple,

    /// 64-bit SimHash over normalized word shingles
    pub simhash: u64,

    /// SHA-256 of the normalized text
    pub digest: String,
}

impl BlockFingerprint {
    /// Fingerprint a block.
    pub fn of(block: &ContentBlock) -> Self {
        let text = block.full_text();
        let tokens = tokenize(&text);
        let normalized = tokens.join(" ");

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Self {
            structure: StructuralTuple {
                depth: block.selector_depth(),
                has_heading: block.has_heading(),
                length_bucket: length_bucket(normalized.chars().count()),
            },
            simhash: simhash(&tokens),
            digest,
        }
    }

    /// Stable string key for the decision cache.
    pub fn key(&self) -> String {
        format!(
            "d{}:h{}:l{}:{}",
            self.structure.depth,
            u8::from(self.structure.has_heading),
            self.structure.length_bucket,
            self.digest
        )
    }

    /// Number of differing SimHash bits.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        (self.simhash ^ other.simhash).count_ones()
    }

    /// Top `bits` of the SimHash.
    pub fn simhash_prefix(&self, bits: u32) -> u64 {
        match bits {
            0 => 0,
            b if b >= 64 => self.simhash,
            b => self.simhash >> (64 - b),
        }
    }
}

fn length_bucket(chars: usize) -> u8 {
    if chars == 0 {
        return 0;
    }
    let bucket = (usize::BITS - chars.leading_zeros()) as u8;
    bucket.min(MAX_LENGTH_BUCKET)
}

/// Charikar SimHash over word shingles.
fn simhash(tokens: &[String]) -> u64 {
    if tokens.is_empty() {
        return 0;
    }

    let shingles: Vec<String> = if tokens.len() < SHINGLE_WORDS {
        vec![tokens.join(" ")]
    } else {
        tokens.windows(SHINGLE_WORDS).map(|w| w.join(" ")).collect()
    };

    let mut counts = [0i64; 64];
    for shingle in &shingles {
        let h = stable_hash64(shingle);
        for (bit, count) in counts.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *count += 1;
            } else {
                *count -= 1;
            }
        }
    }

    counts
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit))
}

/// First eight bytes of SHA-256, stable across builds and platforms.
fn stable_hash64(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Group of near-identical blocks; only the representative is judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearDuplicateGroup {
    /// Index of the representative (the earliest member)
    pub representative: usize,

    /// Indexes of the other members
    pub members: Vec<usize>,
}

/// Cluster fingerprints that share a structural tuple and SimHash prefix
/// and lie within `max_distance` bits of the group's representative.
///
/// Input items are `(index, fingerprint)`; groups come back ordered by
/// representative index.
pub fn cluster_near_duplicates(
    items: &[(usize, &BlockFingerprint)],
    prefix_bits: u32,
    max_distance: u32,
) -> Vec<NearDuplicateGroup> {
    let mut buckets: BTreeMap<(StructuralTuple, u64), Vec<(usize, &BlockFingerprint)>> =
        BTreeMap::new();
    for (index, fp) in items {
        buckets
            .entry((fp.structure, fp.simhash_prefix(prefix_bits)))
            .or_default()
            .push((*index, *fp));
    }

    let mut groups = Vec::new();
    for (_, mut bucket) in buckets {
        bucket.sort_by_key(|(index, _)| *index);

        let mut local: Vec<(NearDuplicateGroup, &BlockFingerprint)> = Vec::new();
        for (index, fp) in bucket {
            match local
                .iter_mut()
                .find(|(_, rep)| rep.hamming_distance(fp) <= max_distance)
            {
                Some((group, _)) => group.members.push(index),
                None => local.push((
                    NearDuplicateGroup {
                        representative: index,
                        members: Vec::new(),
                    },
                    fp,
                )),
            }
        }
        groups.extend(local.into_iter().map(|(g, _)| g));
    }

    groups.sort_by_key(|g| g.representative);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_key() {
        let a = ContentBlock::new("a", "Jane Doe, Staff Engineer").with_selector("main > div");
        let b = ContentBlock::new("b", "jane   doe staff engineer").with_selector("main > p");
        assert_eq!(BlockFingerprint::of(&a).key(), BlockFingerprint::of(&b).key());
    }

    #[test]
    fn test_structure_changes_key() {
        let a = ContentBlock::new("a", "Jane Doe").with_selector("main > div");
        let b = ContentBlock::new("a", "Jane Doe").with_selector("main > div > div");
        assert_ne!(BlockFingerprint::of(&a).key(), BlockFingerprint::of(&b).key());
    }

    #[test]
    fn test_length_bucket() {
        assert_eq!(length_bucket(0), 0);
        assert_eq!(length_bucket(1), 1);
        assert_eq!(length_bucket(8), 4);
        assert_eq!(length_bucket(usize::MAX), MAX_LENGTH_BUCKET);
    }

    #[test]
    fn test_identical_text_clusters() {
        let text = "Volunteer drivers deliver groceries every Tuesday morning across the county";
        let fps: Vec<_> = (0..3)
            .map(|i| BlockFingerprint::of(&ContentBlock::new(format!("b{}", i), text)))
            .collect();
        let items: Vec<_> = fps.iter().enumerate().collect();

        let groups = cluster_near_duplicates(&items, 16, 3);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].representative, 0);
        assert_eq!(groups[0].members, vec![1, 2]);
    }

    #[test]
    fn test_unrelated_text_does_not_cluster() {
        let a = BlockFingerprint::of(&ContentBlock::new(
            "a",
            "Volunteer drivers deliver groceries every Tuesday morning across the county",
        ));
        let b = BlockFingerprint::of(&ContentBlock::new(
            "b",
            "Quarterly harbor logistics report covering tide tables and crane maintenance",
        ));
        let groups = cluster_near_duplicates(&[(0, &a), (1, &b)], 16, 3);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_prefix_bits() {
        let fp = BlockFingerprint {
            structure: StructuralTuple {
                depth: 0,
                has_heading: false,
                length_bucket: 0,
            },
            simhash: 0xABCD_0000_0000_0001,
            digest: String::new(),
        };
        assert_eq!(fp.simhash_prefix(16), 0xABCD);
        assert_eq!(fp.simhash_prefix(0), 0);
        assert_eq!(fp.simhash_prefix(64), fp.simhash);
    }
}
