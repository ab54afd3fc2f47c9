//! Aggregate filtering and deduplication of entity candidates.
//!
//! The aggregate filter is a hard override: a block under a collective
//! heading that names several people or roles is a listing, whatever any
//! classifier said about it. Deduplication then clusters INDIVIDUAL entities
//! by name and body similarity and collapses each cluster into its best
//! member.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::features::lexicon::{self, tokenize};
use crate::types::{BlockId, Classification, DedupConfig, Entity, Issue, IssueKind};

/// Entities that were merged into one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupCluster {
    pub representative: BlockId,

    /// Every member, representative included, in discovery order
    pub members: Vec<BlockId>,

    /// Highest pairwise score that joined two members
    pub score: f64,
}

/// Result of one dedup pass.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Surviving entities in discovery order
    pub entities: Vec<Entity>,
    pub clusters: Vec<DedupCluster>,
    pub issues: Vec<Issue>,
}

/// Lowercase, strip diacritics, titles and punctuation.
///
/// "Dr. Séverine O'Neil, PhD" becomes "severine o'neil".
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name.nfd().filter(|c| !is_combining_mark(*c)).collect();
    tokenize(&stripped)
        .into_iter()
        .filter(|t| !lexicon::TITLE_SET.contains(t.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn token_set(text: &str) -> HashSet<String> {
    let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    tokenize(&stripped).into_iter().collect()
}

/// `|A ∩ B| / min(|A|, |B|)`, zero when either side is empty.
pub fn overlap_coefficient(a: &str, b: &str) -> f64 {
    let a = token_set(a);
    let b = token_set(b);
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / smaller as f64
}

/// Drops collective blocks that slipped through classification.
#[derive(Debug, Clone, Default)]
pub struct AggregateFilter {
    config: DedupConfig,
}

impl AggregateFilter {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Heading names a group and the body names more people than allowed.
    pub fn is_aggregate(&self, heading: &str, body: &str) -> bool {
        !heading.trim().is_empty()
            && lexicon::is_collective_heading(heading)
            && lexicon::person_indicator_count(body) > self.config.max_person_indicators
    }

    /// Remove aggregate INDIVIDUAL and UNKNOWN entities.
    pub fn apply(&self, entities: Vec<Entity>) -> (Vec<Entity>, Vec<Issue>) {
        let mut issues = Vec::new();
        let kept = entities
            .into_iter()
            .filter(|e| {
                let candidate = matches!(
                    e.decision.classification,
                    Classification::Individual | Classification::Unknown
                );
                if candidate && self.is_aggregate(&e.heading, &e.body) {
                    debug!(block_id = %e.block_id, heading = %e.heading, "Aggregate override");
                    issues.push(
                        Issue::new(
                            IssueKind::AggregateContamination,
                            format!("'{}' lists several entities", e.heading),
                        )
                        .for_block(&e.block_id),
                    );
                    false
                } else {
                    true
                }
            })
            .collect();
        (kept, issues)
    }
}

/// Similarity-based entity deduplicator.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Pair score in `[0, 1]`.
    ///
    /// With both names present this is the weighted sum of name
    /// Jaro-Winkler and body overlap; otherwise body overlap alone.
    pub fn similarity(&self, a: &Entity, b: &Entity) -> f64 {
        let overlap = overlap_coefficient(&a.body, &b.body);
        let names = (
            a.name.as_deref().map(normalize_name),
            b.name.as_deref().map(normalize_name),
        );

        match names {
            (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => {
                let w = self.config.name_weight;
                w * strsim::jaro_winkler(&x, &y) + (1.0 - w) * overlap
            }
            _ => overlap,
        }
    }

    /// Representative quality: confidence, text completeness and field count.
    pub fn quality(&self, entity: &Entity, max_fields: usize) -> f64 {
        let completeness = (entity.body.chars().count() as f64
            / self.config.complete_text_chars.max(1) as f64)
            .min(1.0);
        let fields = if max_fields == 0 {
            0.0
        } else {
            entity.populated_field_count() as f64 / max_fields as f64
        };

        self.config.quality_confidence_weight * entity.decision.calibrated_confidence
            + self.config.quality_completeness_weight * completeness
            + self.config.quality_fields_weight * fields
    }

    /// Merge duplicate INDIVIDUAL entities. Other entities pass through.
    pub fn deduplicate(&self, entities: Vec<Entity>) -> DedupOutcome {
        let individuals: Vec<usize> = entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.decision.classification == Classification::Individual)
            .map(|(i, _)| i)
            .collect();

        let mut sets = UnionFind::new(entities.len());
        let mut best_score: BTreeMap<usize, f64> = BTreeMap::new();
        for (pos, &i) in individuals.iter().enumerate() {
            for &j in &individuals[pos + 1..] {
                let score = self.similarity(&entities[i], &entities[j]);
                if score >= self.config.similarity_threshold {
                    sets.union(i, j);
                    let root = sets.find(i);
                    let best = best_score.entry(root).or_insert(0.0);
                    *best = best.max(score);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &i in &individuals {
            groups.entry(sets.find(i)).or_default().push(i);
        }

        let mut slots: Vec<Option<Entity>> = entities.into_iter().map(Some).collect();
        let mut outcome = DedupOutcome::default();

        for members in groups.values().filter(|m| m.len() > 1) {
            // Scores were recorded under intermediate roots; take the best across members
            let score = members
                .iter()
                .filter_map(|m| best_score.get(m))
                .fold(0.0_f64, |acc, s| acc.max(*s));

            let mut group: Vec<Entity> = members.iter().filter_map(|&m| slots[m].take()).collect();
            let merged = self.merge(&mut group);

            let mut member_ids: Vec<(usize, BlockId)> = group
                .iter()
                .map(|e| (e.discovery_index, e.block_id.clone()))
                .chain(std::iter::once((merged.discovery_index, merged.block_id.clone())))
                .collect();
            member_ids.sort();

            debug!(
                representative = %merged.block_id,
                members = member_ids.len(),
                score,
                "Merged duplicate entities"
            );
            outcome.issues.push(
                Issue::new(
                    IssueKind::DuplicateMerged,
                    format!("merged {} duplicate blocks", member_ids.len() - 1),
                )
                .for_block(&merged.block_id),
            );
            outcome.clusters.push(DedupCluster {
                representative: merged.block_id.clone(),
                members: member_ids.into_iter().map(|(_, id)| id).collect(),
                score,
            });

            let slot = members[0];
            slots[slot] = Some(merged);
        }

        let mut entities: Vec<Entity> = slots.into_iter().flatten().collect();
        entities.sort_by_key(|e| e.discovery_index);
        outcome.entities = entities;
        outcome
    }

    /// Collapse a group into its representative. The other members are left in `group`.
    fn merge(&self, group: &mut Vec<Entity>) -> Entity {
        group.sort_by_key(|e| e.discovery_index);
        let max_fields = group.iter().map(|e| e.populated_field_count()).max().unwrap_or(0);

        let mut best = 0;
        let mut best_quality = f64::MIN;
        for (i, e) in group.iter().enumerate() {
            let q = self.quality(e, max_fields);
            // Strictly greater keeps the earliest on ties
            if q > best_quality {
                best = i;
                best_quality = q;
            }
        }

        let mut representative = group.remove(best);
        for member in group.iter() {
            for (name, value) in &member.fields {
                if !representative.has_field(name) && !value.trim().is_empty() {
                    representative.fields.insert(name.clone(), value.clone());
                }
            }
            representative.discovery_index = representative.discovery_index.min(member.discovery_index);
            representative.merged_from.push(member.block_id.clone());
            representative
                .merged_from
                .extend(member.merged_from.iter().cloned());
            if representative.name.is_none() {
                representative.name = member.name.clone();
            }
        }
        representative
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index becomes the root so roots are stable in discovery order
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}
