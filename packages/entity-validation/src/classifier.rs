//! Cheap classifier - logistic triage over the feature vector.
//!
//! A versioned weight table maps named inputs to weights. The weighted sum
//! passes through a logistic transform and the probability lands in one of
//! four bands. Only the two certain bands are finalized here; the leaning
//! bands are routed to the batch judge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, ConfigResult};
use crate::features::{FeatureVector, MODEL_INPUTS};
use crate::types::{Classification, ClassifierConfig};

/// Probability at or above which a block is certainly INDIVIDUAL.
pub const CERTAIN_INDIVIDUAL: f64 = 0.85;

/// Probability at or below which a block is certainly AGGREGATE.
pub const CERTAIN_AGGREGATE: f64 = 0.15;

/// Split between the leaning bands.
pub const LEAN_SPLIT: f64 = 0.5;

/// Versioned feature weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightTable {
    pub version: String,
    pub bias: f64,
    pub weights: BTreeMap<String, f64>,
}

impl Default for WeightTable {
    fn default() -> Self {
        let weights = [
            ("name_likeness", 3.0),
            ("role_word_density", 1.5),
            ("aggregate_indicator_density", -3.0),
            ("person_indicator_excess", -4.0),
            ("link_density", -2.5),
            ("contact_signals", 1.0),
            ("text_length", 0.5),
            ("structural_depth", 0.5),
            ("team_heading_proximity", 1.0),
            ("collective_heading", -3.5),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            version: "weights-v1".to_string(),
            bias: -1.5,
            weights,
        }
    }
}

impl WeightTable {
    /// Table with every weight zero and the given bias. Useful for forcing a band.
    pub fn constant(version: impl Into<String>, bias: f64) -> Self {
        Self {
            version: version.into(),
            bias,
            weights: BTreeMap::new(),
        }
    }

    /// Set one weight.
    pub fn with_weight(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(name.into(), weight);
        self
    }

    /// Reject unknown feature names and non-finite weights.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::invalid("weight table version is blank"));
        }
        if !self.bias.is_finite() {
            return Err(ConfigError::invalid("weight table bias is not finite"));
        }
        for (name, weight) in &self.weights {
            if !MODEL_INPUTS.contains(&name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "unknown feature '{}' in weight table {}",
                    name, self.version
                )));
            }
            if !weight.is_finite() {
                return Err(ConfigError::invalid(format!(
                    "weight for '{}' is not finite",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Bias plus the weighted inputs.
    pub fn score(&self, features: &FeatureVector) -> f64 {
        features
            .model_inputs()
            .into_iter()
            .map(|(name, value)| self.weights.get(name).copied().unwrap_or(0.0) * value)
            .sum::<f64>()
            + self.bias
    }
}

/// Confidence band of a triage probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    CertainIndividual,
    LeaningIndividual,
    LeaningAggregate,
    CertainAggregate,
}

impl Band {
    /// Whether the band is routed to the remote judge.
    pub fn is_uncertain(self) -> bool {
        matches!(self, Self::LeaningIndividual | Self::LeaningAggregate)
    }
}

/// Result of triaging one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triage {
    /// Provisional label; final only for the certain bands
    pub classification: Classification,

    /// Probability that the block is one individual entity
    pub raw_probability: f64,

    pub needs_remote_judgment: bool,

    pub band: Band,
}

impl Triage {
    /// Confidence in the provisional label rather than in INDIVIDUAL.
    pub fn label_confidence(&self) -> f64 {
        match self.classification {
            Classification::Individual => self.raw_probability,
            _ => 1.0 - self.raw_probability,
        }
    }
}

/// Logistic triage classifier.
#[derive(Debug, Clone)]
pub struct CheapClassifier {
    config: ClassifierConfig,
}

impl Default for CheapClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl CheapClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn weights(&self) -> &WeightTable {
        &self.config.weights
    }

    /// Band a probability according to the configured edges.
    pub fn band(&self, probability: f64) -> Band {
        if probability >= self.config.certain_individual {
            Band::CertainIndividual
        } else if probability <= self.config.certain_aggregate {
            Band::CertainAggregate
        } else if probability >= self.config.lean_split {
            Band::LeaningIndividual
        } else {
            Band::LeaningAggregate
        }
    }

    /// Classify one feature vector. Never calls out of process.
    pub fn classify(&self, features: &FeatureVector) -> Triage {
        let score = self.config.weights.score(features);
        let raw_probability = sigmoid(score);
        let band = self.band(raw_probability);

        let classification = match band {
            Band::CertainIndividual | Band::LeaningIndividual => Classification::Individual,
            Band::CertainAggregate | Band::LeaningAggregate => Classification::Aggregate,
        };

        Triage {
            classification,
            raw_probability,
            needs_remote_judgment: band.is_uncertain(),
            band,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    1.0 / (1.0 + (-x).exp())
}
