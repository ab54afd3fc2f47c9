//! Calibrator - maps stated confidence to observed accuracy.
//!
//! Outcomes are kept in 0.1-wide bins per (extraction type, provenance).
//! Each bin is a bounded sliding window; a bin becomes reliable once it
//! holds `min_samples` outcomes. Until then raw confidence passes through
//! unchanged and is marked unreliable.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::types::{CalibrationConfig, Decision, Provenance};

/// Number of confidence bins.
pub const BIN_COUNT: usize = 10;

/// Bin index of a confidence value. 1.0 falls into the top bin.
pub fn bin_of(confidence: f64) -> usize {
    if !confidence.is_finite() || confidence <= 0.0 {
        return 0;
    }
    ((confidence * BIN_COUNT as f64).floor() as usize).min(BIN_COUNT - 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinKey {
    extraction_type: String,
    provenance: Provenance,
    bin: usize,
}

/// Result of calibrating one confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub calibrated: f64,
    pub reliable: bool,
    pub sample_size: usize,
}

/// One bin in a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRecord {
    pub extraction_type: String,
    pub provenance: Provenance,
    pub bin: usize,

    /// Outcomes, oldest first
    pub outcomes: Vec<bool>,
}

/// Serializable state of a calibrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSnapshot {
    pub records: Vec<CalibrationRecord>,
}

/// Per-bin outcome histories, shared across jobs.
#[derive(Debug)]
pub struct Calibrator {
    bins: DashMap<BinKey, VecDeque<bool>>,
    config: CalibrationConfig,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            bins: DashMap::new(),
            config,
        }
    }

    /// Calibrate a raw confidence for the given type and provenance.
    pub fn calibrate(
        &self,
        raw: f64,
        extraction_type: &str,
        provenance: Provenance,
    ) -> Calibration {
        let raw = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
        let key = BinKey {
            extraction_type: extraction_type.to_string(),
            provenance,
            bin: bin_of(raw),
        };

        let (correct, total) = match self.bins.get(&key) {
            Some(window) => (window.iter().filter(|ok| **ok).count(), window.len()),
            None => (0, 0),
        };

        if total == 0 || total < self.config.min_samples {
            return Calibration {
                calibrated: raw,
                reliable: false,
                sample_size: total,
            };
        }

        Calibration {
            calibrated: correct as f64 / total as f64,
            reliable: true,
            sample_size: total,
        }
    }

    /// Apply calibration to a decision in place.
    pub fn apply(&self, decision: &mut Decision) {
        let c = self.calibrate(
            decision.raw_confidence,
            &decision.extraction_type,
            decision.provenance,
        );
        decision.calibrated_confidence = c.calibrated;
        decision.calibration_reliable = c.reliable;
    }

    /// Record whether a decision turned out to be correct.
    ///
    /// The outcome lands in the bin of the decision's raw confidence.
    pub fn record_outcome(&self, decision: &Decision, was_correct: bool) {
        let key = BinKey {
            extraction_type: decision.extraction_type.clone(),
            provenance: decision.provenance,
            bin: bin_of(decision.raw_confidence),
        };

        let mut window = self.bins.entry(key).or_default();
        window.push_back(was_correct);
        while window.len() > self.config.max_history_per_bin {
            window.pop_front();
        }
    }

    /// Outcomes currently held for one bin.
    pub fn sample_size(&self, extraction_type: &str, provenance: Provenance, bin: usize) -> usize {
        let key = BinKey {
            extraction_type: extraction_type.to_string(),
            provenance,
            bin,
        };
        self.bins.get(&key).map(|w| w.len()).unwrap_or(0)
    }

    /// Export every bin for persistence.
    pub fn snapshot(&self) -> CalibrationSnapshot {
        let mut records: Vec<CalibrationRecord> = self
            .bins
            .iter()
            .map(|entry| CalibrationRecord {
                extraction_type: entry.key().extraction_type.clone(),
                provenance: entry.key().provenance,
                bin: entry.key().bin,
                outcomes: entry.value().iter().copied().collect(),
            })
            .collect();
        records.sort_by(|a, b| {
            (&a.extraction_type, a.provenance, a.bin).cmp(&(&b.extraction_type, b.provenance, b.bin))
        });
        CalibrationSnapshot { records }
    }

    /// Rebuild a calibrator from a snapshot. Oversized windows are trimmed
    /// to their newest outcomes and out-of-range bins are skipped.
    pub fn from_snapshot(snapshot: CalibrationSnapshot, config: CalibrationConfig) -> Self {
        let calibrator = Self::new(config);
        for record in snapshot.records {
            if record.bin >= BIN_COUNT {
                debug!(bin = record.bin, "Skipping out-of-range calibration bin");
                continue;
            }
            let keep = calibrator.config.max_history_per_bin;
            let skip = record.outcomes.len().saturating_sub(keep);
            let window: VecDeque<bool> = record.outcomes.into_iter().skip(skip).collect();
            calibrator.bins.insert(
                BinKey {
                    extraction_type: record.extraction_type,
                    provenance: record.provenance,
                    bin: record.bin,
                },
                window,
            );
        }
        calibrator
    }
}
