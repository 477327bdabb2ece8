use std::collections::HashMap;

use crate::models::verdict::AnomalySignal;

/// Timestamps required before cadence analysis has enough data.
const MIN_SAMPLES: usize = 3;

/// Gaps may differ from the latest gap by less than this (in ms) and still
/// count as a constant interval.
const ROBOTIC_TOLERANCE_MS: u64 = 50;

/// A constant interval is only flagged once more than this many gaps sustain it.
const MIN_ROBOTIC_GAPS: usize = 5;

/// Gap distributions below this many bits of entropy look like replay loops.
const MIN_ENTROPY_BITS: f64 = 1.0;

/// Flags abnormal request cadence from a client's timestamp history.
///
/// Three independent signals, OR-ed together: a sudden timing shift (the last
/// gap deviates from the mean by more than `score_multiplier` standard
/// deviations), a robotic near-constant interval, and a low-entropy gap
/// distribution. The bias is toward catching abuse at the cost of occasional
/// false positives.
pub struct AnomalyDetector {
    score_multiplier: f64,
}

impl AnomalyDetector {
    pub fn new(score_multiplier: f64) -> Self {
        Self { score_multiplier }
    }

    /// Analyze an ordered timestamp history (milliseconds) and return the
    /// first signal that fires, or `None` for an unremarkable cadence.
    pub fn detect(&self, history: &[u64]) -> Option<AnomalySignal> {
        if history.len() < MIN_SAMPLES {
            return None;
        }

        let gaps: Vec<u64> = history
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]))
            .collect();

        let mean = gaps.iter().sum::<u64>() as f64 / gaps.len() as f64;
        let variance = gaps
            .iter()
            .map(|&gap| {
                let dev = gap as f64 - mean;
                dev * dev
            })
            .sum::<f64>()
            / gaps.len() as f64;
        let stddev = variance.sqrt();
        let last = gaps[gaps.len() - 1];

        if (last as f64 - mean).abs() > stddev * self.score_multiplier {
            return Some(AnomalySignal::SuddenShift);
        }

        if gaps.len() > MIN_ROBOTIC_GAPS
            && gaps.iter().all(|&gap| gap.abs_diff(last) < ROBOTIC_TOLERANCE_MS)
        {
            return Some(AnomalySignal::RoboticCadence);
        }

        if gap_entropy(&gaps) < MIN_ENTROPY_BITS {
            return Some(AnomalySignal::LowEntropy);
        }

        None
    }

    pub fn is_anomalous(&self, history: &[u64]) -> bool {
        self.detect(history).is_some()
    }
}

/// Shannon entropy (base 2) of the gap-value frequency distribution.
fn gap_entropy(gaps: &[u64]) -> f64 {
    let mut counts: HashMap<u64, u32> = HashMap::new();
    for &gap in gaps {
        *counts.entry(gap).or_insert(0) += 1;
    }

    let total = gaps.len() as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}
