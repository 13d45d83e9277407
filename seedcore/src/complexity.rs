//! Complexity Estimator (C5): a pure function mapping a few structural
//! signals about an AC node to a complexity score in [0, 1].
//!
//! This has no relationship to "should we activate an expensive reasoning
//! path" style heuristics — it is a deterministic weighted sum used only to
//! pick an initial routing tier.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAX_TOKEN_THRESHOLD: u64 = 4_000;
pub const MAX_TOOL_THRESHOLD: u32 = 5;
pub const MAX_DEPTH_THRESHOLD: u32 = 5;

const TOKEN_WEIGHT: f64 = 0.30;
const TOOL_WEIGHT: f64 = 0.30;
const DEPTH_WEIGHT: f64 = 0.40;

/// The per-factor normalized contributions that summed (with weights) to the
/// final score, exposed so callers and tests can see why a score came out the
/// way it did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityBreakdown {
    pub token_factor: f64,
    pub tool_factor: f64,
    pub depth_factor: f64,
    pub score: f64,
}

/// Structural signals about one AC node, input to `score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexitySignals {
    pub estimated_tokens: u64,
    pub tool_dependencies: u32,
    pub ac_depth: u32,
}

/// Score `signals` against the fixed thresholds and weights, returning both
/// the final score and the per-factor breakdown.
///
/// Each factor is clamped to `[0, 1]` by dividing by its threshold and
/// capping at 1.0, so a node far beyond a threshold does not dominate the
/// weighted sum.
pub fn score(signals: ComplexitySignals) -> Result<ComplexityBreakdown> {
    let token_factor = (signals.estimated_tokens as f64 / MAX_TOKEN_THRESHOLD as f64).min(1.0);
    let tool_factor = (signals.tool_dependencies as f64 / MAX_TOOL_THRESHOLD as f64).min(1.0);
    let depth_factor = (signals.ac_depth as f64 / MAX_DEPTH_THRESHOLD as f64).min(1.0);

    let weighted = token_factor * TOKEN_WEIGHT + tool_factor * TOOL_WEIGHT + depth_factor * DEPTH_WEIGHT;

    if !(0.0..=1.0).contains(&weighted) {
        return Err(Error::Internal(format!(
            "complexity score {} escaped [0, 1]",
            weighted
        )));
    }

    Ok(ComplexityBreakdown {
        token_factor,
        tool_factor,
        depth_factor,
        score: weighted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s1_low_signals_score_around_point_1475() {
        // tokens=590, tools=0, depth=1: 590/4000=0.1475, 0/5=0, 1/5=0.2
        // 0.1475*0.30 + 0*0.30 + 0.2*0.40 = 0.04425 + 0 + 0.08 = 0.12425
        let breakdown = score(ComplexitySignals {
            estimated_tokens: 590,
            tool_dependencies: 0,
            ac_depth: 1,
        })
        .unwrap();
        assert!((breakdown.token_factor - 0.1475).abs() < 1e-9);
        assert!(breakdown.score < 0.4, "score {} should land in Frugal", breakdown.score);
    }

    #[test]
    fn scenario_s2_max_signals_score_is_1() {
        let breakdown = score(ComplexitySignals {
            estimated_tokens: MAX_TOKEN_THRESHOLD,
            tool_dependencies: MAX_TOOL_THRESHOLD,
            ac_depth: MAX_DEPTH_THRESHOLD,
        })
        .unwrap();
        assert!((breakdown.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn factors_saturate_beyond_threshold() {
        let breakdown = score(ComplexitySignals {
            estimated_tokens: MAX_TOKEN_THRESHOLD * 10,
            tool_dependencies: MAX_TOOL_THRESHOLD * 10,
            ac_depth: MAX_DEPTH_THRESHOLD * 10,
        })
        .unwrap();
        assert_eq!(breakdown.token_factor, 1.0);
        assert_eq!(breakdown.tool_factor, 1.0);
        assert_eq!(breakdown.depth_factor, 1.0);
        assert!((breakdown.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_signals_score_zero() {
        let breakdown = score(ComplexitySignals {
            estimated_tokens: 0,
            tool_dependencies: 0,
            ac_depth: 0,
        })
        .unwrap();
        assert_eq!(breakdown.score, 0.0);
    }

    #[test]
    fn weights_sum_to_one() {
        assert!((TOKEN_WEIGHT + TOOL_WEIGHT + DEPTH_WEIGHT - 1.0).abs() < 1e-9);
    }
}
