//! Routing Controller (C6): picks an initial tier from a complexity score,
//! escalates on repeated failure, downgrades on sustained success, and
//! remembers pattern-level preferences across AC nodes.
//!
//! The escalation/downgrade/fingerprint state machine is grounded on the
//! source system's success-tracking and pattern-matching design; the
//! classify-by-static-regex and builder-style configuration idioms come from
//! the teacher's smart router.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;
use crate::error::{Error, Result};
use crate::tiers::Tier;

/// Deterministic identifier for a task pattern, derived from categorical
/// buckets rather than free text so near-identical tasks collide.
pub type PatternFingerprint = String;

/// Bucket an AC node's structural signals into a stable fingerprint. Buckets
/// are coarse on purpose: the fingerprint groups, it doesn't distinguish.
pub fn fingerprint(estimated_tokens: u64, tool_dependencies: u32, ac_depth: u32, keywords: &[String]) -> PatternFingerprint {
    let token_bucket = match estimated_tokens {
        0..=499 => "xs",
        500..=1999 => "s",
        2000..=3999 => "m",
        _ => "l",
    };
    let tool_bucket = match tool_dependencies {
        0 => "t0",
        1..=2 => "t1",
        3..=5 => "t2",
        _ => "t3",
    };
    let depth_bucket = match ac_depth {
        0..=1 => "d0",
        2..=3 => "d1",
        _ => "d2",
    };
    let mut sorted_keywords: Vec<&str> = keywords.iter().map(String::as_str).collect();
    sorted_keywords.sort_unstable();
    sorted_keywords.dedup();
    format!(
        "{}:{}:{}:{}",
        token_bucket,
        tool_bucket,
        depth_bucket,
        sorted_keywords.join(",")
    )
}

/// Jaccard similarity over whitespace-tokenized, lowercased, punctuation
/// stripped words.
pub struct PatternMatcher {
    similarity_threshold: f64,
}

impl PatternMatcher {
    pub fn new(similarity_threshold: f64) -> Self {
        Self { similarity_threshold }
    }

    fn tokenize(text: &str) -> HashSet<String> {
        text.split_whitespace()
            .filter_map(|word| {
                let cleaned: String = word
                    .trim_matches(|c: char| ".,;:!?\"'()-[]{}/<>".contains(c))
                    .to_lowercase();
                if cleaned.is_empty() {
                    None
                } else {
                    Some(cleaned)
                }
            })
            .collect()
    }

    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let tokens_a = Self::tokenize(a);
        let tokens_b = Self::tokenize(b);
        if tokens_a.is_empty() && tokens_b.is_empty() {
            return 1.0;
        }
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return 0.0;
        }
        let intersection = tokens_a.intersection(&tokens_b).count();
        let union = tokens_a.union(&tokens_b).count();
        intersection as f64 / union as f64
    }

    pub fn is_similar(&self, a: &str, b: &str) -> bool {
        self.similarity(a, b) >= self.similarity_threshold
    }

    /// The best match among `candidates`, if any clears the threshold.
    pub fn best_match<'a>(&self, target: &str, candidates: &'a [String]) -> Option<(&'a str, f64)> {
        candidates
            .iter()
            .map(|c| (c.as_str(), self.similarity(target, c)))
            .filter(|(_, sim)| *sim >= self.similarity_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// One historical routing outcome for a pattern, the unit the history
/// buffers store and evict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRecord {
    pub fingerprint: PatternFingerprint,
    pub tier: Tier,
    pub succeeded: bool,
}

/// Tracks consecutive failures/successes per pattern and decides escalation
/// and downgrade, bounded by the configured history limits with LRU
/// eviction across the whole controller.
pub struct RoutingController {
    config: RoutingConfig,
    consecutive_failures: HashMap<PatternFingerprint, u32>,
    consecutive_successes: HashMap<PatternFingerprint, (u32, Tier)>,
    history: HashMap<PatternFingerprint, VecDeque<RoutingRecord>>,
    /// LRU order across the whole controller, most-recently-touched at back.
    lru: VecDeque<PatternFingerprint>,
    matcher: PatternMatcher,
}

/// What the caller should do next after reporting an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingOutcome {
    /// Stay at the current tier.
    Hold,
    /// Move up one tier.
    Escalate(Tier),
    /// Move down one tier.
    Downgrade(Tier),
}

impl RoutingController {
    pub fn new(config: RoutingConfig) -> Self {
        let similarity_threshold = config.similarity_threshold;
        Self {
            config,
            consecutive_failures: HashMap::new(),
            consecutive_successes: HashMap::new(),
            history: HashMap::new(),
            lru: VecDeque::new(),
            matcher: PatternMatcher::new(similarity_threshold),
        }
    }

    /// Map a complexity score to an initial tier per the fixed thresholds.
    pub fn initial_tier(&self, score: f64) -> Tier {
        if score < 0.4 {
            Tier::Frugal
        } else if score < 0.7 {
            Tier::Standard
        } else {
            Tier::Frontier
        }
    }

    fn touch_lru(&mut self, fp: &PatternFingerprint) {
        if let Some(pos) = self.lru.iter().position(|f| f == fp) {
            self.lru.remove(pos);
        }
        self.lru.push_back(fp.clone());
        self.evict_if_needed();
    }

    fn evict_if_needed(&mut self) {
        let total: usize = self.history.values().map(VecDeque::len).sum();
        let mut total = total;
        while total > self.config.max_total_history {
            let Some(oldest) = self.lru.front().cloned() else { break };
            if let Some(queue) = self.history.get_mut(&oldest) {
                if queue.pop_front().is_some() {
                    total -= 1;
                }
                if queue.is_empty() {
                    self.history.remove(&oldest);
                    self.lru.pop_front();
                }
            } else {
                self.lru.pop_front();
            }
        }
    }

    fn record_history(&mut self, record: RoutingRecord) {
        let fp = record.fingerprint.clone();
        let queue = self.history.entry(fp.clone()).or_default();
        queue.push_back(record);
        while queue.len() > self.config.max_history_per_hash {
            queue.pop_front();
        }
        self.touch_lru(&fp);
    }

    /// Report that `tier` failed for the pattern identified by `fp`. Resets
    /// any in-progress success streak and escalates after
    /// `escalation_after_failures` consecutive failures. Frontier cannot
    /// escalate further: a caller at Frontier that keeps failing is
    /// stagnating, not escalatable, and should treat that as a pure signal
    /// rather than an error.
    pub fn record_failure(&mut self, fp: &PatternFingerprint, tier: Tier) -> RoutingOutcome {
        self.consecutive_successes.remove(fp);
        let count = self.consecutive_failures.entry(fp.clone()).or_insert(0);
        *count += 1;

        self.record_history(RoutingRecord {
            fingerprint: fp.clone(),
            tier,
            succeeded: false,
        });

        if *count >= self.config.escalation_after_failures {
            match tier.next() {
                Some(next) => {
                    self.consecutive_failures.insert(fp.clone(), 0);
                    RoutingOutcome::Escalate(next)
                }
                // Already at Frontier: nothing to escalate to. Leave the
                // failure count in place so `check_stagnation` can see it.
                None => RoutingOutcome::Hold,
            }
        } else {
            RoutingOutcome::Hold
        }
    }

    /// Report that `tier` succeeded for the pattern identified by `fp`.
    /// Resets any in-progress failure streak and downgrades after
    /// `downgrade_threshold` consecutive successes, unless already at
    /// Frugal.
    pub fn record_success(&mut self, fp: &PatternFingerprint, tier: Tier) -> RoutingOutcome {
        self.consecutive_failures.remove(fp);
        let entry = self
            .consecutive_successes
            .entry(fp.clone())
            .or_insert((0, tier));
        entry.0 += 1;
        entry.1 = tier;
        let count = entry.0;

        self.record_history(RoutingRecord {
            fingerprint: fp.clone(),
            tier,
            succeeded: true,
        });

        if count >= self.config.downgrade_threshold && tier != Tier::Frugal {
            self.consecutive_successes.insert(fp.clone(), (0, tier));
            match tier.previous() {
                Some(prev) => RoutingOutcome::Downgrade(prev),
                None => RoutingOutcome::Hold,
            }
        } else {
            RoutingOutcome::Hold
        }
    }

    /// If Frontier keeps failing past escalation, there's nowhere left to go:
    /// surface that as a stagnation error rather than silently holding.
    pub fn check_stagnation(&self, fp: &PatternFingerprint, tier: Tier) -> Result<()> {
        if tier == Tier::Frontier
            && self.consecutive_failures.get(fp).copied().unwrap_or(0) >= self.config.escalation_after_failures
        {
            return Err(Error::stagnation(fp.clone()));
        }
        Ok(())
    }

    /// Inherit a tier preference from the most similar tracked pattern,
    /// falling back to `default_tier` (typically Frugal, the optimistic
    /// choice) when nothing tracked is similar enough.
    pub fn recommended_tier_for(&self, description: &str, tracked_descriptions: &[String], default_tier: Tier) -> Tier {
        match self.matcher.best_match(description, tracked_descriptions) {
            Some((matched, _)) => self
                .history
                .get(matched)
                .and_then(|q| q.back())
                .map(|r| r.tier)
                .unwrap_or(default_tier),
            None => default_tier,
        }
    }

    pub fn history_len(&self, fp: &PatternFingerprint) -> usize {
        self.history.get(fp).map(VecDeque::len).unwrap_or(0)
    }

    pub fn total_history_len(&self) -> usize {
        self.history.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RoutingConfig {
        RoutingConfig::default()
    }

    #[test]
    fn initial_tier_thresholds_match_spec() {
        let controller = RoutingController::new(config());
        assert_eq!(controller.initial_tier(0.0), Tier::Frugal);
        assert_eq!(controller.initial_tier(0.39), Tier::Frugal);
        assert_eq!(controller.initial_tier(0.4), Tier::Standard);
        assert_eq!(controller.initial_tier(0.69), Tier::Standard);
        assert_eq!(controller.initial_tier(0.7), Tier::Frontier);
        assert_eq!(controller.initial_tier(1.0), Tier::Frontier);
    }

    #[test]
    fn escalates_after_two_consecutive_failures() {
        let mut controller = RoutingController::new(config());
        let fp = "pattern-1".to_string();
        assert_eq!(controller.record_failure(&fp, Tier::Frugal), RoutingOutcome::Hold);
        assert_eq!(
            controller.record_failure(&fp, Tier::Frugal),
            RoutingOutcome::Escalate(Tier::Standard)
        );
    }

    #[test]
    fn frontier_failure_escalation_holds_since_nothing_is_higher() {
        let mut controller = RoutingController::new(config());
        let fp = "pattern-1".to_string();
        controller.record_failure(&fp, Tier::Frontier);
        let outcome = controller.record_failure(&fp, Tier::Frontier);
        assert_eq!(outcome, RoutingOutcome::Hold);
        assert!(controller.check_stagnation(&fp, Tier::Frontier).is_err());
    }

    #[test]
    fn downgrades_after_five_consecutive_successes() {
        let mut controller = RoutingController::new(config());
        let fp = "pattern-1".to_string();
        for _ in 0..4 {
            assert_eq!(controller.record_success(&fp, Tier::Standard), RoutingOutcome::Hold);
        }
        assert_eq!(
            controller.record_success(&fp, Tier::Standard),
            RoutingOutcome::Downgrade(Tier::Frugal)
        );
    }

    #[test]
    fn frugal_tier_never_downgrades() {
        let mut controller = RoutingController::new(config());
        let fp = "pattern-1".to_string();
        for _ in 0..10 {
            assert_eq!(controller.record_success(&fp, Tier::Frugal), RoutingOutcome::Hold);
        }
    }

    #[test]
    fn failure_resets_success_streak() {
        let mut controller = RoutingController::new(config());
        let fp = "pattern-1".to_string();
        for _ in 0..4 {
            controller.record_success(&fp, Tier::Standard);
        }
        controller.record_failure(&fp, Tier::Standard);
        // Back to zero: four more successes should not yet trigger downgrade.
        for _ in 0..4 {
            assert_eq!(controller.record_success(&fp, Tier::Standard), RoutingOutcome::Hold);
        }
    }

    #[test]
    fn jaccard_similarity_matches_known_example() {
        let matcher = PatternMatcher::new(0.80);
        let sim = matcher.similarity("fix bug", "fix typo");
        assert!((sim - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn similar_pattern_inherits_tier() {
        let mut controller = RoutingController::new(config());
        let fp = fingerprint(500, 0, 1, &["readme".to_string()]);
        controller.record_success(&fp, Tier::Frugal);

        let tracked = vec![fp.clone()];
        let recommended = controller.recommended_tier_for(&fp, &tracked, Tier::Frontier);
        assert_eq!(recommended, Tier::Frugal);
    }

    #[test]
    fn history_is_bounded_per_pattern() {
        let mut config = config();
        config.max_history_per_hash = 3;
        let mut controller = RoutingController::new(config);
        let fp = "pattern-1".to_string();
        for _ in 0..10 {
            controller.record_success(&fp, Tier::Standard);
        }
        assert_eq!(controller.history_len(&fp), 3);
    }

    #[test]
    fn history_is_bounded_globally_with_lru_eviction() {
        let mut config = config();
        config.max_total_history = 5;
        config.max_history_per_hash = 100;
        let mut controller = RoutingController::new(config);
        for i in 0..10 {
            let fp = format!("pattern-{}", i);
            controller.record_success(&fp, Tier::Standard);
        }
        assert!(controller.total_history_len() <= 5);
    }

    #[test]
    fn fingerprint_is_deterministic_and_buckets_similar_signals() {
        let a = fingerprint(100, 1, 1, &["login".to_string()]);
        let b = fingerprint(200, 2, 1, &["login".to_string()]);
        assert_eq!(a, b);
        let c = fingerprint(3000, 1, 1, &["login".to_string()]);
        assert_ne!(a, c);
    }
}
