//! Tier Catalog (C4): the three cost/capability tiers and their candidate
//! models.

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Frugal,
    Standard,
    Frontier,
}

impl Tier {
    /// Relative cost multiplier against Frugal's baseline of 1.
    pub fn cost_multiplier(&self) -> u32 {
        match self {
            Tier::Frugal => 1,
            Tier::Standard => 10,
            Tier::Frontier => 30,
        }
    }

    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Frugal => Some(Tier::Standard),
            Tier::Standard => Some(Tier::Frontier),
            Tier::Frontier => None,
        }
    }

    pub fn previous(&self) -> Option<Tier> {
        match self {
            Tier::Frugal => None,
            Tier::Standard => Some(Tier::Frugal),
            Tier::Frontier => Some(Tier::Standard),
        }
    }

    pub fn all() -> [Tier; 3] {
        [Tier::Frugal, Tier::Standard, Tier::Frontier]
    }
}

/// One model available at a given tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierCandidate {
    pub model_id: String,
    pub provider: String,
}

/// The set of candidate models per tier, plus lookups used by the Routing
/// Controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierCatalog {
    candidates: HashMap<Tier, Vec<TierCandidate>>,
}

impl TierCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidate(mut self, tier: Tier, model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        self.candidates.entry(tier).or_default().push(TierCandidate {
            model_id: model_id.into(),
            provider: provider.into(),
        });
        self
    }

    pub fn candidates(&self, tier: Tier) -> &[TierCandidate] {
        self.candidates.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The default catalog, grounded on the well-known model identifiers
    /// already named in the LLM client adapter.
    pub fn default_catalog() -> Self {
        Self::new()
            .with_candidate(Tier::Frugal, "claude-3-5-haiku-20241022", "anthropic")
            .with_candidate(Tier::Standard, "claude-3-5-sonnet-20241022", "anthropic")
            .with_candidate(Tier::Frontier, "claude-3-opus-20240229", "anthropic")
    }

    /// Uniformly select one candidate model at random from the given tier.
    pub fn get_model_for_tier(&self, tier: Tier) -> Result<&TierCandidate> {
        let pool = self.candidates(tier);
        if pool.is_empty() {
            return Err(Error::config(format!(
                "tier catalog has no candidates configured for tier {:?}",
                tier
            )));
        }
        pool.choose(&mut rand::rng())
            .ok_or_else(|| Error::Internal("candidate pool unexpectedly empty".to_string()))
    }

    /// Validate that every tier has at least one candidate model configured.
    pub fn validate_configuration(&self) -> Result<()> {
        for tier in Tier::all() {
            if self.candidates(tier).is_empty() {
                return Err(Error::config(format!(
                    "tier catalog missing candidates for tier {:?}",
                    tier
                )));
            }
        }
        Ok(())
    }
}
