//! Seed: the immutable, fully specified input to the Orchestrator Runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A weighted rubric used to judge whether the seed's goal was met.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPrinciple {
    pub name: String,
    pub description: String,
    pub weight: f64,
}

/// A named predicate checked to decide whether execution should stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitCondition {
    pub name: String,
    pub criteria: String,
}

/// Generated fields attached to a Seed at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedMetadata {
    pub seed_id: String,
    pub ambiguity_score: f64,
    pub created_at: DateTime<Utc>,
    pub interview_id: Option<String>,
}

/// The immutable, validated input to an orchestration run.
///
/// Once constructed, a Seed is never mutated — every field is set at
/// construction and the type exposes no `&mut self` methods. It serializes
/// losslessly to a self-describing document and back (property 1, §8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub goal: String,
    pub constraints: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub ontology_schema: HashMap<String, String>,
    pub evaluation_principles: Vec<EvaluationPrinciple>,
    pub exit_conditions: Vec<ExitCondition>,
    pub metadata: SeedMetadata,
}

impl Seed {
    /// Build a Seed, validating every invariant eagerly so a bad document
    /// never becomes a live Seed value.
    pub fn new(
        goal: impl Into<String>,
        constraints: Vec<String>,
        acceptance_criteria: Vec<String>,
        ontology_schema: HashMap<String, String>,
        evaluation_principles: Vec<EvaluationPrinciple>,
        exit_conditions: Vec<ExitCondition>,
        ambiguity_score: f64,
        interview_id: Option<String>,
    ) -> Result<Self> {
        let goal = goal.into();
        if goal.trim().is_empty() {
            return Err(Error::validation("seed goal must not be empty"));
        }
        if acceptance_criteria.is_empty() {
            return Err(Error::validation(
                "seed must declare at least one acceptance criterion",
            ));
        }
        if !(0.0..=1.0).contains(&ambiguity_score) {
            return Err(Error::validation("ambiguity_score must be in [0, 1]"));
        }
        for principle in &evaluation_principles {
            if !(0.0..=1.0).contains(&principle.weight) {
                return Err(Error::validation(format!(
                    "evaluation principle '{}' weight must be in [0, 1]",
                    principle.name
                )));
            }
        }

        Ok(Self {
            goal,
            constraints,
            acceptance_criteria,
            ontology_schema,
            evaluation_principles,
            exit_conditions,
            metadata: SeedMetadata {
                seed_id: format!("seed-{}", Uuid::new_v4()),
                ambiguity_score,
                created_at: Utc::now(),
                interview_id,
            },
        })
    }

    pub fn seed_id(&self) -> &str {
        &self.metadata.seed_id
    }

    /// Parse a Seed from a self-describing JSON document (§6 seed document
    /// format). Unknown top-level fields are rejected.
    pub fn from_document(document: &Value) -> Result<Self> {
        let obj = document
            .as_object()
            .ok_or_else(|| Error::validation("seed document must be a JSON object"))?;

        const KNOWN_FIELDS: &[&str] = &[
            "goal",
            "constraints",
            "acceptance_criteria",
            "ontology_schema",
            "evaluation_principles",
            "exit_conditions",
            "ambiguity_score",
            "interview_id",
        ];
        for key in obj.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                return Err(Error::validation(format!(
                    "unknown seed document field: {}",
                    key
                )));
            }
        }

        let goal = obj
            .get("goal")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("seed document missing 'goal'"))?
            .to_string();

        let constraints = parse_string_list(obj.get("constraints"))?;
        let acceptance_criteria = parse_string_list(obj.get("acceptance_criteria"))?;
        let ontology_schema: HashMap<String, String> = match obj.get("ontology_schema") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::validation(format!("invalid ontology_schema: {}", e)))?,
            None => HashMap::new(),
        };
        let evaluation_principles: Vec<EvaluationPrinciple> = match obj.get("evaluation_principles")
        {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::validation(format!("invalid evaluation_principles: {}", e)))?,
            None => Vec::new(),
        };
        let exit_conditions: Vec<ExitCondition> = match obj.get("exit_conditions") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::validation(format!("invalid exit_conditions: {}", e)))?,
            None => Vec::new(),
        };
        let ambiguity_score = obj
            .get("ambiguity_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let interview_id = obj
            .get("interview_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self::new(
            goal,
            constraints,
            acceptance_criteria,
            ontology_schema,
            evaluation_principles,
            exit_conditions,
            ambiguity_score,
            interview_id,
        )
    }

    /// Serialize back to a self-describing JSON document.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).expect("Seed always serializes")
    }
}

fn parse_string_list(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None => Ok(Vec::new()),
        Some(v) => v
            .as_array()
            .ok_or_else(|| Error::validation("expected a JSON array of strings"))?
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::validation("expected a string in list"))
            })
            .collect(),
    }
}
