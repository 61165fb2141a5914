//! Decision tree evaluation

pub mod node;
pub mod predicate;

pub use node::TreeNode;
pub use predicate::{Operand, Operator, Predicate};

use crate::errors::{PredictError, Result};
use crate::prediction::{Distribution, PredictionValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What to do when a split field is absent from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "String")]
pub enum MissingStrategy {
    /// Stop and return the prediction of the node holding the split
    #[default]
    LastPrediction,
    /// Descend into every child and merge their predictions by count
    Proportional,
}

impl MissingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MissingStrategy::LastPrediction => "last_prediction",
            MissingStrategy::Proportional => "proportional",
        }
    }
}

impl fmt::Display for MissingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissingStrategy {
    type Err = PredictError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "last_prediction" | "lastprediction" | "0" => Ok(MissingStrategy::LastPrediction),
            "proportional" | "1" => Ok(MissingStrategy::Proportional),
            other => Err(PredictError::invalid_option(format!(
                "unknown missing strategy {other:?}"
            ))),
        }
    }
}

impl TryFrom<Value> for MissingStrategy {
    type Error = PredictError;

    fn try_from(value: Value) -> Result<Self> {
        match &value {
            Value::String(s) => s.parse(),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Ok(MissingStrategy::LastPrediction),
                Some(1) => Ok(MissingStrategy::Proportional),
                _ => Err(PredictError::invalid_option(format!(
                    "unknown missing strategy code {n}"
                ))),
            },
            other => Err(PredictError::invalid_option(format!(
                "invalid missing strategy {other}"
            ))),
        }
    }
}

impl From<MissingStrategy> for String {
    fn from(strategy: MissingStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

/// Raw prediction of one tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreePrediction {
    pub prediction: PredictionValue,
    pub confidence: f64,
    /// Share of the winning category in the distribution (categorical only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    pub count: u64,
    pub distribution: Distribution,
    /// Rules followed from the root to the decision point
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Field needed to continue when traversal stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}
