//! Cluster centroids and the squared distance to an input

use crate::errors::{PredictError, Result};
use crate::fields::{format_number, Field, OpType};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Coordinate of a centroid (or of a prepared input) along one field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CenterValue {
    Number(f64),
    Category(String),
    Terms(BTreeSet<String>),
}

impl CenterValue {
    /// Parse a centroid coordinate for `field`
    pub(crate) fn from_json(field: &Field, value: &Value) -> Result<Self> {
        match (field.optype, value) {
            (OpType::Numeric, Value::Number(n)) => n
                .as_f64()
                .map(CenterValue::Number)
                .ok_or_else(|| PredictError::malformed(format!("invalid center value {n}"))),
            (OpType::Text | OpType::Items, Value::Array(terms)) => Ok(CenterValue::Terms(
                terms
                    .iter()
                    .map(|term| match term {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            (OpType::Text | OpType::Items, Value::String(term)) => {
                Ok(CenterValue::Terms(BTreeSet::from([term.clone()])))
            }
            (OpType::Categorical | OpType::Datetime, Value::String(s)) => {
                Ok(CenterValue::Category(s.clone()))
            }
            (OpType::Categorical | OpType::Datetime, Value::Number(n)) => Ok(CenterValue::Category(
                n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
            )),
            (OpType::Categorical | OpType::Datetime, Value::Bool(b)) => {
                Ok(CenterValue::Category(b.to_string()))
            }
            (optype, other) => Err(PredictError::malformed(format!(
                "center value {other} does not fit {optype:?} field {}",
                field.id
            ))),
        }
    }
}

/// Squared distance contribution of one field
pub(crate) fn field_distance2(input: &CenterValue, center: &CenterValue, scale: f64) -> f64 {
    match (input, center) {
        (CenterValue::Number(value), CenterValue::Number(center)) => {
            let delta = (value - center) * scale;
            delta * delta
        }
        (CenterValue::Category(value), CenterValue::Category(center)) => {
            if value == center {
                0.0
            } else {
                scale * scale
            }
        }
        (CenterValue::Terms(terms), CenterValue::Terms(center)) => {
            if terms.is_empty() && center.is_empty() {
                return 0.0;
            }
            let similarity = if terms.is_empty() || center.is_empty() {
                0.0
            } else {
                let shared = terms.intersection(center).count() as f64;
                shared / ((terms.len() * center.len()) as f64).sqrt()
            };
            let delta = scale * (1.0 - similarity);
            delta * delta
        }
        _ => 0.0,
    }
}

/// A cluster centroid
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPredictionCentroid {
    pub id: String,
    pub name: String,
    /// Coordinates keyed by field id
    pub center: BTreeMap<String, CenterValue>,
    pub count: u64,
}

impl LocalPredictionCentroid {
    /// Squared distance to a prepared input, or `None` once it reaches `stop`
    ///
    /// Fields absent from either side contribute nothing; terms accumulate in
    /// ascending field id order. An infinite `stop` never abandons the sum, so
    /// a distance that overflows is still returned.
    pub fn distance2(
        &self,
        input: &BTreeMap<String, CenterValue>,
        scales: &BTreeMap<String, f64>,
        stop: f64,
    ) -> Option<f64> {
        let mut distance2 = 0.0;
        for (field_id, center) in &self.center {
            let Some(value) = input.get(field_id) else {
                continue;
            };
            let scale = scales.get(field_id).copied().unwrap_or(1.0);
            distance2 += field_distance2(value, center, scale);
            if stop.is_finite() && distance2 >= stop {
                return None;
            }
        }
        Some(distance2)
    }
}
