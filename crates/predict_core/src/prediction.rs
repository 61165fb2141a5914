//! Prediction values, output distributions and result records

use crate::errors::{PredictError, Result};
use crate::fields::format_number;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// A predicted category or number
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionValue {
    Category(String),
    Number(f64),
}

impl PredictionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PredictionValue::Number(n) => Some(*n),
            PredictionValue::Category(_) => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            PredictionValue::Category(c) => Some(c),
            PredictionValue::Number(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PredictionValue::Number(_))
    }

    pub(crate) fn from_json(value: &Value, numeric: bool) -> Result<Self> {
        match value {
            Value::Number(n) if numeric => n
                .as_f64()
                .map(PredictionValue::Number)
                .ok_or_else(|| PredictError::malformed(format!("invalid number {n}"))),
            Value::Number(n) => Ok(PredictionValue::Category(
                n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
            )),
            Value::String(s) if numeric => s
                .parse::<f64>()
                .map(PredictionValue::Number)
                .map_err(|_| PredictError::malformed(format!("expected a number, found {s:?}"))),
            Value::String(s) => Ok(PredictionValue::Category(s.clone())),
            Value::Bool(b) if !numeric => Ok(PredictionValue::Category(b.to_string())),
            other => Err(PredictError::malformed(format!(
                "unexpected prediction value {other}"
            ))),
        }
    }
}

impl fmt::Display for PredictionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionValue::Category(c) => f.write_str(c),
            PredictionValue::Number(n) => f.write_str(&format_number(*n)),
        }
    }
}

impl Serialize for PredictionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PredictionValue::Category(c) => serializer.serialize_str(c),
            PredictionValue::Number(n) => serializer.serialize_f64(*n),
        }
    }
}

impl From<&str> for PredictionValue {
    fn from(value: &str) -> Self {
        PredictionValue::Category(value.to_string())
    }
}

impl From<f64> for PredictionValue {
    fn from(value: f64) -> Self {
        PredictionValue::Number(value)
    }
}

/// Instance counts per category (or per numeric bin), in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    entries: Vec<(PredictionValue, u64)>,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(PredictionValue, u64)>) -> Self {
        let mut distribution = Self::new();
        for (value, count) in entries {
            distribution.add(value, count);
        }
        distribution
    }

    pub fn entries(&self) -> &[(PredictionValue, u64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, c)| c).sum()
    }

    pub fn count_of(&self, value: &PredictionValue) -> u64 {
        self.entries
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Add `count` instances of `value`, keeping first-seen order
    pub fn add(&mut self, value: PredictionValue, count: u64) {
        match self.entries.iter_mut().find(|(v, _)| *v == value) {
            Some((_, c)) => *c += count,
            None => self.entries.push((value, count)),
        }
    }

    pub fn merge(&mut self, other: &Distribution) {
        for (value, count) in &other.entries {
            self.add(value.clone(), *count);
        }
    }

    /// Highest count first; equal counts keep first-seen order
    pub fn sorted_by_count(&self) -> Distribution {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        Distribution { entries }
    }

    /// Numeric bins in ascending value order
    pub fn sorted_by_value(&self) -> Distribution {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            let left = a.0.as_f64().unwrap_or(f64::NAN);
            let right = b.0.as_f64().unwrap_or(f64::NAN);
            left.total_cmp(&right)
        });
        Distribution { entries }
    }

    /// Most populated entry; ties resolve to the first seen
    pub fn mode(&self) -> Option<&(PredictionValue, u64)> {
        self.entries
            .iter()
            .fold(None, |best: Option<&(PredictionValue, u64)>, entry| match best {
                Some(b) if b.1 >= entry.1 => Some(b),
                _ => Some(entry),
            })
    }

    /// Weighted median of numeric bins
    pub fn median(&self) -> Option<f64> {
        let sorted = self.sorted_by_value();
        let total = sorted.total();
        if total == 0 {
            return None;
        }
        let mut cumulative = 0u64;
        let mut previous: Option<f64> = None;
        for (value, count) in &sorted.entries {
            let value = value.as_f64()?;
            let before = cumulative;
            cumulative += count;
            if *count == 0 {
                continue;
            }
            if cumulative * 2 > total {
                return match previous {
                    Some(prev) if total % 2 == 0 && before * 2 == total => {
                        Some((prev + value) / 2.0)
                    }
                    _ => Some(value),
                };
            }
            previous = Some(value);
        }
        previous
    }

    /// Count-weighted mean of numeric bins
    pub fn mean(&self) -> Option<f64> {
        crate::stats::weighted_mean(
            self.entries
                .iter()
                .filter_map(|(v, c)| v.as_f64().map(|v| (v, *c as f64))),
        )
    }

    pub fn min_value(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter(|(_, c)| *c > 0)
            .filter_map(|(v, _)| v.as_f64())
            .reduce(f64::min)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter(|(_, c)| *c > 0)
            .filter_map(|(v, _)| v.as_f64())
            .reduce(f64::max)
    }

    pub(crate) fn from_json(value: &Value, numeric: bool) -> Result<Self> {
        let pairs = value
            .as_array()
            .ok_or_else(|| PredictError::malformed("distribution must be a list of pairs"))?;
        let mut distribution = Distribution::new();
        for pair in pairs {
            let (label, count) = match pair.as_array().map(Vec::as_slice) {
                Some([label, count]) => (label, count),
                _ => {
                    return Err(PredictError::malformed(format!(
                        "invalid distribution entry {pair}"
                    )))
                }
            };
            let count = count
                .as_f64()
                .filter(|c| *c >= 0.0)
                .ok_or_else(|| PredictError::malformed(format!("invalid count in {pair}")))?;
            distribution.add(PredictionValue::from_json(label, numeric)?, count.round() as u64);
        }
        Ok(distribution)
    }
}

impl Serialize for Distribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for entry in &self.entries {
            seq.serialize_element(entry)?;
        }
        seq.end()
    }
}

/// One entry of a categorical multiple-output prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPrediction {
    pub prediction: PredictionValue,
    pub confidence: f64,
    pub probability: f64,
    pub count: u64,
}

/// Result record returned for models and ensembles
///
/// Only `prediction` is always present; every other field appears depending on
/// the resource kind and the requested output options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub prediction: PredictionValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<CategoryPrediction>>,
}

impl Prediction {
    pub fn new(prediction: PredictionValue) -> Self {
        Self {
            prediction,
            confidence: None,
            probability: None,
            count: None,
            distribution: None,
            path: None,
            median: None,
            min: None,
            max: None,
            next: None,
            predictions: None,
        }
    }
}
