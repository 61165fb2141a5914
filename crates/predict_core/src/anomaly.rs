//! Isolation-forest anomaly scoring
//!
//! Each tree isolates the input by walking binary splits. Inputs that isolate
//! after few splits are anomalous: the score is `2^(-d / c(n))` where `d` is
//! the average depth over the forest and `c(n)` the expected depth for the
//! training sample size.

use crate::config::PredictOptions;
use crate::errors::{PredictError, Result};
use crate::fields::{parse_fields, FieldResource, FieldValue, InputRecord};
use crate::local::unwrap_object;
use crate::stats::expected_isolation_depth;
use crate::tree::Predicate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RawIsolationNode {
    predicates: Option<Value>,
    predicate: Option<Value>,
    #[serde(default)]
    population: f64,
    #[serde(default)]
    stopped: bool,
    #[serde(default)]
    children: Vec<RawIsolationNode>,
}

#[derive(Debug, Deserialize)]
struct RawIsolationTree {
    root: RawIsolationNode,
}

#[derive(Debug, Deserialize)]
struct RawTopAnomaly {
    #[serde(default)]
    row: Vec<Value>,
    score: f64,
    #[serde(default)]
    importance: Value,
}

#[derive(Debug, Deserialize)]
struct RawForest {
    fields: Option<Value>,
    trees: Vec<RawIsolationTree>,
    sample_size: Option<f64>,
    mean_depth: Option<f64>,
    top_anomalies: Option<Vec<RawTopAnomaly>>,
}

#[derive(Debug, Deserialize)]
struct RawAnomaly {
    resource: Option<String>,
    name: Option<String>,
    sample_size: Option<f64>,
    mean_depth: Option<f64>,
    top_anomalies: Option<Vec<RawTopAnomaly>>,
    fields: Option<Value>,
    model: RawForest,
}

/// Node of an isolation tree
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationNode {
    /// Conjunction that must hold to enter the node (empty means always)
    pub predicates: Vec<Predicate>,
    pub population: u64,
    /// Growth stopped here before the population was isolated
    pub stopped: bool,
    pub children: Vec<IsolationNode>,
}

impl IsolationNode {
    fn from_raw(raw: RawIsolationNode) -> Result<Self> {
        let mut predicates = Vec::new();
        let descriptions = match (raw.predicates, raw.predicate) {
            (Some(Value::Array(items)), _) => items,
            (Some(single), _) | (None, Some(single)) => vec![single],
            (None, None) => Vec::new(),
        };
        for description in &descriptions {
            if let Some(predicate) = Predicate::from_json(description)? {
                predicates.push(predicate);
            }
        }

        if raw.children.len() > 2 {
            return Err(PredictError::malformed(format!(
                "isolation node has {} children, expected a binary split",
                raw.children.len()
            )));
        }
        let children = raw
            .children
            .into_iter()
            .map(Self::from_raw)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            predicates,
            population: raw.population.max(0.0).round() as u64,
            stopped: raw.stopped,
            children,
        })
    }

    /// Whether every predicate of the node holds for `input`
    pub fn applies(&self, input: &InputRecord, fields: &FieldResource) -> bool {
        self.predicates.iter().all(|p| p.apply(input, fields))
    }

    /// A child predicate could not be evaluated because its field is missing
    fn blocked_by_missing(&self, input: &InputRecord) -> bool {
        self.children
            .iter()
            .flat_map(|child| &child.predicates)
            .any(|p| !p.accepts_missing() && !input.contains_key(&p.field))
    }
}

/// One tree of an isolation forest
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationTree {
    pub root: IsolationNode,
}

impl IsolationTree {
    /// Number of edges walked to isolate `input`, plus the expected remainder
    /// below a stopped node
    pub fn depth(&self, input: &InputRecord, fields: &FieldResource) -> Result<f64> {
        if !self.root.applies(input, fields) {
            return Ok(0.0);
        }

        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            if node.stopped {
                return Ok(depth + expected_isolation_depth(node.population as f64));
            }
            if node.children.is_empty() {
                return Ok(depth);
            }
            match node.children.iter().find(|child| child.applies(input, fields)) {
                Some(child) => {
                    depth += 1.0;
                    node = child;
                }
                None if node.blocked_by_missing(input) => return Ok(depth),
                None => {
                    return Err(PredictError::malformed(
                        "input matches no branch of an isolation node",
                    ))
                }
            }
        }
    }
}

/// A precomputed anomalous training row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopAnomaly {
    pub row: Vec<FieldValue>,
    pub score: f64,
    /// Per-field contribution to the score
    pub importance: BTreeMap<String, f64>,
}

impl TopAnomaly {
    fn from_raw(raw: RawTopAnomaly) -> Result<Self> {
        let row = raw
            .row
            .into_iter()
            .map(|value| {
                serde_json::from_value::<FieldValue>(value)
                    .map_err(|e| PredictError::malformed(format!("invalid top anomaly row: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let importance = match raw.importance {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(id, v)| v.as_f64().map(|v| (id, v)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Ok(Self {
            row,
            score: raw.score,
            importance,
        })
    }
}

/// Anomaly score of one input
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyScore {
    pub score: f64,
}

/// `2^(-average_depth / c(sample_size))`
pub fn score_from_depth(average_depth: f64, sample_size: f64) -> f64 {
    2f64.powf(-average_depth / expected_isolation_depth(sample_size))
}

/// An isolation forest evaluated locally
#[derive(Debug, Clone)]
pub struct Anomaly {
    resource_id: Option<String>,
    name: Option<String>,
    fields: FieldResource,
    trees: Vec<IsolationTree>,
    sample_size: u64,
    mean_depth: Option<f64>,
    expected_mean_depth: f64,
    top_anomalies: Vec<TopAnomaly>,
}

impl Anomaly {
    /// Load an anomaly detector description (optionally wrapped in `object`)
    pub fn from_json(value: &Value) -> Result<Self> {
        let value = unwrap_object(value);
        let raw: RawAnomaly = serde_json::from_value(value.clone()).map_err(|e| {
            PredictError::malformed(format!("invalid anomaly detector description: {e}"))
        })?;

        let fields_json = raw
            .model
            .fields
            .or(raw.fields)
            .ok_or_else(|| PredictError::malformed("anomaly detector has no fields"))?;
        let fields = FieldResource::new(parse_fields(&fields_json)?)?;

        let sample_size = raw
            .sample_size
            .or(raw.model.sample_size)
            .filter(|n| n.is_finite() && *n >= 0.0)
            .ok_or_else(|| PredictError::malformed("anomaly detector has no sample size"))?;

        if raw.model.trees.is_empty() {
            return Err(PredictError::malformed("anomaly detector has no trees"));
        }
        let trees = raw
            .model
            .trees
            .into_iter()
            .map(|tree| IsolationNode::from_raw(tree.root).map(|root| IsolationTree { root }))
            .collect::<Result<Vec<_>>>()?;

        let mut top_anomalies = raw
            .top_anomalies
            .or(raw.model.top_anomalies)
            .unwrap_or_default()
            .into_iter()
            .map(TopAnomaly::from_raw)
            .collect::<Result<Vec<_>>>()?;
        top_anomalies.sort_by(|a, b| b.score.total_cmp(&a.score));

        let expected_mean_depth = expected_isolation_depth(sample_size);
        info!(
            resource = raw.resource.as_deref().unwrap_or("inline"),
            trees = trees.len(),
            sample_size,
            "Loaded anomaly detector"
        );

        Ok(Self {
            resource_id: raw.resource,
            name: raw.name,
            fields,
            trees,
            sample_size: sample_size.round() as u64,
            mean_depth: raw.mean_depth.or(raw.model.mean_depth),
            expected_mean_depth,
            top_anomalies,
        })
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn fields(&self) -> &FieldResource {
        &self.fields
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    /// Mean depth measured on the training data, when the description has it
    pub fn mean_depth(&self) -> Option<f64> {
        self.mean_depth
    }

    pub fn expected_mean_depth(&self) -> f64 {
        self.expected_mean_depth
    }

    /// Top anomalies, highest score first
    pub fn top_anomalies(&self) -> &[TopAnomaly] {
        &self.top_anomalies
    }

    /// Average isolation depth over the forest for an id-keyed input
    pub fn average_depth(&self, input: &InputRecord) -> Result<f64> {
        let mut total = 0.0;
        for tree in &self.trees {
            total += tree.depth(input, &self.fields)?;
        }
        Ok(total / self.trees.len() as f64)
    }

    /// Anomaly score in (0, 1]
    pub fn score(&self, input: &InputRecord, options: &PredictOptions) -> Result<AnomalyScore> {
        let filtered = self
            .fields
            .filter_input(input, options.by_name, options.strict)?;
        let average_depth = self.average_depth(&filtered)?;
        let score = score_from_depth(average_depth, self.sample_size as f64);
        debug!(average_depth, score, "scored input");
        Ok(AnomalyScore { score })
    }
}
