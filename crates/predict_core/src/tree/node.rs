//! Decision tree nodes and traversal
//!
//! Nodes are owned recursively; each non-leaf node's children split on one
//! shared field. Traversal follows the single matching child while the split
//! field is present and hands over to the [`MissingStrategy`] when it is not.

use super::predicate::Predicate;
use super::{MissingStrategy, TreePrediction};
use crate::errors::{PredictError, Result};
use crate::fields::{FieldResource, InputRecord};
use crate::prediction::{Distribution, PredictionValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

fn default_predicate() -> Value {
    Value::Bool(true)
}

#[derive(Debug, Deserialize)]
struct RawObjectiveSummary {
    categories: Option<Value>,
    bins: Option<Value>,
    counts: Option<Value>,
    median: Option<f64>,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawNode {
    id: Option<u64>,
    #[serde(default = "default_predicate")]
    predicate: Value,
    output: Value,
    #[serde(default)]
    confidence: f64,
    count: Option<f64>,
    objective_summary: Option<RawObjectiveSummary>,
    distribution: Option<Value>,
    median: Option<f64>,
    #[serde(default)]
    children: Vec<RawNode>,
}

impl RawNode {
    pub(crate) fn output_is_number(&self) -> bool {
        self.output.is_number()
    }
}

/// A node of a decision tree
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: Option<u64>,
    /// `None` for the root, which always applies
    pub predicate: Option<Predicate>,
    pub children: Vec<TreeNode>,
    pub output: PredictionValue,
    pub confidence: f64,
    pub count: u64,
    /// Training distribution reaching this node (categories or numeric bins)
    pub distribution: Distribution,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Outcome of evaluating one node's split
enum Branch<'a> {
    Leaf,
    Child(&'a TreeNode),
    Missing(&'a str),
}

impl TreeNode {
    /// Parse a node description (and its subtree)
    pub fn from_json(value: &Value, regression: bool) -> Result<Self> {
        let raw: RawNode = serde_json::from_value(value.clone())
            .map_err(|e| PredictError::malformed(format!("invalid tree node: {e}")))?;
        Self::from_raw(raw, regression)
    }

    pub(crate) fn from_raw(raw: RawNode, regression: bool) -> Result<Self> {
        let predicate = Predicate::from_json(&raw.predicate)?;
        let output = PredictionValue::from_json(&raw.output, regression)?;

        if !regression && !(0.0..=1.0).contains(&raw.confidence) {
            return Err(PredictError::malformed(format!(
                "node {:?} has confidence {} outside [0, 1]",
                raw.id, raw.confidence
            )));
        }

        let mut median = raw.median;
        let mut min = None;
        let mut max = None;
        let mut distribution = match (&raw.objective_summary, &raw.distribution) {
            (Some(summary), _) => {
                median = median.or(summary.median);
                min = summary.minimum;
                max = summary.maximum;
                match summary
                    .categories
                    .as_ref()
                    .or(summary.bins.as_ref())
                    .or(summary.counts.as_ref())
                {
                    Some(pairs) => Distribution::from_json(pairs, regression)?,
                    None => Distribution::new(),
                }
            }
            (None, Some(pairs)) => Distribution::from_json(pairs, regression)?,
            (None, None) => Distribution::new(),
        };

        let count = match raw.count {
            Some(c) if c < 0.0 => {
                return Err(PredictError::malformed(format!(
                    "node {:?} has negative count {c}",
                    raw.id
                )))
            }
            Some(c) => c.round() as u64,
            None => distribution.total(),
        };

        if distribution.is_empty() {
            distribution.add(output.clone(), count);
        } else if raw.children.is_empty() && distribution.total() != count {
            warn!(
                node = ?raw.id,
                count,
                distribution_total = distribution.total(),
                "leaf distribution does not sum to its count"
            );
        }

        if regression {
            median = median.or_else(|| distribution.median());
            min = min.or_else(|| distribution.min_value());
            max = max.or_else(|| distribution.max_value());
        } else {
            median = None;
        }

        let children = raw
            .children
            .into_iter()
            .map(|child| Self::from_raw(child, regression))
            .collect::<Result<Vec<_>>>()?;

        let node = Self {
            id: raw.id,
            predicate,
            children,
            output,
            confidence: raw.confidence,
            count,
            distribution,
            median,
            min,
            max,
        };
        node.check_children()?;
        Ok(node)
    }

    /// Every child carries a predicate and all of them split on the same field
    fn check_children(&self) -> Result<()> {
        let mut split_field: Option<&str> = None;
        for child in &self.children {
            let predicate = child.predicate.as_ref().ok_or_else(|| {
                PredictError::malformed(format!("child of node {:?} has no predicate", self.id))
            })?;
            match split_field {
                None => split_field = Some(&predicate.field),
                Some(field) if field != predicate.field => {
                    return Err(PredictError::malformed(format!(
                        "children of node {:?} split on both {field} and {}",
                        self.id, predicate.field
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Field the children of this node split on
    pub fn split_field(&self) -> Option<&str> {
        self.children
            .first()
            .and_then(|child| child.predicate.as_ref())
            .map(|predicate| predicate.field.as_str())
    }

    pub fn is_regression(&self) -> bool {
        self.output.is_numeric()
    }

    /// Depth of the subtree rooted here (a leaf has depth 0)
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    fn branch<'a>(&'a self, input: &InputRecord, fields: &FieldResource) -> Result<Branch<'a>> {
        let Some(field) = self.split_field() else {
            return Ok(Branch::Leaf);
        };

        let accepts_missing = self
            .children
            .iter()
            .filter_map(|child| child.predicate.as_ref())
            .any(Predicate::accepts_missing);
        if !input.contains_key(field) && !accepts_missing {
            return Ok(Branch::Missing(field));
        }

        self.children
            .iter()
            .find(|child| {
                child
                    .predicate
                    .as_ref()
                    .is_some_and(|predicate| predicate.apply(input, fields))
            })
            .map(Branch::Child)
            .ok_or_else(|| {
                let value = input
                    .get(field)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "missing".to_string());
                PredictError::malformed(format!(
                    "no branch of node {:?} matches {} = {value}",
                    self.id,
                    fields.display_name(field)
                ))
            })
    }

    /// Predict for an id-keyed, already filtered input record
    pub fn predict(
        &self,
        input: &InputRecord,
        fields: &FieldResource,
        strategy: MissingStrategy,
    ) -> Result<TreePrediction> {
        let mut path = Vec::new();
        let mut prediction = match strategy {
            MissingStrategy::LastPrediction => self.predict_last(input, fields, &mut path)?,
            MissingStrategy::Proportional => {
                self.predict_proportional(input, fields, &mut path, false)?
            }
        };
        prediction.path = path;
        Ok(prediction)
    }

    fn predict_last(
        &self,
        input: &InputRecord,
        fields: &FieldResource,
        path: &mut Vec<String>,
    ) -> Result<TreePrediction> {
        let mut node = self;
        loop {
            match node.branch(input, fields)? {
                Branch::Leaf => return Ok(node.as_prediction()),
                Branch::Missing(field) => {
                    debug!(node = ?node.id, field, "split field missing, stopping at node");
                    let mut prediction = node.as_prediction();
                    prediction.next = Some(fields.display_name(field).to_string());
                    return Ok(prediction);
                }
                Branch::Child(child) => {
                    if let Some(predicate) = &child.predicate {
                        path.push(predicate.to_rule(fields));
                    }
                    node = child;
                }
            }
        }
    }

    fn predict_proportional(
        &self,
        input: &InputRecord,
        fields: &FieldResource,
        path: &mut Vec<String>,
        missing_found: bool,
    ) -> Result<TreePrediction> {
        match self.branch(input, fields)? {
            Branch::Leaf => Ok(self.as_prediction()),
            Branch::Child(child) => {
                if !missing_found {
                    if let Some(predicate) = &child.predicate {
                        path.push(predicate.to_rule(fields));
                    }
                }
                child.predict_proportional(input, fields, path, missing_found)
            }
            Branch::Missing(field) => {
                debug!(node = ?self.id, field, "split field missing, merging all children");
                let parts = self
                    .children
                    .iter()
                    .map(|child| child.predict_proportional(input, fields, path, true))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.merge(parts))
            }
        }
    }

    /// Combine the predictions of all children, weighted by instance count
    fn merge(&self, parts: Vec<TreePrediction>) -> TreePrediction {
        let count: u64 = parts.iter().map(|p| p.count).sum();
        if count == 0 {
            return self.as_prediction();
        }

        let mut distribution = Distribution::new();
        for part in &parts {
            distribution.merge(&part.distribution);
        }
        let confidence = parts
            .iter()
            .map(|p| p.confidence * p.count as f64)
            .sum::<f64>()
            / count as f64;

        if self.is_regression() {
            let mean = crate::stats::weighted_mean(
                parts
                    .iter()
                    .filter_map(|p| p.prediction.as_f64().map(|v| (v, p.count as f64))),
            )
            .unwrap_or_else(|| self.output.as_f64().unwrap_or(0.0));
            let median = distribution.median().or_else(|| {
                crate::stats::weighted_mean(
                    parts
                        .iter()
                        .filter_map(|p| p.median.map(|m| (m, p.count as f64))),
                )
            });
            TreePrediction {
                prediction: PredictionValue::Number(mean),
                confidence,
                probability: None,
                count,
                distribution,
                path: Vec::new(),
                median,
                min: parts.iter().filter_map(|p| p.min).reduce(f64::min),
                max: parts.iter().filter_map(|p| p.max).reduce(f64::max),
                next: None,
            }
        } else {
            let (prediction, winner_count) = distribution
                .mode()
                .cloned()
                .unwrap_or_else(|| (self.output.clone(), 0));
            let total = distribution.total();
            let probability = if total > 0 {
                winner_count as f64 / total as f64
            } else {
                0.0
            };
            TreePrediction {
                prediction,
                confidence: confidence.clamp(0.0, 1.0),
                probability: Some(probability),
                count,
                distribution,
                path: Vec::new(),
                median: None,
                min: None,
                max: None,
                next: None,
            }
        }
    }

    /// This node's own prediction
    pub fn as_prediction(&self) -> TreePrediction {
        let probability = if self.is_regression() {
            None
        } else {
            let total = self.distribution.total();
            Some(if total > 0 {
                self.distribution.count_of(&self.output) as f64 / total as f64
            } else {
                0.0
            })
        };
        TreePrediction {
            prediction: self.output.clone(),
            confidence: self.confidence,
            probability,
            count: self.count,
            distribution: self.distribution.clone(),
            path: Vec::new(),
            median: self.median,
            min: self.min,
            max: self.max,
            next: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{parse_fields, FieldValue};
    use serde_json::json;

    fn fields() -> FieldResource {
        FieldResource::with_objective(
            parse_fields(&json!({
                "000003": {"name": "petal width", "optype": "numeric"},
                "000004": {"name": "species", "optype": "categorical"}
            }))
            .unwrap(),
            Some("000004".into()),
            None,
        )
        .unwrap()
    }

    fn iris_root() -> TreeNode {
        TreeNode::from_json(
            &json!({
                "id": 0,
                "predicate": true,
                "output": "setosa",
                "confidence": 0.26,
                "count": 100,
                "objective_summary": {"categories": [["setosa", 50], ["versicolor", 50]]},
                "children": [
                    {"id": 1, "predicate": {"field": "000003", "operator": "<", "value": 1.0},
                     "output": "setosa", "confidence": 0.96, "count": 50,
                     "objective_summary": {"categories": [["setosa", 50]]}},
                    {"id": 2, "predicate": {"field": "000003", "operator": ">=", "value": 1.0},
                     "output": "versicolor", "confidence": 0.92, "count": 50,
                     "objective_summary": {"categories": [["versicolor", 50]]}}
                ]
            }),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_follows_matching_child() {
        let root = iris_root();
        let input = InputRecord::from([("000003".to_string(), FieldValue::from(0.5))]);
        let prediction = root
            .predict(&input, &fields(), MissingStrategy::LastPrediction)
            .unwrap();
        assert_eq!(prediction.prediction, PredictionValue::from("setosa"));
        assert_eq!(prediction.confidence, 0.96);
        assert_eq!(prediction.count, 50);
        assert_eq!(prediction.path, vec!["petal width < 1"]);
        assert_eq!(prediction.probability, Some(1.0));
    }

    #[test]
    fn test_last_prediction_stops_at_missing_split() {
        let root = iris_root();
        let prediction = root
            .predict(&InputRecord::new(), &fields(), MissingStrategy::LastPrediction)
            .unwrap();
        assert_eq!(prediction.prediction, PredictionValue::from("setosa"));
        assert_eq!(prediction.count, 100);
        assert!(prediction.path.is_empty());
        assert_eq!(prediction.next.as_deref(), Some("petal width"));
    }

    #[test]
    fn test_proportional_merges_children() {
        let root = iris_root();
        let prediction = root
            .predict(&InputRecord::new(), &fields(), MissingStrategy::Proportional)
            .unwrap();
        assert_eq!(prediction.count, 100);
        assert_eq!(prediction.prediction, PredictionValue::from("setosa"));
        assert!((prediction.confidence - 0.94).abs() < 1e-9);
        assert_eq!(prediction.probability, Some(0.5));
        assert_eq!(prediction.distribution.total(), 100);
    }

    #[test]
    fn test_no_matching_child_is_malformed() {
        let root = TreeNode::from_json(
            &json!({
                "output": "a", "confidence": 0.5, "count": 2,
                "children": [
                    {"predicate": {"field": "000003", "operator": "<", "value": 1.0},
                     "output": "a", "confidence": 0.5, "count": 1},
                    {"predicate": {"field": "000003", "operator": ">", "value": 2.0},
                     "output": "b", "confidence": 0.5, "count": 1}
                ]
            }),
            false,
        )
        .unwrap();
        let input = InputRecord::from([("000003".to_string(), FieldValue::from(1.5))]);
        let err = root
            .predict(&input, &fields(), MissingStrategy::LastPrediction)
            .unwrap_err();
        assert!(matches!(err, PredictError::MalformedModel(_)));
    }

    #[test]
    fn test_confidence_out_of_range_is_malformed() {
        let err = TreeNode::from_json(&json!({"output": "a", "confidence": 1.5, "count": 1}), false);
        assert!(matches!(err, Err(PredictError::MalformedModel(_))));
    }

    #[test]
    fn test_regression_leaf_derives_median_from_bins() {
        let leaf = TreeNode::from_json(
            &json!({"output": 2.0, "confidence": 0.3, "count": 4,
                    "objective_summary": {"bins": [[1.0, 2], [3.0, 2]]}}),
            true,
        )
        .unwrap();
        assert_eq!(leaf.median, Some(2.0));
        assert_eq!(leaf.min, Some(1.0));
        assert_eq!(leaf.max, Some(3.0));
        assert_eq!(leaf.as_prediction().probability, None);
    }

    #[test]
    fn test_children_must_share_split_field() {
        let err = TreeNode::from_json(
            &json!({
                "output": "a", "confidence": 0.5, "count": 2,
                "children": [
                    {"predicate": {"field": "000003", "operator": "<", "value": 1.0},
                     "output": "a", "confidence": 0.5, "count": 1},
                    {"predicate": {"field": "000004", "operator": "=", "value": "x"},
                     "output": "b", "confidence": 0.5, "count": 1}
                ]
            }),
            false,
        );
        assert!(matches!(err, Err(PredictError::MalformedModel(_))));
    }
}
