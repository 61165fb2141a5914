//! Single decision tree model
//!
//! A [`PredictiveModel`] owns the root [`TreeNode`] of a model description
//! together with the [`FieldResource`] built from its schema.

use crate::config::PredictOptions;
use crate::ensemble::multivote::category_predictions;
use crate::errors::{PredictError, Result};
use crate::fields::{parse_fields, FieldResource, InputRecord, OpType};
use crate::local::unwrap_object;
use crate::prediction::{CategoryPrediction, Distribution, Prediction};
use crate::tree::node::RawNode;
use crate::tree::{MissingStrategy, TreeNode, TreePrediction};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Deserialize)]
struct RawModelBody {
    root: RawNode,
    fields: Option<Value>,
    model_fields: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawModelResource {
    resource: Option<String>,
    name: Option<String>,
    objective_fields: Option<Vec<String>>,
    objective_field: Option<Value>,
    missing_tokens: Option<Vec<String>>,
    model: RawModelBody,
}

/// A decision tree with its field schema
#[derive(Debug, Clone)]
pub struct PredictiveModel {
    resource_id: Option<String>,
    name: Option<String>,
    fields: FieldResource,
    root: TreeNode,
    regression: bool,
}

impl PredictiveModel {
    /// Load a model description (optionally wrapped in an `object` key)
    pub fn from_json(value: &Value) -> Result<Self> {
        let value = unwrap_object(value);
        let raw: RawModelResource = serde_json::from_value(value.clone())
            .map_err(|e| PredictError::malformed(format!("invalid model description: {e}")))?;

        let mut fields = match &raw.model.fields {
            Some(fields) => parse_fields(fields)?,
            None => Default::default(),
        };
        if let Some(model_fields) = &raw.model.model_fields {
            for (id, field) in parse_fields(model_fields)? {
                fields.entry(id).or_insert(field);
            }
        }
        if fields.is_empty() {
            return Err(PredictError::malformed("model description has no fields"));
        }

        let objective_id = raw
            .objective_fields
            .as_ref()
            .and_then(|ids| ids.first().cloned())
            .or_else(|| {
                raw.objective_field
                    .as_ref()
                    .and_then(|v| v.as_str().map(str::to_string))
            });

        let regression = match objective_id.as_deref().and_then(|id| fields.get(id)) {
            Some(field) => field.optype == OpType::Numeric,
            None => raw.model.root.output_is_number(),
        };

        let fields = FieldResource::with_objective(fields, objective_id, raw.missing_tokens)?;
        let root = TreeNode::from_raw(raw.model.root, regression)?;

        info!(
            resource = raw.resource.as_deref().unwrap_or("inline"),
            regression,
            depth = root.depth(),
            "Loaded decision tree model"
        );

        Ok(Self {
            resource_id: raw.resource,
            name: raw.name,
            fields,
            root,
            regression,
        })
    }

    /// Build a model from already typed parts
    pub fn new(root: TreeNode, fields: FieldResource) -> Self {
        let regression = match fields.objective_id().and_then(|id| fields.field(id)) {
            Some(field) => field.optype == OpType::Numeric,
            None => root.is_regression(),
        };
        Self {
            resource_id: None,
            name: None,
            fields,
            root,
            regression,
        }
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

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn is_regression(&self) -> bool {
        self.regression
    }

    /// Training distribution at the root
    pub fn distribution(&self) -> &Distribution {
        &self.root.distribution
    }

    /// Raw tree prediction for an input already keyed by field id
    pub fn predict_filtered(
        &self,
        input: &InputRecord,
        strategy: MissingStrategy,
    ) -> Result<TreePrediction> {
        self.root.predict(input, &self.fields, strategy)
    }

    /// Filter `input` and predict with the given options
    pub fn predict(&self, input: &InputRecord, options: &PredictOptions) -> Result<Prediction> {
        let filtered = self
            .fields
            .filter_input(input, options.by_name, options.strict)?;
        let strategy = options.strategy_or(MissingStrategy::LastPrediction);
        let tree = self.predict_filtered(&filtered, strategy)?;

        let predictions = if options.multiple.is_off() {
            None
        } else {
            Some(self.top_categories(&tree, options.multiple.limit())?)
        };

        let distribution = if self.regression {
            tree.distribution.sorted_by_value()
        } else {
            tree.distribution.sorted_by_count()
        };

        let mut prediction = Prediction::new(tree.prediction);
        prediction.confidence = Some(tree.confidence);
        prediction.probability = tree.probability;
        prediction.count = Some(tree.count);
        prediction.distribution = Some(distribution);
        prediction.path = Some(tree.path);
        prediction.median = tree.median;
        prediction.min = tree.min;
        prediction.max = tree.max;
        prediction.next = tree.next;
        prediction.predictions = predictions;
        Ok(prediction)
    }

    /// Categories of the prediction's distribution, most populated first
    pub fn predict_multiple(
        &self,
        input: &InputRecord,
        options: &PredictOptions,
    ) -> Result<Vec<CategoryPrediction>> {
        let filtered = self
            .fields
            .filter_input(input, options.by_name, options.strict)?;
        let tree = self.predict_filtered(
            &filtered,
            options.strategy_or(MissingStrategy::LastPrediction),
        )?;
        self.top_categories(&tree, options.multiple.limit())
    }

    fn top_categories(
        &self,
        tree: &TreePrediction,
        limit: Option<usize>,
    ) -> Result<Vec<CategoryPrediction>> {
        if self.regression {
            return Err(PredictError::invalid_option(
                "multiple output requires a categorical objective",
            ));
        }
        Ok(category_predictions(&tree.distribution, limit))
    }
}
