//! Collection of models evaluated against one input

use super::multivote::{MultiVote, Vote};
use crate::errors::{PredictError, Result};
use crate::fields::{FieldResource, InputRecord};
use crate::model::PredictiveModel;
use crate::prediction::Distribution;
use crate::tree::MissingStrategy;

/// Member models of an ensemble with their weights and shared field schema
#[derive(Debug, Clone)]
pub struct MultiModel {
    models: Vec<PredictiveModel>,
    weights: Vec<f64>,
    fields: FieldResource,
}

impl MultiModel {
    /// Build from models; `weights` defaults to 1 per model
    pub fn new(models: Vec<PredictiveModel>, weights: Option<Vec<f64>>) -> Result<Self> {
        if models.is_empty() {
            return Err(PredictError::malformed("a multi-model needs at least one model"));
        }

        let weights = weights.unwrap_or_else(|| vec![1.0; models.len()]);
        if weights.len() != models.len() {
            return Err(PredictError::malformed(format!(
                "{} weights given for {} models",
                weights.len(),
                models.len()
            )));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(PredictError::malformed(format!("invalid model weight {bad}")));
        }

        let regression = models[0].is_regression();
        if models.iter().any(|m| m.is_regression() != regression) {
            return Err(PredictError::malformed(
                "models mix regression and classification objectives",
            ));
        }

        let fields = FieldResource::merged(models.iter().map(PredictiveModel::fields))?;

        Ok(Self {
            models,
            weights,
            fields,
        })
    }

    pub fn models(&self) -> &[PredictiveModel] {
        &self.models
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Union of the member schemas
    pub fn fields(&self) -> &FieldResource {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn is_regression(&self) -> bool {
        self.models.first().is_some_and(PredictiveModel::is_regression)
    }

    /// One vote per model, in model order, for an id-keyed input
    pub fn generate_votes(&self, input: &InputRecord, strategy: MissingStrategy) -> Result<MultiVote> {
        let mut votes = MultiVote::new();
        for (order, (model, weight)) in self.models.iter().zip(&self.weights).enumerate() {
            let prediction = model.predict_filtered(input, strategy)?;
            votes.push(Vote::from_tree(prediction, order, *weight));
        }
        Ok(votes)
    }

    /// Root distributions of all members merged
    pub fn distribution(&self) -> Distribution {
        let mut merged = Distribution::new();
        for model in &self.models {
            merged.merge(model.distribution());
        }
        merged
    }
}
