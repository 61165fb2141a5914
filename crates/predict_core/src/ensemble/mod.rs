//! Ensembles of decision trees
//!
//! A [`LocalPredictiveEnsemble`] resolves its member models, runs them through
//! a [`MultiModel`] and combines the resulting votes with [`MultiVote`].

pub mod multimodel;
pub mod multivote;
pub mod resolver;

pub use multimodel::MultiModel;
pub use multivote::{CombinationMethod, MultiVote, Vote};
pub use resolver::{ModelResolver, NoModels};

use crate::config::PredictOptions;
use crate::errors::{PredictError, Result};
use crate::fields::InputRecord;
use crate::local::unwrap_object;
use crate::model::PredictiveModel;
use crate::prediction::{Distribution, Prediction};
use crate::tree::MissingStrategy;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RawEnsemble {
    resource: Option<String>,
    name: Option<String>,
    models: Vec<Value>,
    weights: Option<Vec<f64>>,
    #[serde(alias = "combiner")]
    method: Option<CombinationMethod>,
    missing_strategy: Option<MissingStrategy>,
}

/// Ensemble of decision trees evaluated locally
#[derive(Debug, Clone)]
pub struct LocalPredictiveEnsemble {
    resource_id: Option<String>,
    name: Option<String>,
    multimodel: MultiModel,
    method: CombinationMethod,
    strategy: MissingStrategy,
}

impl LocalPredictiveEnsemble {
    /// Load an ensemble whose members are all given inline
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::from_json_with_resolver(value, &NoModels)
    }

    /// Load an ensemble, resolving members given by id through `resolver`
    pub fn from_json_with_resolver(value: &Value, resolver: &dyn ModelResolver) -> Result<Self> {
        let value = unwrap_object(value);
        let raw: RawEnsemble = serde_json::from_value(value.clone())
            .map_err(|e| PredictError::malformed(format!("invalid ensemble description: {e}")))?;

        let mut models = Vec::with_capacity(raw.models.len());
        let mut missing = Vec::new();
        for member in &raw.models {
            match member {
                Value::String(id) => match resolver.resolve(id)? {
                    Some(description) => models.push(PredictiveModel::from_json(&description)?),
                    None => missing.push(id.clone()),
                },
                Value::Object(_) => models.push(PredictiveModel::from_json(member)?),
                other => {
                    return Err(PredictError::malformed(format!(
                        "invalid ensemble member {other}"
                    )))
                }
            }
        }

        if !missing.is_empty() {
            return Err(PredictError::MissingDependency {
                resource: raw.resource.unwrap_or_else(|| "ensemble".to_string()),
                missing,
            });
        }

        let multimodel = MultiModel::new(models, raw.weights)?;
        info!(
            resource = raw.resource.as_deref().unwrap_or("inline"),
            models = multimodel.len(),
            regression = multimodel.is_regression(),
            "Loaded ensemble"
        );

        Ok(Self {
            resource_id: raw.resource,
            name: raw.name,
            multimodel,
            method: raw.method.unwrap_or_default(),
            strategy: raw.missing_strategy.unwrap_or_default(),
        })
    }

    /// Build from already loaded models
    pub fn from_models(models: Vec<PredictiveModel>, weights: Option<Vec<f64>>) -> Result<Self> {
        Ok(Self {
            resource_id: None,
            name: None,
            multimodel: MultiModel::new(models, weights)?,
            method: CombinationMethod::default(),
            strategy: MissingStrategy::default(),
        })
    }

    /// Set the default combination method
    pub fn with_method(mut self, method: CombinationMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the default missing-value strategy
    pub fn with_strategy(mut self, strategy: MissingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn method(&self) -> CombinationMethod {
        self.method
    }

    pub fn strategy(&self) -> MissingStrategy {
        self.strategy
    }

    pub fn multimodel(&self) -> &MultiModel {
        &self.multimodel
    }

    pub fn is_regression(&self) -> bool {
        self.multimodel.is_regression()
    }

    /// Merged training distribution of every member's root node
    pub fn distribution(&self) -> Distribution {
        self.multimodel.distribution()
    }

    /// Raw votes of every member for `input`
    pub fn votes(&self, input: &InputRecord, options: &PredictOptions) -> Result<MultiVote> {
        let filtered = self
            .multimodel
            .fields()
            .filter_input(input, options.by_name, options.strict)?;
        let strategy = options.strategy_or(self.strategy);
        debug!(strategy = %strategy, inputs = filtered.len(), "generating ensemble votes");
        self.multimodel.generate_votes(&filtered, strategy)
    }

    /// Predict by combining the votes of all members
    pub fn predict(&self, input: &InputRecord, options: &PredictOptions) -> Result<Prediction> {
        options.validate()?;
        let method = options.method.unwrap_or(self.method);
        let votes = self.votes(input, options)?;
        let mut prediction = votes.combine(method, options)?;
        if !options.multiple.is_off() {
            prediction.predictions = Some(votes.category_predictions(options.multiple.limit())?);
        }
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;
    use crate::prediction::PredictionValue;
    use serde_json::json;
    use std::collections::HashMap;

    fn stump(id: &str, low: &str, high: &str) -> Value {
        json!({
            "resource": id,
            "objective_fields": ["000001"],
            "model": {
                "fields": {
                    "000000": {"name": "x", "optype": "numeric"},
                    "000001": {"name": "label", "optype": "categorical"}
                },
                "root": {
                    "output": low, "confidence": 0.5, "count": 20,
                    "children": [
                        {"predicate": {"field": "000000", "operator": "<=", "value": 5},
                         "output": low, "confidence": 0.8, "count": 10},
                        {"predicate": {"field": "000000", "operator": ">", "value": 5},
                         "output": high, "confidence": 0.7, "count": 10}
                    ]
                }
            }
        })
    }

    #[test]
    fn test_missing_members_are_listed() {
        let ensemble = json!({
            "resource": "ensemble/1",
            "models": ["model/a", "model/b", stump("model/c", "A", "B")]
        });
        let resolver: HashMap<String, Value> =
            HashMap::from([("model/a".to_string(), stump("model/a", "A", "B"))]);
        let err = LocalPredictiveEnsemble::from_json_with_resolver(&ensemble, &resolver).unwrap_err();
        match err {
            PredictError::MissingDependency { resource, missing } => {
                assert_eq!(resource, "ensemble/1");
                assert_eq!(missing, vec!["model/b".to_string()]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    struct UnreadableStore;

    impl ModelResolver for UnreadableStore {
        fn resolve(&self, model_id: &str) -> Result<Option<Value>> {
            Err(PredictError::malformed(format!("{model_id} is not valid JSON")))
        }
    }

    #[test]
    fn test_resolver_errors_are_not_missing_members() {
        let ensemble = json!({"resource": "ensemble/1", "models": ["model/a"]});
        let err = LocalPredictiveEnsemble::from_json_with_resolver(&ensemble, &UnreadableStore)
            .unwrap_err();
        assert!(matches!(err, PredictError::MalformedModel(msg) if msg.contains("model/a")));
    }

    #[test]
    fn test_predict_with_resolved_members() {
        let ensemble = json!({"models": ["model/a", "model/b", "model/c"]});
        let resolver: HashMap<String, Value> = HashMap::from([
            ("model/a".to_string(), stump("model/a", "A", "B")),
            ("model/b".to_string(), stump("model/b", "B", "A")),
            ("model/c".to_string(), stump("model/c", "A", "A")),
        ]);
        let ensemble = LocalPredictiveEnsemble::from_json_with_resolver(&ensemble, &resolver).unwrap();
        let input = InputRecord::from([("x".to_string(), FieldValue::from(2.0))]);
        let options = PredictOptions {
            by_name: true,
            add_confidence: true,
            add_count: true,
            ..Default::default()
        };
        let prediction = ensemble.predict(&input, &options).unwrap();
        assert_eq!(prediction.prediction, PredictionValue::from("A"));
        assert_eq!(prediction.count, Some(30));
        assert_eq!(prediction.confidence, Some(0.8));
        assert_eq!(ensemble.distribution().total(), 60);
    }

    #[test]
    fn test_weights_must_match_models() {
        let ensemble = json!({"models": [stump("model/a", "A", "B")], "weights": [1.0, 2.0]});
        assert!(matches!(
            LocalPredictiveEnsemble::from_json(&ensemble),
            Err(PredictError::MalformedModel(_))
        ));
    }

    #[test]
    fn test_call_options_override_defaults() {
        let ensemble = json!({
            "models": [stump("model/a", "A", "B"), stump("model/b", "B", "A")],
            "method": "confidence"
        });
        let ensemble = LocalPredictiveEnsemble::from_json(&ensemble).unwrap();
        assert_eq!(ensemble.method(), CombinationMethod::Confidence);

        let input = InputRecord::from([("000000".to_string(), FieldValue::from(9.0))]);
        let by_confidence = ensemble.predict(&input, &PredictOptions::default()).unwrap();
        assert_eq!(by_confidence.prediction, PredictionValue::from("B"));

        let plurality = PredictOptions {
            method: Some(CombinationMethod::Plurality),
            ..Default::default()
        };
        let tie = ensemble.predict(&input, &plurality).unwrap();
        assert_eq!(tie.prediction, PredictionValue::from("B"));
    }
}
