//! Resource detection and prediction dispatch
//!
//! A description is classified once, when it is loaded, into a [`Resource`].
//! [`predict`] then routes the input to the engine of that resource kind.

use crate::anomaly::{Anomaly, AnomalyScore};
use crate::cluster::{CentroidAssignment, LocalPredictionCluster};
use crate::config::PredictOptions;
use crate::ensemble::{LocalPredictiveEnsemble, ModelResolver, NoModels};
use crate::errors::{PredictError, Result};
use crate::fields::{FieldResource, InputRecord};
use crate::model::PredictiveModel;
use crate::prediction::Prediction;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Strip the `object` wrapper the remote API puts around resources
pub(crate) fn unwrap_object(value: &Value) -> &Value {
    match value.get("object") {
        Some(inner @ Value::Object(_)) => inner,
        _ => value,
    }
}

/// Kind of a resource description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Model,
    Ensemble,
    Cluster,
    Anomaly,
}

impl ResourceKind {
    /// Classify a description by its resource id prefix, then by its shape
    pub fn detect(value: &Value) -> Result<Self> {
        let value = unwrap_object(value);

        if let Some(id) = value.get("resource").and_then(Value::as_str) {
            let kind = match id.split_once('/').map(|(prefix, _)| prefix) {
                Some("model") => Some(ResourceKind::Model),
                Some("ensemble") => Some(ResourceKind::Ensemble),
                Some("cluster") => Some(ResourceKind::Cluster),
                Some("anomaly") => Some(ResourceKind::Anomaly),
                _ => None,
            };
            if let Some(kind) = kind {
                return Ok(kind);
            }
        }

        let model = value.get("model");
        if value.get("clusters").is_some() {
            Ok(ResourceKind::Cluster)
        } else if model.and_then(|m| m.get("root")).is_some() {
            Ok(ResourceKind::Model)
        } else if model.and_then(|m| m.get("trees")).is_some() {
            Ok(ResourceKind::Anomaly)
        } else if value.get("models").is_some() {
            Ok(ResourceKind::Ensemble)
        } else {
            Err(PredictError::malformed(
                "cannot tell which kind of resource the description holds",
            ))
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Model => "model",
            ResourceKind::Ensemble => "ensemble",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Anomaly => "anomaly",
        };
        f.write_str(name)
    }
}

/// A loaded resource of any supported kind
#[derive(Debug, Clone)]
pub enum Resource {
    Model(PredictiveModel),
    Ensemble(LocalPredictiveEnsemble),
    Cluster(LocalPredictionCluster),
    Anomaly(Anomaly),
}

impl Resource {
    /// Load a description whose ensemble members, if any, are inline
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::from_json_with_resolver(value, &NoModels)
    }

    /// Load a description, resolving ensemble members through `resolver`
    pub fn from_json_with_resolver(value: &Value, resolver: &dyn ModelResolver) -> Result<Self> {
        Ok(match ResourceKind::detect(value)? {
            ResourceKind::Model => Resource::Model(PredictiveModel::from_json(value)?),
            ResourceKind::Ensemble => Resource::Ensemble(
                LocalPredictiveEnsemble::from_json_with_resolver(value, resolver)?,
            ),
            ResourceKind::Cluster => Resource::Cluster(LocalPredictionCluster::from_json(value)?),
            ResourceKind::Anomaly => Resource::Anomaly(Anomaly::from_json(value)?),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Model(_) => ResourceKind::Model,
            Resource::Ensemble(_) => ResourceKind::Ensemble,
            Resource::Cluster(_) => ResourceKind::Cluster,
            Resource::Anomaly(_) => ResourceKind::Anomaly,
        }
    }

    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Resource::Model(model) => model.resource_id(),
            Resource::Ensemble(ensemble) => ensemble.resource_id(),
            Resource::Cluster(cluster) => cluster.resource_id(),
            Resource::Anomaly(anomaly) => anomaly.resource_id(),
        }
    }

    /// Field schema used to filter inputs
    pub fn fields(&self) -> &FieldResource {
        match self {
            Resource::Model(model) => model.fields(),
            Resource::Ensemble(ensemble) => ensemble.multimodel().fields(),
            Resource::Cluster(cluster) => cluster.fields(),
            Resource::Anomaly(anomaly) => anomaly.fields(),
        }
    }
}

/// Result of [`predict`], shaped by the resource kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LocalOutcome {
    Prediction(Prediction),
    Centroid(CentroidAssignment),
    Anomaly(AnomalyScore),
}

/// Evaluate `input` against a loaded resource
pub fn predict(
    resource: &Resource,
    input: &InputRecord,
    options: &PredictOptions,
) -> Result<LocalOutcome> {
    options.validate()?;
    match resource {
        Resource::Model(model) => model.predict(input, options).map(LocalOutcome::Prediction),
        Resource::Ensemble(ensemble) => {
            ensemble.predict(input, options).map(LocalOutcome::Prediction)
        }
        Resource::Cluster(cluster) => cluster.assign(input, options).map(LocalOutcome::Centroid),
        Resource::Anomaly(anomaly) => anomaly.score(input, options).map(LocalOutcome::Anomaly),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_by_prefix() {
        assert_eq!(
            ResourceKind::detect(&json!({"resource": "ensemble/abc"})).unwrap(),
            ResourceKind::Ensemble
        );
        assert_eq!(
            ResourceKind::detect(&json!({"object": {"resource": "anomaly/abc"}})).unwrap(),
            ResourceKind::Anomaly
        );
    }

    #[test]
    fn test_detect_by_shape() {
        assert_eq!(
            ResourceKind::detect(&json!({"clusters": []})).unwrap(),
            ResourceKind::Cluster
        );
        assert_eq!(
            ResourceKind::detect(&json!({"model": {"root": {}}})).unwrap(),
            ResourceKind::Model
        );
        assert_eq!(
            ResourceKind::detect(&json!({"model": {"trees": []}})).unwrap(),
            ResourceKind::Anomaly
        );
        assert_eq!(
            ResourceKind::detect(&json!({"models": []})).unwrap(),
            ResourceKind::Ensemble
        );
        assert!(matches!(
            ResourceKind::detect(&json!({"dataset": {}})),
            Err(PredictError::MalformedModel(_))
        ));
    }

    #[test]
    fn test_unwrap_object_only_for_objects() {
        let wrapped = json!({"object": {"resource": "model/1"}});
        assert_eq!(unwrap_object(&wrapped), &json!({"resource": "model/1"}));
        let plain = json!({"object": "label"});
        assert_eq!(unwrap_object(&plain), &plain);
    }

    #[test]
    fn test_resources_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Resource>();
        assert_send_sync::<PredictOptions>();
        assert_send_sync::<LocalOutcome>();
    }
}
