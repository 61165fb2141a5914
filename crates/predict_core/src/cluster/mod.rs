//! Centroid clusters and nearest-centroid assignment

pub mod centroid;

pub use centroid::{CenterValue, LocalPredictionCentroid};

use crate::config::PredictOptions;
use crate::errors::{PredictError, Result};
use crate::fields::{parse_fields, FieldResource, FieldValue, InputRecord, OpType};
use crate::local::unwrap_object;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RawCentroid {
    id: String,
    name: Option<String>,
    center: BTreeMap<String, Value>,
    #[serde(default)]
    count: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawClusters {
    Nested {
        clusters: Vec<RawCentroid>,
        fields: Option<Value>,
    },
    Flat(Vec<RawCentroid>),
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    resource: Option<String>,
    name: Option<String>,
    clusters: RawClusters,
    fields: Option<Value>,
    #[serde(default)]
    scales: BTreeMap<String, f64>,
    #[serde(default)]
    summary_fields: Vec<String>,
}

/// Nearest centroid for an input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CentroidAssignment {
    pub centroid_id: String,
    pub centroid_name: String,
    pub distance2: f64,
    pub distance: f64,
}

/// A clustering resource evaluated locally
#[derive(Debug, Clone)]
pub struct LocalPredictionCluster {
    resource_id: Option<String>,
    name: Option<String>,
    fields: FieldResource,
    /// Sorted by ascending id
    centroids: Vec<LocalPredictionCentroid>,
    scales: BTreeMap<String, f64>,
    summary_fields: BTreeSet<String>,
}

impl LocalPredictionCluster {
    /// Load a cluster description (optionally wrapped in an `object` key)
    pub fn from_json(value: &Value) -> Result<Self> {
        let value = unwrap_object(value);
        let raw: RawCluster = serde_json::from_value(value.clone())
            .map_err(|e| PredictError::malformed(format!("invalid cluster description: {e}")))?;

        let (raw_centroids, nested_fields) = match raw.clusters {
            RawClusters::Nested { clusters, fields } => (clusters, fields),
            RawClusters::Flat(clusters) => (clusters, None),
        };
        let fields_json = nested_fields
            .or(raw.fields)
            .ok_or_else(|| PredictError::malformed("cluster description has no fields"))?;
        let fields = FieldResource::new(parse_fields(&fields_json)?)?;

        if raw_centroids.is_empty() {
            return Err(PredictError::malformed("cluster has no centroids"));
        }
        if let Some((id, scale)) = raw.scales.iter().find(|(_, s)| !s.is_finite() || **s < 0.0) {
            return Err(PredictError::malformed(format!("invalid scale {scale} for field {id}")));
        }

        let mut centroids = raw_centroids
            .into_iter()
            .map(|raw| {
                let center = raw
                    .center
                    .iter()
                    .map(|(field_id, value)| {
                        let field = fields.field(field_id).ok_or_else(|| {
                            PredictError::malformed(format!(
                                "centroid {} references unknown field {field_id}",
                                raw.id
                            ))
                        })?;
                        Ok((field_id.clone(), CenterValue::from_json(field, value)?))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(LocalPredictionCentroid {
                    name: raw.name.unwrap_or_else(|| raw.id.clone()),
                    id: raw.id,
                    center,
                    count: raw.count.max(0.0).round() as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        centroids.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = centroids.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(PredictError::malformed(format!(
                "duplicate centroid id {}",
                pair[0].id
            )));
        }

        info!(
            resource = raw.resource.as_deref().unwrap_or("inline"),
            centroids = centroids.len(),
            "Loaded cluster"
        );

        Ok(Self {
            resource_id: raw.resource,
            name: raw.name,
            fields,
            centroids,
            scales: raw.scales,
            summary_fields: raw.summary_fields.into_iter().collect(),
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

    pub fn centroids(&self) -> &[LocalPredictionCentroid] {
        &self.centroids
    }

    pub fn scales(&self) -> &BTreeMap<String, f64> {
        &self.scales
    }

    /// Filter `input` and convert it to centroid coordinates
    pub fn prepare_input(
        &self,
        input: &InputRecord,
        options: &PredictOptions,
    ) -> Result<BTreeMap<String, CenterValue>> {
        let filtered = self
            .fields
            .filter_input(input, options.by_name, options.strict)?;

        let mut prepared = BTreeMap::new();
        for (field_id, value) in filtered {
            if self.summary_fields.contains(&field_id) {
                continue;
            }
            let Some(field) = self.fields.field(&field_id) else {
                continue;
            };
            let coordinate = match (field.optype, &value) {
                (OpType::Numeric, FieldValue::Number(n)) => CenterValue::Number(*n),
                (OpType::Text, FieldValue::Text(text)) => {
                    let analysis = field.analysis();
                    CenterValue::Terms(restrict(
                        analysis
                            .terms(text)
                            .iter()
                            .map(|token| analysis.canonical_term(token)),
                        field.vocabulary(),
                    ))
                }
                (OpType::Items, FieldValue::Text(text)) => CenterValue::Terms(restrict(
                    field.split_items(text).into_iter().map(str::to_string),
                    field.vocabulary(),
                )),
                (_, other) => CenterValue::Category(other.to_string()),
            };
            prepared.insert(field_id, coordinate);
        }
        Ok(prepared)
    }

    /// Squared distance to every centroid, in centroid order
    pub fn distances(
        &self,
        input: &InputRecord,
        options: &PredictOptions,
    ) -> Result<Vec<(String, f64)>> {
        let prepared = self.prepare_input(input, options)?;
        Ok(self
            .centroids
            .iter()
            .filter_map(|c| {
                c.distance2(&prepared, &self.scales, f64::INFINITY)
                    .map(|d| (c.id.clone(), d))
            })
            .collect())
    }

    /// Assign `input` to its nearest centroid; ties go to the lowest id
    pub fn assign(&self, input: &InputRecord, options: &PredictOptions) -> Result<CentroidAssignment> {
        let prepared = self.prepare_input(input, options)?;
        self.nearest(&prepared)
    }

    /// Nearest centroid to already prepared coordinates
    pub fn nearest(&self, prepared: &BTreeMap<String, CenterValue>) -> Result<CentroidAssignment> {
        let mut best: Option<(&LocalPredictionCentroid, f64)> = None;
        for centroid in &self.centroids {
            let stop = best.map_or(f64::INFINITY, |(_, d)| d);
            match centroid.distance2(prepared, &self.scales, stop) {
                Some(distance2) if best.map_or(true, |(_, d)| distance2 < d) => {
                    best = Some((centroid, distance2));
                }
                Some(_) => {}
                None => debug!(centroid = %centroid.id, "centroid pruned"),
            }
        }

        let (centroid, distance2) =
            best.ok_or_else(|| PredictError::malformed("cluster has no centroids"))?;
        Ok(CentroidAssignment {
            centroid_id: centroid.id.clone(),
            centroid_name: centroid.name.clone(),
            distance2,
            distance: distance2.sqrt(),
        })
    }
}

/// Unique terms, restricted to `vocabulary` when the field has one
fn restrict(terms: impl Iterator<Item = String>, vocabulary: &[String]) -> BTreeSet<String> {
    terms
        .filter(|term| vocabulary.is_empty() || vocabulary.iter().any(|v| v == term))
        .collect()
}
