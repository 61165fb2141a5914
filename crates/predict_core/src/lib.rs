//! Offline scoring engine for pre-trained model descriptions
//!
//! Evaluates decision trees, tree ensembles, centroid clusters and isolation
//! forests against an input record, reproducing locally the predictions a
//! remote machine-learning service returns for the same resource. Nothing in
//! this crate performs I/O while evaluating.
//!
//! Modules:
//! - `fields`: Field schemas, name/id lookup and input filtering
//! - `tree`: Split predicates and decision tree traversal
//! - `model`: Single decision tree model
//! - `ensemble`: Multi-model vote generation and combination
//! - `cluster`: Centroids and nearest-centroid assignment
//! - `anomaly`: Isolation-forest anomaly scoring
//! - `local`: Resource detection and prediction dispatch
//! - `config`: Prediction options and engine configuration
//! - `prediction`: Prediction values, distributions and result records
//! - `stats`: Shared numeric helpers

pub mod anomaly;
pub mod cluster;
pub mod config;
pub mod ensemble;
pub mod errors;
pub mod fields;
pub mod local;
pub mod model;
pub mod prediction;
pub mod stats;
pub mod tree;

pub use anomaly::{Anomaly, AnomalyScore, IsolationNode, IsolationTree, TopAnomaly};
pub use cluster::{CenterValue, CentroidAssignment, LocalPredictionCentroid, LocalPredictionCluster};
pub use config::{EngineConfig, LoggingConfig, Multiple, PredictOptions};
pub use ensemble::{
    CombinationMethod, LocalPredictiveEnsemble, ModelResolver, MultiModel, MultiVote, NoModels,
    Vote,
};
pub use errors::{PredictError, Result};
pub use fields::{input_from_json, Field, FieldResource, FieldValue, InputRecord, OpType};
pub use local::{predict, LocalOutcome, Resource, ResourceKind};
pub use model::PredictiveModel;
pub use prediction::{CategoryPrediction, Distribution, Prediction, PredictionValue};
pub use tree::{MissingStrategy, Predicate, TreeNode, TreePrediction};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
