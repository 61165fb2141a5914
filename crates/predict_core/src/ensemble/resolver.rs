//! Lookup of ensemble members referenced by id

use crate::errors::Result;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Supplies model descriptions for ensemble members given by id
///
/// Implementations must not block on the network; descriptions are expected
/// to have been fetched beforehand. `Ok(None)` means the model is unknown; an
/// error means it exists but could not be read.
pub trait ModelResolver {
    fn resolve(&self, model_id: &str) -> Result<Option<Value>>;
}

impl<S: BuildHasher> ModelResolver for HashMap<String, Value, S> {
    fn resolve(&self, model_id: &str) -> Result<Option<Value>> {
        Ok(self.get(model_id).cloned())
    }
}

impl ModelResolver for BTreeMap<String, Value> {
    fn resolve(&self, model_id: &str) -> Result<Option<Value>> {
        Ok(self.get(model_id).cloned())
    }
}

/// Resolver that knows no models
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModels;

impl ModelResolver for NoModels {
    fn resolve(&self, _model_id: &str) -> Result<Option<Value>> {
        Ok(None)
    }
}
