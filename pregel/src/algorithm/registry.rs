//! Named-factory lookup table for algorithms

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{connected_components, pagerank, sssp, Algorithm};
use crate::error::PregelError;

/// Builds a configured algorithm from its parameter document
pub type AlgorithmFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn Algorithm>, PregelError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    factories: HashMap<String, AlgorithmFactory>,
}

impl AlgorithmRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `pagerank`, `sssp` and `connectedcomponents`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(pagerank::NAME, |params| {
            Ok(Arc::new(pagerank::PageRank::from_params(params)?) as Arc<dyn Algorithm>)
        });
        registry.register(sssp::NAME, |params| {
            Ok(Arc::new(sssp::ShortestPaths::from_params(params)?) as Arc<dyn Algorithm>)
        });
        registry.register(connected_components::NAME, |_| {
            Ok(Arc::new(connected_components::ConnectedComponents) as Arc<dyn Algorithm>)
        });
        registry
    }

    /// Register (or replace) a factory; names are case-insensitive
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Algorithm>, PregelError> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_lowercase(), Arc::new(factory) as AlgorithmFactory);
    }

    pub fn create(&self, name: &str, params: &Value) -> Result<Arc<dyn Algorithm>, PregelError> {
        let factory = self
            .factories
            .get(&name.to_lowercase())
            .ok_or_else(|| PregelError::UnknownAlgorithm(name.to_string()))?;
        factory(params)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("names", &self.names())
            .finish()
    }
}
