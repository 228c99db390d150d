//! Single source shortest paths
//!
//! Distances start unknown (`null`). The source announces distance 0 in
//! superstep 0; every vertex that learns a shorter distance stores it and
//! relaxes its outbound edges. All vertices vote to halt after each step,
//! so the run ends once no distance improves.

use serde::Deserialize;
use serde_json::Value;

use super::{Algorithm, ComputeError, MessageCombiner, MinCombiner, VertexComputation, VertexContext};
use crate::error::PregelError;

pub const NAME: &str = "sssp";

#[derive(Debug, Clone, Deserialize)]
pub struct ShortestPathsParams {
    /// `collection/key` of the source vertex
    pub source: String,
    /// Edge attribute holding the weight; missing means weight 1
    #[serde(default)]
    pub weight_attribute: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShortestPaths {
    params: ShortestPathsParams,
}

impl ShortestPaths {
    pub fn from_params(params: &Value) -> Result<Self, PregelError> {
        let params: ShortestPathsParams = serde_json::from_value(params.clone())
            .map_err(|e| PregelError::InvalidRequest(format!("sssp params: {e}")))?;
        if params.source.is_empty() {
            return Err(PregelError::InvalidRequest(
                "sssp requires a source vertex".to_string(),
            ));
        }
        Ok(Self { params })
    }
}

impl Algorithm for ShortestPaths {
    fn name(&self) -> &str {
        NAME
    }

    fn create_computation(&self) -> Box<dyn VertexComputation> {
        Box::new(ShortestPathsComputation {
            params: self.params.clone(),
        })
    }

    fn message_combiner(&self) -> Option<Box<dyn MessageCombiner>> {
        Some(Box::new(MinCombiner))
    }
}

struct ShortestPathsComputation {
    params: ShortestPathsParams,
}

impl ShortestPathsComputation {
    fn weight(&self, edge: &crate::storage::EdgeDocument) -> Result<f64, ComputeError> {
        let Some(attribute) = self.params.weight_attribute.as_deref() else {
            return Ok(1.0);
        };
        match edge.attribute(attribute) {
            None => Ok(1.0),
            Some(value) => value.as_f64().ok_or_else(|| {
                ComputeError::InvalidEdge(format!(
                    "{} -> {} has non-numeric {attribute}",
                    edge.from, edge.to
                ))
            }),
        }
    }
}

impl VertexComputation for ShortestPathsComputation {
    fn compute(&mut self, ctx: &mut VertexContext<'_>, messages: &[Value]) -> Result<(), ComputeError> {
        let candidate = if ctx.global_superstep() == 0 {
            (ctx.id() == self.params.source).then_some(0.0)
        } else {
            messages
                .iter()
                .filter_map(Value::as_f64)
                .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.min(d))))
        };

        let current = ctx.value().as_f64();
        if let Some(distance) = candidate {
            if current.map_or(true, |c| distance < c) {
                ctx.set_value(Value::from(distance));
                for edge in ctx.edges() {
                    let weight = self.weight(edge)?;
                    ctx.send_message(edge.to.clone(), Value::from(distance + weight));
                }
            }
        }

        ctx.vote_halt();
        Ok(())
    }
}
