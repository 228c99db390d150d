//! Algorithms - pluggable vertex programs
//!
//! An [`Algorithm`] is stateless apart from its configuration. It hands out
//! one [`VertexComputation`] per worker, an optional [`MessageCombiner`] and
//! the aggregators it knows by name. Algorithms are looked up by name in the
//! [`AlgorithmRegistry`].

mod context;
pub mod connected_components;
pub mod pagerank;
mod registry;
pub mod sssp;

use serde_json::Value;
use std::cmp::Ordering;

use crate::aggregator::Aggregator;
use crate::storage::VertexDocument;

pub use context::{OutgoingMessage, VertexContext};
pub use registry::{AlgorithmFactory, AlgorithmRegistry};

/// Errors raised by a vertex program; they abort the whole superstep
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ComputeError {
    #[error("invalid vertex value: {0}")]
    InvalidValue(String),
    #[error("invalid edge: {0}")]
    InvalidEdge(String),
    #[error("{0}")]
    Failed(String),
}

pub trait Algorithm: Send + Sync {
    fn name(&self) -> &str;

    /// Value of a vertex before superstep 0
    fn initial_value(&self, _vertex: &VertexDocument) -> Value {
        Value::Null
    }

    fn create_computation(&self) -> Box<dyn VertexComputation>;

    fn message_combiner(&self) -> Option<Box<dyn MessageCombiner>> {
        None
    }

    /// Fresh aggregator for `name`, or `None` if this algorithm has none
    fn aggregator(&self, _name: &str) -> Option<Box<dyn Aggregator>> {
        None
    }
}

pub trait VertexComputation: Send {
    /// Called once per active vertex (or vertex with messages) per superstep
    fn compute(&mut self, ctx: &mut VertexContext<'_>, messages: &[Value])
        -> Result<(), ComputeError>;
}

/// Folds messages addressed to the same vertex into one
pub trait MessageCombiner: Send + Sync {
    fn combine(&self, current: &mut Value, incoming: Value);
}

pub struct SumCombiner;

impl MessageCombiner for SumCombiner {
    fn combine(&self, current: &mut Value, incoming: Value) {
        if let (Some(a), Some(b)) = (current.as_f64(), incoming.as_f64()) {
            *current = Value::from(a + b);
        }
    }
}

/// Keeps the smaller of two numbers or two strings
pub struct MinCombiner;

impl MessageCombiner for MinCombiner {
    fn combine(&self, current: &mut Value, incoming: Value) {
        if compare_values(&incoming, current) == Some(Ordering::Less) {
            *current = incoming;
        }
    }
}

/// Order numbers numerically and strings lexically; mixed kinds do not compare
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
