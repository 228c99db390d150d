//! Connected components by minimum-label propagation
//!
//! Each vertex starts labelled with its own id and forwards the smallest
//! label it has seen along its outbound edges. For components connected in
//! both directions every vertex ends with the component's minimal id.

use serde_json::Value;
use std::cmp::Ordering;

use super::{
    compare_values, Algorithm, ComputeError, MessageCombiner, MinCombiner, VertexComputation,
    VertexContext,
};
use crate::storage::VertexDocument;

pub const NAME: &str = "connectedcomponents";

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectedComponents;

impl Algorithm for ConnectedComponents {
    fn name(&self) -> &str {
        NAME
    }

    fn initial_value(&self, vertex: &VertexDocument) -> Value {
        Value::String(vertex.id.clone())
    }

    fn create_computation(&self) -> Box<dyn VertexComputation> {
        Box::new(ComponentsComputation)
    }

    fn message_combiner(&self) -> Option<Box<dyn MessageCombiner>> {
        Some(Box::new(MinCombiner))
    }
}

struct ComponentsComputation;

impl VertexComputation for ComponentsComputation {
    fn compute(&mut self, ctx: &mut VertexContext<'_>, messages: &[Value]) -> Result<(), ComputeError> {
        let mut changed = ctx.global_superstep() == 0;
        let mut label = ctx.value().clone();
        for message in messages {
            if compare_values(message, &label) == Some(Ordering::Less) {
                label = message.clone();
                changed = true;
            }
        }

        if changed {
            ctx.set_value(label.clone());
            ctx.send_message_to_all_neighbors(label);
        }
        ctx.vote_halt();
        Ok(())
    }
}
