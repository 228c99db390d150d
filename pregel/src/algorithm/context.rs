use serde_json::Value;

use crate::aggregator::AggregatorHandler;
use crate::storage::EdgeDocument;

/// A message produced by a vertex during one superstep
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub to: String,
    pub payload: Value,
}

/// Everything a vertex program may see or touch while computing one vertex
pub struct VertexContext<'a> {
    vertex_id: &'a str,
    gss: u64,
    vertex_count: u64,
    edge_count: u64,
    value: &'a mut Value,
    edges: &'a [EdgeDocument],
    outbox: &'a mut Vec<OutgoingMessage>,
    local_aggregators: &'a AggregatorHandler,
    global_aggregators: &'a AggregatorHandler,
    voted_halt: bool,
}

impl<'a> VertexContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vertex_id: &'a str,
        gss: u64,
        vertex_count: u64,
        edge_count: u64,
        value: &'a mut Value,
        edges: &'a [EdgeDocument],
        outbox: &'a mut Vec<OutgoingMessage>,
        local_aggregators: &'a AggregatorHandler,
        global_aggregators: &'a AggregatorHandler,
    ) -> Self {
        Self {
            vertex_id,
            gss,
            vertex_count,
            edge_count,
            value,
            edges,
            outbox,
            local_aggregators,
            global_aggregators,
            voted_halt: false,
        }
    }

    /// `collection/key` of the vertex being computed
    pub fn id(&self) -> &str {
        self.vertex_id
    }

    pub fn global_superstep(&self) -> u64 {
        self.gss
    }

    /// Vertices across all workers
    pub fn vertex_count(&self) -> u64 {
        self.vertex_count
    }

    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    pub fn value(&self) -> &Value {
        &*self.value
    }

    pub fn set_value(&mut self, value: Value) {
        *self.value = value;
    }

    /// Outbound edges of this vertex
    pub fn edges(&self) -> &'a [EdgeDocument] {
        self.edges
    }

    pub fn send_message(&mut self, to: impl Into<String>, payload: Value) {
        self.outbox.push(OutgoingMessage {
            to: to.into(),
            payload,
        });
    }

    pub fn send_message_to_all_neighbors(&mut self, payload: Value) {
        for edge in self.edges {
            self.outbox.push(OutgoingMessage {
                to: edge.to.clone(),
                payload: payload.clone(),
            });
        }
    }

    /// Deactivate until a message arrives
    pub fn vote_halt(&mut self) {
        self.voted_halt = true;
    }

    pub fn has_voted_halt(&self) -> bool {
        self.voted_halt
    }

    /// Contribute to a named aggregator for this superstep
    pub fn aggregate(&self, name: &str, value: impl Into<Value>) {
        self.local_aggregators.aggregate(name, &value.into());
    }

    /// Globally merged value from the previous superstep
    pub fn aggregated_value(&self, name: &str) -> Option<Value> {
        self.global_aggregators.aggregated_value(name)
    }
}
