//! Per-execution state of one worker, independent of the actor runtime

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use shared_types::SuperstepStats;

use super::buffers::DoubleBuffer;
use super::graph::ShardGraph;
use super::protocol::{GraphInfo, Partitioning, ShardSetup};
use crate::actors::conductor::{ShardSummary, SuperstepReport};
use crate::aggregator::AggregatorHandler;
use crate::algorithm::{
    Algorithm, AlgorithmRegistry, MessageCombiner, OutgoingMessage, VertexComputation,
    VertexContext,
};
use crate::storage::{GraphStore, StorageError};

/// Result of one local superstep
#[derive(Debug)]
pub struct SuperstepOutput {
    pub report: SuperstepReport,
    /// Messages for peers, keyed by worker index
    pub remote: BTreeMap<usize, Vec<OutgoingMessage>>,
}

pub struct ShardState {
    worker: usize,
    partitioning: Partitioning,
    algorithm: Arc<dyn Algorithm>,
    computation: Box<dyn VertexComputation>,
    combiner: Option<Box<dyn MessageCombiner>>,
    graph: ShardGraph,
    buffers: DoubleBuffer,
    /// Values merged by the conductor, read by vertices
    global_aggregators: AggregatorHandler,
    /// Contributions of local vertices in the running superstep
    local_aggregators: AggregatorHandler,
    next_gss: u64,
    result_field: String,
}

impl ShardState {
    /// Build the algorithm and load the assigned partitions
    pub fn prepare(
        worker: usize,
        setup: &ShardSetup,
        store: &dyn GraphStore,
        algorithms: &AlgorithmRegistry,
    ) -> Result<Self, String> {
        if setup.partitions.is_empty() {
            return Err(format!("worker {worker} was assigned no partitions"));
        }
        let algorithm = algorithms
            .create(&setup.algorithm, &setup.params)
            .map_err(|e| e.to_string())?;
        let graph = ShardGraph::load(
            store,
            algorithm.as_ref(),
            &setup.vertex_collections,
            &setup.edge_collections,
            &setup.partitions,
        )
        .map_err(|e| e.to_string())?;

        Ok(Self {
            worker,
            partitioning: setup.routing.partitioning,
            computation: algorithm.create_computation(),
            combiner: algorithm.message_combiner(),
            global_aggregators: AggregatorHandler::new(Arc::clone(&algorithm)),
            local_aggregators: AggregatorHandler::new(Arc::clone(&algorithm)),
            algorithm,
            graph,
            buffers: DoubleBuffer::default(),
            next_gss: 0,
            result_field: setup.result_field.clone(),
        })
    }

    pub fn summary(&self) -> ShardSummary {
        ShardSummary {
            vertex_count: self.graph.vertex_count(),
            edge_count: self.graph.edge_count(),
        }
    }

    pub fn algorithm(&self) -> &dyn Algorithm {
        self.algorithm.as_ref()
    }

    pub fn next_gss(&self) -> u64 {
        self.next_gss
    }

    pub fn graph(&self) -> &ShardGraph {
        &self.graph
    }

    /// Queue messages a peer sent during superstep `gss`.
    ///
    /// Valid while this worker has not yet run `gss + 1`. Returns the number
    /// of messages accepted.
    pub fn accept(&mut self, gss: u64, messages: Vec<OutgoingMessage>) -> Result<u64, String> {
        if gss != self.next_gss && gss + 1 != self.next_gss {
            return Err(format!(
                "messages of superstep {gss} arrived while expecting superstep {}",
                self.next_gss
            ));
        }
        Ok(self.deliver(gss, messages))
    }

    fn deliver(&mut self, gss: u64, messages: Vec<OutgoingMessage>) -> u64 {
        let combiner = self.combiner.as_deref();
        let buffer = self.buffers.for_superstep(gss + 1);
        let mut accepted = 0;
        for message in messages {
            if !self.graph.contains(&message.to) {
                tracing::debug!(to = %message.to, gss, "Dropping message to unknown vertex");
                continue;
            }
            buffer.push(message.to, message.payload, combiner);
            accepted += 1;
        }
        accepted
    }

    /// Run superstep `gss` over every active vertex or vertex with messages.
    ///
    /// A vertex program error aborts the superstep; the shard is then
    /// unusable and is expected to be discarded.
    pub fn run_superstep(
        &mut self,
        gss: u64,
        info: GraphInfo,
        aggregators: &Value,
    ) -> Result<SuperstepOutput, String> {
        if gss != self.next_gss {
            return Err(format!(
                "asked to run superstep {gss} while expecting {}",
                self.next_gss
            ));
        }

        self.global_aggregators.reset_values(true);
        if !aggregators.is_null() && !self.global_aggregators.parse_values(aggregators) {
            tracing::warn!(gss, "Ignoring malformed aggregator values from conductor");
        }
        self.local_aggregators.reset_values(true);

        let mut inbox = self.buffers.take_superstep(gss);
        let received_count = inbox.received();
        let mut outbox = Vec::new();

        for vertex in self.graph.vertices_mut() {
            let messages = inbox.take(&vertex.document.id);
            if !vertex.active && messages.is_empty() {
                continue;
            }
            let mut ctx = VertexContext::new(
                &vertex.document.id,
                gss,
                info.vertex_count,
                info.edge_count,
                &mut vertex.value,
                &vertex.edges,
                &mut outbox,
                &self.local_aggregators,
                &self.global_aggregators,
            );
            self.computation
                .compute(&mut ctx, &messages)
                .map_err(|e| format!("vertex {} in superstep {gss}: {e}", vertex.document.id))?;
            vertex.active = !ctx.has_voted_halt();
        }

        let mut send_count = 0;
        let mut local = Vec::new();
        let mut remote: BTreeMap<usize, Vec<OutgoingMessage>> = BTreeMap::new();
        for message in outbox {
            match self.partitioning.worker_for(&message.to) {
                None => {
                    tracing::warn!(to = %message.to, gss, "Dropping message to malformed vertex id");
                    continue;
                }
                Some(owner) if owner == self.worker => local.push(message),
                Some(owner) => remote.entry(owner).or_default().push(message),
            }
            send_count += 1;
        }
        self.deliver(gss, local);
        self.next_gss = gss + 1;

        Ok(SuperstepOutput {
            report: SuperstepReport {
                stats: SuperstepStats {
                    active_count: self.graph.active_count(),
                    send_count,
                    received_count,
                },
                aggregators: self.local_aggregators.to_document(false),
            },
            remote,
        })
    }

    pub fn results(&self) -> Vec<Value> {
        self.graph.results(&self.result_field)
    }

    /// Write every vertex value into `result_field` of its document
    pub fn store_results(&self, store: &dyn GraphStore) -> Result<(), StorageError> {
        for ((collection, shard), entries) in self.graph.results_by_shard() {
            store.store_results(&collection, shard, &self.result_field, entries)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardState")
            .field("worker", &self.worker)
            .field("algorithm", &self.algorithm.name())
            .field("vertices", &self.graph.vertex_count())
            .field("next_gss", &self.next_gss)
            .finish()
    }
}
