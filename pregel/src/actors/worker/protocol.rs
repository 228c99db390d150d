//! WorkerActor message protocol and partition routing

use ractor::{ActorRef, RpcReplyPort};
use serde_json::Value;
use shared_types::ExecutionNumber;

use crate::actors::conductor::ConductorMsg;
use crate::algorithm::OutgoingMessage;
use crate::storage::{shard_for_key, split_document_id};

/// Messages handled by WorkerActor
#[derive(Debug)]
pub enum WorkerMsg {
    /// Load the assigned partitions; answered with `ConductorMsg::ShardPrepared`
    Prepare { setup: ShardSetup },
    /// Run one superstep; answered with `ConductorMsg::SuperstepDone`
    RunSuperstep {
        gss: u64,
        info: GraphInfo,
        aggregators: Value,
    },
    /// Messages a peer produced during superstep `gss`
    DeliverMessages {
        gss: u64,
        messages: Vec<OutgoingMessage>,
    },
    /// Execution converged; write results back if `store` is set.
    /// Answered with `ConductorMsg::Finalized`
    Finalize { store: bool },
    /// Vertex results of the local partitions
    CollectResults {
        reply: RpcReplyPort<Result<Vec<Value>, String>>,
    },
    /// Drop all shard state and stop
    Discard,
}

/// Where a worker runs and whom it reports to
#[derive(Debug, Clone)]
pub struct WorkerPlacement {
    pub execution: ExecutionNumber,
    /// Position in the routing table
    pub index: usize,
    pub node: String,
    pub conductor: ActorRef<ConductorMsg>,
}

/// Global graph size, known after every worker prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphInfo {
    pub vertex_count: u64,
    pub edge_count: u64,
}

/// Everything a worker needs to load its partitions
#[derive(Debug, Clone)]
pub struct ShardSetup {
    pub algorithm: String,
    pub params: Value,
    pub vertex_collections: Vec<String>,
    pub edge_collections: Vec<String>,
    pub partitions: Vec<usize>,
    pub result_field: String,
    pub routing: RoutingTable,
}

/// Maps vertex ids to partitions and partitions to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioning {
    pub partition_count: usize,
    pub worker_count: usize,
}

impl Partitioning {
    /// One worker per node, but never more workers than partitions
    pub fn new(partition_count: usize, node_count: usize) -> Self {
        let partition_count = partition_count.max(1);
        Self {
            partition_count,
            worker_count: node_count.clamp(1, partition_count),
        }
    }

    pub fn partition_of(&self, vertex_id: &str) -> Option<usize> {
        let (_, key) = split_document_id(vertex_id)?;
        Some(shard_for_key(key, self.partition_count))
    }

    pub fn owner_of(&self, partition: usize) -> usize {
        partition % self.worker_count
    }

    /// Index of the worker owning `vertex_id`, `None` for malformed ids
    pub fn worker_for(&self, vertex_id: &str) -> Option<usize> {
        self.partition_of(vertex_id).map(|p| self.owner_of(p))
    }

    pub fn partitions_of(&self, worker: usize) -> Vec<usize> {
        (0..self.partition_count)
            .filter(|p| self.owner_of(*p) == worker)
            .collect()
    }
}

/// Partitioning plus the live worker refs, shared with every worker
#[derive(Debug, Clone)]
pub struct RoutingTable {
    pub partitioning: Partitioning,
    pub workers: Vec<ActorRef<WorkerMsg>>,
}

impl RoutingTable {
    pub fn worker(&self, index: usize) -> Option<&ActorRef<WorkerMsg>> {
        self.workers.get(index)
    }
}
