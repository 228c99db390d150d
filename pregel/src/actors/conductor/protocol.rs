//! ConductorActor message protocol
//!
//! Control calls come from `PregelFeature`; reports come from workers.
//! Worker failures travel as `Err(reason)` inside reports, never as actor
//! errors.

use ractor::RpcReplyPort;
use serde_json::Value;
use shared_types::{ExecutionState, ExecutionStatus, SuperstepStats};

use crate::error::PregelError;

/// Messages handled by ConductorActor
#[derive(Debug)]
pub enum ConductorMsg {
    /// Place workers and dispatch `Prepare`; replies once dispatched
    Start {
        reply: RpcReplyPort<Result<(), PregelError>>,
    },
    /// A worker loaded its partitions
    ShardPrepared {
        worker: usize,
        result: Result<ShardSummary, String>,
    },
    /// A worker finished superstep `gss`
    SuperstepDone {
        worker: usize,
        gss: u64,
        result: Result<SuperstepReport, String>,
    },
    /// A worker finished writing results
    Finalized {
        worker: usize,
        result: Result<(), String>,
    },
    /// The barrier opened under `epoch` did not complete in time
    BarrierTimeout { epoch: u64 },
    /// Cancel the execution; replies with the resulting state
    Cancel {
        reply: RpcReplyPort<ExecutionState>,
    },
    GetStatus {
        reply: RpcReplyPort<ExecutionStatus>,
    },
    /// Gather all vertex results; only valid once converged
    CollectResults {
        reply: RpcReplyPort<Result<Vec<Value>, PregelError>>,
    },
}

/// Shard size reported after `Prepare`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShardSummary {
    pub vertex_count: u64,
    pub edge_count: u64,
}

/// Local outcome of one superstep on one worker
#[derive(Debug, Clone, PartialEq)]
pub struct SuperstepReport {
    pub stats: SuperstepStats,
    /// `{"aggregators": {...}}` with the local contributions
    pub aggregators: Value,
}
