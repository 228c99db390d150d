//! Shared types between conductor, workers and the binding layer
//!
//! These types are exchanged by:
//! - The conductor and its workers (superstep reports, aggregator values)
//! - The binding entry points (start requests, status documents, errors)
//!
//! Serializable with serde for JSON across node boundaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Core Types
// ============================================================================

/// Well-known field holding the name -> value mapping of aggregator values
pub const AGGREGATORS_KEY: &str = "aggregators";

/// Unique identifier of one running computation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ExecutionNumber(pub u64);

impl ExecutionNumber {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ExecutionNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lifecycle state of an execution
///
/// ```text
/// Created -> Running(gss) -> Running(gss + 1) -> ...
///                |
///                +--> Converged | Canceled | Failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Created,
    Running,
    Converged,
    Canceled,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Canceled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Converged => "converged",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Options accepted by `pregel_start`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PregelOptions {
    /// Upper bound on global supersteps; reaching it converges the execution
    #[serde(default)]
    pub max_gss: Option<u64>,
    /// Write each vertex value back into its document on convergence
    #[serde(default)]
    pub store: bool,
    /// Document attribute receiving the vertex value
    #[serde(default)]
    pub result_field: Option<String>,
    /// Barrier timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Algorithm specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Start a computation over a set of collections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PregelStartRequest {
    pub algorithm: String,
    pub vertex_collections: Vec<String>,
    pub edge_collections: Vec<String>,
    #[serde(default)]
    pub options: PregelOptions,
}

// ============================================================================
// Status
// ============================================================================

/// Global counters of one superstep (or sum over all workers)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SuperstepStats {
    pub active_count: u64,
    pub send_count: u64,
    pub received_count: u64,
}

impl SuperstepStats {
    pub fn accumulate(&mut self, other: &SuperstepStats) {
        self.active_count += other.active_count;
        self.send_count += other.send_count;
        self.received_count += other.received_count;
    }

    /// No vertex is active and nothing is left to deliver
    pub fn is_quiescent(&self) -> bool {
        self.active_count == 0 && self.send_count == 0
    }
}

/// Structured status document returned by `pregel_status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStatus {
    pub execution_number: ExecutionNumber,
    pub algorithm: String,
    pub state: ExecutionState,
    /// Index of the current (or last) global superstep
    pub gss: u64,
    /// Number of supersteps every worker has completed
    pub superstep_count: u64,
    pub vertex_count: u64,
    pub edge_count: u64,
    /// Counters of the last completed superstep
    pub stats: SuperstepStats,
    /// Total messages sent over the whole execution
    pub total_send_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end (or now while running)
    pub total_runtime: f64,
    pub aggregators: serde_json::Value,
    pub error: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// User visible error body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PregelErrorBody {
    pub code: String,
    pub message: String,
}
