//! WorkerActor - per-node executor of one execution
//!
//! A worker owns every partition the conductor placed on its node. It
//! loads those partitions on `Prepare`, runs exactly one superstep per
//! `RunSuperstep`, exchanges messages with its peers directly and reports
//! each barrier back to the conductor.
//!
//! ## Superstep
//!
//! ```text
//! RunSuperstep(n, aggregators)
//!   -> global view  = aggregators from the conductor
//!   -> compute every active vertex (or vertex with messages for n)
//!   -> local messages  -> own buffer for n+1
//!   -> remote messages -> DeliverMessages(n) to the owning peer
//!   -> SuperstepDone(n, counters, local aggregator values)
//! ```
//!
//! Message buffers are double buffered by `gss % 2`, so messages for n+1
//! may arrive before, during or after this worker runs n.

pub mod actor;
pub mod buffers;
pub mod graph;
pub mod protocol;
pub mod shard;

pub use actor::{WorkerActor, WorkerArguments, WorkerState};
pub use protocol::{GraphInfo, Partitioning, RoutingTable, ShardSetup, WorkerMsg, WorkerPlacement};
pub use shard::ShardState;
