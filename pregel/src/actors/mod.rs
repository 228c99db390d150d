//! Actors driving one execution
//!
//! - [`conductor::ConductorActor`]: one per execution, owns the superstep
//!   state machine and the merged aggregator values
//! - [`worker::WorkerActor`]: one per node and execution, owns the
//!   partitions placed on that node

pub mod conductor;
pub mod worker;

pub use conductor::{ConductorActor, ConductorArguments, ConductorMsg};
pub use worker::{WorkerActor, WorkerArguments, WorkerMsg};
