//! ConductorActor - coordinates one execution across its workers
//!
//! The conductor is the only component that changes the global state of an
//! execution. Workers report; the conductor decides.
//!
//! ## State Machine
//!
//! ```text
//! Created --Start--> Running(0) --barrier--> Running(1) ... --> Converged
//!                        |                        |
//!                        +--- Cancel ------------>+--> Canceled
//!                        +--- report failure /    |
//!                             timeout / lost ---->+--> Failed
//! ```
//!
//! Every barrier (prepare, superstep n, finishing) waits for all workers.
//! A barrier that stays open longer than the worker timeout fails the
//! execution. Reports arriving for a closed barrier are logged and dropped.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ractor::Actor;
//! use crate::actors::conductor::{ConductorActor, ConductorArguments, ConductorMsg};
//!
//! let (conductor, _handle) = Actor::spawn(None, ConductorActor, args).await?;
//! ractor::call!(conductor, |reply| ConductorMsg::Start { reply })??;
//! ```

pub mod actor;
pub mod protocol;
pub mod state;

#[cfg(test)]
mod tests;

pub use actor::{ConductorActor, ConductorArguments, ConductorState, ExecutionPlan};
pub use protocol::{ConductorMsg, ShardSummary, SuperstepReport};
pub use state::{Barrier, Decision, ExecutionTracker, Progress};
