//! Pregel - vertex-centric graph processing over sharded collections
//!
//! A conductor actor drives one execution through synchronized supersteps.
//! Worker actors, one per node, own the partitions placed on that node, run
//! the algorithm's vertex program and exchange messages with each other.
//! Aggregated global values flow through [`aggregator::AggregatorHandler`].
//!
//! [`feature::PregelFeature`] is the entry point: start, inspect, cancel an
//! execution and collect its results.

pub mod actors;
pub mod aggregator;
pub mod algorithm;
pub mod cluster;
pub mod config;
pub mod error;
pub mod feature;
pub mod storage;

pub use config::PregelConfig;
pub use error::PregelError;
pub use feature::{Conductor, PregelFeature};
