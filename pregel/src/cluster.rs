//! Worker placement
//!
//! The conductor asks a [`Cluster`] for one worker per node. Workers are
//! linked to the conductor, so a worker that dies shows up as a
//! supervision event on the conductor.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ractor::{Actor, ActorCell, ActorRef};
use shared_types::ExecutionNumber;

use crate::actors::worker::{WorkerActor, WorkerArguments, WorkerMsg, WorkerPlacement};
use crate::algorithm::AlgorithmRegistry;
use crate::error::PregelError;
use crate::storage::GraphStore;

/// Live workers by execution and node
pub type WorkerDirectory = Arc<DashMap<(ExecutionNumber, String), ActorRef<WorkerMsg>>>;

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Spawn the worker for `placement`, linked to `supervisor`
    async fn spawn_worker(
        &self,
        placement: WorkerPlacement,
        supervisor: ActorCell,
    ) -> Result<ActorRef<WorkerMsg>, PregelError>;

    fn worker(&self, execution: ExecutionNumber, node: &str) -> Option<ActorRef<WorkerMsg>>;

    /// Forget every worker of `execution`
    fn release_workers(&self, execution: ExecutionNumber);
}

/// Runs every "node" in this process against one shared store
pub struct LocalCluster {
    store: Arc<dyn GraphStore>,
    algorithms: AlgorithmRegistry,
    workers: WorkerDirectory,
}

impl LocalCluster {
    pub fn new(store: Arc<dyn GraphStore>, algorithms: AlgorithmRegistry) -> Self {
        Self {
            store,
            algorithms,
            workers: Arc::new(DashMap::new()),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[async_trait]
impl Cluster for LocalCluster {
    async fn spawn_worker(
        &self,
        placement: WorkerPlacement,
        supervisor: ActorCell,
    ) -> Result<ActorRef<WorkerMsg>, PregelError> {
        let key = (placement.execution, placement.node.clone());
        let args = WorkerArguments {
            placement,
            store: Arc::clone(&self.store),
            algorithms: self.algorithms.clone(),
        };
        let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, supervisor)
            .await
            .map_err(|e| {
                PregelError::WorkerFailed(format!("failed to spawn worker on {}: {e}", key.1))
            })?;
        tracing::debug!(
            execution = %key.0,
            node = %key.1,
            actor_id = %worker.get_id(),
            "Spawned WorkerActor"
        );
        self.workers.insert(key, worker.clone());
        Ok(worker)
    }

    fn worker(&self, execution: ExecutionNumber, node: &str) -> Option<ActorRef<WorkerMsg>> {
        self.workers
            .get(&(execution, node.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn release_workers(&self, execution: ExecutionNumber) {
        self.workers.retain(|(e, _), _| *e != execution);
    }
}
