//! PregelFeature - process-scoped registry of running executions
//!
//! Created once at process start and shared by cloning. Entries are added
//! by `pregel_start` and removed only by `cleanup_conductor` (or
//! `shutdown`). The registry map has its own locking, independent from
//! the state of each execution, which lives inside its conductor actor.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ractor::{Actor, ActorRef};
use serde_json::Value;
use shared_types::{ExecutionNumber, ExecutionState, ExecutionStatus, PregelStartRequest};

use crate::actors::conductor::{ConductorActor, ConductorArguments, ConductorMsg, ExecutionPlan};
use crate::actors::worker::WorkerMsg;
use crate::algorithm::AlgorithmRegistry;
use crate::cluster::{Cluster, LocalCluster};
use crate::config::PregelConfig;
use crate::error::PregelError;
use crate::storage::{AccessMode, CollectionKind, GraphStore, StorageError};

/// Handle to the conductor actor of one execution
#[derive(Debug, Clone)]
pub struct Conductor {
    execution: ExecutionNumber,
    actor: ActorRef<ConductorMsg>,
}

fn unavailable(execution: ExecutionNumber, e: impl std::fmt::Display) -> PregelError {
    PregelError::ConductorUnavailable(format!("execution {execution}: {e}"))
}

impl Conductor {
    pub fn new(execution: ExecutionNumber, actor: ActorRef<ConductorMsg>) -> Self {
        Self { execution, actor }
    }

    pub fn execution_number(&self) -> ExecutionNumber {
        self.execution
    }

    pub fn actor(&self) -> &ActorRef<ConductorMsg> {
        &self.actor
    }

    pub async fn start(&self) -> Result<(), PregelError> {
        ractor::call!(self.actor, |reply| ConductorMsg::Start { reply })
            .map_err(|e| unavailable(self.execution, e))?
    }

    pub async fn status(&self) -> Result<ExecutionStatus, PregelError> {
        ractor::call!(self.actor, |reply| ConductorMsg::GetStatus { reply })
            .map_err(|e| unavailable(self.execution, e))
    }

    pub async fn cancel(&self) -> Result<ExecutionState, PregelError> {
        ractor::call!(self.actor, |reply| ConductorMsg::Cancel { reply })
            .map_err(|e| unavailable(self.execution, e))
    }

    pub async fn collect_results(&self) -> Result<Vec<Value>, PregelError> {
        ractor::call!(self.actor, |reply| ConductorMsg::CollectResults { reply })
            .map_err(|e| unavailable(self.execution, e))?
    }

    pub fn stop(&self) {
        self.actor.stop(Some("cleanup".to_string()));
    }
}

#[derive(Clone)]
pub struct PregelFeature {
    inner: Arc<PregelFeatureInner>,
}

struct PregelFeatureInner {
    config: PregelConfig,
    store: Arc<dyn GraphStore>,
    algorithms: AlgorithmRegistry,
    cluster: Arc<dyn Cluster>,
    next_execution: AtomicU64,
    conductors: DashMap<ExecutionNumber, Conductor>,
}

impl PregelFeature {
    /// Feature running every worker in this process
    pub fn new(config: PregelConfig, store: Arc<dyn GraphStore>, algorithms: AlgorithmRegistry) -> Self {
        let cluster = Arc::new(LocalCluster::new(Arc::clone(&store), algorithms.clone()));
        Self::with_cluster(config, store, algorithms, cluster)
    }

    pub fn with_cluster(
        config: PregelConfig,
        store: Arc<dyn GraphStore>,
        algorithms: AlgorithmRegistry,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        Self {
            inner: Arc::new(PregelFeatureInner {
                config,
                store,
                algorithms,
                cluster,
                next_execution: AtomicU64::new(1),
                conductors: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &PregelConfig {
        &self.inner.config
    }

    pub fn algorithms(&self) -> &AlgorithmRegistry {
        &self.inner.algorithms
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Fresh execution number; never reused within this process
    pub fn create_execution_number(&self) -> ExecutionNumber {
        ExecutionNumber(self.inner.next_execution.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_conductor(&self, conductor: Conductor, execution: ExecutionNumber) {
        self.inner.conductors.insert(execution, conductor);
    }

    pub fn conductor(&self, execution: ExecutionNumber) -> Option<Conductor> {
        self.inner
            .conductors
            .get(&execution)
            .map(|entry| entry.value().clone())
    }

    /// Worker of `execution` placed on `node`, if still alive
    pub fn worker(&self, execution: ExecutionNumber, node: &str) -> Option<ActorRef<WorkerMsg>> {
        self.inner.cluster.worker(execution, node)
    }

    /// Remove the execution and stop its conductor and workers
    pub fn cleanup_conductor(&self, execution: ExecutionNumber) -> bool {
        match self.inner.conductors.remove(&execution) {
            Some((_, conductor)) => {
                conductor.stop();
                tracing::info!(execution = %execution, "Execution cleaned up");
                true
            }
            None => false,
        }
    }

    pub fn execution_count(&self) -> usize {
        self.inner.conductors.len()
    }

    /// Stop every execution
    pub fn shutdown(&self) {
        let executions: Vec<ExecutionNumber> =
            self.inner.conductors.iter().map(|entry| *entry.key()).collect();
        for execution in executions {
            self.cleanup_conductor(execution);
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Validate the request, create the execution and start it.
    ///
    /// Validation failures never register an execution number.
    pub async fn pregel_start(&self, request: PregelStartRequest) -> Result<ExecutionNumber, PregelError> {
        let algorithm = self
            .inner
            .algorithms
            .create(&request.algorithm, &request.options.params)?;
        let settings = self.inner.config.resolve(&request.options);
        let partition_count = self.validate_collections(&request, settings.store)?;

        let execution = self.create_execution_number();
        let plan = ExecutionPlan {
            algorithm: request.algorithm.clone(),
            params: request.options.params.clone(),
            vertex_collections: request.vertex_collections.clone(),
            edge_collections: request.edge_collections.clone(),
            partition_count,
            nodes: self.inner.config.worker_nodes(),
            settings,
        };
        let args = ConductorArguments {
            execution,
            algorithm,
            plan,
            cluster: Arc::clone(&self.inner.cluster),
        };
        let (actor, _handle) = Actor::spawn(None, ConductorActor, args)
            .await
            .map_err(|e| unavailable(execution, e))?;

        let conductor = Conductor::new(execution, actor);
        self.add_conductor(conductor.clone(), execution);
        if let Err(e) = conductor.start().await {
            tracing::error!(execution = %execution, error = %e, "Failed to start execution");
            self.cleanup_conductor(execution);
            return Err(e);
        }
        Ok(execution)
    }

    /// Check existence, kind, access and sharding of every collection.
    /// Returns the shared shard count.
    fn validate_collections(&self, request: &PregelStartRequest, store: bool) -> Result<usize, PregelError> {
        if request.vertex_collections.is_empty() {
            return Err(PregelError::InvalidRequest(
                "at least one vertex collection is required".to_string(),
            ));
        }

        let collections = request
            .vertex_collections
            .iter()
            .map(|name| (name, CollectionKind::Document))
            .chain(
                request
                    .edge_collections
                    .iter()
                    .map(|name| (name, CollectionKind::Edge)),
            );

        let mut seen = HashSet::new();
        let mut infos = Vec::new();
        for (name, expected) in collections {
            if !seen.insert(name.as_str()) {
                return Err(PregelError::InvalidRequest(format!(
                    "collection {name} is listed more than once"
                )));
            }
            let info = self.inner.store.collection_info(name).map_err(|e| match e {
                StorageError::CollectionNotFound(name) => PregelError::CollectionNotFound(name),
                other => PregelError::Storage(other),
            })?;
            if info.kind != expected {
                return Err(PregelError::InvalidRequest(format!(
                    "{name} is not a {} collection",
                    match expected {
                        CollectionKind::Document => "vertex",
                        CollectionKind::Edge => "edge",
                    }
                )));
            }
            infos.push(info);
        }

        for info in &infos {
            if !self.inner.store.can_access(&info.name, AccessMode::Read) {
                return Err(PregelError::Forbidden(format!("no read access to {}", info.name)));
            }
            if store && !self.inner.store.can_access(&info.name, AccessMode::Write) {
                return Err(PregelError::Forbidden(format!("no write access to {}", info.name)));
            }
        }

        let shard_count = infos[0].shard_count;
        if let Some(other) = infos.iter().find(|info| info.shard_count != shard_count) {
            return Err(PregelError::ShardingMismatch(format!(
                "{} has {} shards, {} has {}",
                infos[0].name, shard_count, other.name, other.shard_count
            )));
        }
        Ok(shard_count)
    }

    pub async fn pregel_status(&self, execution: ExecutionNumber) -> Result<ExecutionStatus, PregelError> {
        self.conductor(execution)
            .ok_or(PregelError::InvalidExecutionNumber(execution))?
            .status()
            .await
    }

    /// Cancel a running execution; a no-op on terminal ones
    pub async fn pregel_cancel(&self, execution: ExecutionNumber) -> Result<ExecutionState, PregelError> {
        self.conductor(execution)
            .ok_or(PregelError::InvalidExecutionNumber(execution))?
            .cancel()
            .await
    }

    /// Vertex results of a converged execution
    pub async fn pregel_collect_results(&self, execution: ExecutionNumber) -> Result<Vec<Value>, PregelError> {
        self.conductor(execution)
            .ok_or(PregelError::InvalidExecutionNumber(execution))?
            .collect_results()
            .await
    }

    /// Poll until the execution reaches a terminal state or `timeout`
    /// elapses; returns the last status seen either way
    pub async fn wait_for(
        &self,
        execution: ExecutionNumber,
        timeout: Duration,
    ) -> Result<ExecutionStatus, PregelError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.pregel_status(execution).await?;
            if status.state.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl std::fmt::Debug for PregelFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PregelFeature")
            .field("nodes", &self.inner.config.nodes)
            .field("algorithms", &self.inner.algorithms)
            .field("executions", &self.inner.conductors.len())
            .finish()
    }
}
