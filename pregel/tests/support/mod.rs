//! Shared fixtures for the feature level tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pregel::actors::worker::{WorkerActor, WorkerArguments, WorkerMsg, WorkerPlacement};
use pregel::algorithm::{
    Algorithm, AlgorithmRegistry, ComputeError, VertexComputation, VertexContext,
};
use pregel::cluster::{Cluster, LocalCluster};
use pregel::storage::{GraphStore, MemoryGraphStore};
use pregel::{PregelConfig, PregelError, PregelFeature};
use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef, SupervisionEvent};
use serde_json::{json, Value};
use shared_types::{ExecutionNumber, ExecutionStatus, PregelOptions, PregelStartRequest};
use tokio::sync::Notify;

/// Every vertex stores "done" and halts immediately
pub struct Halting;

struct HaltNow;

impl VertexComputation for HaltNow {
    fn compute(&mut self, ctx: &mut VertexContext<'_>, _messages: &[Value]) -> Result<(), ComputeError> {
        ctx.set_value(json!("done"));
        ctx.vote_halt();
        Ok(())
    }
}

impl Algorithm for Halting {
    fn name(&self) -> &str {
        "halting"
    }

    fn create_computation(&self) -> Box<dyn VertexComputation> {
        Box::new(HaltNow)
    }
}

/// Never halts; every vertex messages itself each superstep
pub struct Forever;

struct Ping;

impl VertexComputation for Ping {
    fn compute(&mut self, ctx: &mut VertexContext<'_>, _messages: &[Value]) -> Result<(), ComputeError> {
        let id = ctx.id().to_string();
        ctx.send_message(id, json!(1));
        Ok(())
    }
}

impl Algorithm for Forever {
    fn name(&self) -> &str {
        "forever"
    }

    fn create_computation(&self) -> Box<dyn VertexComputation> {
        Box::new(Ping)
    }
}

/// Fails in superstep 1
pub struct Exploding;

struct Explode;

impl VertexComputation for Explode {
    fn compute(&mut self, ctx: &mut VertexContext<'_>, _messages: &[Value]) -> Result<(), ComputeError> {
        if ctx.global_superstep() == 1 {
            return Err(ComputeError::Failed(format!("boom at {}", ctx.id())));
        }
        Ok(())
    }
}

impl Algorithm for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn create_computation(&self) -> Box<dyn VertexComputation> {
        Box::new(Explode)
    }
}

/// Builtins plus the test algorithms above
pub fn registry() -> AlgorithmRegistry {
    let mut registry = AlgorithmRegistry::with_builtins();
    registry.register("halting", |_| Ok(Arc::new(Halting) as Arc<dyn Algorithm>));
    registry.register("forever", |_| Ok(Arc::new(Forever) as Arc<dyn Algorithm>));
    registry.register("exploding", |_| Ok(Arc::new(Exploding) as Arc<dyn Algorithm>));
    registry
}

pub fn config(nodes: &[&str]) -> PregelConfig {
    PregelConfig {
        nodes: nodes.iter().map(|n| n.to_string()).collect(),
        worker_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

/// Vertex collection `v` and edge collection `e`, both with `shards` shards.
/// Edges are `(from_key, to_key, extra attributes)`.
pub fn graph(shards: usize, vertices: &[&str], edges: &[(&str, &str, Value)]) -> Arc<MemoryGraphStore> {
    let edge_docs: Vec<Value> = edges
        .iter()
        .map(|(from, to, extra)| {
            let mut doc = json!({"_from": format!("v/{from}"), "_to": format!("v/{to}")});
            if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
                doc.extend(extra.clone());
            }
            doc
        })
        .collect();
    let vertex_docs: Vec<Value> = vertices.iter().map(|key| json!({"_key": key})).collect();

    let store = MemoryGraphStore::from_graph_document(&json!({
        "collections": [
            {"name": "v", "type": "document", "shards": shards, "documents": vertex_docs},
            {"name": "e", "type": "edge", "shards": shards, "documents": edge_docs}
        ]
    }))
    .unwrap();
    Arc::new(store)
}

pub fn feature(store: &Arc<MemoryGraphStore>, nodes: &[&str]) -> PregelFeature {
    PregelFeature::new(config(nodes), store.clone(), registry())
}

pub fn request(algorithm: &str, options: PregelOptions) -> PregelStartRequest {
    PregelStartRequest {
        algorithm: algorithm.to_string(),
        vertex_collections: vec!["v".to_string()],
        edge_collections: vec!["e".to_string()],
        options,
    }
}

pub fn params(params: Value) -> PregelOptions {
    PregelOptions {
        params,
        ..Default::default()
    }
}

pub async fn wait(feature: &PregelFeature, execution: ExecutionNumber) -> ExecutionStatus {
    feature
        .wait_for(execution, Duration::from_secs(5))
        .await
        .unwrap()
}

/// Results as `_key -> result field`
pub async fn results_by_key(
    feature: &PregelFeature,
    execution: ExecutionNumber,
    field: &str,
) -> std::collections::BTreeMap<String, Value> {
    feature
        .pregel_collect_results(execution)
        .await
        .unwrap()
        .into_iter()
        .map(|doc| {
            (
                doc["_key"].as_str().unwrap().to_string(),
                doc.get(field).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

// ============================================================================
// Gated worker
// ============================================================================

/// Holds `RunSuperstep(gss)` on worker 0 until the test opens the gate
pub struct SuperstepGate {
    pub gss: u64,
    reached: Notify,
    release: Notify,
}

impl SuperstepGate {
    pub fn new(gss: u64) -> Arc<Self> {
        Arc::new(Self {
            gss,
            reached: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Wait until worker 0 is holding superstep `gss`
    pub async fn reached(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.reached.notified())
            .await
            .expect("gate was never reached");
    }

    pub fn open(&self) {
        self.release.notify_one();
    }
}

/// Forwards everything to a real WorkerActor, except that it waits on the
/// gate before forwarding the gated superstep
struct GatedWorker;

struct GatedWorkerState {
    inner: ActorRef<WorkerMsg>,
    gate: Arc<SuperstepGate>,
}

#[async_trait]
impl Actor for GatedWorker {
    type Msg = WorkerMsg;
    type State = GatedWorkerState;
    type Arguments = (WorkerArguments, Arc<SuperstepGate>);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (args, gate): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (inner, _handle) =
            Actor::spawn_linked(None, WorkerActor, args, myself.get_cell()).await?;
        Ok(GatedWorkerState { inner, gate })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let WorkerMsg::RunSuperstep { gss, .. } = &message {
            if *gss == state.gate.gss {
                state.gate.reached.notify_one();
                state.gate.release.notified().await;
            }
        }
        state.inner.send_message(message)?;
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        event: SupervisionEvent,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match event {
            SupervisionEvent::ActorFailed(_, err) => Err(format!("inner worker failed: {err}").into()),
            SupervisionEvent::ActorTerminated(_, _, reason) => {
                myself.stop(reason);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.inner.stop(None);
        Ok(())
    }
}

/// Local cluster whose worker 0 runs behind a [`SuperstepGate`]
pub struct GatedCluster {
    inner: LocalCluster,
    store: Arc<dyn GraphStore>,
    algorithms: AlgorithmRegistry,
    gate: Arc<SuperstepGate>,
}

#[async_trait]
impl Cluster for GatedCluster {
    async fn spawn_worker(
        &self,
        placement: WorkerPlacement,
        supervisor: ActorCell,
    ) -> Result<ActorRef<WorkerMsg>, PregelError> {
        if placement.index != 0 {
            return self.inner.spawn_worker(placement, supervisor).await;
        }
        let args = WorkerArguments {
            placement,
            store: Arc::clone(&self.store),
            algorithms: self.algorithms.clone(),
        };
        Actor::spawn_linked(None, GatedWorker, (args, Arc::clone(&self.gate)), supervisor)
            .await
            .map(|(worker, _)| worker)
            .map_err(|e| PregelError::WorkerFailed(e.to_string()))
    }

    fn worker(&self, execution: ExecutionNumber, node: &str) -> Option<ActorRef<WorkerMsg>> {
        self.inner.worker(execution, node)
    }

    fn release_workers(&self, execution: ExecutionNumber) {
        self.inner.release_workers(execution);
    }
}

pub fn gated_feature(
    store: &Arc<MemoryGraphStore>,
    nodes: &[&str],
    gate: Arc<SuperstepGate>,
) -> PregelFeature {
    let store: Arc<dyn GraphStore> = store.clone();
    let algorithms = registry();
    let cluster = Arc::new(GatedCluster {
        inner: LocalCluster::new(Arc::clone(&store), algorithms.clone()),
        store: Arc::clone(&store),
        algorithms: algorithms.clone(),
        gate,
    });
    PregelFeature::with_cluster(config(nodes), store, algorithms, cluster)
}
