use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorRef};
use serde_json::{json, Value};
use shared_types::{ExecutionNumber, ExecutionStatus};

use crate::actors::conductor::{ConductorActor, ConductorArguments, ConductorMsg, ExecutionPlan};
use crate::algorithm::{Algorithm, AlgorithmRegistry, ComputeError, VertexComputation, VertexContext};
use crate::cluster::LocalCluster;
use crate::config::ExecutionSettings;
use crate::storage::{CollectionKind, MemoryGraphStore};

/// Every vertex votes to halt in superstep 0
pub(crate) struct Halting;

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

/// Vertices keep messaging themselves and never halt
pub(crate) struct Forever;

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

pub(crate) fn registry() -> AlgorithmRegistry {
    let mut registry = AlgorithmRegistry::new();
    registry.register("halting", |_| Ok(Arc::new(Halting) as Arc<dyn Algorithm>));
    registry.register("forever", |_| Ok(Arc::new(Forever) as Arc<dyn Algorithm>));
    registry
}

/// `v` with the given keys, no edges, one shard per node
pub(crate) fn store(keys: &[&str], shards: usize) -> Arc<MemoryGraphStore> {
    let store = MemoryGraphStore::new();
    store
        .create_collection("v", CollectionKind::Document, shards)
        .unwrap();
    for key in keys {
        store.insert("v", json!({"_key": key})).unwrap();
    }
    Arc::new(store)
}

pub(crate) async fn setup_test_conductor(
    algorithm: &str,
    store: Arc<MemoryGraphStore>,
    partition_count: usize,
    nodes: &[&str],
) -> ActorRef<ConductorMsg> {
    let registry = registry();
    let algo = registry.create(algorithm, &Value::Null).unwrap();
    let cluster = Arc::new(LocalCluster::new(store, registry));

    let args = ConductorArguments {
        execution: ExecutionNumber(42),
        algorithm: algo,
        plan: ExecutionPlan {
            algorithm: algorithm.to_string(),
            params: Value::Null,
            vertex_collections: vec!["v".to_string()],
            edge_collections: vec![],
            partition_count,
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            settings: ExecutionSettings {
                max_gss: u64::MAX,
                result_field: "result".to_string(),
                store: false,
                worker_timeout: Duration::from_secs(5),
            },
        },
        cluster,
    };

    let (conductor_ref, _handle) = Actor::spawn(None, ConductorActor, args).await.unwrap();
    conductor_ref
}

pub(crate) async fn status(conductor: &ActorRef<ConductorMsg>) -> ExecutionStatus {
    ractor::call!(conductor, |reply| ConductorMsg::GetStatus { reply }).unwrap()
}

/// Poll until terminal or two seconds passed
pub(crate) async fn wait_terminal(conductor: &ActorRef<ConductorMsg>) -> ExecutionStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = status(conductor).await;
        if status.state.is_terminal() || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
