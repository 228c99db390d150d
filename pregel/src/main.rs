//! Run one algorithm over a JSON graph file
//!
//! ```text
//! pregel <graph.json> <algorithm> [params-json]
//! ```
//!
//! Every document collection of the file is a vertex collection and every
//! edge collection an edge collection. Status goes to the log, results to
//! stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pregel::algorithm::AlgorithmRegistry;
use pregel::storage::{CollectionKind, MemoryGraphStore};
use pregel::{PregelConfig, PregelFeature};
use serde_json::Value;
use shared_types::{ExecutionState, PregelOptions, PregelStartRequest};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pregel=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(graph_path), Some(algorithm)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: pregel <graph.json> <algorithm> [params-json]");
    };
    let params: Value = match args.next() {
        Some(raw) => serde_json::from_str(&raw).context("params must be a JSON document")?,
        None => Value::Null,
    };

    let config = PregelConfig::from_env()?;
    let store = MemoryGraphStore::from_path(&graph_path)
        .with_context(|| format!("failed to load graph from {graph_path}"))?;
    let request = PregelStartRequest {
        algorithm,
        vertex_collections: store.collection_names(CollectionKind::Document),
        edge_collections: store.collection_names(CollectionKind::Edge),
        options: PregelOptions {
            params,
            ..Default::default()
        },
    };
    let wait = config.worker_timeout * config.max_gss.min(u32::MAX as u64) as u32;

    let feature = PregelFeature::new(config, Arc::new(store), AlgorithmRegistry::with_builtins());
    tracing::info!(
        algorithm = %request.algorithm,
        vertices = ?request.vertex_collections,
        edges = ?request.edge_collections,
        "Starting execution"
    );
    let execution = feature.pregel_start(request).await?;
    let status = feature.wait_for(execution, wait.max(Duration::from_secs(1))).await?;
    tracing::info!(
        execution = %execution,
        state = %status.state,
        supersteps = status.superstep_count,
        runtime_secs = status.total_runtime,
        aggregators = %status.aggregators,
        "Execution finished"
    );

    if status.state != ExecutionState::Converged {
        feature.shutdown();
        anyhow::bail!(
            "execution {execution} ended {}: {}",
            status.state,
            status.error.unwrap_or_default()
        );
    }

    let results = feature.pregel_collect_results(execution).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    feature.shutdown();
    Ok(())
}
