//! ConductorActor - coordinates the supersteps of one execution
//!
//! The ConductorActor is responsible for:
//! - Placing one worker per node and dispatching `Prepare`
//! - Opening a barrier per superstep and waiting for every worker
//! - Merging worker aggregator contributions between supersteps
//! - Deciding convergence, failure (report, timeout, lost worker) and cancel
//! - Gathering results once converged

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use serde_json::Value;
use shared_types::{ExecutionNumber, ExecutionState, AGGREGATORS_KEY};
use tokio::task::JoinHandle;

use super::protocol::ConductorMsg;
use super::state::{Decision, ExecutionTracker, Progress};
use crate::actors::worker::{Partitioning, RoutingTable, ShardSetup, WorkerMsg, WorkerPlacement};
use crate::aggregator::AggregatorHandler;
use crate::algorithm::Algorithm;
use crate::cluster::Cluster;
use crate::config::ExecutionSettings;
use crate::error::PregelError;

#[derive(Debug, Default)]
pub struct ConductorActor;

/// Validated description of one execution
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub algorithm: String,
    pub params: Value,
    pub vertex_collections: Vec<String>,
    pub edge_collections: Vec<String>,
    /// Shard count shared by every collection
    pub partition_count: usize,
    pub nodes: Vec<String>,
    pub settings: ExecutionSettings,
}

/// Arguments for spawning ConductorActor
#[derive(Clone)]
pub struct ConductorArguments {
    pub execution: ExecutionNumber,
    pub algorithm: Arc<dyn Algorithm>,
    pub plan: ExecutionPlan,
    pub cluster: Arc<dyn Cluster>,
}

pub struct ConductorState {
    execution: ExecutionNumber,
    plan: ExecutionPlan,
    algorithm: Arc<dyn Algorithm>,
    tracker: ExecutionTracker,
    /// Merged values of all workers
    aggregators: AggregatorHandler,
    cluster: Arc<dyn Cluster>,
    /// By routing index
    workers: Vec<ActorRef<WorkerMsg>>,
    timer: Option<JoinHandle<()>>,
}

#[async_trait]
impl Actor for ConductorActor {
    type Msg = ConductorMsg;
    type State = ConductorState;
    type Arguments = ConductorArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            execution = %args.execution,
            algorithm = %args.plan.algorithm,
            "ConductorActor starting"
        );
        Ok(ConductorState {
            execution: args.execution,
            tracker: ExecutionTracker::new(
                args.execution,
                args.algorithm.name(),
                args.plan.settings.max_gss,
            ),
            aggregators: AggregatorHandler::new(Arc::clone(&args.algorithm)),
            algorithm: args.algorithm,
            plan: args.plan,
            cluster: args.cluster,
            workers: Vec::new(),
            timer: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConductorMsg::Start { reply } => {
                let result = self.handle_start(&myself, state).await;
                let _ = reply.send(result);
            }
            ConductorMsg::ShardPrepared { worker, result } => {
                let progress = state.tracker.record_prepared(worker, result);
                self.apply(&myself, state, worker, progress);
            }
            ConductorMsg::SuperstepDone {
                worker,
                gss,
                result,
            } => {
                let progress = state.tracker.record_superstep(worker, gss, result);
                self.apply(&myself, state, worker, progress);
            }
            ConductorMsg::Finalized { worker, result } => {
                let progress = state.tracker.record_finalized(worker, result);
                self.apply(&myself, state, worker, progress);
            }
            ConductorMsg::BarrierTimeout { epoch } => {
                if let Some(reason) = state.tracker.timeout(epoch) {
                    tracing::error!(execution = %state.execution, reason = %reason, "Barrier timed out");
                    abort(state);
                }
            }
            ConductorMsg::Cancel { reply } => {
                if state.tracker.cancel() {
                    tracing::info!(
                        execution = %state.execution,
                        gss = state.tracker.gss(),
                        "Execution canceled"
                    );
                    abort(state);
                }
                let _ = reply.send(state.tracker.state());
            }
            ConductorMsg::GetStatus { reply } => {
                let _ = reply.send(state.tracker.status());
            }
            ConductorMsg::CollectResults { reply } => {
                let result = self.handle_collect_results(state).await;
                let _ = reply.send(result);
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        event: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, detail) = match &event {
            SupervisionEvent::ActorFailed(cell, err) => (cell, format!("failed: {err}")),
            SupervisionEvent::ActorTerminated(cell, _, reason) => (
                cell,
                format!("terminated: {}", reason.as_deref().unwrap_or("no reason")),
            ),
            _ => return Ok(()),
        };
        let Some(index) = state
            .workers
            .iter()
            .position(|w| w.get_id() == cell.get_id())
        else {
            return Ok(());
        };

        if state.tracker.is_terminal() {
            tracing::debug!(
                actor_id = %myself.get_id(),
                execution = %state.execution,
                worker = index,
                detail = %detail,
                "Worker exited after execution ended"
            );
            return Ok(());
        }

        let reason = format!("worker {index} on {} {detail}", state.plan.nodes[index]);
        tracing::error!(execution = %state.execution, reason = %reason, "Lost worker");
        if state.tracker.fail(reason) {
            abort(state);
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        cancel_timer(state);
        for worker in &state.workers {
            worker.stop(Some("conductor stopped".to_string()));
        }
        state.cluster.release_workers(state.execution);
        tracing::info!(
            actor_id = %myself.get_id(),
            execution = %state.execution,
            state = %state.tracker.state(),
            "ConductorActor stopped"
        );
        Ok(())
    }
}

impl ConductorActor {
    /// Spawn workers and dispatch `Prepare`; returns without waiting for them
    async fn handle_start(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ConductorState,
    ) -> Result<(), PregelError> {
        if state.tracker.state() != ExecutionState::Created {
            return Err(PregelError::InvalidRequest(format!(
                "execution {} was already started",
                state.execution
            )));
        }
        if state.plan.nodes.is_empty() {
            return Err(PregelError::InvalidRequest("no nodes to place workers on".to_string()));
        }

        let partitioning = Partitioning::new(state.plan.partition_count, state.plan.nodes.len());
        for index in 0..partitioning.worker_count {
            let placement = WorkerPlacement {
                execution: state.execution,
                index,
                node: state.plan.nodes[index].clone(),
                conductor: myself.clone(),
            };
            match state.cluster.spawn_worker(placement, myself.get_cell()).await {
                Ok(worker) => state.workers.push(worker),
                Err(e) => {
                    state.tracker.fail(e.to_string());
                    abort(state);
                    return Err(e);
                }
            }
        }

        let epoch = state
            .tracker
            .start(state.workers.len())
            .map_err(PregelError::InvalidRequest)?;
        let routing = RoutingTable {
            partitioning,
            workers: state.workers.clone(),
        };
        for (index, worker) in state.workers.iter().enumerate() {
            let setup = ShardSetup {
                algorithm: state.plan.algorithm.clone(),
                params: state.plan.params.clone(),
                vertex_collections: state.plan.vertex_collections.clone(),
                edge_collections: state.plan.edge_collections.clone(),
                partitions: partitioning.partitions_of(index),
                result_field: state.plan.settings.result_field.clone(),
                routing: routing.clone(),
            };
            dispatch(state.execution, index, worker, WorkerMsg::Prepare { setup });
        }
        arm_timer(myself, state, epoch);

        tracing::info!(
            execution = %state.execution,
            algorithm = %state.algorithm.name(),
            workers = state.workers.len(),
            partitions = partitioning.partition_count,
            "Execution started"
        );
        Ok(())
    }

    fn apply(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ConductorState,
        worker: usize,
        progress: Progress,
    ) {
        match progress {
            Progress::Waiting => {
                tracing::debug!(
                    execution = %state.execution,
                    worker,
                    barrier = %state.tracker.barrier(),
                    missing = ?state.tracker.missing_workers(),
                    "Worker reported"
                );
            }
            Progress::Ignored(reason) => {
                tracing::warn!(
                    execution = %state.execution,
                    worker,
                    reason = %reason,
                    "Ignoring worker report"
                );
            }
            Progress::Prepared => {
                let info = state.tracker.graph_info();
                tracing::info!(
                    execution = %state.execution,
                    vertices = info.vertex_count,
                    edges = info.edge_count,
                    "All shards prepared"
                );
                let epoch = state.tracker.begin_superstep(0);
                run_superstep(myself, state, 0, epoch);
            }
            Progress::SuperstepComplete { stats, aggregators } => {
                let gss = state.tracker.gss();
                self.merge_aggregators(state, &aggregators);
                let votes = state.aggregators.votes_to_continue();
                tracing::info!(
                    execution = %state.execution,
                    gss,
                    active = stats.active_count,
                    sent = stats.send_count,
                    received = stats.received_count,
                    votes_to_continue = votes,
                    "Superstep complete"
                );
                match state.tracker.finish_superstep(stats, votes) {
                    Decision::Continue { gss, epoch } => run_superstep(myself, state, gss, epoch),
                    Decision::Converge if state.plan.settings.store => {
                        let epoch = state.tracker.begin_finishing();
                        for (index, worker) in state.workers.iter().enumerate() {
                            dispatch(
                                state.execution,
                                index,
                                worker,
                                WorkerMsg::Finalize { store: true },
                            );
                        }
                        arm_timer(myself, state, epoch);
                    }
                    Decision::Converge => self.converged(state),
                }
            }
            Progress::Finalized => self.converged(state),
            Progress::Failed(reason) => {
                tracing::error!(execution = %state.execution, reason = %reason, "Execution failed");
                abort(state);
            }
        }
    }

    /// Fold the worker documents of one barrier into the conductor handler.
    /// Non-permanent values restart from neutral each superstep.
    fn merge_aggregators(&self, state: &mut ConductorState, documents: &[Value]) {
        state.aggregators.reset_values(false);
        for document in documents {
            let contribution = AggregatorHandler::new(Arc::clone(&state.algorithm));
            if !contribution.parse_values(document) {
                tracing::warn!(
                    execution = %state.execution,
                    "Worker report without aggregator values"
                );
                continue;
            }
            state.aggregators.aggregate_values(&contribution);
        }
        let merged = state.aggregators.to_document(false);
        state.tracker.set_aggregators(
            merged
                .get(AGGREGATORS_KEY)
                .cloned()
                .unwrap_or(Value::Null),
        );
    }

    fn converged(&self, state: &mut ConductorState) {
        cancel_timer(state);
        state.tracker.mark_converged();
        let status = state.tracker.status();
        tracing::info!(
            execution = %state.execution,
            supersteps = status.superstep_count,
            runtime_secs = status.total_runtime,
            "Execution converged"
        );
    }

    async fn handle_collect_results(
        &self,
        state: &ConductorState,
    ) -> Result<Vec<Value>, PregelError> {
        if state.tracker.state() != ExecutionState::Converged {
            return Err(PregelError::NotFinished(state.execution));
        }
        let timeout_ms = state.plan.settings.worker_timeout.as_millis() as u64;
        let mut results = Vec::new();
        for (index, worker) in state.workers.iter().enumerate() {
            let shard = ractor::call_t!(
                worker,
                |reply| WorkerMsg::CollectResults { reply },
                timeout_ms
            )
            .map_err(|e| PregelError::WorkerFailed(format!("worker {index}: {e}")))?
            .map_err(|e| PregelError::WorkerFailed(format!("worker {index}: {e}")))?;
            results.extend(shard);
        }
        Ok(results)
    }
}

fn run_superstep(myself: &ActorRef<ConductorMsg>, state: &mut ConductorState, gss: u64, epoch: u64) {
    let info = state.tracker.graph_info();
    let aggregators = state.aggregators.to_document(false);
    for (index, worker) in state.workers.iter().enumerate() {
        dispatch(
            state.execution,
            index,
            worker,
            WorkerMsg::RunSuperstep {
                gss,
                info,
                aggregators: aggregators.clone(),
            },
        );
    }
    arm_timer(myself, state, epoch);
    tracing::debug!(execution = %state.execution, gss, "Superstep dispatched");
}

/// A lost worker surfaces through supervision or the barrier timer
fn dispatch(execution: ExecutionNumber, index: usize, worker: &ActorRef<WorkerMsg>, message: WorkerMsg) {
    if let Err(e) = worker.send_message(message) {
        tracing::warn!(execution = %execution, worker = index, error = %e, "Dispatch failed");
    }
}

/// Fail the open barrier unless it completes within the worker timeout
fn arm_timer(myself: &ActorRef<ConductorMsg>, state: &mut ConductorState, epoch: u64) {
    cancel_timer(state);
    let timeout: Duration = state.plan.settings.worker_timeout;
    let conductor = myself.clone();
    state.timer = Some(tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = conductor.send_message(ConductorMsg::BarrierTimeout { epoch });
    }));
}

fn cancel_timer(state: &mut ConductorState) {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
}

/// Stop timers and tell every worker to drop its shard
fn abort(state: &mut ConductorState) {
    cancel_timer(state);
    for (index, worker) in state.workers.iter().enumerate() {
        dispatch(state.execution, index, worker, WorkerMsg::Discard);
    }
}
