//! WorkerActor - runs the shard of one node for one execution

use std::sync::Arc;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use super::protocol::{ShardSetup, WorkerMsg, WorkerPlacement};
use super::shard::ShardState;
use crate::actors::conductor::ConductorMsg;
use crate::algorithm::AlgorithmRegistry;
use crate::storage::GraphStore;

#[derive(Debug, Default)]
pub struct WorkerActor;

/// Arguments for spawning WorkerActor
#[derive(Clone)]
pub struct WorkerArguments {
    pub placement: WorkerPlacement,
    /// Storage of the node the worker runs on
    pub store: Arc<dyn GraphStore>,
    /// Algorithms known on that node
    pub algorithms: AlgorithmRegistry,
}

pub struct WorkerState {
    placement: WorkerPlacement,
    store: Arc<dyn GraphStore>,
    algorithms: AlgorithmRegistry,
    /// Peers by routing index, including this worker
    peers: Vec<ActorRef<WorkerMsg>>,
    /// `None` until prepared and after a failed superstep
    shard: Option<ShardState>,
}

#[async_trait]
impl Actor for WorkerActor {
    type Msg = WorkerMsg;
    type State = WorkerState;
    type Arguments = WorkerArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!(
            actor_id = %myself.get_id(),
            execution = %args.placement.execution,
            worker = args.placement.index,
            node = %args.placement.node,
            "WorkerActor starting"
        );
        Ok(WorkerState {
            placement: args.placement,
            store: args.store,
            algorithms: args.algorithms,
            peers: Vec::new(),
            shard: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMsg::Prepare { setup } => self.handle_prepare(state, setup),
            WorkerMsg::RunSuperstep {
                gss,
                info,
                aggregators,
            } => {
                let result = match state.shard.as_mut() {
                    None => Err("worker has no prepared shard".to_string()),
                    Some(shard) => shard.run_superstep(gss, info, &aggregators),
                };
                let result = match result {
                    Ok(output) => {
                        let mut delivered = Ok(());
                        for (peer, messages) in output.remote {
                            let Some(target) = state.peers.get(peer) else {
                                delivered = Err(format!("no peer at routing index {peer}"));
                                break;
                            };
                            tracing::debug!(
                                execution = %state.placement.execution,
                                gss,
                                peer,
                                count = messages.len(),
                                "Delivering messages"
                            );
                            if let Err(e) =
                                target.send_message(WorkerMsg::DeliverMessages { gss, messages })
                            {
                                delivered = Err(format!("peer {peer} unreachable: {e}"));
                                break;
                            }
                        }
                        delivered.map(|_| output.report)
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    tracing::error!(
                        execution = %state.placement.execution,
                        worker = state.placement.index,
                        gss,
                        error = %e,
                        "Superstep failed"
                    );
                    state.shard = None;
                }
                report(
                    &state.placement,
                    ConductorMsg::SuperstepDone {
                        worker: state.placement.index,
                        gss,
                        result,
                    },
                );
            }
            WorkerMsg::DeliverMessages { gss, messages } => match state.shard.as_mut() {
                Some(shard) => {
                    if let Err(e) = shard.accept(gss, messages) {
                        tracing::warn!(
                            execution = %state.placement.execution,
                            worker = state.placement.index,
                            error = %e,
                            "Discarding out-of-order messages"
                        );
                    }
                }
                None => {
                    tracing::debug!(
                        execution = %state.placement.execution,
                        gss,
                        "Discarding messages for an unprepared shard"
                    );
                }
            },
            WorkerMsg::Finalize { store } => {
                let result = match state.shard.as_ref() {
                    None => Err("worker has no prepared shard".to_string()),
                    Some(_) if !store => Ok(()),
                    Some(shard) => shard
                        .store_results(state.store.as_ref())
                        .map_err(|e| e.to_string()),
                };
                report(
                    &state.placement,
                    ConductorMsg::Finalized {
                        worker: state.placement.index,
                        result,
                    },
                );
            }
            WorkerMsg::CollectResults { reply } => {
                let results = state
                    .shard
                    .as_ref()
                    .map(ShardState::results)
                    .ok_or_else(|| "worker has no prepared shard".to_string());
                let _ = reply.send(results);
            }
            WorkerMsg::Discard => {
                tracing::debug!(
                    execution = %state.placement.execution,
                    worker = state.placement.index,
                    "Discarding shard"
                );
                state.shard = None;
                state.peers.clear();
                myself.stop(Some("discarded".to_string()));
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::debug!(
            actor_id = %myself.get_id(),
            execution = %state.placement.execution,
            worker = state.placement.index,
            "WorkerActor stopped"
        );
        Ok(())
    }
}

impl WorkerActor {
    fn handle_prepare(&self, state: &mut WorkerState, setup: ShardSetup) {
        let result = ShardState::prepare(
            state.placement.index,
            &setup,
            state.store.as_ref(),
            &state.algorithms,
        );
        let result = match result {
            Ok(shard) => {
                let summary = shard.summary();
                tracing::info!(
                    execution = %state.placement.execution,
                    worker = state.placement.index,
                    node = %state.placement.node,
                    partitions = ?setup.partitions,
                    vertices = summary.vertex_count,
                    edges = summary.edge_count,
                    "Shard prepared"
                );
                state.shard = Some(shard);
                state.peers = setup.routing.workers;
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(
                    execution = %state.placement.execution,
                    worker = state.placement.index,
                    error = %e,
                    "Failed to prepare shard"
                );
                Err(e)
            }
        };
        report(
            &state.placement,
            ConductorMsg::ShardPrepared {
                worker: state.placement.index,
                result,
            },
        );
    }
}

fn report(placement: &WorkerPlacement, message: ConductorMsg) {
    if let Err(e) = placement.conductor.send_message(message) {
        tracing::warn!(
            execution = %placement.execution,
            worker = placement.index,
            error = %e,
            "Conductor unreachable, dropping report"
        );
    }
}
