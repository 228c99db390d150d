//! Execution state machine of one conductor
//!
//! Pure bookkeeping: which barrier is open, which workers reported, the
//! counters of the superstep being collected and the lifecycle state. The
//! actor owns the I/O (dispatch, timers, aggregator merge) and feeds every
//! incoming report through here, so the barrier rules can be tested without
//! spawning actors.
//!
//! ```text
//! Created -> Running(0) -> Running(n+1) ... -> Converged
//!               |               |
//!               +---------------+--> Canceled | Failed
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared_types::{ExecutionNumber, ExecutionState, ExecutionStatus, SuperstepStats};

use super::protocol::{ShardSummary, SuperstepReport};
use crate::actors::worker::GraphInfo;

/// What the open barrier is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    Idle,
    Prepare,
    Superstep(u64),
    Finishing,
}

impl std::fmt::Display for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Barrier::Idle => write!(f, "idle"),
            Barrier::Prepare => write!(f, "prepare"),
            Barrier::Superstep(gss) => write!(f, "superstep {gss}"),
            Barrier::Finishing => write!(f, "finishing"),
        }
    }
}

/// Effect of one worker report
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Recorded; other workers are still missing
    Waiting,
    /// Late, duplicate or unexpected; nothing changed
    Ignored(String),
    /// Every worker prepared its shard
    Prepared,
    /// Every worker finished the superstep
    SuperstepComplete {
        stats: SuperstepStats,
        aggregators: Vec<Value>,
    },
    /// Every worker finalized
    Finalized,
    /// The report carried a failure; the execution is now FAILED
    Failed(String),
}

/// Outcome of a completed superstep barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Barrier for `gss` opened under `epoch`
    Continue { gss: u64, epoch: u64 },
    Converge,
}

#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    execution: ExecutionNumber,
    algorithm: String,
    state: ExecutionState,
    max_gss: u64,
    gss: u64,
    superstep_count: u64,
    worker_count: usize,
    barrier: Barrier,
    /// Bumped whenever a barrier opens; timers carry it
    epoch: u64,
    done: Vec<bool>,
    pending_stats: SuperstepStats,
    /// Aggregator documents of the open barrier, by worker index
    pending_aggregators: Vec<Option<Value>>,
    last_stats: SuperstepStats,
    total_send_count: u64,
    previous_send_count: Option<u64>,
    vertex_count: u64,
    edge_count: u64,
    aggregators: Value,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl ExecutionTracker {
    pub fn new(execution: ExecutionNumber, algorithm: impl Into<String>, max_gss: u64) -> Self {
        Self {
            execution,
            algorithm: algorithm.into(),
            state: ExecutionState::Created,
            max_gss: max_gss.max(1),
            gss: 0,
            superstep_count: 0,
            worker_count: 0,
            barrier: Barrier::Idle,
            epoch: 0,
            done: Vec::new(),
            pending_stats: SuperstepStats::default(),
            pending_aggregators: Vec::new(),
            last_stats: SuperstepStats::default(),
            total_send_count: 0,
            previous_send_count: None,
            vertex_count: 0,
            edge_count: 0,
            aggregators: Value::Object(Default::default()),
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn gss(&self) -> u64 {
        self.gss
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn barrier(&self) -> Barrier {
        self.barrier
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn graph_info(&self) -> GraphInfo {
        GraphInfo {
            vertex_count: self.vertex_count,
            edge_count: self.edge_count,
        }
    }

    /// Workers that have not reported at the open barrier
    pub fn missing_workers(&self) -> Vec<usize> {
        self.done
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(worker, _)| worker)
            .collect()
    }

    fn open(&mut self, barrier: Barrier) -> u64 {
        self.barrier = barrier;
        self.epoch += 1;
        self.done = vec![false; self.worker_count];
        self.pending_stats = SuperstepStats::default();
        self.pending_aggregators = vec![None; self.worker_count];
        self.epoch
    }

    fn close(&mut self, state: ExecutionState) {
        self.state = state;
        self.barrier = Barrier::Idle;
        self.end_time = Some(Utc::now());
    }

    /// CREATED -> RUNNING(0), opening the prepare barrier
    pub fn start(&mut self, worker_count: usize) -> Result<u64, String> {
        if self.state != ExecutionState::Created {
            return Err(format!("execution {} already {}", self.execution, self.state));
        }
        if worker_count == 0 {
            return Err("no workers to run on".to_string());
        }
        self.state = ExecutionState::Running;
        self.worker_count = worker_count;
        self.start_time = Some(Utc::now());
        Ok(self.open(Barrier::Prepare))
    }

    /// Check that `worker` may report at `barrier` and mark it done
    fn check_in(&mut self, worker: usize, barrier: Barrier) -> Result<(), String> {
        if self.is_terminal() {
            return Err(format!("execution is {}", self.state));
        }
        if self.barrier != barrier {
            return Err(format!("report for {barrier} while at {}", self.barrier));
        }
        match self.done.get_mut(worker) {
            None => Err(format!("unknown worker {worker}")),
            Some(true) => Err(format!("duplicate report from worker {worker}")),
            Some(done) => {
                *done = true;
                Ok(())
            }
        }
    }

    fn all_done(&self) -> bool {
        self.done.iter().all(|done| *done)
    }

    pub fn record_prepared(&mut self, worker: usize, result: Result<ShardSummary, String>) -> Progress {
        if let Err(reason) = self.check_in(worker, Barrier::Prepare) {
            return Progress::Ignored(reason);
        }
        match result {
            Err(e) => self.failed(format!("worker {worker} failed to prepare: {e}")),
            Ok(summary) => {
                self.vertex_count += summary.vertex_count;
                self.edge_count += summary.edge_count;
                if self.all_done() {
                    Progress::Prepared
                } else {
                    Progress::Waiting
                }
            }
        }
    }

    pub fn record_superstep(
        &mut self,
        worker: usize,
        gss: u64,
        result: Result<SuperstepReport, String>,
    ) -> Progress {
        if let Err(reason) = self.check_in(worker, Barrier::Superstep(gss)) {
            return Progress::Ignored(reason);
        }
        match result {
            Err(e) => self.failed(format!("worker {worker} failed in superstep {gss}: {e}")),
            Ok(report) => {
                self.pending_stats.accumulate(&report.stats);
                if let Some(slot) = self.pending_aggregators.get_mut(worker) {
                    *slot = Some(report.aggregators);
                }
                if self.all_done() {
                    // Worker index order, independent of arrival
                    let aggregators = std::mem::take(&mut self.pending_aggregators)
                        .into_iter()
                        .flatten()
                        .collect();
                    Progress::SuperstepComplete {
                        stats: self.pending_stats,
                        aggregators,
                    }
                } else {
                    Progress::Waiting
                }
            }
        }
    }

    pub fn record_finalized(&mut self, worker: usize, result: Result<(), String>) -> Progress {
        if let Err(reason) = self.check_in(worker, Barrier::Finishing) {
            return Progress::Ignored(reason);
        }
        match result {
            Err(e) => self.failed(format!("worker {worker} failed to store results: {e}")),
            Ok(()) if self.all_done() => Progress::Finalized,
            Ok(()) => Progress::Waiting,
        }
    }

    fn failed(&mut self, reason: String) -> Progress {
        self.fail(reason.clone());
        Progress::Failed(reason)
    }

    /// Open the barrier of superstep `gss`
    pub fn begin_superstep(&mut self, gss: u64) -> u64 {
        self.gss = gss;
        self.open(Barrier::Superstep(gss))
    }

    /// Account a completed superstep and decide whether to run another.
    ///
    /// Halts when no vertex is active, nothing was sent and no converging
    /// aggregator votes to continue, or when the superstep limit is reached.
    pub fn finish_superstep(&mut self, stats: SuperstepStats, votes_to_continue: bool) -> Decision {
        self.superstep_count += 1;
        self.last_stats = stats;
        self.total_send_count += stats.send_count;
        if let Some(sent) = self.previous_send_count {
            if stats.received_count != sent {
                tracing::warn!(
                    execution = %self.execution,
                    gss = self.gss,
                    sent,
                    received = stats.received_count,
                    "Received message count differs from messages sent in the previous superstep"
                );
            }
        }
        self.previous_send_count = Some(stats.send_count);

        let quiescent = stats.is_quiescent() && !votes_to_continue;
        let limit_reached = self.gss + 1 >= self.max_gss;
        if quiescent || limit_reached {
            tracing::info!(
                execution = %self.execution,
                gss = self.gss,
                quiescent,
                limit_reached,
                "Execution halting"
            );
            self.barrier = Barrier::Idle;
            Decision::Converge
        } else {
            let next = self.gss + 1;
            let epoch = self.begin_superstep(next);
            Decision::Continue { gss: next, epoch }
        }
    }

    pub fn set_aggregators(&mut self, aggregators: Value) {
        self.aggregators = aggregators;
    }

    pub fn begin_finishing(&mut self) -> u64 {
        self.open(Barrier::Finishing)
    }

    pub fn mark_converged(&mut self) {
        if !self.is_terminal() {
            self.close(ExecutionState::Converged);
        }
    }

    /// Move to FAILED; false if already terminal
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.error = Some(reason.into());
        self.close(ExecutionState::Failed);
        true
    }

    /// Move to CANCELED; false if already terminal
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.close(ExecutionState::Canceled);
        true
    }

    /// Fail the execution if the barrier opened under `epoch` is still open
    pub fn timeout(&mut self, epoch: u64) -> Option<String> {
        if self.is_terminal() || epoch != self.epoch || self.barrier == Barrier::Idle {
            return None;
        }
        let reason = format!(
            "timed out at {} waiting for workers {:?}",
            self.barrier,
            self.missing_workers()
        );
        self.fail(reason.clone());
        Some(reason)
    }

    pub fn status(&self) -> ExecutionStatus {
        let total_runtime = self
            .start_time
            .map(|start| {
                let end = self.end_time.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0);
        ExecutionStatus {
            execution_number: self.execution,
            algorithm: self.algorithm.clone(),
            state: self.state,
            gss: self.gss,
            superstep_count: self.superstep_count,
            vertex_count: self.vertex_count,
            edge_count: self.edge_count,
            stats: self.last_stats,
            total_send_count: self.total_send_count,
            start_time: self.start_time,
            end_time: self.end_time,
            total_runtime,
            aggregators: self.aggregators.clone(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(active: u64, sent: u64, received: u64) -> Result<SuperstepReport, String> {
        Ok(SuperstepReport {
            stats: SuperstepStats {
                active_count: active,
                send_count: sent,
                received_count: received,
            },
            aggregators: json!({"aggregators": {}}),
        })
    }

    fn prepared(workers: usize) -> ExecutionTracker {
        let mut tracker = ExecutionTracker::new(ExecutionNumber(1), "test", 100);
        tracker.start(workers).unwrap();
        for worker in 0..workers {
            tracker.record_prepared(
                worker,
                Ok(ShardSummary {
                    vertex_count: 2,
                    edge_count: 1,
                }),
            );
        }
        tracker.begin_superstep(0);
        tracker
    }

    #[test]
    fn test_start_only_from_created() {
        let mut tracker = ExecutionTracker::new(ExecutionNumber(1), "test", 10);
        assert_eq!(tracker.state(), ExecutionState::Created);
        assert!(tracker.start(0).is_err());
        let epoch = tracker.start(2).unwrap();
        assert_eq!(tracker.state(), ExecutionState::Running);
        assert_eq!(tracker.barrier(), Barrier::Prepare);
        assert_eq!(epoch, tracker.epoch());
        assert!(tracker.start(2).is_err());
    }

    #[test]
    fn test_prepare_barrier_sums_graph_size() {
        let mut tracker = ExecutionTracker::new(ExecutionNumber(1), "test", 10);
        tracker.start(2).unwrap();
        let summary = ShardSummary {
            vertex_count: 3,
            edge_count: 4,
        };
        assert_eq!(tracker.record_prepared(1, Ok(summary)), Progress::Waiting);
        assert_eq!(tracker.missing_workers(), vec![0]);
        assert_eq!(tracker.record_prepared(0, Ok(summary)), Progress::Prepared);
        assert_eq!(
            tracker.graph_info(),
            GraphInfo {
                vertex_count: 6,
                edge_count: 8
            }
        );
    }

    #[test]
    fn test_barrier_waits_for_every_worker() {
        let mut tracker = prepared(2);

        assert_eq!(tracker.record_superstep(0, 0, report(3, 5, 0)), Progress::Waiting);
        assert_eq!(tracker.state(), ExecutionState::Running);
        assert_eq!(tracker.gss(), 0);
        assert_eq!(tracker.status().superstep_count, 0);

        let progress = tracker.record_superstep(1, 0, report(0, 0, 0));
        let Progress::SuperstepComplete { stats, aggregators } = progress else {
            panic!("expected a completed barrier");
        };
        assert_eq!(stats.active_count, 3);
        assert_eq!(stats.send_count, 5);
        assert_eq!(aggregators.len(), 2);

        assert_eq!(
            tracker.finish_superstep(stats, false),
            Decision::Continue {
                gss: 1,
                epoch: tracker.epoch()
            }
        );
        assert_eq!(tracker.state(), ExecutionState::Running);
        assert_eq!(tracker.gss(), 1);
        assert_eq!(tracker.status().stats.active_count, 3);
    }

    /// Algorithm with a single last-value-wins aggregator named `last`
    struct LastWins;

    struct Idle;

    impl crate::algorithm::VertexComputation for Idle {
        fn compute(
            &mut self,
            ctx: &mut crate::algorithm::VertexContext<'_>,
            _messages: &[Value],
        ) -> Result<(), crate::algorithm::ComputeError> {
            ctx.vote_halt();
            Ok(())
        }
    }

    impl crate::algorithm::Algorithm for LastWins {
        fn name(&self) -> &str {
            "last-wins"
        }

        fn create_computation(&self) -> Box<dyn crate::algorithm::VertexComputation> {
            Box::new(Idle)
        }

        fn aggregator(&self, name: &str) -> Option<Box<dyn crate::aggregator::Aggregator>> {
            (name == "last").then(|| {
                Box::new(crate::aggregator::OverwriteAggregator::new(Value::Null))
                    as Box<dyn crate::aggregator::Aggregator>
            })
        }
    }

    /// Complete one superstep with workers reporting in `arrival` order and
    /// fold the emitted documents the way the conductor does
    fn merged_in_order(arrival: &[usize]) -> (Vec<Value>, Value) {
        let mut tracker = prepared(arrival.len());
        let mut completed = None;
        for &worker in arrival {
            let progress = tracker.record_superstep(
                worker,
                0,
                Ok(SuperstepReport {
                    stats: SuperstepStats::default(),
                    aggregators: json!({"aggregators": {"last": format!("w{worker}")}}),
                }),
            );
            if let Progress::SuperstepComplete { aggregators, .. } = progress {
                completed = Some(aggregators);
            }
        }
        let documents = completed.expect("barrier should complete");

        let merged = crate::aggregator::AggregatorHandler::new(std::sync::Arc::new(LastWins));
        for document in &documents {
            let contribution =
                crate::aggregator::AggregatorHandler::new(std::sync::Arc::new(LastWins));
            assert!(contribution.parse_values(document));
            merged.aggregate_values(&contribution);
        }
        (documents, merged.to_document(false))
    }

    #[test]
    fn test_aggregators_are_emitted_in_worker_order() {
        let (forward, forward_merged) = merged_in_order(&[0, 1, 2]);
        let (backward, backward_merged) = merged_in_order(&[2, 1, 0]);
        let (mixed, mixed_merged) = merged_in_order(&[1, 2, 0]);

        assert_eq!(forward, backward);
        assert_eq!(forward, mixed);
        assert_eq!(forward[0], json!({"aggregators": {"last": "w0"}}));
        assert_eq!(forward_merged, json!({"aggregators": {"last": "w2"}}));
        assert_eq!(backward_merged, forward_merged);
        assert_eq!(mixed_merged, forward_merged);
    }

    #[test]
    fn test_duplicate_and_stale_reports_are_ignored() {
        let mut tracker = prepared(2);
        assert_eq!(tracker.record_superstep(0, 0, report(1, 0, 0)), Progress::Waiting);
        assert!(matches!(
            tracker.record_superstep(0, 0, report(1, 0, 0)),
            Progress::Ignored(_)
        ));
        assert!(matches!(
            tracker.record_superstep(1, 3, report(1, 0, 0)),
            Progress::Ignored(_)
        ));
        assert!(matches!(
            tracker.record_superstep(7, 0, report(1, 0, 0)),
            Progress::Ignored(_)
        ));
        assert_eq!(tracker.missing_workers(), vec![1]);
    }

    #[test]
    fn test_quiescence_converges() {
        let mut tracker = prepared(1);
        let Progress::SuperstepComplete { stats, .. } =
            tracker.record_superstep(0, 0, report(0, 0, 0))
        else {
            panic!("expected a completed barrier");
        };
        assert_eq!(tracker.finish_superstep(stats, false), Decision::Converge);
        tracker.mark_converged();
        let status = tracker.status();
        assert_eq!(status.state, ExecutionState::Converged);
        assert_eq!(status.superstep_count, 1);
        assert!(status.end_time.is_some());
    }

    #[test]
    fn test_converging_vote_or_messages_keep_running() {
        let mut tracker = prepared(1);
        let idle = SuperstepStats::default();
        assert!(matches!(
            tracker.finish_superstep(idle, true),
            Decision::Continue { gss: 1, .. }
        ));
        let sending = SuperstepStats {
            send_count: 1,
            ..Default::default()
        };
        assert!(matches!(
            tracker.finish_superstep(sending, false),
            Decision::Continue { gss: 2, .. }
        ));
    }

    #[test]
    fn test_superstep_limit_converges() {
        let mut tracker = ExecutionTracker::new(ExecutionNumber(1), "test", 2);
        tracker.start(1).unwrap();
        tracker.record_prepared(0, Ok(ShardSummary::default()));
        tracker.begin_superstep(0);
        let busy = SuperstepStats {
            active_count: 1,
            ..Default::default()
        };
        assert!(matches!(
            tracker.finish_superstep(busy, false),
            Decision::Continue { gss: 1, .. }
        ));
        assert_eq!(tracker.finish_superstep(busy, false), Decision::Converge);
        assert_eq!(tracker.status().superstep_count, 2);
    }

    #[test]
    fn test_failed_report_fails_execution() {
        let mut tracker = prepared(2);
        let progress = tracker.record_superstep(1, 0, Err("boom".to_string()));
        assert!(matches!(progress, Progress::Failed(reason) if reason.contains("boom")));
        assert_eq!(tracker.state(), ExecutionState::Failed);
        assert!(tracker.status().error.unwrap().contains("boom"));

        // Nothing applies after a terminal transition.
        assert!(matches!(
            tracker.record_superstep(0, 0, report(1, 0, 0)),
            Progress::Ignored(_)
        ));
        assert!(!tracker.cancel());
        assert_eq!(tracker.state(), ExecutionState::Failed);
    }

    #[test]
    fn test_cancel_rejects_in_flight_reports() {
        let mut tracker = prepared(2);
        assert_eq!(tracker.record_superstep(0, 0, report(1, 0, 0)), Progress::Waiting);
        assert!(tracker.cancel());
        assert!(!tracker.cancel());
        assert!(matches!(
            tracker.record_superstep(1, 0, report(1, 0, 0)),
            Progress::Ignored(_)
        ));
        assert_eq!(tracker.status().state, ExecutionState::Canceled);
    }

    #[test]
    fn test_timeout_only_applies_to_current_epoch() {
        let mut tracker = prepared(2);
        let stale = tracker.epoch() - 1;
        assert_eq!(tracker.timeout(stale), None);
        assert_eq!(tracker.state(), ExecutionState::Running);

        tracker.record_superstep(0, 0, report(1, 0, 0));
        let reason = tracker.timeout(tracker.epoch()).unwrap();
        assert!(reason.contains("[1]"));
        assert_eq!(tracker.state(), ExecutionState::Failed);
        assert_eq!(tracker.timeout(tracker.epoch()), None);
    }

    #[test]
    fn test_finishing_barrier() {
        let mut tracker = prepared(2);
        tracker.begin_finishing();
        assert_eq!(tracker.record_finalized(0, Ok(())), Progress::Waiting);
        assert_eq!(tracker.record_finalized(1, Ok(())), Progress::Finalized);
        tracker.mark_converged();
        assert_eq!(tracker.state(), ExecutionState::Converged);

        let mut tracker = prepared(1);
        tracker.begin_finishing();
        assert!(matches!(
            tracker.record_finalized(0, Err("disk".to_string())),
            Progress::Failed(_)
        ));
    }
}
