//! PageRank
//!
//! Every vertex starts with `1 / N` and keeps redistributing its rank over
//! its outbound edges. A vertex whose rank moved by more than `threshold`
//! contributes the delta to the converging `convergence` aggregator. Once a
//! superstep ends with no such contribution, all vertices halt.

use serde::Deserialize;
use serde_json::Value;

use super::{Algorithm, ComputeError, MessageCombiner, SumCombiner, VertexComputation, VertexContext};
use crate::aggregator::{Aggregator, NumberAggregator};
use crate::error::PregelError;

pub const NAME: &str = "pagerank";
pub const CONVERGENCE: &str = "convergence";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageRankParams {
    pub damping: f64,
    pub threshold: f64,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            threshold: 0.00002,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageRank {
    params: PageRankParams,
}

impl PageRank {
    pub fn new(params: PageRankParams) -> Self {
        Self { params }
    }

    pub fn from_params(params: &Value) -> Result<Self, PregelError> {
        let params: PageRankParams = if params.is_null() {
            PageRankParams::default()
        } else {
            serde_json::from_value(params.clone())
                .map_err(|e| PregelError::InvalidRequest(format!("pagerank params: {e}")))?
        };
        if !(0.0..=1.0).contains(&params.damping) {
            return Err(PregelError::InvalidRequest(format!(
                "pagerank damping must be within [0, 1], got {}",
                params.damping
            )));
        }
        Ok(Self::new(params))
    }
}

impl Algorithm for PageRank {
    fn name(&self) -> &str {
        NAME
    }

    fn create_computation(&self) -> Box<dyn VertexComputation> {
        Box::new(PageRankComputation {
            params: self.params.clone(),
        })
    }

    fn message_combiner(&self) -> Option<Box<dyn MessageCombiner>> {
        Some(Box::new(SumCombiner))
    }

    fn aggregator(&self, name: &str) -> Option<Box<dyn Aggregator>> {
        match name {
            CONVERGENCE => Some(Box::new(NumberAggregator::<f64>::max(0.0).converging())),
            _ => None,
        }
    }
}

struct PageRankComputation {
    params: PageRankParams,
}

impl VertexComputation for PageRankComputation {
    fn compute(&mut self, ctx: &mut VertexContext<'_>, messages: &[Value]) -> Result<(), ComputeError> {
        let n = ctx.vertex_count().max(1) as f64;
        let gss = ctx.global_superstep();

        let rank = if gss == 0 {
            1.0 / n
        } else {
            let converged = ctx
                .aggregated_value(CONVERGENCE)
                .and_then(|v| v.as_f64())
                .map_or(true, |delta| delta <= 0.0);
            if gss > 1 && converged {
                ctx.vote_halt();
                return Ok(());
            }

            let old = ctx.value().as_f64().ok_or_else(|| {
                ComputeError::InvalidValue(format!("{} has rank {}", ctx.id(), ctx.value()))
            })?;
            let sum: f64 = messages.iter().filter_map(Value::as_f64).sum();
            let rank = (1.0 - self.params.damping) / n + self.params.damping * sum;
            let delta = (rank - old).abs();
            if delta > self.params.threshold {
                ctx.aggregate(CONVERGENCE, delta);
            }
            rank
        };

        ctx.set_value(Value::from(rank));
        let out_degree = ctx.edges().len();
        if out_degree > 0 {
            ctx.send_message_to_all_neighbors(Value::from(rank / out_degree as f64));
        }
        Ok(())
    }
}
