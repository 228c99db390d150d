use std::collections::HashSet;
use std::time::Duration;

use shared_types::PregelOptions;

pub const DEFAULT_RESULT_FIELD: &str = "result";
pub const DEFAULT_MAX_GSS: u64 = 500;
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct PregelConfig {
    /// Nodes that host workers; partitions are assigned round-robin
    pub nodes: Vec<String>,
    /// How long the conductor waits for all workers at one barrier
    pub worker_timeout: Duration,
    /// Default superstep limit when a request does not set one
    pub max_gss: u64,
    /// Default document attribute receiving vertex results
    pub result_field: String,
}

impl Default for PregelConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["node-1".to_string()],
            worker_timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            max_gss: DEFAULT_MAX_GSS,
            result_field: DEFAULT_RESULT_FIELD.to_string(),
        }
    }
}

impl PregelConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let nodes = distinct(env_csv("PREGEL_NODES", &["node-1"]));
        if nodes.is_empty() {
            anyhow::bail!("PREGEL_NODES must name at least one node");
        }

        Ok(Self {
            nodes,
            worker_timeout: Duration::from_secs(
                env_parse("PREGEL_WORKER_TIMEOUT_SECS", DEFAULT_WORKER_TIMEOUT_SECS)?.max(1),
            ),
            max_gss: env_parse("PREGEL_MAX_GSS", DEFAULT_MAX_GSS)?,
            result_field: env_str("PREGEL_RESULT_FIELD", DEFAULT_RESULT_FIELD),
        })
    }

    /// Nodes in configured order, each named once
    pub fn worker_nodes(&self) -> Vec<String> {
        distinct(self.nodes.clone())
    }

    /// Effective settings for one execution
    pub fn resolve(&self, options: &PregelOptions) -> ExecutionSettings {
        ExecutionSettings {
            max_gss: options.max_gss.unwrap_or(self.max_gss).max(1),
            result_field: options
                .result_field
                .clone()
                .filter(|field| !field.is_empty())
                .unwrap_or_else(|| self.result_field.clone()),
            store: options.store,
            worker_timeout: options
                .timeout_secs
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(self.worker_timeout),
        }
    }
}

/// Per-execution settings after request options are applied
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    pub max_gss: u64,
    pub result_field: String,
    pub store: bool,
    pub worker_timeout: Duration,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

/// Drop repeats, keeping the first occurrence
fn distinct(mut values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.retain(|value| seen.insert(value.clone()));
    values
}
