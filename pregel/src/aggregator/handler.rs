//! AggregatorHandler - per-execution registry of live aggregators
//!
//! One handler exists per role and node: the conductor folds worker
//! contributions into its own handler, each worker keeps one for the global
//! view it received and one for the local contributions of its vertices.
//!
//! Lookups take the read lock. A miss escalates to the write lock, checks
//! again and creates the aggregator from the algorithm's factory. The hot
//! `aggregate` path therefore only contends on the per-entry mutex.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use shared_types::AGGREGATORS_KEY;

use super::Aggregator;
use crate::algorithm::Algorithm;

type Entry = Mutex<Box<dyn Aggregator>>;

pub struct AggregatorHandler {
    algorithm: Arc<dyn Algorithm>,
    values: RwLock<HashMap<String, Entry>>,
}

impl AggregatorHandler {
    pub fn new(algorithm: Arc<dyn Algorithm>) -> Self {
        Self {
            algorithm,
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Run `f` on the named aggregator, creating it on first use.
    /// Returns `None` when the algorithm does not define `name`.
    fn with_aggregator<R>(&self, name: &str, f: impl FnOnce(&mut dyn Aggregator) -> R) -> Option<R> {
        {
            let values = self.values.read();
            if let Some(entry) = values.get(name) {
                return Some(f(&mut **entry.lock()));
            }
        }

        let mut values = self.values.write();
        if !values.contains_key(name) {
            let created = self.algorithm.aggregator(name)?;
            tracing::trace!(aggregator = %name, "Registered aggregator");
            values.insert(name.to_string(), Mutex::new(created));
        }
        values.get_mut(name).map(|entry| f(&mut **entry.get_mut()))
    }

    /// Feed `value` into the named aggregator; unknown names are dropped
    pub fn aggregate(&self, name: &str, value: &Value) {
        self.with_aggregator(name, |agg| agg.accumulate(value));
    }

    /// Current value, or `None` when the algorithm has no such aggregator
    pub fn aggregated_value(&self, name: &str) -> Option<Value> {
        self.with_aggregator(name, |agg| agg.value())
    }

    pub fn reset_values(&self, force: bool) {
        let values = self.values.read();
        for entry in values.values() {
            entry.lock().reset(force);
        }
    }

    /// Fold every value registered in `other` into this handler
    pub fn aggregate_values(&self, other: &AggregatorHandler) {
        if std::ptr::eq(self, other) {
            return;
        }
        // Snapshot first so the two registries are never locked together.
        let snapshot: Vec<(String, Value)> = other
            .values
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.lock().value()))
            .collect();
        for (name, value) in snapshot {
            self.aggregate(&name, &value);
        }
    }

    /// Apply `{"aggregators": {name: value}}`; false when the field is
    /// missing or not an object
    pub fn parse_values(&self, data: &Value) -> bool {
        let Some(values) = data.get(AGGREGATORS_KEY).and_then(Value::as_object) else {
            return false;
        };
        for (name, value) in values {
            self.aggregate(name, value);
        }
        true
    }

    /// Write `{"aggregators": {...}}` into `out`; true if any value was written
    pub fn serialize_values(&self, out: &mut Map<String, Value>, only_converging: bool) -> bool {
        let values = self.values.read();
        let mut serialized = Map::new();
        for (name, entry) in values.iter() {
            let agg = entry.lock();
            if !only_converging || agg.is_converging() {
                serialized.insert(name.clone(), agg.value());
            }
        }
        let has_values = !serialized.is_empty();
        out.insert(AGGREGATORS_KEY.to_string(), Value::Object(serialized));
        has_values
    }

    /// Serialized values as a standalone document
    pub fn to_document(&self, only_converging: bool) -> Value {
        let mut out = Map::new();
        self.serialize_values(&mut out, only_converging);
        Value::Object(out)
    }

    /// True if any converging aggregator wants another superstep
    pub fn votes_to_continue(&self) -> bool {
        self.values
            .read()
            .values()
            .any(|entry| entry.lock().votes_to_continue())
    }

    pub fn size(&self) -> usize {
        self.values.read().len()
    }
}

impl std::fmt::Debug for AggregatorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorHandler")
            .field("algorithm", &self.algorithm.name())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{BoolOrAggregator, NumberAggregator, OverwriteAggregator};
    use crate::algorithm::{ComputeError, VertexComputation, VertexContext};
    use serde_json::json;

    struct Noop;

    impl VertexComputation for Noop {
        fn compute(
            &mut self,
            ctx: &mut VertexContext<'_>,
            _messages: &[Value],
        ) -> Result<(), ComputeError> {
            ctx.vote_halt();
            Ok(())
        }
    }

    struct Aggregating;

    impl Algorithm for Aggregating {
        fn name(&self) -> &str {
            "aggregating"
        }

        fn create_computation(&self) -> Box<dyn VertexComputation> {
            Box::new(Noop)
        }

        fn aggregator(&self, name: &str) -> Option<Box<dyn Aggregator>> {
            match name {
                "sum" => Some(Box::new(NumberAggregator::<i64>::sum())),
                "max" => Some(Box::new(NumberAggregator::<i64>::max(i64::MIN))),
                "min" => Some(Box::new(NumberAggregator::<i64>::min(i64::MAX))),
                "total" => Some(Box::new(NumberAggregator::<i64>::sum().permanent())),
                "changed" => Some(Box::new(BoolOrAggregator::new().converging())),
                "last" => Some(Box::new(OverwriteAggregator::new(json!(null)))),
                _ => None,
            }
        }
    }

    fn handler() -> AggregatorHandler {
        AggregatorHandler::new(Arc::new(Aggregating))
    }

    /// Small deterministic value sequence for order-independence checks
    fn sequence(seed: i64, len: usize) -> Vec<i64> {
        (0..len as i64)
            .map(|i| ((seed * 31 + i * 17) % 101) - 50)
            .collect()
    }

    #[test]
    fn test_unknown_aggregator_is_silently_ignored() {
        let h = handler();
        h.aggregate("nope", &json!(1));
        assert_eq!(h.aggregated_value("nope"), None);
        assert_eq!(h.size(), 0);
    }

    #[test]
    fn test_lazy_creation_and_size_dedup() {
        let h = handler();
        assert_eq!(h.aggregated_value("sum"), Some(json!(0)));
        h.aggregate("sum", &json!(1));
        h.aggregate("sum", &json!(2));
        h.aggregate("max", &json!(2));
        h.aggregate("unknown", &json!(2));
        assert_eq!(h.size(), 2);
    }

    #[test]
    fn test_commutative_kinds_are_order_independent() {
        for seed in 0..20 {
            let values = sequence(seed, 12);
            let mut reversed = values.clone();
            reversed.reverse();

            let forward = handler();
            let backward = handler();
            for v in &values {
                for name in ["sum", "max", "min"] {
                    forward.aggregate(name, &json!(v));
                }
            }
            for v in &reversed {
                for name in ["sum", "max", "min"] {
                    backward.aggregate(name, &json!(v));
                }
            }

            assert_eq!(
                forward.aggregated_value("sum"),
                Some(json!(values.iter().sum::<i64>()))
            );
            assert_eq!(
                forward.aggregated_value("max"),
                Some(json!(*values.iter().max().unwrap()))
            );
            assert_eq!(
                forward.aggregated_value("min"),
                Some(json!(*values.iter().min().unwrap()))
            );
            for name in ["sum", "max", "min"] {
                assert_eq!(forward.aggregated_value(name), backward.aggregated_value(name));
            }
        }
    }

    /// splitmix64, so every seed replays the same draws
    struct Draws(u64);

    impl Draws {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = self.0;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    /// Every kind whose merge is commutative; `last` is excluded
    const COMMUTATIVE: [&str; 5] = ["sum", "max", "min", "total", "changed"];

    /// A handler filled with seeded draws, plus the raw contributions
    fn drawn(draws: &mut Draws) -> (AggregatorHandler, Vec<(&'static str, Value)>) {
        let h = handler();
        let mut raw = Vec::new();
        for _ in 0..draws.below(12) {
            let name = COMMUTATIVE[draws.below(COMMUTATIVE.len() as u64) as usize];
            let value = if name == "changed" {
                json!(draws.below(2) == 1)
            } else {
                json!(draws.below(1001) as i64 - 500)
            };
            h.aggregate(name, &value);
            raw.push((name, value));
        }
        (h, raw)
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        const ORDERS: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for seed in 0..256 {
            let mut draws = Draws(seed);
            let parts: Vec<_> = (0..3).map(|_| drawn(&mut draws)).collect();

            let direct = handler();
            for (_, raw) in &parts {
                for (name, value) in raw {
                    direct.aggregate(name, value);
                }
            }
            let expected = direct.to_document(false);

            for order in ORDERS {
                let merged = handler();
                for i in order {
                    merged.aggregate_values(&parts[i].0);
                }
                assert_eq!(
                    merged.to_document(false),
                    expected,
                    "seed {seed}, merge order {order:?}"
                );
            }
        }
    }

    #[test]
    fn test_merge_keeps_local_only_entries() {
        let local = handler();
        local.aggregate("sum", &json!(5));
        let other = handler();
        other.aggregate("max", &json!(9));

        local.aggregate_values(&other);
        assert_eq!(local.aggregated_value("sum"), Some(json!(5)));
        assert_eq!(local.aggregated_value("max"), Some(json!(9)));
        assert_eq!(local.size(), 2);

        // Merging into itself is a no-op.
        local.aggregate_values(&local);
        assert_eq!(local.aggregated_value("sum"), Some(json!(5)));
    }

    #[test]
    fn test_forced_reset_returns_to_identity() {
        let h = handler();
        let mut out = Map::new();
        assert!(!h.serialize_values(&mut out, false));
        assert_eq!(out[AGGREGATORS_KEY], json!({}));

        h.aggregate("sum", &json!(4));
        h.aggregate("total", &json!(4));
        h.aggregate("changed", &json!(true));
        h.reset_values(true);

        let mut out = Map::new();
        assert!(h.serialize_values(&mut out, false));
        assert_eq!(
            out[AGGREGATORS_KEY],
            json!({"sum": 0, "total": 0, "changed": false})
        );
    }

    #[test]
    fn test_soft_reset_keeps_permanent_values() {
        let h = handler();
        h.aggregate("sum", &json!(4));
        h.aggregate("total", &json!(4));
        h.reset_values(false);
        assert_eq!(h.aggregated_value("sum"), Some(json!(0)));
        assert_eq!(h.aggregated_value("total"), Some(json!(4)));
    }

    #[test]
    fn test_parse_values_requires_well_known_field() {
        let h = handler();
        assert!(!h.parse_values(&json!({"values": {"sum": 1}})));
        assert!(!h.parse_values(&json!({"aggregators": [1, 2]})));
        assert_eq!(h.size(), 0);

        assert!(h.parse_values(&json!({"aggregators": {"sum": 3, "bogus": 1, "last": "x"}})));
        assert_eq!(h.aggregated_value("sum"), Some(json!(3)));
        assert_eq!(h.aggregated_value("last"), Some(json!("x")));
        assert_eq!(h.size(), 2);
    }

    #[test]
    fn test_serialize_only_converging() {
        let h = handler();
        h.aggregate("sum", &json!(1));
        let mut out = Map::new();
        assert!(!h.serialize_values(&mut out, true));

        h.aggregate("changed", &json!(true));
        assert_eq!(h.to_document(true), json!({"aggregators": {"changed": true}}));
        assert!(h.votes_to_continue());
    }

    #[test]
    fn test_concurrent_aggregation() {
        let h = Arc::new(handler());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        h.aggregate("sum", &json!(1));
                    }
                    h.to_document(false)
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(h.aggregated_value("sum"), Some(json!(8000)));
        assert_eq!(h.size(), 1);
    }
}
