//! Aggregators - named global values merged across all workers
//!
//! An aggregator folds serialized values (`serde_json::Value`) into its
//! accumulated value. Values of the wrong shape are ignored, never an error.
//!
//! Two flags shape the lifecycle:
//! - `permanent`: `reset(false)` keeps the value, only `reset(true)` clears it
//! - `converging`: the aggregator takes part in the global halt decision and
//!   votes to continue while its value differs from its neutral value

mod handler;

use serde_json::Value;
use std::fmt;

pub use handler::AggregatorHandler;

pub trait Aggregator: Send + Sync {
    /// Fold a serialized value into the accumulated value
    fn accumulate(&mut self, value: &Value);

    /// Return to the neutral value unless permanent and not forced
    fn reset(&mut self, force: bool);

    /// Serialized current value
    fn value(&self) -> Value;

    fn is_neutral(&self) -> bool;

    fn is_converging(&self) -> bool {
        false
    }

    fn votes_to_continue(&self) -> bool {
        self.is_converging() && !self.is_neutral()
    }
}

/// Number types usable with [`NumberAggregator`]
pub trait Numeric: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static {
    fn zero() -> Self;
    fn add(self, other: Self) -> Self;
    fn from_json(value: &Value) -> Option<Self>;
    fn to_json(self) -> Value;
}

impl Numeric for i64 {
    fn zero() -> Self {
        0
    }
    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
    fn from_json(value: &Value) -> Option<Self> {
        value.as_i64()
    }
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl Numeric for u64 {
    fn zero() -> Self {
        0
    }
    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
    fn from_json(value: &Value) -> Option<Self> {
        value.as_u64()
    }
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl Numeric for f64 {
    fn zero() -> Self {
        0.0
    }
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOp {
    Sum,
    Max,
    Min,
}

/// Sum, max or min over a numeric type
#[derive(Debug, Clone)]
pub struct NumberAggregator<T: Numeric> {
    op: NumberOp,
    neutral: T,
    value: T,
    permanent: bool,
    converging: bool,
}

impl<T: Numeric> NumberAggregator<T> {
    fn new(op: NumberOp, neutral: T) -> Self {
        Self {
            op,
            neutral,
            value: neutral,
            permanent: false,
            converging: false,
        }
    }

    pub fn sum() -> Self {
        Self::new(NumberOp::Sum, T::zero())
    }

    /// `init` is the neutral value, e.g. `0.0` for non-negative deltas
    pub fn max(init: T) -> Self {
        Self::new(NumberOp::Max, init)
    }

    pub fn min(init: T) -> Self {
        Self::new(NumberOp::Min, init)
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn converging(mut self) -> Self {
        self.converging = true;
        self
    }

    pub fn get(&self) -> T {
        self.value
    }

    fn combine(&self, current: T, incoming: T) -> T {
        match self.op {
            NumberOp::Sum => current.add(incoming),
            NumberOp::Max if incoming > current => incoming,
            NumberOp::Min if incoming < current => incoming,
            NumberOp::Max | NumberOp::Min => current,
        }
    }
}

impl<T: Numeric> Aggregator for NumberAggregator<T> {
    fn accumulate(&mut self, value: &Value) {
        if let Some(incoming) = T::from_json(value) {
            self.value = self.combine(self.value, incoming);
        }
    }

    fn reset(&mut self, force: bool) {
        if !self.permanent || force {
            self.value = self.neutral;
        }
    }

    fn value(&self) -> Value {
        self.value.to_json()
    }

    fn is_neutral(&self) -> bool {
        self.value == self.neutral
    }

    fn is_converging(&self) -> bool {
        self.converging
    }
}

/// Last accumulated value wins
#[derive(Debug, Clone)]
pub struct OverwriteAggregator {
    neutral: Value,
    value: Value,
    permanent: bool,
}

impl OverwriteAggregator {
    pub fn new(neutral: Value) -> Self {
        Self {
            value: neutral.clone(),
            neutral,
            permanent: false,
        }
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }
}

impl Aggregator for OverwriteAggregator {
    fn accumulate(&mut self, value: &Value) {
        self.value = value.clone();
    }

    fn reset(&mut self, force: bool) {
        if !self.permanent || force {
            self.value = self.neutral.clone();
        }
    }

    fn value(&self) -> Value {
        self.value.clone()
    }

    fn is_neutral(&self) -> bool {
        self.value == self.neutral
    }
}

/// Logical or over booleans; neutral is `false`
#[derive(Debug, Clone, Default)]
pub struct BoolOrAggregator {
    value: bool,
    permanent: bool,
    converging: bool,
}

impl BoolOrAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn converging(mut self) -> Self {
        self.converging = true;
        self
    }
}

impl Aggregator for BoolOrAggregator {
    fn accumulate(&mut self, value: &Value) {
        if value.as_bool() == Some(true) {
            self.value = true;
        }
    }

    fn reset(&mut self, force: bool) {
        if !self.permanent || force {
            self.value = false;
        }
    }

    fn value(&self) -> Value {
        Value::Bool(self.value)
    }

    fn is_neutral(&self) -> bool {
        !self.value
    }

    fn is_converging(&self) -> bool {
        self.converging
    }
}
