//! Incoming message buffers, one per superstep parity

use std::collections::HashMap;

use serde_json::Value;

use crate::algorithm::MessageCombiner;

/// Messages addressed to local vertices for one superstep
#[derive(Debug, Default)]
pub struct MessageBuffer {
    inbox: HashMap<String, Vec<Value>>,
    received: u64,
}

impl MessageBuffer {
    /// Queue `payload` for `to`, folding it into the pending message when a
    /// combiner is given
    pub fn push(&mut self, to: String, payload: Value, combiner: Option<&dyn MessageCombiner>) {
        self.received += 1;
        let pending = self.inbox.entry(to).or_default();
        match (combiner, pending.first_mut()) {
            (Some(combiner), Some(current)) => combiner.combine(current, payload),
            _ => pending.push(payload),
        }
    }

    /// Remove and return the messages for `vertex`
    pub fn take(&mut self, vertex: &str) -> Vec<Value> {
        self.inbox.remove(vertex).unwrap_or_default()
    }

    /// Messages pushed, before combining
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Vertices with at least one pending message
    pub fn target_count(&self) -> usize {
        self.inbox.len()
    }
}

/// Two buffers indexed by `gss % 2`
#[derive(Debug, Default)]
pub struct DoubleBuffer {
    buffers: [MessageBuffer; 2],
}

impl DoubleBuffer {
    fn slot(gss: u64) -> usize {
        (gss % 2) as usize
    }

    /// Buffer receiving messages to be read in superstep `gss`
    pub fn for_superstep(&mut self, gss: u64) -> &mut MessageBuffer {
        &mut self.buffers[Self::slot(gss)]
    }

    /// Hand out the buffer of superstep `gss`, leaving an empty one behind
    pub fn take_superstep(&mut self, gss: u64) -> MessageBuffer {
        std::mem::take(&mut self.buffers[Self::slot(gss)])
    }
}
