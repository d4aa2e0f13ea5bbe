//! Named traffic counters
//!
//! Engines publish per-inbound byte counters under names built by
//! [`inbound_traffic_counter`]. Counters only ever accumulate; readers that
//! want deltas swap the value back to zero with [`Counter::set`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::EngineError;

/// Direction of a traffic counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficDirection {
    Uplink,
    Downlink,
}

impl TrafficDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficDirection::Uplink => "uplink",
            TrafficDirection::Downlink => "downlink",
        }
    }
}

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrafficDirection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uplink" => Ok(TrafficDirection::Uplink),
            "downlink" => Ok(TrafficDirection::Downlink),
            other => Err(EngineError::Config(format!(
                "unknown traffic direction: {}",
                other
            ))),
        }
    }
}

/// Counter name for an inbound's traffic in one direction
pub fn inbound_traffic_counter(inbound_tag: &str, direction: TrafficDirection) -> String {
    format!("inbound>>>{}>>>traffic>>>{}", inbound_tag, direction)
}

/// A monotonically accumulating counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Add `delta` and return the new value
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Replace the value, returning the previous one in a single atomic step
    pub fn set(&self, value: i64) -> i64 {
        self.value.swap(value, Ordering::AcqRel)
    }
}

/// Counter lookup exposed by a running engine
pub trait StatsManager: Send + Sync {
    fn counter(&self, name: &str) -> Option<Arc<Counter>>;
}

/// In-memory [`StatsManager`] for engines that keep their counters locally
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter, returning the existing one if the name is taken
    pub fn register(&self, name: impl Into<String>) -> Arc<Counter> {
        let name = name.into();
        let mut counters = match self.counters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters
            .entry(name)
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    pub fn len(&self) -> usize {
        match self.counters.read() {
            Ok(counters) => counters.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatsManager for CounterRegistry {
    fn counter(&self, name: &str) -> Option<Arc<Counter>> {
        match self.counters.read() {
            Ok(counters) => counters.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }
}
