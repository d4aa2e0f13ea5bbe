//! Traffic counter queries
//!
//! Queries read and reset: each call returns the traffic accumulated since
//! the previous call, not a running total.

use tracing::debug;
use tunpoint_engine::{inbound_traffic_counter, StatsManager, TrafficDirection};

/// Read the `direction` counter of `inbound_tag` and reset it to zero.
///
/// Returns 0 when no stats manager is attached or the counter does not exist.
pub fn read_and_reset(
    manager: Option<&dyn StatsManager>,
    inbound_tag: &str,
    direction: TrafficDirection,
) -> i64 {
    let Some(manager) = manager else {
        return 0;
    };
    match manager.counter(&inbound_traffic_counter(inbound_tag, direction)) {
        Some(counter) => counter.set(0),
        None => 0,
    }
}

/// Host-facing variant taking the direction as `uplink` or `downlink`.
/// Any other direction reads 0.
pub fn query(manager: Option<&dyn StatsManager>, inbound_tag: &str, direction: &str) -> i64 {
    match direction.parse::<TrafficDirection>() {
        Ok(direction) => read_and_reset(manager, inbound_tag, direction),
        Err(e) => {
            debug!("Counter query for {}: {}", inbound_tag, e);
            0
        }
    }
}
