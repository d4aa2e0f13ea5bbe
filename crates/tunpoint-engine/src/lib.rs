//! Engine contracts for the tunpoint control plane
//!
//! The proxy-forwarding engine itself lives outside this workspace. This crate
//! describes what the control plane needs from it: a factory that builds an
//! instance from parsed configuration, the instance lifecycle, a dial path
//! through the engine, and named traffic counters.

pub mod config;
pub mod destination;
pub mod dialer;
pub mod engine;
pub mod error;
pub mod stats;

pub use config::{EngineConfig, InboundConfig, LogConfig, OutboundConfig};
pub use destination::{Address, Destination, Network};
pub use dialer::{ProtectedConn, SystemDialer};
pub use engine::{Engine, EngineInstance, EngineStream};
pub use error::{EngineError, Result};
pub use stats::{inbound_traffic_counter, Counter, CounterRegistry, StatsManager, TrafficDirection};
