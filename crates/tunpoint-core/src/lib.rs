//! Tunpoint control plane
//!
//! Brings a proxy-forwarding engine and its packet-capture helper up and down
//! on behalf of a host VPN service, exactly one run at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Host VPN service                         │
//! │   (HostCallbacks: setup / prepare / protect / ...)       │
//! └───────────────┬──────────────────────────────────────────┘
//!                 │ start / stop / query
//!                 ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  LifecycleController                                     │
//! │   ├─ ProtectedDialer + resolution race (watcher)         │
//! │   ├─ stats facade (read-and-reset counters)              │
//! │   └─ LatencyProbe (HTTP 204 through the engine)          │
//! └───────┬───────────────────────────────┬──────────────────┘
//!         ▼                               ▼
//!   Engine / EngineInstance         Supervisor (helper escort)
//! ```

pub mod addressing;
pub mod assets;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod dialer;
pub mod error;
pub mod host;
pub mod logging;
pub mod point;
pub mod probe;
pub mod race;
pub mod stats;
pub mod version;

pub use assets::{open_asset, AssetConfig, AssetEnv};
pub use cancel::CancelSignal;
pub use config::ControllerConfig;
pub use controller::{test_config, LifecycleController, RunRequest};
pub use dialer::{ProtectedDialer, ResolveOutcome, ResolveSettings, Resolver, SystemResolver};
pub use error::{Error, ProbeError, Result};
pub use host::HostCallbacks;
pub use point::TunnelPoint;
pub use probe::LatencyProbe;
pub use version::{check_version, check_version_extended, BINDING_VERSION};
