//! Packet-capture helper supervision
//!
//! The helper process reads packets from the tunnel interface and feeds them
//! into the engine's local proxy. It is launched and kept alive by a
//! [`Supervisor`]; [`Escort`] is the process-backed implementation.

pub mod error;
pub mod escort;

pub use error::{EscortError, Result};
pub use escort::{Escort, EscortConfig, FdCallback, ProcessSpec, Supervisor};
