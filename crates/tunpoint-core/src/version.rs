//! Version reporting

use tunpoint_engine::Engine;

/// Version of the host binding surface
pub const BINDING_VERSION: i32 = 23;

pub fn check_version() -> i32 {
    BINDING_VERSION
}

/// Binding and engine versions, e.g. `Tunpoint V23, Core V1.8.4`
pub fn check_version_extended(engine: &dyn Engine) -> String {
    format!("Tunpoint V{}, Core V{}", check_version(), engine.version())
}
