pub mod reference;

use std::sync::Arc;

use nn_service::{BackendRegistry, ReferenceMode};

pub use reference::ReferenceBackend;

/// Name the reference backend is registered under.
pub const BACKEND_NAME: &str = "reference";
/// Lowest built-in priority: `Auto` only lands here when nothing better probes successfully.
pub const PRIORITY: i32 = 0;

/// Registers the reference backend with `registry`.
pub fn register_reference_backend(registry: &mut BackendRegistry, mode: ReferenceMode) {
    registry.register(BACKEND_NAME, PRIORITY, move || {
        Ok(Arc::new(ReferenceBackend::new(mode)))
    });
}
