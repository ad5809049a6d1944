//! Accelerator backend for the neural network service.
//!
//! Compiling a graph replays it into an [`AcceleratorDriver`] in dependency order; each
//! compute creates a native execution and blocks on it. [`LoopbackDriver`] stands in for
//! hardware on hosts without a device.

pub mod backend;
pub mod driver;
pub mod loopback;

use std::sync::Arc;

use nn_service::backend::BackendError;
use nn_service::BackendRegistry;
use tracing::debug;

pub use backend::AcceleratorBackend;
pub use driver::{status, AcceleratorDriver, DriverError, DriverResult};
pub use loopback::{DriverCall, DriverJournal, LoopbackDriver};

/// Name the accelerator backend is registered under.
pub const BACKEND_NAME: &str = "accelerator";
/// Ranked above the reference backend so `Auto` prefers real acceleration.
pub const PRIORITY: i32 = 100;

/// Registers an accelerator backend driving `driver`.
///
/// The constructor probes the driver first; a failed probe makes `Auto` selection skip it.
pub fn register_accelerator_backend<D>(registry: &mut BackendRegistry, driver: D)
where
    D: AcceleratorDriver + Clone,
{
    registry.register(BACKEND_NAME, PRIORITY, move || {
        driver.probe().map_err(|err| {
            debug!(driver = driver.driver_name(), error = %err, "accelerator probe failed");
            BackendError::from(err)
        })?;
        Ok(Arc::new(AcceleratorBackend::new(BACKEND_NAME, driver.clone())))
    });
}

/// Registers the accelerator backend on top of a default [`LoopbackDriver`].
pub fn register_loopback_backend(registry: &mut BackendRegistry) {
    register_accelerator_backend(registry, LoopbackDriver::new());
}
