//! Caller-side proxies mirroring the service objects.
//!
//! A [`Model`] builds its graph locally and only contacts the service at `finish`. Every proxy
//! that owns a service handle sends a best-effort `Release` when dropped.

mod compilation;
mod execution;
mod model;

use crate::config::DEFAULT_MAX_MEMORY_BYTES;
use crate::graph::ModelBuilder;
use crate::ipc::Connection;

pub use compilation::Compilation;
pub use execution::Execution;
pub use model::Model;

/// Entry point for callers: one per connection.
#[derive(Debug, Clone)]
pub struct NeuralNetworkContext {
    connection: Connection,
    memory_limit: usize,
}

impl NeuralNetworkContext {
    pub fn connect(connection: Connection) -> Self {
        Self {
            connection,
            memory_limit: DEFAULT_MAX_MEMORY_BYTES,
        }
    }

    /// Caps the constant blob a model built through this context may allocate.
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn create_model(&self) -> Model {
        Model::new(
            self.connection.clone(),
            ModelBuilder::with_memory_limit(self.memory_limit),
        )
    }
}
