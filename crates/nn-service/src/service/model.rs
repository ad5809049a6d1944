use std::sync::Arc;

use tracing::debug;

use crate::backend::GraphCompilerBackend;
use crate::error::{ServiceError, ServiceResult};
use crate::graph::FrozenGraph;
use crate::ipc::protocol::ObjectHandle;
use crate::memory::AccessMode;
use crate::service::compilation::CompilationImpl;

/// Service-side model: receives the frozen graph once and spawns compilations from it.
#[derive(Debug)]
pub struct ModelImpl {
    handle: ObjectHandle,
    graph: Option<FrozenGraph>,
}

impl ModelImpl {
    pub fn new(handle: ObjectHandle) -> Self {
        Self {
            handle,
            graph: None,
        }
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.graph.is_some()
    }

    pub fn graph(&self) -> Option<&FrozenGraph> {
        self.graph.as_ref()
    }

    /// Validates and stores the caller's graph. The constant blob is kept read-only.
    pub fn finish(&mut self, mut graph: FrozenGraph) -> ServiceResult<()> {
        if self.graph.is_some() {
            return Err(ServiceError::invalid_state(format!(
                "model {} has already been finished",
                self.handle
            )));
        }
        graph.validate()?;
        graph.constants = graph.constants.clone_with_access(AccessMode::ReadOnly)?;
        debug!(
            model = %self.handle,
            operands = graph.operands.len(),
            operations = graph.operations.len(),
            inputs = graph.inputs.len(),
            outputs = graph.outputs.len(),
            constant_bytes = graph.constants.len(),
            "model finished"
        );
        self.graph = Some(graph);
        Ok(())
    }

    /// Creates a compilation holding its own copy of the tables.
    pub fn create_compilation(
        &self,
        handle: ObjectHandle,
        backend: Arc<dyn GraphCompilerBackend>,
        memory_limit: usize,
    ) -> ServiceResult<CompilationImpl> {
        let graph = self.graph.as_ref().ok_or_else(|| {
            ServiceError::invalid_state(format!(
                "model {} must be finished before creating a compilation",
                self.handle
            ))
        })?;
        Ok(CompilationImpl::new(
            handle,
            graph.clone(),
            backend,
            memory_limit,
        ))
    }
}
