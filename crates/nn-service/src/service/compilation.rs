use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{CompiledGraph, GraphCompilerBackend, Preference};
use crate::error::{ServiceError, ServiceResult};
use crate::graph::FrozenGraph;
use crate::ipc::protocol::{ExecutionInitParams, ObjectHandle};
use crate::memory::{AccessMode, ExecutionLayout, ExecutionMemory, SharedBuffer};
use crate::service::execution::ExecutionImpl;

/// Service-side compilation: a private graph copy plus the backend artifact once finished.
pub struct CompilationImpl {
    handle: ObjectHandle,
    graph: FrozenGraph,
    backend: Arc<dyn GraphCompilerBackend>,
    compiled: Option<Arc<dyn CompiledGraph>>,
    memory_limit: usize,
}

impl fmt::Debug for CompilationImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationImpl")
            .field("handle", &self.handle)
            .field("backend", &self.backend.backend_name())
            .field("preference", &self.preference())
            .finish()
    }
}

impl CompilationImpl {
    pub fn new(
        handle: ObjectHandle,
        graph: FrozenGraph,
        backend: Arc<dyn GraphCompilerBackend>,
        memory_limit: usize,
    ) -> Self {
        Self {
            handle,
            graph,
            backend,
            compiled: None,
            memory_limit,
        }
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn graph(&self) -> &FrozenGraph {
        &self.graph
    }

    pub fn preference(&self) -> Option<Preference> {
        self.compiled.as_ref().map(|compiled| compiled.preference())
    }

    pub fn is_finished(&self) -> bool {
        self.compiled.is_some()
    }

    /// Compiles through the backend. A rejected preference leaves the compilation unfinished.
    pub fn finish(&mut self, preference: Preference) -> ServiceResult<()> {
        if self.compiled.is_some() {
            return Err(ServiceError::invalid_state(format!(
                "compilation {} has already been finished",
                self.handle
            )));
        }
        if !self.backend.supports_preference(preference) {
            warn!(
                compilation = %self.handle,
                backend = self.backend.backend_name(),
                %preference,
                "preference rejected"
            );
            return Err(ServiceError::unsupported(format!(
                "backend '{}' does not support the {preference} preference",
                self.backend.backend_name()
            )));
        }
        let compiled = self.backend.compile(&self.graph, preference)?;
        debug!(
            compilation = %self.handle,
            backend = self.backend.backend_name(),
            %preference,
            "compilation finished"
        );
        self.compiled = Some(Arc::from(compiled));
        Ok(())
    }

    /// Lays out and allocates a fresh execution region, then publishes its layout.
    pub fn create_execution(
        &self,
        handle: ObjectHandle,
    ) -> ServiceResult<(ExecutionImpl, ExecutionInitParams)> {
        let compiled = self.compiled.as_ref().ok_or_else(|| {
            ServiceError::invalid_state(format!(
                "compilation {} must be finished before creating an execution",
                self.handle
            ))
        })?;
        let layout = ExecutionLayout::for_graph(&self.graph)?;
        let buffer = SharedBuffer::create(layout.total_size(), self.memory_limit)?;
        let params = ExecutionInitParams {
            handle,
            inputs: layout.inputs.clone(),
            outputs: layout.outputs.clone(),
            memory: buffer.clone_with_access(AccessMode::ReadWrite)?,
        };
        debug!(
            compilation = %self.handle,
            execution = %handle,
            inputs = layout.inputs.len(),
            outputs = layout.outputs.len(),
            region_bytes = layout.total_size(),
            "execution created"
        );
        let memory = ExecutionMemory::new(layout, buffer)?;
        Ok((
            ExecutionImpl::new(handle, Arc::clone(compiled), memory),
            params,
        ))
    }
}
