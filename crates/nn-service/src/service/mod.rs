//! Service-side objects and request dispatch.
//!
//! [`NeuralNetworkService`] owns the selected backend, the configuration and a table of live
//! model/compilation/execution objects keyed by [`ObjectHandle`]. Builder-phase requests are
//! answered inline; compute requests are handed back to the caller of
//! [`NeuralNetworkService::dispatch`] to run on a blocking worker.

mod compilation;
mod execution;
mod model;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{BackendRegistry, GraphCompilerBackend};
use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::protocol::{ObjectHandle, Request, Response};

pub use compilation::CompilationImpl;
pub use execution::{ExecutionImpl, ExecutionState};
pub use model::ModelImpl;

#[derive(Debug)]
enum ServiceObject {
    Model(ModelImpl),
    Compilation(CompilationImpl),
    Execution(Arc<ExecutionImpl>),
}

impl ServiceObject {
    fn kind(&self) -> &'static str {
        match self {
            ServiceObject::Model(_) => "model",
            ServiceObject::Compilation(_) => "compilation",
            ServiceObject::Execution(_) => "execution",
        }
    }
}

/// Outcome of dispatching one request.
#[derive(Debug)]
pub enum Dispatch {
    /// Handled inline; reply immediately.
    Reply(ServiceResult<Response>),
    /// Accepted compute; run [`ExecutionImpl::run_compute`] off the request loop and reply with
    /// its result.
    Compute(Arc<ExecutionImpl>),
}

pub struct NeuralNetworkService {
    config: ServiceConfig,
    backend: Arc<dyn GraphCompilerBackend>,
    objects: HashMap<ObjectHandle, ServiceObject>,
    next_handle: u64,
}

impl fmt::Debug for NeuralNetworkService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeuralNetworkService")
            .field("backend", &self.backend.backend_name())
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl NeuralNetworkService {
    pub fn new(config: ServiceConfig, backend: Arc<dyn GraphCompilerBackend>) -> Self {
        info!(
            backend = backend.backend_name(),
            max_memory_bytes = config.max_memory_bytes,
            "neural network service ready"
        );
        Self {
            config,
            backend,
            objects: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Builds a service on the backend `config.backend` selects from `registry`.
    pub fn from_registry(config: ServiceConfig, registry: &BackendRegistry) -> ServiceResult<Self> {
        let backend = registry.select(&config.backend)?;
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn GraphCompilerBackend> {
        &self.backend
    }

    /// Number of live objects in the handle table.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    fn allocate_handle(&mut self) -> ObjectHandle {
        let handle = ObjectHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn lookup(&self, handle: ObjectHandle) -> ServiceResult<&ServiceObject> {
        self.objects
            .get(&handle)
            .ok_or_else(|| ServiceError::bad_data(format!("unknown handle {handle}")))
    }

    fn model_mut(&mut self, handle: ObjectHandle) -> ServiceResult<&mut ModelImpl> {
        match self.objects.get_mut(&handle) {
            Some(ServiceObject::Model(model)) => Ok(model),
            Some(other) => Err(ServiceError::bad_data(format!(
                "handle {handle} is a {}, not a model",
                other.kind()
            ))),
            None => Err(ServiceError::bad_data(format!("unknown handle {handle}"))),
        }
    }

    fn compilation_mut(&mut self, handle: ObjectHandle) -> ServiceResult<&mut CompilationImpl> {
        match self.objects.get_mut(&handle) {
            Some(ServiceObject::Compilation(compilation)) => Ok(compilation),
            Some(other) => Err(ServiceError::bad_data(format!(
                "handle {handle} is a {}, not a compilation",
                other.kind()
            ))),
            None => Err(ServiceError::bad_data(format!("unknown handle {handle}"))),
        }
    }

    /// Handles one request. Only `StartCompute` may return [`Dispatch::Compute`].
    pub fn dispatch(&mut self, request: Request) -> Dispatch {
        let name = request.name();
        let result = match request {
            Request::CreateModel => {
                let handle = self.allocate_handle();
                self.objects
                    .insert(handle, ServiceObject::Model(ModelImpl::new(handle)));
                debug!(model = %handle, "model created");
                Ok(Response::Model(handle))
            }
            Request::FinishModel { model, graph } => self
                .model_mut(model)
                .and_then(|model| model.finish(graph))
                .map(|()| Response::Done),
            Request::CreateCompilation { model } => self.create_compilation(model),
            Request::FinishCompilation {
                compilation,
                preference,
            } => self
                .compilation_mut(compilation)
                .and_then(|compilation| compilation.finish(preference))
                .map(|()| Response::Done),
            Request::CreateExecution { compilation } => self.create_execution(compilation),
            Request::StartCompute { execution } => match self.lookup(execution) {
                Ok(ServiceObject::Execution(execution)) => {
                    let execution = Arc::clone(execution);
                    match execution.begin_compute() {
                        Ok(()) => {
                            debug!(execution = %execution.handle(), "compute accepted");
                            return Dispatch::Compute(execution);
                        }
                        Err(err) => Err(err),
                    }
                }
                Ok(other) => Err(ServiceError::bad_data(format!(
                    "handle {execution} is a {}, not an execution",
                    other.kind()
                ))),
                Err(err) => Err(err),
            },
            Request::Release { handle } => self.release(handle).map(|()| Response::Done),
        };
        if let Err(err) = &result {
            warn!(request = name, error = %err, "request rejected");
        }
        Dispatch::Reply(result)
    }

    fn create_compilation(&mut self, model: ObjectHandle) -> ServiceResult<Response> {
        let handle = ObjectHandle(self.next_handle);
        let compilation = match self.lookup(model)? {
            ServiceObject::Model(model) => model.create_compilation(
                handle,
                Arc::clone(&self.backend),
                self.config.max_memory_bytes,
            )?,
            other => {
                return Err(ServiceError::bad_data(format!(
                    "handle {model} is a {}, not a model",
                    other.kind()
                )))
            }
        };
        self.next_handle += 1;
        self.objects
            .insert(handle, ServiceObject::Compilation(compilation));
        debug!(%model, compilation = %handle, "compilation created");
        Ok(Response::Compilation(handle))
    }

    fn create_execution(&mut self, compilation: ObjectHandle) -> ServiceResult<Response> {
        let handle = ObjectHandle(self.next_handle);
        let (execution, params) = match self.lookup(compilation)? {
            ServiceObject::Compilation(compilation) => compilation.create_execution(handle)?,
            other => {
                return Err(ServiceError::bad_data(format!(
                    "handle {compilation} is a {}, not a compilation",
                    other.kind()
                )))
            }
        };
        self.next_handle += 1;
        self.objects
            .insert(handle, ServiceObject::Execution(Arc::new(execution)));
        Ok(Response::Execution(params))
    }

    /// Drops the object behind `handle`, freeing its memory once no compute holds it.
    pub fn release(&mut self, handle: ObjectHandle) -> ServiceResult<()> {
        let object = self
            .objects
            .remove(&handle)
            .ok_or_else(|| ServiceError::bad_data(format!("unknown handle {handle}")))?;
        debug!(%handle, kind = object.kind(), "object released");
        Ok(())
    }
}
