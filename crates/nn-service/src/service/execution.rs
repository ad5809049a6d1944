use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::CompiledGraph;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::protocol::ObjectHandle;
use crate::memory::ExecutionMemory;

/// Single-shot lifecycle of an execution instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Ready,
    Computing,
    Completed,
    Failed,
}

/// Service-side execution: one compute pass over its own region.
pub struct ExecutionImpl {
    handle: ObjectHandle,
    compiled: Arc<dyn CompiledGraph>,
    memory: ExecutionMemory,
    state: Mutex<ExecutionState>,
}

impl fmt::Debug for ExecutionImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionImpl")
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("memory", &self.memory)
            .finish()
    }
}

impl ExecutionImpl {
    pub fn new(
        handle: ObjectHandle,
        compiled: Arc<dyn CompiledGraph>,
        memory: ExecutionMemory,
    ) -> Self {
        Self {
            handle,
            compiled,
            memory,
            state: Mutex::new(ExecutionState::Ready),
        }
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.lock()
    }

    pub fn memory(&self) -> &ExecutionMemory {
        &self.memory
    }

    /// `Ready -> Computing`. Any other starting state is rejected.
    pub fn begin_compute(&self) -> ServiceResult<()> {
        let mut state = self.state.lock();
        if *state != ExecutionState::Ready {
            return Err(ServiceError::invalid_state(format!(
                "execution {} cannot start compute while {:?}",
                self.handle, *state
            )));
        }
        *state = ExecutionState::Computing;
        Ok(())
    }

    /// Runs the backend pass; blocks. Must follow a successful [`ExecutionImpl::begin_compute`].
    pub fn run_compute(&self) -> ServiceResult<()> {
        if self.state() != ExecutionState::Computing {
            return Err(ServiceError::invalid_state(format!(
                "execution {} is not computing",
                self.handle
            )));
        }
        let result = self
            .compiled
            .compute(&self.memory)
            .map_err(ServiceError::from);
        match &result {
            Ok(()) => {
                debug!(execution = %self.handle, "compute completed");
                *self.state.lock() = ExecutionState::Completed;
            }
            Err(err) => {
                warn!(execution = %self.handle, error = %err, "compute failed");
                *self.state.lock() = ExecutionState::Failed;
            }
        }
        result
    }

    /// Marks a pass that never reported back (worker panic) as failed.
    pub fn mark_failed(&self) {
        *self.state.lock() = ExecutionState::Failed;
    }

    /// Convenience for synchronous callers: begin and run in one step.
    pub fn start_compute(&self) -> ServiceResult<()> {
        self.begin_compute()?;
        self.run_compute()
    }
}
