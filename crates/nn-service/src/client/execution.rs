use tracing::{debug, trace};

use crate::error::{ServiceError, ServiceResult};
use crate::graph::describe_values;
use crate::ipc::{Connection, ExecutionInitParams, ObjectHandle, Request};
use crate::memory::{OperandLayout, SharedBufferMapping};
use crate::service::ExecutionState;

/// Caller proxy for one single-shot execution.
///
/// Inputs are written straight into the shared execution region through the published layout;
/// outputs are read back from it once compute completes.
#[derive(Debug)]
pub struct Execution {
    connection: Connection,
    params: ExecutionInitParams,
    inputs: Vec<SharedBufferMapping>,
    outputs: Vec<SharedBufferMapping>,
    bound: Vec<bool>,
    state: ExecutionState,
}

fn map_all(
    params: &ExecutionInitParams,
    layouts: &[OperandLayout],
) -> ServiceResult<Vec<SharedBufferMapping>> {
    layouts
        .iter()
        .map(|layout| params.memory.map(layout.offset, layout.length))
        .collect()
}

impl Execution {
    pub(crate) fn new(connection: Connection, params: ExecutionInitParams) -> ServiceResult<Self> {
        let mapped = map_all(&params, &params.inputs)
            .and_then(|inputs| Ok((inputs, map_all(&params, &params.outputs)?)));
        let (inputs, outputs) = match mapped {
            Ok(mapped) => mapped,
            Err(err) => {
                connection.release(params.handle);
                return Err(err);
            }
        };
        Ok(Self {
            bound: vec![false; inputs.len()],
            connection,
            params,
            inputs,
            outputs,
            state: ExecutionState::Ready,
        })
    }

    pub fn handle(&self) -> ObjectHandle {
        self.params.handle
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn input_count(&self) -> usize {
        self.params.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.params.outputs.len()
    }

    pub fn input_layout(&self, index: u32) -> ServiceResult<&OperandLayout> {
        self.params.inputs.get(index as usize).ok_or_else(|| {
            ServiceError::bad_index(
                index,
                format!("execution has {} inputs", self.params.inputs.len()),
            )
        })
    }

    pub fn output_layout(&self, index: u32) -> ServiceResult<&OperandLayout> {
        self.params.outputs.get(index as usize).ok_or_else(|| {
            ServiceError::bad_index(
                index,
                format!("execution has {} outputs", self.params.outputs.len()),
            )
        })
    }

    /// Writes input `index`. `data` must be exactly the operand's size. May be repeated before
    /// `start_compute`; the last write wins.
    pub fn set_input(&mut self, index: u32, data: &[u8]) -> ServiceResult<()> {
        if self.state != ExecutionState::Ready {
            return Err(ServiceError::invalid_state(format!(
                "cannot bind inputs while the execution is {:?}",
                self.state
            )));
        }
        let layout = self.input_layout(index)?;
        if data.len() != layout.length {
            return Err(ServiceError::bad_data(format!(
                "input {index} needs {} bytes but {} were supplied",
                layout.length,
                data.len()
            )));
        }
        trace!(
            execution = %self.params.handle,
            index,
            values = %describe_values(layout.operand_type, data),
            "set_input"
        );
        self.inputs[index as usize].write(data)?;
        self.bound[index as usize] = true;
        Ok(())
    }

    /// Runs the single compute pass and waits for the service to report completion.
    pub async fn start_compute(&mut self) -> ServiceResult<()> {
        if self.state != ExecutionState::Ready {
            return Err(ServiceError::invalid_state(format!(
                "execution {} already ran ({:?})",
                self.params.handle, self.state
            )));
        }
        if let Some(missing) = self.bound.iter().position(|bound| !bound) {
            return Err(ServiceError::NotReady(format!(
                "input {missing} of execution {} is not bound",
                self.params.handle
            )));
        }
        self.state = ExecutionState::Computing;
        debug!(execution = %self.params.handle, "start compute");
        let result = self
            .connection
            .call(Request::StartCompute {
                execution: self.params.handle,
            })
            .await;
        self.state = match result {
            Ok(_) => ExecutionState::Completed,
            Err(_) => ExecutionState::Failed,
        };
        result.map(|_| ())
    }

    fn completed_output(&self, index: u32) -> ServiceResult<&SharedBufferMapping> {
        self.output_layout(index)?;
        if self.state != ExecutionState::Completed {
            return Err(ServiceError::invalid_state(format!(
                "outputs are unavailable while the execution is {:?}",
                self.state
            )));
        }
        Ok(&self.outputs[index as usize])
    }

    pub fn read_output(&self, index: u32) -> ServiceResult<Vec<u8>> {
        Ok(self.completed_output(index)?.read_to_vec())
    }

    /// Copies output `index` into `dst`, which must be exactly the operand's size.
    pub fn read_output_into(&self, index: u32, dst: &mut [u8]) -> ServiceResult<()> {
        self.completed_output(index)?.read_into(dst)
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.connection.release(self.params.handle);
    }
}
