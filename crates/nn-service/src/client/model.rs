use tracing::debug;

use crate::client::Compilation;
use crate::error::{ServiceError, ServiceResult};
use crate::graph::{ModelBuilder, OperandType, OperationType};
use crate::ipc::{Connection, ObjectHandle, Request, Response};

/// Caller proxy for a model under construction.
#[derive(Debug)]
pub struct Model {
    connection: Connection,
    builder: ModelBuilder,
    handle: Option<ObjectHandle>,
    remote_finished: bool,
}

impl Model {
    pub(crate) fn new(connection: Connection, builder: ModelBuilder) -> Self {
        Self {
            connection,
            builder,
            handle: None,
            remote_finished: false,
        }
    }

    pub fn builder(&self) -> &ModelBuilder {
        &self.builder
    }

    /// Service handle, assigned during `finish`.
    pub fn handle(&self) -> Option<ObjectHandle> {
        self.handle
    }

    pub fn add_operand(
        &mut self,
        operand_type: OperandType,
        dimensions: &[u32],
        scale: f32,
        zero_point: i32,
    ) -> ServiceResult<u32> {
        self.builder
            .add_operand(operand_type, dimensions, scale, zero_point)
    }

    pub fn set_operand_value(&mut self, index: u32, data: &[u8]) -> ServiceResult<()> {
        self.builder.set_operand_value(index, data)
    }

    pub fn add_operation(
        &mut self,
        operation_type: OperationType,
        inputs: &[u32],
        outputs: &[u32],
    ) -> ServiceResult<()> {
        self.builder.add_operation(operation_type, inputs, outputs)
    }

    pub fn identify_inputs_and_outputs(
        &mut self,
        inputs: &[u32],
        outputs: &[u32],
    ) -> ServiceResult<()> {
        self.builder.identify_inputs_and_outputs(inputs, outputs)
    }

    /// Creates the service model and hands it the frozen graph.
    ///
    /// The local builder is finished only once the service accepts the graph, so a failed
    /// round trip can be retried.
    pub async fn finish(&mut self) -> ServiceResult<()> {
        let graph = self.builder.freeze()?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => match self.connection.call(Request::CreateModel).await? {
                Response::Model(handle) => {
                    self.handle = Some(handle);
                    handle
                }
                other => {
                    return Err(ServiceError::invalid_state(format!(
                        "CreateModel answered with {other:?}"
                    )))
                }
            },
        };
        debug!(model = %handle, "sending frozen graph");
        self.connection
            .call(Request::FinishModel {
                model: handle,
                graph: graph.clone(),
            })
            .await?;
        self.builder.commit(graph);
        self.remote_finished = true;
        Ok(())
    }

    pub async fn create_compilation(&self) -> ServiceResult<Compilation> {
        let model = match self.handle {
            Some(handle) if self.remote_finished => handle,
            _ => {
                return Err(ServiceError::invalid_state(
                    "model must be finished before creating a compilation",
                ))
            }
        };
        match self
            .connection
            .call(Request::CreateCompilation { model })
            .await?
        {
            Response::Compilation(handle) => Ok(Compilation::new(self.connection.clone(), handle)),
            other => Err(ServiceError::invalid_state(format!(
                "Model.CreateCompilation answered with {other:?}"
            ))),
        }
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.connection.release(handle);
        }
    }
}
