//! Native acceleration API seam.
//!
//! Mirrors the shape of a C-style neural network driver: a model is created and populated
//! operand by operand, compiled with a preference, and executed through per-run execution
//! objects that start a compute and block on its completion event. Native objects are
//! associated types; dropping one frees it.

use nn_service::backend::{BackendError, Preference};
use nn_service::graph::{Operand, OperationType};
use thiserror::Error;

/// Status codes returned by driver calls.
pub mod status {
    pub const NO_ERROR: i32 = 0;
    pub const OUT_OF_MEMORY: i32 = 1;
    pub const INCOMPLETE: i32 = 2;
    pub const UNEXPECTED_NULL: i32 = 3;
    pub const BAD_DATA: i32 = 4;
    pub const OP_FAILED: i32 = 5;
    pub const BAD_STATE: i32 = 6;
    pub const UNMAPPABLE: i32 = 7;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{call} returned status {status}: {message}")]
pub struct DriverError {
    pub call: &'static str,
    pub status: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(call: &'static str, status: i32, message: impl Into<String>) -> Self {
        Self {
            call,
            status,
            message: message.into(),
        }
    }
}

impl From<DriverError> for BackendError {
    fn from(err: DriverError) -> Self {
        match err.status {
            status::OUT_OF_MEMORY => BackendError::OutOfMemory(err.to_string()),
            status::BAD_DATA => BackendError::BadData(err.to_string()),
            status => BackendError::driver(status, format!("{}: {}", err.call, err.message)),
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

pub trait AcceleratorDriver: Send + Sync + 'static {
    type Model: Send + Sync + 'static;
    type Compilation: Send + Sync + 'static;
    type Execution: Send + 'static;

    fn driver_name(&self) -> &str;

    /// Capability check run when the backend is selected.
    fn probe(&self) -> DriverResult<()>;

    fn supports_preference(&self, preference: Preference) -> bool;

    fn supports_operation(&self, operation_type: OperationType) -> bool;

    fn create_model(&self) -> DriverResult<Self::Model>;

    /// Appends an operand; the driver assigns indices in call order.
    fn add_operand(&self, model: &mut Self::Model, operand: &Operand) -> DriverResult<()>;

    fn set_operand_value(&self, model: &mut Self::Model, index: u32, data: &[u8])
        -> DriverResult<()>;

    fn add_operation(
        &self,
        model: &mut Self::Model,
        operation_type: OperationType,
        inputs: &[u32],
        outputs: &[u32],
    ) -> DriverResult<()>;

    fn identify_inputs_and_outputs(
        &self,
        model: &mut Self::Model,
        inputs: &[u32],
        outputs: &[u32],
    ) -> DriverResult<()>;

    fn finish_model(&self, model: &mut Self::Model) -> DriverResult<()>;

    fn create_compilation(&self, model: &Self::Model) -> DriverResult<Self::Compilation>;

    fn set_preference(
        &self,
        compilation: &mut Self::Compilation,
        preference: Preference,
    ) -> DriverResult<()>;

    fn finish_compilation(&self, compilation: &mut Self::Compilation) -> DriverResult<()>;

    fn create_execution(&self, compilation: &Self::Compilation) -> DriverResult<Self::Execution>;

    /// Starts compute on `execution` and blocks until its completion event fires.
    ///
    /// Reads `inputs` and writes `outputs` in place; both follow the graph's declared order.
    fn compute(
        &self,
        execution: &mut Self::Execution,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
    ) -> DriverResult<()>;
}
