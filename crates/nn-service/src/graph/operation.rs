use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ServiceError, ServiceResult};

/// Operation kinds understood by the service. Their numeric semantics belong to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum OperationType {
    Add = 0,
    AveragePool2D,
    Concatenation,
    Conv2D,
    DepthwiseConv2D,
    DepthToSpace,
    Dequantize,
    EmbeddingLookup,
    Floor,
    FullyConnected,
    HashtableLookup,
    L2Normalization,
    L2Pool2D,
    LocalResponseNormalization,
    Logistic,
    LshProjection,
    Lstm,
    MaxPool2D,
    Mul,
    Relu,
    Relu1,
    Relu6,
    Reshape,
    ResizeBilinear,
    Rnn,
    Softmax,
    SpaceToDepth,
    Svdf,
    Tanh,
}

const OPERATION_TYPES: [OperationType; 29] = [
    OperationType::Add,
    OperationType::AveragePool2D,
    OperationType::Concatenation,
    OperationType::Conv2D,
    OperationType::DepthwiseConv2D,
    OperationType::DepthToSpace,
    OperationType::Dequantize,
    OperationType::EmbeddingLookup,
    OperationType::Floor,
    OperationType::FullyConnected,
    OperationType::HashtableLookup,
    OperationType::L2Normalization,
    OperationType::L2Pool2D,
    OperationType::LocalResponseNormalization,
    OperationType::Logistic,
    OperationType::LshProjection,
    OperationType::Lstm,
    OperationType::MaxPool2D,
    OperationType::Mul,
    OperationType::Relu,
    OperationType::Relu1,
    OperationType::Relu6,
    OperationType::Reshape,
    OperationType::ResizeBilinear,
    OperationType::Rnn,
    OperationType::Softmax,
    OperationType::SpaceToDepth,
    OperationType::Svdf,
    OperationType::Tanh,
];

impl OperationType {
    /// Stable wire code; matches the declaration order.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> ServiceResult<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| OPERATION_TYPES.get(idx).copied())
            .ok_or_else(|| ServiceError::unsupported(format!("unknown operation type code {code}")))
    }

    pub fn all() -> &'static [OperationType] {
        &OPERATION_TYPES
    }
}

/// Ordered operand indices consumed or produced by an operation.
pub type OperandIndices = SmallVec<[u32; 4]>;

/// Graph edge: consumes `inputs`, produces `outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_type: OperationType,
    pub inputs: OperandIndices,
    pub outputs: OperandIndices,
}

impl Operation {
    pub fn new(
        operation_type: OperationType,
        inputs: impl IntoIterator<Item = u32>,
        outputs: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            operation_type,
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
        }
    }

    /// Checks every referenced index against the current operand count.
    pub fn validate(&self, operand_count: usize) -> ServiceResult<()> {
        if self.outputs.is_empty() {
            return Err(ServiceError::bad_data(format!(
                "{:?} must produce at least one output",
                self.operation_type
            )));
        }
        check_indices(&self.inputs, operand_count, "operation input")?;
        check_indices(&self.outputs, operand_count, "operation output")
    }
}

pub(crate) fn check_indices(
    indices: &[u32],
    operand_count: usize,
    what: &str,
) -> ServiceResult<()> {
    for &index in indices {
        if index as usize >= operand_count {
            return Err(ServiceError::bad_index(
                index,
                format!("{what} references operand {index} but only {operand_count} exist"),
            ));
        }
    }
    Ok(())
}
