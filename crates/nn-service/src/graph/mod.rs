//! Operand/operation tables and the frozen graph handed from the caller to the service.

pub mod builder;
mod operand;
mod operation;
pub mod topology;

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::memory::{SharedBuffer, SharedBufferMapping};

pub use builder::ModelBuilder;
pub use operand::{describe_values, Dimensions, Operand, OperandType};
pub use operation::{OperandIndices, Operation, OperationType};

pub(crate) use operation::check_indices;

/// Location of one constant operand's value inside the constant blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandValueInfo {
    pub index: u32,
    pub offset: usize,
    pub length: usize,
}

/// Immutable graph: operand/operation tables, constant values and graph inputs/outputs.
#[derive(Debug, Clone)]
pub struct FrozenGraph {
    pub operands: Vec<Operand>,
    pub operations: Vec<Operation>,
    pub values: Vec<OperandValueInfo>,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
    pub constants: SharedBuffer,
}

/// Serializable view of a graph's tables, without the constant payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    pub operands: Vec<Operand>,
    pub operations: Vec<Operation>,
    pub values: Vec<OperandValueInfo>,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

impl GraphDescriptor {
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(src: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(src)
    }
}

impl FrozenGraph {
    pub fn operand(&self, index: u32) -> ServiceResult<&Operand> {
        self.operands.get(index as usize).ok_or_else(|| {
            ServiceError::bad_index(
                index,
                format!("graph has {} operands", self.operands.len()),
            )
        })
    }

    pub fn value_info(&self, index: u32) -> Option<&OperandValueInfo> {
        self.values.iter().find(|value| value.index == index)
    }

    pub fn is_constant(&self, index: u32) -> bool {
        self.value_info(index).is_some()
    }

    /// Read-only view of a constant operand's bytes.
    pub fn constant_mapping(&self, value: &OperandValueInfo) -> ServiceResult<SharedBufferMapping> {
        self.constants.map(value.offset, value.length)
    }

    pub fn descriptor(&self) -> GraphDescriptor {
        GraphDescriptor {
            operands: self.operands.clone(),
            operations: self.operations.clone(),
            values: self.values.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }

    /// Re-checks every structural invariant; the service never trusts the caller's builder.
    pub fn validate(&self) -> ServiceResult<()> {
        let operand_count = self.operands.len();
        for operand in &self.operands {
            operand.validate()?;
        }
        for operation in &self.operations {
            operation.validate(operand_count)?;
        }
        check_indices(&self.inputs, operand_count, "graph input")?;
        check_indices(&self.outputs, operand_count, "graph output")?;
        if self.outputs.is_empty() {
            return Err(ServiceError::bad_data("graph declares no outputs"));
        }

        let mut seen = vec![false; operand_count];
        for value in &self.values {
            let operand = self.operand(value.index)?;
            if std::mem::replace(&mut seen[value.index as usize], true) {
                return Err(ServiceError::bad_data(format!(
                    "operand {} has more than one constant value",
                    value.index
                )));
            }
            if value.length != operand.required_size() {
                return Err(ServiceError::bad_data(format!(
                    "constant for operand {} is {} bytes but the operand needs {}",
                    value.index,
                    value.length,
                    operand.required_size()
                )));
            }
            let end = value.offset.checked_add(value.length);
            if end.map_or(true, |end| end > self.constants.len()) {
                return Err(ServiceError::bad_data(format!(
                    "constant for operand {} lies outside the {} byte blob",
                    value.index,
                    self.constants.len()
                )));
            }
            if self.inputs.contains(&value.index) || self.outputs.contains(&value.index) {
                return Err(ServiceError::bad_data(format!(
                    "operand {} is both a constant and a graph input/output",
                    value.index
                )));
            }
        }
        Ok(())
    }
}
