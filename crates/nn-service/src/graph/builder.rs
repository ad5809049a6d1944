use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::config::DEFAULT_MAX_MEMORY_BYTES;
use crate::error::{ServiceError, ServiceResult};
use crate::graph::{
    check_indices, describe_values, FrozenGraph, Operand, OperandType, OperandValueInfo,
    Operation, OperationType,
};
use crate::memory::{AccessMode, SharedBuffer};

/// Accumulates operands, operations and constant values until [`ModelBuilder::finish`].
///
/// The builder is either unfinished (every mutation allowed) or finished (every mutation fails
/// with [`ServiceError::InvalidState`]). There is no transition back.
#[derive(Debug)]
pub struct ModelBuilder {
    operands: Vec<Operand>,
    operations: Vec<Operation>,
    staged_values: BTreeMap<u32, Vec<u8>>,
    inputs: Vec<u32>,
    outputs: Vec<u32>,
    memory_limit: usize,
    frozen: Option<FrozenGraph>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::with_memory_limit(DEFAULT_MAX_MEMORY_BYTES)
    }

    /// Caps the size of the constant blob allocated by `finish`.
    pub fn with_memory_limit(memory_limit: usize) -> Self {
        Self {
            operands: Vec::new(),
            operations: Vec::new(),
            staged_values: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            memory_limit,
            frozen: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn inputs(&self) -> &[u32] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[u32] {
        &self.outputs
    }

    /// The frozen graph, available once `finish` succeeded.
    pub fn frozen(&self) -> Option<&FrozenGraph> {
        self.frozen.as_ref()
    }

    fn ensure_unfinished(&self, call: &str) -> ServiceResult<()> {
        if self.is_finished() {
            return Err(ServiceError::invalid_state(format!(
                "{call}: model has been finished"
            )));
        }
        Ok(())
    }

    /// Appends an operand and returns its dense, insertion-ordered index.
    pub fn add_operand(
        &mut self,
        operand_type: OperandType,
        dimensions: &[u32],
        scale: f32,
        zero_point: i32,
    ) -> ServiceResult<u32> {
        self.ensure_unfinished("add_operand")?;
        let operand = Operand::new(operand_type, dimensions.iter().copied(), scale, zero_point);
        operand.validate()?;
        let index = u32::try_from(self.operands.len())
            .map_err(|_| ServiceError::ResourceExhausted("operand table is full".into()))?;
        debug!(
            index,
            ?operand_type,
            dimensions = ?dimensions,
            scale,
            zero_point,
            "add_operand"
        );
        self.operands.push(operand);
        Ok(index)
    }

    /// Stages a constant value for `index`. The length must equal the operand's required size.
    pub fn set_operand_value(&mut self, index: u32, data: &[u8]) -> ServiceResult<()> {
        self.ensure_unfinished("set_operand_value")?;
        let operand = self.operands.get(index as usize).ok_or_else(|| {
            ServiceError::bad_index(
                index,
                format!("set_operand_value: only {} operands exist", self.operands.len()),
            )
        })?;
        let required = operand.required_size();
        if data.len() != required {
            return Err(ServiceError::bad_data(format!(
                "operand {index} needs {required} bytes but {} were supplied",
                data.len()
            )));
        }
        debug!(index, length = data.len(), "set_operand_value");
        trace!(
            index,
            values = %describe_values(operand.operand_type, data),
            "set_operand_value payload"
        );
        self.staged_values.insert(index, data.to_vec());
        Ok(())
    }

    /// Appends an operation after checking every referenced operand exists.
    pub fn add_operation(
        &mut self,
        operation_type: OperationType,
        inputs: &[u32],
        outputs: &[u32],
    ) -> ServiceResult<()> {
        self.ensure_unfinished("add_operation")?;
        let operation = Operation::new(
            operation_type,
            inputs.iter().copied(),
            outputs.iter().copied(),
        );
        operation.validate(self.operands.len())?;
        debug!(?operation_type, ?inputs, ?outputs, "add_operation");
        self.operations.push(operation);
        Ok(())
    }

    /// Declares the externally bound operands. A later call replaces the declaration.
    pub fn identify_inputs_and_outputs(
        &mut self,
        inputs: &[u32],
        outputs: &[u32],
    ) -> ServiceResult<()> {
        self.ensure_unfinished("identify_inputs_and_outputs")?;
        check_indices(inputs, self.operands.len(), "graph input")?;
        check_indices(outputs, self.operands.len(), "graph output")?;
        debug!(?inputs, ?outputs, "identify_inputs_and_outputs");
        self.inputs = inputs.to_vec();
        self.outputs = outputs.to_vec();
        Ok(())
    }

    /// Freezes the graph and packs every staged constant into one shared blob.
    pub fn finish(&mut self) -> ServiceResult<&FrozenGraph> {
        let graph = self.freeze()?;
        Ok(self.commit(graph))
    }

    /// Builds the frozen graph without finishing the builder.
    ///
    /// The constant blob is handed out read-only; the builder keeps no writable handle to it.
    pub fn freeze(&self) -> ServiceResult<FrozenGraph> {
        self.ensure_unfinished("finish")?;

        let mut values = Vec::with_capacity(self.staged_values.len());
        let mut offset = 0usize;
        for (&index, data) in &self.staged_values {
            values.push(OperandValueInfo {
                index,
                offset,
                length: data.len(),
            });
            offset = offset.checked_add(data.len()).ok_or_else(|| {
                ServiceError::ResourceExhausted("constant blob size overflows".into())
            })?;
        }

        let constants = SharedBuffer::create(offset, self.memory_limit)?;
        for value in &values {
            constants
                .map(value.offset, value.length)?
                .write(&self.staged_values[&value.index])?;
        }

        let graph = FrozenGraph {
            operands: self.operands.clone(),
            operations: self.operations.clone(),
            values,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            constants: constants.clone_with_access(AccessMode::ReadOnly)?,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Finishes the builder with a graph produced by [`ModelBuilder::freeze`].
    pub fn commit(&mut self, graph: FrozenGraph) -> &FrozenGraph {
        debug!(
            operands = graph.operands.len(),
            operations = graph.operations.len(),
            constants = graph.values.len(),
            constant_bytes = graph.constants.len(),
            "finish"
        );
        self.staged_values.clear();
        self.frozen.insert(graph)
    }
}
