//! Deterministic driver for hosts without acceleration hardware.
//!
//! "Executes" by copying input `k` into output `k`, and records every driver call in a
//! [`DriverJournal`] so tests can observe replay order and object release.

use std::collections::HashSet;
use std::sync::Arc;

use nn_service::backend::Preference;
use nn_service::graph::{Operand, OperationType};
use parking_lot::Mutex;

use crate::driver::{status, AcceleratorDriver, DriverError, DriverResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    CreateModel,
    AddOperand(u32),
    SetOperandValue { index: u32, length: usize },
    AddOperation(OperationType),
    IdentifyInputsAndOutputs { inputs: Vec<u32>, outputs: Vec<u32> },
    FinishModel,
    FreeModel,
    CreateCompilation,
    SetPreference(Preference),
    FinishCompilation,
    FreeCompilation,
    CreateExecution,
    Compute,
    FreeExecution,
}

/// Shared, append-only log of driver calls.
#[derive(Debug, Clone, Default)]
pub struct DriverJournal {
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl DriverJournal {
    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &DriverCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[derive(Debug, Clone)]
pub struct LoopbackDriver {
    preferences: Vec<Preference>,
    operations: Option<Vec<OperationType>>,
    available: bool,
    compute_status: Option<i32>,
    journal: DriverJournal,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDriver {
    /// Supports every preference and operation type.
    pub fn new() -> Self {
        Self {
            preferences: Preference::ALL.to_vec(),
            operations: None,
            available: true,
            compute_status: None,
            journal: DriverJournal::default(),
        }
    }

    pub fn with_preferences(mut self, preferences: &[Preference]) -> Self {
        self.preferences = preferences.to_vec();
        self
    }

    pub fn with_operations(mut self, operations: &[OperationType]) -> Self {
        self.operations = Some(operations.to_vec());
        self
    }

    /// Makes `probe` fail, as on a host whose device is missing.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Makes every compute fail with `status`.
    pub fn with_compute_status(mut self, status: i32) -> Self {
        self.compute_status = Some(status);
        self
    }

    pub fn journal(&self) -> &DriverJournal {
        &self.journal
    }
}

pub struct LoopbackModel {
    journal: DriverJournal,
    operands: Vec<Operand>,
    values: HashSet<u32>,
    operations: Vec<(Vec<u32>, Vec<u32>)>,
    inputs: Vec<u32>,
    outputs: Vec<u32>,
    finished: bool,
}

impl Drop for LoopbackModel {
    fn drop(&mut self) {
        self.journal.record(DriverCall::FreeModel);
    }
}

impl LoopbackModel {
    fn ensure_open(&self, call: &'static str) -> DriverResult<()> {
        if self.finished {
            return Err(DriverError::new(call, status::BAD_STATE, "model is finished"));
        }
        Ok(())
    }

    fn check_index(&self, call: &'static str, index: u32) -> DriverResult<&Operand> {
        self.operands.get(index as usize).ok_or_else(|| {
            DriverError::new(
                call,
                status::BAD_DATA,
                format!("operand {index} out of range ({})", self.operands.len()),
            )
        })
    }

    fn sizes(&self, indices: &[u32]) -> Vec<usize> {
        indices
            .iter()
            .map(|&index| self.operands[index as usize].required_size())
            .collect()
    }
}

pub struct LoopbackCompilation {
    journal: DriverJournal,
    input_sizes: Vec<usize>,
    output_sizes: Vec<usize>,
    preference: Preference,
    finished: bool,
}

impl Drop for LoopbackCompilation {
    fn drop(&mut self) {
        self.journal.record(DriverCall::FreeCompilation);
    }
}

pub struct LoopbackExecution {
    journal: DriverJournal,
    input_sizes: Vec<usize>,
    output_sizes: Vec<usize>,
}

impl Drop for LoopbackExecution {
    fn drop(&mut self) {
        self.journal.record(DriverCall::FreeExecution);
    }
}

impl AcceleratorDriver for LoopbackDriver {
    type Model = LoopbackModel;
    type Compilation = LoopbackCompilation;
    type Execution = LoopbackExecution;

    fn driver_name(&self) -> &str {
        "loopback"
    }

    fn probe(&self) -> DriverResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(DriverError::new(
                "probe",
                status::UNEXPECTED_NULL,
                "no accelerator device",
            ))
        }
    }

    fn supports_preference(&self, preference: Preference) -> bool {
        self.preferences.contains(&preference)
    }

    fn supports_operation(&self, operation_type: OperationType) -> bool {
        self.operations
            .as_ref()
            .map_or(true, |supported| supported.contains(&operation_type))
    }

    fn create_model(&self) -> DriverResult<LoopbackModel> {
        self.journal.record(DriverCall::CreateModel);
        Ok(LoopbackModel {
            journal: self.journal.clone(),
            operands: Vec::new(),
            values: HashSet::new(),
            operations: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            finished: false,
        })
    }

    fn add_operand(&self, model: &mut LoopbackModel, operand: &Operand) -> DriverResult<()> {
        model.ensure_open("add_operand")?;
        self.journal
            .record(DriverCall::AddOperand(model.operands.len() as u32));
        model.operands.push(operand.clone());
        Ok(())
    }

    fn set_operand_value(
        &self,
        model: &mut LoopbackModel,
        index: u32,
        data: &[u8],
    ) -> DriverResult<()> {
        model.ensure_open("set_operand_value")?;
        let required = model.check_index("set_operand_value", index)?.required_size();
        if data.len() != required {
            return Err(DriverError::new(
                "set_operand_value",
                status::BAD_DATA,
                format!("operand {index} needs {required} bytes, got {}", data.len()),
            ));
        }
        self.journal.record(DriverCall::SetOperandValue {
            index,
            length: data.len(),
        });
        model.values.insert(index);
        Ok(())
    }

    fn add_operation(
        &self,
        model: &mut LoopbackModel,
        operation_type: OperationType,
        inputs: &[u32],
        outputs: &[u32],
    ) -> DriverResult<()> {
        model.ensure_open("add_operation")?;
        for &index in inputs.iter().chain(outputs) {
            model.check_index("add_operation", index)?;
        }
        self.journal.record(DriverCall::AddOperation(operation_type));
        model.operations.push((inputs.to_vec(), outputs.to_vec()));
        Ok(())
    }

    fn identify_inputs_and_outputs(
        &self,
        model: &mut LoopbackModel,
        inputs: &[u32],
        outputs: &[u32],
    ) -> DriverResult<()> {
        model.ensure_open("identify_inputs_and_outputs")?;
        for &index in inputs.iter().chain(outputs) {
            model.check_index("identify_inputs_and_outputs", index)?;
        }
        self.journal.record(DriverCall::IdentifyInputsAndOutputs {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
        model.inputs = inputs.to_vec();
        model.outputs = outputs.to_vec();
        Ok(())
    }

    /// Requires operations in dependency order, like a driver that executes them as listed.
    fn finish_model(&self, model: &mut LoopbackModel) -> DriverResult<()> {
        model.ensure_open("finish_model")?;
        let mut written: HashSet<u32> = model.inputs.iter().copied().collect();
        written.extend(model.values.iter().copied());
        for (position, (inputs, outputs)) in model.operations.iter().enumerate() {
            if let Some(missing) = inputs.iter().find(|index| !written.contains(index)) {
                return Err(DriverError::new(
                    "finish_model",
                    status::BAD_DATA,
                    format!("operation {position} reads operand {missing} before it is written"),
                ));
            }
            written.extend(outputs.iter().copied());
        }
        self.journal.record(DriverCall::FinishModel);
        model.finished = true;
        Ok(())
    }

    fn create_compilation(&self, model: &LoopbackModel) -> DriverResult<LoopbackCompilation> {
        if !model.finished {
            return Err(DriverError::new(
                "create_compilation",
                status::BAD_STATE,
                "model is not finished",
            ));
        }
        self.journal.record(DriverCall::CreateCompilation);
        Ok(LoopbackCompilation {
            journal: self.journal.clone(),
            input_sizes: model.sizes(&model.inputs),
            output_sizes: model.sizes(&model.outputs),
            preference: Preference::default(),
            finished: false,
        })
    }

    fn set_preference(
        &self,
        compilation: &mut LoopbackCompilation,
        preference: Preference,
    ) -> DriverResult<()> {
        if !self.supports_preference(preference) {
            return Err(DriverError::new(
                "set_preference",
                status::BAD_DATA,
                format!("{preference} is not supported"),
            ));
        }
        self.journal.record(DriverCall::SetPreference(preference));
        compilation.preference = preference;
        Ok(())
    }

    fn finish_compilation(&self, compilation: &mut LoopbackCompilation) -> DriverResult<()> {
        if compilation.finished {
            return Err(DriverError::new(
                "finish_compilation",
                status::BAD_STATE,
                "compilation is finished",
            ));
        }
        self.journal.record(DriverCall::FinishCompilation);
        compilation.finished = true;
        Ok(())
    }

    fn create_execution(
        &self,
        compilation: &LoopbackCompilation,
    ) -> DriverResult<LoopbackExecution> {
        if !compilation.finished {
            return Err(DriverError::new(
                "create_execution",
                status::BAD_STATE,
                "compilation is not finished",
            ));
        }
        self.journal.record(DriverCall::CreateExecution);
        Ok(LoopbackExecution {
            journal: self.journal.clone(),
            input_sizes: compilation.input_sizes.clone(),
            output_sizes: compilation.output_sizes.clone(),
        })
    }

    fn compute(
        &self,
        execution: &mut LoopbackExecution,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
    ) -> DriverResult<()> {
        let input_sizes: Vec<usize> = inputs.iter().map(|input| input.len()).collect();
        let output_sizes: Vec<usize> = outputs.iter().map(|output| output.len()).collect();
        if input_sizes != execution.input_sizes || output_sizes != execution.output_sizes {
            return Err(DriverError::new(
                "compute",
                status::BAD_DATA,
                "bound buffers do not match the compiled model",
            ));
        }
        self.journal.record(DriverCall::Compute);
        if let Some(status) = self.compute_status {
            return Err(DriverError::new("compute", status, "injected failure"));
        }
        for (position, output) in outputs.iter_mut().enumerate() {
            let copied = match inputs.get(position) {
                Some(input) => {
                    let n = input.len().min(output.len());
                    output[..n].copy_from_slice(&input[..n]);
                    n
                }
                None => 0,
            };
            output[copied..].fill(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(len: u32) -> Operand {
        Operand::tensor(nn_service::OperandType::TensorFloat32, [len])
    }

    #[test]
    fn finish_rejects_operations_out_of_dependency_order() {
        let driver = LoopbackDriver::new();
        let mut model = driver.create_model().expect("model");
        for _ in 0..3 {
            driver.add_operand(&mut model, &tensor(2)).expect("operand");
        }
        driver
            .add_operation(&mut model, OperationType::Tanh, &[1], &[2])
            .expect("tanh");
        driver
            .add_operation(&mut model, OperationType::Relu, &[0], &[1])
            .expect("relu");
        driver
            .identify_inputs_and_outputs(&mut model, &[0], &[2])
            .expect("identify");
        let err = driver
            .finish_model(&mut model)
            .expect_err("tanh reads operand 1 first");
        assert_eq!(err.status, status::BAD_DATA);
    }

    #[test]
    fn native_objects_are_freed_on_drop() {
        let driver = LoopbackDriver::new();
        let mut model = driver.create_model().expect("model");
        driver.add_operand(&mut model, &tensor(1)).expect("operand");
        driver
            .identify_inputs_and_outputs(&mut model, &[], &[0])
            .expect("identify");
        driver.finish_model(&mut model).expect("finish");
        let mut compilation = driver.create_compilation(&model).expect("compilation");
        driver
            .finish_compilation(&mut compilation)
            .expect("finish compilation");
        let execution = driver.create_execution(&compilation).expect("execution");
        drop((execution, compilation, model));

        let journal = driver.journal();
        assert_eq!(journal.count(&DriverCall::FreeExecution), 1);
        assert_eq!(journal.count(&DriverCall::FreeCompilation), 1);
        assert_eq!(journal.count(&DriverCall::FreeModel), 1);
    }

    #[test]
    fn compute_copies_and_zero_fills() {
        let driver = LoopbackDriver::new();
        let mut execution = LoopbackExecution {
            journal: driver.journal().clone(),
            input_sizes: vec![2],
            output_sizes: vec![4, 1],
        };
        let mut out0 = [9u8; 4];
        let mut out1 = [9u8; 1];
        driver
            .compute(&mut execution, &[&[1, 2]], &mut [&mut out0, &mut out1])
            .expect("compute");
        assert_eq!(out0, [1, 2, 0, 0]);
        assert_eq!(out1, [0]);

        let err = driver
            .compute(&mut execution, &[&[1, 2, 3]], &mut [&mut out0, &mut out1])
            .expect_err("size mismatch");
        assert_eq!(err.status, status::BAD_DATA);
    }
}
