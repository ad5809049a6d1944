use std::fmt;
use std::sync::Arc;

use nn_service::backend::{
    BackendError, BackendResult, CompiledGraph, GraphCompilerBackend, Preference,
};
use nn_service::graph::topology;
use nn_service::{ExecutionMemory, FrozenGraph};
use tracing::{debug, trace};

use crate::driver::AcceleratorDriver;

/// Backend that replays each compiled graph into a native driver.
pub struct AcceleratorBackend<D: AcceleratorDriver> {
    name: String,
    driver: Arc<D>,
}

impl<D: AcceleratorDriver> fmt::Debug for AcceleratorBackend<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratorBackend")
            .field("name", &self.name)
            .field("driver", &self.driver.driver_name())
            .finish()
    }
}

impl<D: AcceleratorDriver> AcceleratorBackend<D> {
    pub fn new(name: impl Into<String>, driver: D) -> Self {
        Self {
            name: name.into(),
            driver: Arc::new(driver),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn check_support(&self, graph: &FrozenGraph, preference: Preference) -> BackendResult<()> {
        if !self.driver.supports_preference(preference) {
            return Err(BackendError::unsupported(format!(
                "driver '{}' has no {preference} mode",
                self.driver.driver_name()
            )));
        }
        if let Some(operation) = graph
            .operations
            .iter()
            .find(|operation| !self.driver.supports_operation(operation.operation_type))
        {
            return Err(BackendError::unsupported(format!(
                "driver '{}' cannot run {:?}",
                self.driver.driver_name(),
                operation.operation_type
            )));
        }
        Ok(())
    }

    fn build_model(&self, graph: &FrozenGraph) -> BackendResult<D::Model> {
        let order = topological_order(graph)?;
        let driver = &*self.driver;
        let mut model = driver.create_model()?;

        for operand in &graph.operands {
            driver.add_operand(&mut model, operand)?;
        }
        for value in &graph.values {
            let mapping = graph.constant_mapping(value)?;
            mapping.with_bytes(|bytes| driver.set_operand_value(&mut model, value.index, bytes))?;
        }
        for &position in &order {
            let operation = &graph.operations[position];
            trace!(
                position,
                operation = ?operation.operation_type,
                "replaying operation"
            );
            driver.add_operation(
                &mut model,
                operation.operation_type,
                &operation.inputs,
                &operation.outputs,
            )?;
        }
        driver.identify_inputs_and_outputs(&mut model, &graph.inputs, &graph.outputs)?;
        driver.finish_model(&mut model)?;
        Ok(model)
    }
}

fn topological_order(graph: &FrozenGraph) -> BackendResult<Vec<usize>> {
    topology::topological_order(graph).map_err(|err| BackendError::bad_data(err.to_string()))
}

impl<D: AcceleratorDriver> GraphCompilerBackend for AcceleratorBackend<D> {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn supports_preference(&self, preference: Preference) -> bool {
        self.driver.supports_preference(preference)
    }

    fn compile(
        &self,
        graph: &FrozenGraph,
        preference: Preference,
    ) -> BackendResult<Box<dyn CompiledGraph>> {
        self.check_support(graph, preference)?;
        let model = self.build_model(graph)?;

        let mut compilation = self.driver.create_compilation(&model)?;
        self.driver.set_preference(&mut compilation, preference)?;
        self.driver.finish_compilation(&mut compilation)?;

        let intermediates = topology::consumer_counts(graph)
            .iter()
            .enumerate()
            .filter(|&(index, &count)| {
                let index = index as u32;
                count > 0 && !graph.inputs.contains(&index) && !graph.is_constant(index)
            })
            .count();
        debug!(
            backend = %self.name,
            driver = self.driver.driver_name(),
            %preference,
            operands = graph.operands.len(),
            operations = graph.operations.len(),
            constants = graph.values.len(),
            intermediates,
            "accelerator compile"
        );

        Ok(Box::new(AcceleratorCompiled {
            driver: Arc::clone(&self.driver),
            compilation,
            _model: model,
            preference,
        }))
    }
}

/// Compiled artifact. Field order matters: the compilation is freed before its model.
struct AcceleratorCompiled<D: AcceleratorDriver> {
    driver: Arc<D>,
    compilation: D::Compilation,
    _model: D::Model,
    preference: Preference,
}

impl<D: AcceleratorDriver> CompiledGraph for AcceleratorCompiled<D> {
    fn preference(&self) -> Preference {
        self.preference
    }

    fn compute(&self, memory: &ExecutionMemory) -> BackendResult<()> {
        let mut execution = self.driver.create_execution(&self.compilation)?;
        memory.with_io(|inputs, outputs| self.driver.compute(&mut execution, inputs, outputs))??;
        Ok(())
    }
}
