use nn_service::backend::{BackendResult, CompiledGraph, GraphCompilerBackend, Preference};
use nn_service::graph::describe_values;
use nn_service::{ExecutionMemory, FrozenGraph, ReferenceMode};
use tracing::{debug, trace};

/// Software backend: performs no real compilation and never touches an accelerator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBackend {
    mode: ReferenceMode,
}

impl ReferenceBackend {
    pub fn new(mode: ReferenceMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ReferenceMode {
        self.mode
    }
}

impl GraphCompilerBackend for ReferenceBackend {
    fn backend_name(&self) -> &str {
        crate::BACKEND_NAME
    }

    fn supports_preference(&self, _preference: Preference) -> bool {
        true
    }

    fn compile(
        &self,
        graph: &FrozenGraph,
        preference: Preference,
    ) -> BackendResult<Box<dyn CompiledGraph>> {
        debug!(
            mode = ?self.mode,
            %preference,
            operands = graph.operands.len(),
            operations = graph.operations.len(),
            "reference compile"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            match graph.descriptor().to_json_string() {
                Ok(json) => trace!(graph = %json, "reference graph"),
                Err(err) => trace!(error = %err, "graph descriptor not serializable"),
            }
        }
        Ok(Box::new(ReferenceCompiled {
            graph: graph.clone(),
            preference,
            mode: self.mode,
        }))
    }
}

struct ReferenceCompiled {
    graph: FrozenGraph,
    preference: Preference,
    mode: ReferenceMode,
}

impl ReferenceCompiled {
    fn log_inputs(&self, memory: &ExecutionMemory) {
        for (position, (layout, info)) in memory
            .layout()
            .inputs
            .iter()
            .zip(memory.inputs())
            .enumerate()
        {
            let values = info
                .mapping
                .with_bytes(|bytes| describe_values(layout.operand_type, bytes));
            trace!(
                input = position,
                operand = layout.operand,
                %values,
                "reference input"
            );
        }
    }
}

impl CompiledGraph for ReferenceCompiled {
    fn preference(&self) -> Preference {
        self.preference
    }

    fn compute(&self, memory: &ExecutionMemory) -> BackendResult<()> {
        debug!(
            mode = ?self.mode,
            operations = self.graph.operations.len(),
            region_bytes = memory.buffer().len(),
            "reference compute"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            self.log_inputs(memory);
        }
        match self.mode {
            ReferenceMode::LogOnly => Ok(()),
            ReferenceMode::Passthrough => {
                memory.with_io(|inputs, outputs| {
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
                })?;
                Ok(())
            }
        }
    }
}
