#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::Arc;

use nn_service::backend::{
    BackendError, BackendResult, CompiledGraph, GraphCompilerBackend, Preference,
};
use nn_service::memory::ExecutionMemory;
use nn_service::{
    spawn_service, Connection, FrozenGraph, NeuralNetworkService, ServiceConfig, ServiceHandle,
};
use parking_lot::Mutex;

/// Test backend whose compute copies input `k` into output `k`.
#[derive(Clone, Default)]
pub struct EchoBackend {
    pub rejected: Vec<Preference>,
    pub fail_compute: bool,
    /// When set, every compute waits for one message on this channel first.
    pub gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

struct EchoCompiled {
    preference: Preference,
    fail_compute: bool,
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

impl GraphCompilerBackend for EchoBackend {
    fn backend_name(&self) -> &str {
        "echo"
    }

    fn supports_preference(&self, preference: Preference) -> bool {
        !self.rejected.contains(&preference)
    }

    fn compile(
        &self,
        _graph: &FrozenGraph,
        preference: Preference,
    ) -> BackendResult<Box<dyn CompiledGraph>> {
        Ok(Box::new(EchoCompiled {
            preference,
            fail_compute: self.fail_compute,
            gate: self.gate.clone(),
        }))
    }
}

impl CompiledGraph for EchoCompiled {
    fn preference(&self) -> Preference {
        self.preference
    }

    fn compute(&self, memory: &ExecutionMemory) -> BackendResult<()> {
        if let Some(gate) = &self.gate {
            let _ = gate.lock().recv();
        }
        if self.fail_compute {
            return Err(BackendError::driver(7, "device lost"));
        }
        memory.with_io(|inputs, outputs| {
            for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
            }
        })?;
        Ok(())
    }
}

pub fn start(backend: EchoBackend, config: ServiceConfig) -> (Connection, ServiceHandle) {
    let service = NeuralNetworkService::new(config, Arc::new(backend));
    spawn_service(service)
}

pub fn start_echo() -> (Connection, ServiceHandle) {
    start(EchoBackend::default(), ServiceConfig::default())
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
