//! Plumbing behind the `nnsvc` binary.

use anyhow::{ensure, Context, Result};
use nn_service::{
    spawn_service, BackendRegistry, NeuralNetworkContext, NeuralNetworkService, OperandType,
    OperationType, Preference, ReferenceMode, ServiceConfig,
};
use nn_service_backend_accel::register_loopback_backend;
use nn_service_backend_ref::register_reference_backend;
use tracing::info;

/// Registry with every backend this build ships.
pub fn build_registry(config: &ServiceConfig) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    register_reference_backend(&mut registry, config.reference_mode);
    register_loopback_backend(&mut registry);
    registry
}

#[derive(Debug, Clone)]
pub struct SmokeOptions {
    pub preference: Preference,
    pub elements: u32,
}

impl Default for SmokeOptions {
    fn default() -> Self {
        Self {
            preference: Preference::default(),
            elements: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmokeReport {
    pub backend: String,
    pub preference: Preference,
    pub reference_mode: ReferenceMode,
    pub input: Vec<f32>,
    pub output: Vec<f32>,
}

impl SmokeReport {
    /// True when the backend echoed the input, as the passthrough and loopback paths do.
    pub fn echoed(&self) -> bool {
        self.input == self.output
    }
}

/// Runs `y = Add(x, bias)` once through a freshly spawned service.
pub async fn run_smoke(config: ServiceConfig, options: &SmokeOptions) -> Result<SmokeReport> {
    ensure!(options.elements > 0, "smoke graph needs at least one element");
    let registry = build_registry(&config);
    let reference_mode = config.reference_mode;
    let memory_limit = config.max_memory_bytes;
    let service =
        NeuralNetworkService::from_registry(config, &registry).context("selecting backend")?;
    let backend = service.backend().backend_name().to_string();
    let (connection, handle) = spawn_service(service);
    let context = NeuralNetworkContext::connect(connection).with_memory_limit(memory_limit);

    let n = options.elements as usize;
    let input: Vec<f32> = (0..n).map(|i| i as f32 * 0.5 - 1.0).collect();
    let bias = vec![1.0f32; n];

    let mut model = context.create_model();
    let x = model.add_operand(OperandType::TensorFloat32, &[options.elements], 0.0, 0)?;
    let b = model.add_operand(OperandType::TensorFloat32, &[options.elements], 0.0, 0)?;
    let y = model.add_operand(OperandType::TensorFloat32, &[options.elements], 0.0, 0)?;
    model.set_operand_value(b, &f32_to_bytes(&bias))?;
    model.add_operation(OperationType::Add, &[x, b], &[y])?;
    model.identify_inputs_and_outputs(&[x], &[y])?;
    model.finish().await.context("finishing smoke model")?;

    let mut compilation = model
        .create_compilation()
        .await
        .context("creating compilation")?;
    compilation
        .finish(options.preference)
        .await
        .with_context(|| format!("compiling for {}", options.preference))?;
    let mut execution = compilation
        .create_execution()
        .await
        .context("creating execution")?;
    execution.set_input(0, &f32_to_bytes(&input))?;
    execution.start_compute().await.context("computing")?;
    let output = bytes_to_f32(&execution.read_output(0)?);

    drop((execution, compilation, model, context));
    handle.shutdown().await;
    info!(%backend, preference = %options.preference, "smoke run complete");

    Ok(SmokeReport {
        backend,
        preference: options.preference,
        reference_mode,
        input,
        output,
    })
}

fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
