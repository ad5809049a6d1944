use nn_service::backend::BackendError;
use nn_service::{
    spawn_service, BackendRegistry, BackendSelection, Model, NeuralNetworkContext,
    NeuralNetworkService, OperandType, OperationType, Preference, ReferenceMode, ServiceConfig,
    ServiceError, ServiceHandle,
};
use nn_service_backend_accel::{
    register_accelerator_backend, status, DriverCall, LoopbackDriver, BACKEND_NAME,
};
use nn_service_backend_ref::register_reference_backend;

fn start(driver: LoopbackDriver) -> (NeuralNetworkContext, ServiceHandle) {
    let mut registry = BackendRegistry::new();
    register_accelerator_backend(&mut registry, driver);
    let config = ServiceConfig {
        backend: BackendSelection::Named(BACKEND_NAME.into()),
        ..ServiceConfig::default()
    };
    let service = NeuralNetworkService::from_registry(config, &registry).expect("service");
    let (connection, handle) = spawn_service(service);
    (NeuralNetworkContext::connect(connection), handle)
}

/// `input -> Relu -> hidden -> Tanh -> output`, with the operations added back to front.
fn reversed_chain(context: &NeuralNetworkContext) -> Model {
    let mut model = context.create_model();
    let input = model
        .add_operand(OperandType::TensorFloat32, &[2], 0.0, 0)
        .expect("input");
    let hidden = model
        .add_operand(OperandType::TensorFloat32, &[2], 0.0, 0)
        .expect("hidden");
    let output = model
        .add_operand(OperandType::TensorFloat32, &[2], 0.0, 0)
        .expect("output");
    model
        .add_operation(OperationType::Tanh, &[hidden], &[output])
        .expect("tanh");
    model
        .add_operation(OperationType::Relu, &[input], &[hidden])
        .expect("relu");
    model
        .identify_inputs_and_outputs(&[input], &[output])
        .expect("identify");
    model
}

#[test]
fn auto_selection_prefers_the_accelerator() {
    let mut registry = BackendRegistry::new();
    register_reference_backend(&mut registry, ReferenceMode::LogOnly);
    register_accelerator_backend(&mut registry, LoopbackDriver::new());
    assert_eq!(registry.list_backends(), vec!["accelerator", "reference"]);
    let backend = registry
        .select(&BackendSelection::Auto)
        .expect("auto selection");
    assert_eq!(backend.backend_name(), "accelerator");
}

#[test]
fn auto_selection_skips_an_unavailable_device() {
    let mut registry = BackendRegistry::new();
    register_reference_backend(&mut registry, ReferenceMode::LogOnly);
    register_accelerator_backend(&mut registry, LoopbackDriver::new().unavailable());
    let backend = registry
        .select(&BackendSelection::Auto)
        .expect("auto selection");
    assert_eq!(backend.backend_name(), "reference");

    let err = registry
        .select(&BackendSelection::Named(BACKEND_NAME.into()))
        .err()
        .expect("named selection of a failed probe");
    assert!(matches!(err, BackendError::Driver { status: status::UNEXPECTED_NULL, .. }));
}

#[tokio::test]
async fn operations_are_replayed_in_dependency_order() {
    let driver = LoopbackDriver::new();
    let journal = driver.journal().clone();
    let (context, service) = start(driver);

    let mut model = reversed_chain(&context);
    model.finish().await.expect("finish");
    let mut compilation = model.create_compilation().await.expect("compilation");
    compilation
        .finish(Preference::SustainedSpeed)
        .await
        .expect("compile");

    let replayed: Vec<OperationType> = journal
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::AddOperation(operation_type) => Some(operation_type),
            _ => None,
        })
        .collect();
    assert_eq!(replayed, vec![OperationType::Relu, OperationType::Tanh]);
    assert_eq!(
        journal.count(&DriverCall::SetPreference(Preference::SustainedSpeed)),
        1
    );

    let mut execution = compilation.create_execution().await.expect("execution");
    let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
    execution.set_input(0, &bytes).expect("bind");
    execution.start_compute().await.expect("compute");
    assert_eq!(execution.read_output(0).expect("output"), bytes);
    assert_eq!(journal.count(&DriverCall::Compute), 1);

    drop((execution, compilation, model, context));
    service.shutdown().await.expect("service");
}

#[tokio::test]
async fn cyclic_graph_fails_compilation_with_bad_data() {
    let (context, service) = start(LoopbackDriver::new());
    let mut model = context.create_model();
    let a = model
        .add_operand(OperandType::Int32, &[], 0.0, 0)
        .expect("a");
    let b = model
        .add_operand(OperandType::Int32, &[], 0.0, 0)
        .expect("b");
    model
        .add_operation(OperationType::Add, &[b], &[a])
        .expect("a from b");
    model
        .add_operation(OperationType::Mul, &[a], &[b])
        .expect("b from a");
    model
        .identify_inputs_and_outputs(&[], &[a])
        .expect("identify");
    model.finish().await.expect("finish");

    let mut compilation = model.create_compilation().await.expect("compilation");
    let err = compilation
        .finish(Preference::FastSingleAnswer)
        .await
        .expect_err("cycle");
    assert!(matches!(err, ServiceError::BadData(_)), "{err}");

    drop((compilation, model, context));
    service.shutdown().await.expect("service");
}

#[tokio::test]
async fn unsupported_preference_and_operation_are_reported() {
    let driver = LoopbackDriver::new()
        .with_preferences(&[Preference::FastSingleAnswer])
        .with_operations(&[OperationType::Relu]);
    let (context, service) = start(driver);

    let mut model = reversed_chain(&context);
    model.finish().await.expect("finish");

    let mut low_power = model.create_compilation().await.expect("compilation");
    let err = low_power
        .finish(Preference::LowPower)
        .await
        .expect_err("low power");
    assert!(matches!(err, ServiceError::Unsupported(_)));

    let mut fast = model.create_compilation().await.expect("compilation");
    let err = fast
        .finish(Preference::FastSingleAnswer)
        .await
        .expect_err("tanh is not supported");
    assert!(matches!(err, ServiceError::Unsupported(_)));

    drop((fast, low_power, model, context));
    service.shutdown().await.expect("service");
}

#[tokio::test]
async fn driver_compute_failure_surfaces_as_backend_failure() {
    let (context, service) = start(LoopbackDriver::new().with_compute_status(status::OP_FAILED));
    let mut model = reversed_chain(&context);
    model.finish().await.expect("finish");
    let mut compilation = model.create_compilation().await.expect("compilation");
    compilation
        .finish(Preference::FastSingleAnswer)
        .await
        .expect("compile");
    let mut execution = compilation.create_execution().await.expect("execution");
    execution.set_input(0, &[0; 8]).expect("bind");
    let err = execution.start_compute().await.expect_err("compute");
    assert!(matches!(err, ServiceError::BackendFailure(_)), "{err}");

    drop((execution, compilation, model, context));
    service.shutdown().await.expect("service");
}

#[tokio::test]
async fn native_objects_are_freed_with_the_service() {
    let driver = LoopbackDriver::new();
    let journal = driver.journal().clone();
    let (context, service) = start(driver);

    let mut model = reversed_chain(&context);
    model.finish().await.expect("finish");
    let mut compilation = model.create_compilation().await.expect("compilation");
    compilation
        .finish(Preference::LowPower)
        .await
        .expect("compile");
    let mut execution = compilation.create_execution().await.expect("execution");
    execution.set_input(0, &[0; 8]).expect("bind");
    execution.start_compute().await.expect("compute");
    assert_eq!(journal.count(&DriverCall::FreeExecution), 1);
    assert_eq!(journal.count(&DriverCall::FreeCompilation), 0);

    drop((execution, compilation, model, context));
    let service = service.shutdown().await.expect("service");
    drop(service);
    assert_eq!(journal.count(&DriverCall::FreeCompilation), 1);
    assert_eq!(journal.count(&DriverCall::FreeModel), 1);
}
