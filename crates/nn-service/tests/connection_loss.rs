mod common;

use std::sync::mpsc;
use std::sync::Arc;

use common::{start, start_echo, EchoBackend};
use nn_service::ipc::Request;
use nn_service::{
    NeuralNetworkContext, OperandType, OperationType, Preference, ServiceConfig, ServiceError,
};
use parking_lot::Mutex;

#[tokio::test]
async fn requests_after_shutdown_fail_with_connection_lost() {
    let (connection, service) = start_echo();
    service.shutdown().await.expect("service");

    let err = connection
        .call(Request::CreateModel)
        .await
        .expect_err("service is gone");
    assert_eq!(err, ServiceError::ConnectionLost);
    assert_eq!(err.result_code().as_i32(), 9);

    let context = NeuralNetworkContext::connect(connection);
    let mut model = context.create_model();
    let a = model
        .add_operand(OperandType::TensorFloat32, &[2], 0.0, 0)
        .expect("local builder still works");
    let b = model
        .add_operand(OperandType::TensorFloat32, &[2], 0.0, 0)
        .expect("b");
    model
        .add_operation(OperationType::Floor, &[a], &[b])
        .expect("floor");
    model.identify_inputs_and_outputs(&[a], &[b]).expect("io");
    let err = model.finish().await.expect_err("finish needs the service");
    assert_eq!(err, ServiceError::ConnectionLost);

    // A failed round trip leaves the model open for another attempt.
    assert!(!model.builder().is_finished());
    let err = model.finish().await.expect_err("still no service");
    assert_eq!(err, ServiceError::ConnectionLost);
}

#[tokio::test]
async fn close_resolves_in_flight_compute() {
    let (release_compute, gate) = mpsc::channel();
    let backend = EchoBackend {
        gate: Some(Arc::new(Mutex::new(gate))),
        ..EchoBackend::default()
    };
    let (connection, service) = start(backend, ServiceConfig::default());
    let context = NeuralNetworkContext::connect(connection.clone());

    let mut model = context.create_model();
    let a = model
        .add_operand(OperandType::TensorInt32, &[2], 0.0, 0)
        .expect("a");
    let b = model
        .add_operand(OperandType::TensorInt32, &[2], 0.0, 0)
        .expect("b");
    model
        .add_operation(OperationType::Reshape, &[a], &[b])
        .expect("reshape");
    model.identify_inputs_and_outputs(&[a], &[b]).expect("io");
    model.finish().await.expect("finish");
    let mut compilation = model.create_compilation().await.expect("compilation");
    compilation
        .finish(Preference::default())
        .await
        .expect("compile");
    let mut execution = compilation.create_execution().await.expect("execution");
    execution.set_input(0, &[0; 8]).expect("input");

    let compute = tokio::spawn(async move {
        let result = execution.start_compute().await;
        (result, execution)
    });
    while connection.pending_requests() == 0 {
        tokio::task::yield_now().await;
    }
    connection.close();

    let (result, execution) = compute.await.expect("compute task");
    assert_eq!(result.expect_err("closed mid-compute"), ServiceError::ConnectionLost);
    assert!(execution.read_output(0).is_err());
    assert_eq!(connection.pending_requests(), 0);

    release_compute.send(()).expect("unblock worker");
    drop((execution, compilation, model, context));
    service.shutdown().await.expect("service");
}
