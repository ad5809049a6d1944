use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::ServiceError;
use crate::ipc::connection::{Connection, Envelope, ServiceInbox};
use crate::ipc::protocol::ObjectHandle;
use crate::ipc::protocol::{Reply, Response};
use crate::service::{Dispatch, ExecutionImpl, NeuralNetworkService};

/// Owner side of a running service loop.
#[derive(Debug)]
pub struct ServiceHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<NeuralNetworkService>,
}

impl ServiceHandle {
    /// Stops the loop and returns the service with whatever objects are still live.
    ///
    /// Requests queued but not yet handled resolve as `ConnectionLost` on the caller side.
    pub async fn shutdown(mut self) -> Option<NeuralNetworkService> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await.ok()
    }

    /// Kills the loop without draining anything.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Starts `service` on the current tokio runtime and returns a connection to it.
pub fn spawn_service(service: NeuralNetworkService) -> (Connection, ServiceHandle) {
    let (connection, inbox) = Connection::channel(service.config().request_queue_depth);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(serve(service, inbox, shutdown_rx));
    (
        connection,
        ServiceHandle {
            shutdown: Some(shutdown_tx),
            task,
        },
    )
}

/// Request loop: runs until every connection is dropped or shutdown is requested.
///
/// Queued releases are applied before each request and once more before the loop returns.
pub async fn serve(
    mut service: NeuralNetworkService,
    mut inbox: ServiceInbox,
    mut shutdown: oneshot::Receiver<()>,
) -> NeuralNetworkService {
    info!(backend = service.backend().backend_name(), "service loop started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("shutdown requested");
                break;
            }
            Some(handle) = inbox.releases.recv() => {
                release(&mut service, handle);
                continue;
            }
            envelope = inbox.requests.recv() => match envelope {
                Some(envelope) => envelope,
                None => {
                    debug!("all connections closed");
                    break;
                }
            },
        };
        for handle in inbox.drain_releases() {
            release(&mut service, handle);
        }
        let Envelope { id, request, reply } = envelope;
        trace!(id, request = request.name(), "dispatching");
        match service.dispatch(request) {
            Dispatch::Reply(result) => {
                let _ = reply.send(Reply::from_result(result));
            }
            Dispatch::Compute(execution) => {
                tokio::spawn(run_compute(execution, reply));
            }
        }
    }
    for handle in inbox.drain_releases() {
        release(&mut service, handle);
    }
    info!(live_objects = service.live_objects(), "service loop stopped");
    service
}

fn release(service: &mut NeuralNetworkService, handle: ObjectHandle) {
    if let Err(err) = service.release(handle) {
        warn!(%handle, error = %err, "release rejected");
    }
}

async fn run_compute(execution: Arc<ExecutionImpl>, reply: oneshot::Sender<Reply>) {
    let worker = Arc::clone(&execution);
    let result = match tokio::task::spawn_blocking(move || worker.run_compute()).await {
        Ok(result) => result,
        Err(err) => {
            execution.mark_failed();
            Err(ServiceError::BackendFailure(format!(
                "compute worker for execution {} did not finish: {err}",
                execution.handle()
            )))
        }
    };
    let _ = reply.send(Reply::from_result(result.map(|()| Response::Done)));
}
