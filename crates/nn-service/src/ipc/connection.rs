//! Caller end of the request channel.
//!
//! Every request travels with a oneshot reply sender. The connection also records each
//! in-flight request in a pending table so that [`Connection::close`] can fail all of them with
//! [`ServiceError::ConnectionLost`]. A reply sender dropped by the service resolves the same way,
//! so no request is ever left unresolved.
//!
//! Releases travel on their own unbounded queue: a proxy dropped while the request queue is
//! full must still free its service-side object.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::protocol::{ObjectHandle, Reply, Request, RequestId, Response};

/// A request as seen by the service loop.
#[derive(Debug)]
pub struct Envelope {
    pub id: RequestId,
    pub request: Request,
    pub reply: oneshot::Sender<Reply>,
}

/// Service end of a connection: bounded requests plus the release queue.
#[derive(Debug)]
pub struct ServiceInbox {
    pub(crate) requests: mpsc::Receiver<Envelope>,
    pub(crate) releases: mpsc::UnboundedReceiver<ObjectHandle>,
}

impl ServiceInbox {
    /// Next request, or `None` once every connection is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.requests.recv().await
    }

    /// Next release, or `None` once every connection is gone.
    pub async fn recv_release(&mut self) -> Option<ObjectHandle> {
        self.releases.recv().await
    }

    /// Releases already queued, without waiting.
    pub fn drain_releases(&mut self) -> Vec<ObjectHandle> {
        let mut handles = Vec::new();
        while let Ok(handle) = self.releases.try_recv() {
            handles.push(handle);
        }
        handles
    }
}

struct ConnectionInner {
    sender: mpsc::Sender<Envelope>,
    releases: mpsc::UnboundedSender<ObjectHandle>,
    next_id: AtomicU64,
    closed: AtomicBool,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<()>>>,
}

/// Cloneable caller handle onto one service.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

impl Connection {
    /// Creates a connected pair: the caller end and the inbox the service loop drains.
    pub fn channel(queue_depth: usize) -> (Self, ServiceInbox) {
        let (sender, requests) = mpsc::channel(queue_depth.max(1));
        let (releases_tx, releases) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                sender,
                releases: releases_tx,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
            }),
        };
        (connection, ServiceInbox { requests, releases })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.sender.is_closed()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Sends `request` and waits for its reply.
    pub async fn call(&self, request: Request) -> ServiceResult<Response> {
        let operation = request.name();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (abort_tx, abort_rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(ServiceError::ConnectionLost);
            }
            pending.insert(id, abort_tx);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        trace!(id, operation, "sending request");
        let envelope = Envelope {
            id,
            request,
            reply: reply_tx,
        };
        if self.inner.sender.send(envelope).await.is_err() {
            self.inner.pending.lock().remove(&id);
            warn!(id, operation, "service is gone; request not delivered");
            return Err(ServiceError::ConnectionLost);
        }

        let outcome = tokio::select! {
            reply = reply_rx => reply.map_err(|_| ServiceError::ConnectionLost),
            _ = abort_rx => Err(ServiceError::ConnectionLost),
        };
        self.inner.pending.lock().remove(&id);

        match outcome {
            Ok(reply) => {
                trace!(id, operation, code = ?reply.code, "reply received");
                reply.into_result(operation)
            }
            Err(err) => {
                debug!(id, operation, "request resolved as connection lost");
                Err(err)
            }
        }
    }

    /// Fire-and-forget release used from `Drop`; never blocks and is never dropped while the
    /// service runs, even after [`Connection::close`].
    pub fn release(&self, handle: ObjectHandle) {
        if self.inner.releases.send(handle).is_err() {
            trace!(%handle, "service is gone; nothing to release");
        }
    }

    /// Fails every outstanding request with `ConnectionLost` and rejects new ones.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut pending = self.inner.pending.lock();
            self.inner.closed.store(true, Ordering::Release);
            pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!(outstanding = drained.len(), "closing connection");
        }
        for (_, abort) in drained {
            let _ = abort.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_receiver_fails_requests() {
        let (connection, receiver) = Connection::channel(4);
        drop(receiver);
        let err = connection
            .call(Request::CreateModel)
            .await
            .expect_err("no service");
        assert_eq!(err, ServiceError::ConnectionLost);
        assert_eq!(connection.pending_requests(), 0);
    }

    #[tokio::test]
    async fn dropped_reply_sender_resolves_as_connection_lost() {
        let (connection, mut receiver) = Connection::channel(4);
        let server = tokio::spawn(async move {
            let envelope = receiver.recv().await.expect("request");
            drop(envelope.reply);
            receiver
        });
        let err = connection
            .call(Request::CreateModel)
            .await
            .expect_err("reply dropped");
        assert_eq!(err, ServiceError::ConnectionLost);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn close_fails_outstanding_and_future_requests() {
        let (connection, mut receiver) = Connection::channel(4);
        let caller = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.call(Request::CreateModel).await })
        };
        // Hold the envelope so the request stays outstanding.
        let envelope = receiver.recv().await.expect("request");
        connection.close();
        let err = caller
            .await
            .expect("caller task")
            .expect_err("closed connection");
        assert_eq!(err, ServiceError::ConnectionLost);
        drop(envelope);

        assert!(connection.is_closed());
        let err = connection
            .call(Request::CreateModel)
            .await
            .expect_err("closed");
        assert_eq!(err, ServiceError::ConnectionLost);
    }
}
