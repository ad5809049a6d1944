//! In-process request/response transport between caller proxies and the service loop.

pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::{Connection, Envelope, ServiceInbox};
pub use protocol::{ExecutionInitParams, ObjectHandle, Reply, Request, RequestId, Response};
pub use server::{serve, spawn_service, ServiceHandle};
