//! Neural network graph service.
//!
//! A caller describes a dataflow graph of tensor operations through a [`client::Model`], freezes
//! it, compiles it once for an execution [`backend::Preference`] and runs single-shot
//! [`client::Execution`]s against it. Graph constants and execution inputs/outputs live in
//! shared memory regions ([`memory::SharedBuffer`]); requests cross an asynchronous channel to a
//! [`service::NeuralNetworkService`] that drives a pluggable [`backend::GraphCompilerBackend`].

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod ipc;
pub mod logging;
pub mod memory;
pub mod service;

pub use backend::{
    BackendError, BackendRegistry, BackendResult, BackendSelection, CompiledGraph,
    GraphCompilerBackend, Preference,
};
pub use client::{Compilation, Execution, Model, NeuralNetworkContext};
pub use config::{ReferenceMode, ServiceConfig};
pub use error::{ResultCode, ServiceError, ServiceResult};
pub use graph::{FrozenGraph, ModelBuilder, Operand, OperandType, Operation, OperationType};
pub use ipc::{spawn_service, Connection, ServiceHandle};
pub use memory::{AccessMode, ExecutionLayout, ExecutionMemory, OperandLayout, SharedBuffer};
pub use service::NeuralNetworkService;
