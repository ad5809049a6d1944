//! Backend contract: a flat compile/compute interface every graph executor implements.
//!
//! The service owns one [`GraphCompilerBackend`] chosen at startup through the
//! [`registry::BackendRegistry`]. Compiling a [`FrozenGraph`] yields a [`CompiledGraph`] that
//! owns every backend resource it needs; dropping it releases them.

pub mod registry;
mod unsupported;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ServiceError, ServiceResult};
use crate::graph::FrozenGraph;
use crate::memory::ExecutionMemory;

pub use registry::{BackendConstructor, BackendRegistry, BackendSelection};
pub use unsupported::UnsupportedBackend;

/// Execution preference passed to `Compilation.Finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Preference {
    LowPower,
    #[default]
    FastSingleAnswer,
    SustainedSpeed,
}

impl Preference {
    pub const ALL: [Preference; 3] = [
        Preference::LowPower,
        Preference::FastSingleAnswer,
        Preference::SustainedSpeed,
    ];

    pub fn code(self) -> i32 {
        match self {
            Preference::LowPower => 0,
            Preference::FastSingleAnswer => 1,
            Preference::SustainedSpeed => 2,
        }
    }

    pub fn from_code(code: i32) -> ServiceResult<Self> {
        Preference::ALL
            .into_iter()
            .find(|preference| preference.code() == code)
            .ok_or_else(|| ServiceError::unsupported(format!("unknown preference code {code}")))
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Preference::LowPower => "low-power",
            Preference::FastSingleAnswer => "fast-single-answer",
            Preference::SustainedSpeed => "sustained-speed",
        };
        f.write_str(name)
    }
}

/// Failures raised by backend routines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("unsupported by backend: {0}")]
    Unsupported(String),
    #[error("backend rejected graph data: {0}")]
    BadData(String),
    #[error("driver call failed with status {status}: {message}")]
    Driver { status: i32, message: String },
    #[error("backend execution failure: {0}")]
    Execution(String),
    #[error("backend out of memory: {0}")]
    OutOfMemory(String),
}

impl BackendError {
    pub fn unsupported(detail: impl Into<String>) -> Self {
        BackendError::Unsupported(detail.into())
    }

    pub fn bad_data(detail: impl Into<String>) -> Self {
        BackendError::BadData(detail.into())
    }

    pub fn driver(status: i32, message: impl Into<String>) -> Self {
        BackendError::Driver {
            status,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution(message.into())
    }
}

/// Region-level errors surface as backend failures when they happen inside a backend.
impl From<ServiceError> for BackendError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unsupported(detail) => BackendError::Unsupported(detail),
            ServiceError::BadIndex { .. } | ServiceError::BadData(_) => {
                BackendError::BadData(err.to_string())
            }
            ServiceError::ResourceExhausted(detail) => BackendError::OutOfMemory(detail),
            other => BackendError::Execution(other.to_string()),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Polymorphic graph compiler selected at service startup.
pub trait GraphCompilerBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g., `"reference"`, `"accelerator"`).
    fn backend_name(&self) -> &str;

    /// Whether `compile` accepts this preference.
    fn supports_preference(&self, preference: Preference) -> bool;

    /// Compiles a private copy of `graph`. The result must not borrow from the caller's graph.
    fn compile(
        &self,
        graph: &FrozenGraph,
        preference: Preference,
    ) -> BackendResult<Box<dyn CompiledGraph>>;
}

/// Backend artifact produced by [`GraphCompilerBackend::compile`].
pub trait CompiledGraph: Send + Sync {
    fn preference(&self) -> Preference;

    /// Runs one pass: reads the input slices of `memory` and writes its output slices in place.
    ///
    /// Called from a blocking worker thread; may block on the device.
    fn compute(&self, memory: &ExecutionMemory) -> BackendResult<()>;
}
