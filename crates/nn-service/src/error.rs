//! Error taxonomy shared by the caller proxies, the IPC transport and the service objects.
//!
//! Every failure that crosses the IPC boundary travels as a [`ResultCode`]; inside the process
//! it is a [`ServiceError`] carrying a human-readable detail.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by every stage of the model → compilation → execution pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Operation attempted outside its allowed lifecycle order.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// An operand, input or output index is out of range.
    #[error("bad index {index}: {detail}")]
    BadIndex { index: u32, detail: String },
    /// Malformed caller data (size mismatch, invalid quantization parameters, ...).
    #[error("bad data: {0}")]
    BadData(String),
    /// Operand/operation type or preference not implemented by the active backend.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Compute requested before every graph input was bound.
    #[error("not ready: {0}")]
    NotReady(String),
    /// Shared memory or backend buffers could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// The underlying accelerator call failed.
    #[error("backend failure: {0}")]
    BackendFailure(String),
    /// The IPC channel was severed before the request completed.
    #[error("connection lost")]
    ConnectionLost,
}

/// Convenience alias used throughout the crate.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn invalid_state(detail: impl Into<String>) -> Self {
        ServiceError::InvalidState(detail.into())
    }

    pub fn bad_index(index: u32, detail: impl Into<String>) -> Self {
        ServiceError::BadIndex {
            index,
            detail: detail.into(),
        }
    }

    pub fn bad_data(detail: impl Into<String>) -> Self {
        ServiceError::BadData(detail.into())
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        ServiceError::Unsupported(detail.into())
    }

    /// Closed wire code for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            ServiceError::InvalidState(_) => ResultCode::BadState,
            ServiceError::BadIndex { .. } | ServiceError::BadData(_) => ResultCode::BadData,
            ServiceError::Unsupported(_) => ResultCode::Unsupported,
            ServiceError::NotReady(_) => ResultCode::Incomplete,
            ServiceError::ResourceExhausted(_) => ResultCode::OutOfMemory,
            ServiceError::BackendFailure(_) => ResultCode::OpFailed,
            ServiceError::ConnectionLost => ResultCode::ServiceUnavailable,
        }
    }

    /// Rebuilds a caller-side error from a wire code. Returns `None` for [`ResultCode::NoError`].
    pub fn from_result_code(code: ResultCode, operation: &str) -> Option<Self> {
        Self::from_wire(
            code,
            format!("{operation} failed with result code {}", code.as_i32()),
        )
    }

    /// Rebuilds an error from a wire code plus the detail string sent alongside it.
    pub fn from_wire(code: ResultCode, detail: impl Into<String>) -> Option<Self> {
        let detail = detail.into();
        Some(match code {
            ResultCode::NoError => return None,
            ResultCode::OutOfMemory => ServiceError::ResourceExhausted(detail),
            ResultCode::Incomplete => ServiceError::NotReady(detail),
            ResultCode::BadData => ServiceError::BadData(detail),
            ResultCode::OpFailed => ServiceError::BackendFailure(detail),
            ResultCode::BadState => ServiceError::InvalidState(detail),
            ResultCode::Unsupported => ServiceError::Unsupported(detail),
            ResultCode::ServiceUnavailable => ServiceError::ConnectionLost,
        })
    }
}

impl From<BackendError> for ServiceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unsupported(detail) => ServiceError::Unsupported(detail),
            BackendError::BadData(detail) => ServiceError::BadData(detail),
            BackendError::OutOfMemory(detail) => ServiceError::ResourceExhausted(detail),
            err @ (BackendError::Driver { .. } | BackendError::Execution(_)) => {
                ServiceError::BackendFailure(err.to_string())
            }
        }
    }
}

/// Closed set of result codes exchanged over the IPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ResultCode {
    NoError = 0,
    OutOfMemory = 1,
    Incomplete = 2,
    BadData = 4,
    OpFailed = 5,
    BadState = 6,
    Unsupported = 8,
    ServiceUnavailable = 9,
}

impl ResultCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => ResultCode::NoError,
            1 => ResultCode::OutOfMemory,
            2 => ResultCode::Incomplete,
            4 => ResultCode::BadData,
            5 => ResultCode::OpFailed,
            6 => ResultCode::BadState,
            8 => ResultCode::Unsupported,
            9 => ResultCode::ServiceUnavailable,
            _ => return None,
        })
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::NoError
    }
}

impl<T> From<&ServiceResult<T>> for ResultCode {
    fn from(result: &ServiceResult<T>) -> Self {
        match result {
            Ok(_) => ResultCode::NoError,
            Err(err) => err.result_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_survive_the_wire() {
        let errors = [
            ServiceError::invalid_state("finished"),
            ServiceError::bad_data("size"),
            ServiceError::unsupported("preference"),
            ServiceError::NotReady("input 0".into()),
            ServiceError::ResourceExhausted("limit".into()),
            ServiceError::BackendFailure("driver".into()),
            ServiceError::ConnectionLost,
        ];
        for err in errors {
            let code = err.result_code();
            assert_eq!(ResultCode::from_i32(code.as_i32()), Some(code));
            let rebuilt = ServiceError::from_result_code(code, "op").expect("error code");
            assert_eq!(rebuilt.result_code(), code);
        }
    }

    #[test]
    fn bad_index_collapses_to_bad_data_on_the_wire() {
        let err = ServiceError::bad_index(7, "operand out of range");
        assert_eq!(err.result_code(), ResultCode::BadData);
        assert!(ServiceError::from_result_code(ResultCode::NoError, "op").is_none());
        assert_eq!(ResultCode::from_i32(3), None);
    }
}
