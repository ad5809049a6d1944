use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::Preference;
use crate::error::{ResultCode, ServiceError, ServiceResult};
use crate::graph::FrozenGraph;
use crate::memory::{OperandLayout, SharedBuffer};

/// Correlates a reply with the request that produced it.
pub type RequestId = u64;

/// Opaque id of a service-side model, compilation or execution object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(pub u64);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Published by `Compilation.CreateExecution`: where every graph input and output lives inside
/// the shared execution region.
#[derive(Debug, Clone)]
pub struct ExecutionInitParams {
    pub handle: ObjectHandle,
    pub inputs: Vec<OperandLayout>,
    pub outputs: Vec<OperandLayout>,
    pub memory: SharedBuffer,
}

#[derive(Debug)]
pub enum Request {
    CreateModel,
    FinishModel {
        model: ObjectHandle,
        graph: FrozenGraph,
    },
    CreateCompilation {
        model: ObjectHandle,
    },
    FinishCompilation {
        compilation: ObjectHandle,
        preference: Preference,
    },
    CreateExecution {
        compilation: ObjectHandle,
    },
    StartCompute {
        execution: ObjectHandle,
    },
    Release {
        handle: ObjectHandle,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateModel => "CreateModel",
            Request::FinishModel { .. } => "Model.Finish",
            Request::CreateCompilation { .. } => "Model.CreateCompilation",
            Request::FinishCompilation { .. } => "Compilation.Finish",
            Request::CreateExecution { .. } => "Compilation.CreateExecution",
            Request::StartCompute { .. } => "Execution.StartCompute",
            Request::Release { .. } => "Release",
        }
    }
}

/// Successful payloads; failures travel as a [`ResultCode`] in the [`Reply`].
#[derive(Debug, Clone)]
pub enum Response {
    Model(ObjectHandle),
    Compilation(ObjectHandle),
    Execution(ExecutionInitParams),
    Done,
}

/// What the service sends back for every accepted request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: ResultCode,
    pub detail: Option<String>,
    pub payload: Option<Response>,
}

impl Reply {
    pub fn from_result(result: ServiceResult<Response>) -> Self {
        match result {
            Ok(payload) => Self {
                code: ResultCode::NoError,
                detail: None,
                payload: Some(payload),
            },
            Err(err) => Self {
                code: err.result_code(),
                detail: Some(err.to_string()),
                payload: None,
            },
        }
    }

    /// Converts back into a typed result on the caller side.
    pub fn into_result(self, operation: &str) -> ServiceResult<Response> {
        let error = match self.detail {
            Some(detail) => ServiceError::from_wire(self.code, format!("{operation}: {detail}")),
            None => ServiceError::from_result_code(self.code, operation),
        };
        if let Some(err) = error {
            return Err(err);
        }
        self.payload.ok_or_else(|| {
            ServiceError::invalid_state(format!("{operation} succeeded without a payload"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_replies_keep_code_and_detail() {
        let reply = Reply::from_result(Err(ServiceError::bad_index(3, "no such input")));
        assert_eq!(reply.code, ResultCode::BadData);
        let err = reply
            .into_result("Model.Finish")
            .expect_err("error reply");
        assert_eq!(err.result_code(), ResultCode::BadData);
        assert!(err.to_string().contains("no such input"));
    }

    #[test]
    fn successful_replies_carry_payload() {
        let reply = Reply::from_result(Ok(Response::Model(ObjectHandle(7))));
        assert!(reply.code.is_ok());
        match reply.into_result("CreateModel").expect("payload") {
            Response::Model(handle) => assert_eq!(handle, ObjectHandle(7)),
            other => panic!("unexpected response {other:?}"),
        }
    }
}
