use crate::backend::Preference;
use crate::client::Execution;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::{Connection, ObjectHandle, Request, Response};

/// Caller proxy for a service-side compilation.
#[derive(Debug)]
pub struct Compilation {
    connection: Connection,
    handle: ObjectHandle,
    preference: Option<Preference>,
}

impl Compilation {
    pub(crate) fn new(connection: Connection, handle: ObjectHandle) -> Self {
        Self {
            connection,
            handle,
            preference: None,
        }
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Preference the compilation was finished with.
    pub fn preference(&self) -> Option<Preference> {
        self.preference
    }

    pub async fn finish(&mut self, preference: Preference) -> ServiceResult<()> {
        self.connection
            .call(Request::FinishCompilation {
                compilation: self.handle,
                preference,
            })
            .await?;
        self.preference = Some(preference);
        Ok(())
    }

    pub async fn create_execution(&self) -> ServiceResult<Execution> {
        match self
            .connection
            .call(Request::CreateExecution {
                compilation: self.handle,
            })
            .await?
        {
            Response::Execution(params) => Execution::new(self.connection.clone(), params),
            other => Err(ServiceError::invalid_state(format!(
                "Compilation.CreateExecution answered with {other:?}"
            ))),
        }
    }
}

impl Drop for Compilation {
    fn drop(&mut self) {
        self.connection.release(self.handle);
    }
}
