use crate::backend::{BackendError, BackendResult, CompiledGraph, GraphCompilerBackend, Preference};
use crate::graph::FrozenGraph;

/// Stand-in used when no backend is available on this platform; every compile fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

impl GraphCompilerBackend for UnsupportedBackend {
    fn backend_name(&self) -> &str {
        "unsupported"
    }

    fn supports_preference(&self, _preference: Preference) -> bool {
        false
    }

    fn compile(
        &self,
        _graph: &FrozenGraph,
        preference: Preference,
    ) -> BackendResult<Box<dyn CompiledGraph>> {
        Err(BackendError::unsupported(format!(
            "no graph backend is available on this platform (preference {preference})"
        )))
    }
}
