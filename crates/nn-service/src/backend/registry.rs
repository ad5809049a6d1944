//! Backend registry for startup-time backend selection.
//!
//! Backend crates register a constructor under a name and a priority. The registry is an
//! ordinary value owned by whoever boots the service, so two services in one process never
//! share backend state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{BackendError, BackendResult, GraphCompilerBackend, UnsupportedBackend};

/// Factory that probes the platform and creates a backend instance.
///
/// Returning an error means the backend is not usable here; `Auto` selection then moves on.
pub type BackendConstructor =
    Box<dyn Fn() -> BackendResult<Arc<dyn GraphCompilerBackend>> + Send + Sync>;

/// Which backend a service should run on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackendSelection {
    /// Highest-priority registered backend whose probe succeeds.
    #[default]
    Auto,
    Named(String),
}

impl From<String> for BackendSelection {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            BackendSelection::Auto
        } else {
            BackendSelection::Named(trimmed.to_string())
        }
    }
}

impl From<BackendSelection> for String {
    fn from(selection: BackendSelection) -> Self {
        selection.to_string()
    }
}

impl FromStr for BackendSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BackendSelection::from(s.to_string()))
    }
}

impl fmt::Display for BackendSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSelection::Auto => f.write_str("auto"),
            BackendSelection::Named(name) => f.write_str(name),
        }
    }
}

struct RegisteredBackend {
    priority: i32,
    constructor: BackendConstructor,
}

/// Maps backend names to constructors.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, RegisteredBackend>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.list_backends())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, priority: i32, constructor: F)
    where
        F: Fn() -> BackendResult<Arc<dyn GraphCompilerBackend>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(backend = %name, priority, "registering graph backend");
        self.backends.insert(
            name,
            RegisteredBackend {
                priority,
                constructor: Box::new(constructor),
            },
        );
    }

    /// Creates a backend by name.
    ///
    /// Returns `None` if no backend with the given name has been registered.
    pub fn create(&self, name: &str) -> Option<BackendResult<Arc<dyn GraphCompilerBackend>>> {
        let entry = self.backends.get(name)?;
        Some((entry.constructor)())
    }

    /// Registered backend names, highest priority first.
    pub fn list_backends(&self) -> Vec<String> {
        let mut entries: Vec<(&String, i32)> = self
            .backends
            .iter()
            .map(|(name, entry)| (name, entry.priority))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries.into_iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn has_backend(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Resolves `selection` into a backend instance.
    ///
    /// A named selection must exist and construct successfully. `Auto` tries every backend in
    /// priority order and falls back to [`UnsupportedBackend`] when none is usable.
    pub fn select(
        &self,
        selection: &BackendSelection,
    ) -> BackendResult<Arc<dyn GraphCompilerBackend>> {
        match selection {
            BackendSelection::Named(name) => {
                let backend = self.create(name).ok_or_else(|| {
                    BackendError::unsupported(format!(
                        "backend '{name}' is not registered (available: {:?})",
                        self.list_backends()
                    ))
                })??;
                info!(backend = backend.backend_name(), "selected graph backend");
                Ok(backend)
            }
            BackendSelection::Auto => {
                for name in self.list_backends() {
                    match self.create(&name) {
                        Some(Ok(backend)) => {
                            info!(backend = backend.backend_name(), "auto-selected graph backend");
                            return Ok(backend);
                        }
                        Some(Err(err)) => {
                            debug!(backend = %name, error = %err, "backend probe failed");
                        }
                        None => {}
                    }
                }
                info!("no graph backend available; using the unsupported stub");
                Ok(Arc::new(UnsupportedBackend))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub() -> BackendResult<Arc<dyn GraphCompilerBackend>> {
        Ok(Arc::new(UnsupportedBackend))
    }

    #[test]
    fn selection_parses_auto_and_names() {
        assert_eq!(
            "auto".parse::<BackendSelection>().expect("infallible"),
            BackendSelection::Auto
        );
        assert_eq!(BackendSelection::from(" ".to_string()), BackendSelection::Auto);
        assert_eq!(
            BackendSelection::from("reference".to_string()),
            BackendSelection::Named("reference".into())
        );
        let json = serde_json::to_string(&BackendSelection::Named("accelerator".into()))
            .expect("serialize");
        assert_eq!(json, "\"accelerator\"");
    }

    #[test]
    fn backends_are_listed_by_priority() {
        let mut registry = BackendRegistry::new();
        registry.register("low", 1, stub);
        registry.register("high", 10, stub);
        registry.register("mid", 5, stub);
        assert_eq!(registry.list_backends(), vec!["high", "mid", "low"]);
        assert!(registry.has_backend("mid"));
        assert!(!registry.has_backend("missing"));
        assert!(registry.create("missing").is_none());
    }

    #[test]
    fn auto_skips_failing_probes_and_falls_back() {
        let mut registry = BackendRegistry::new();
        registry.register("broken", 100, || {
            Err(BackendError::driver(-1, "no device"))
        });
        let backend = registry
            .select(&BackendSelection::Auto)
            .expect("fallback stub");
        assert_eq!(backend.backend_name(), "unsupported");

        let err = registry
            .select(&BackendSelection::Named("broken".into()))
            .err()
            .expect("named probe failure propagates");
        assert!(matches!(err, BackendError::Driver { status: -1, .. }));

        let err = registry
            .select(&BackendSelection::Named("nope".into()))
            .err()
            .expect("unregistered name");
        assert!(matches!(err, BackendError::Unsupported(_)));
    }
}
