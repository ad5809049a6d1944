//! Service configuration: defaults, JSON files and `NN_SERVICE_*` environment overrides.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendSelection;

/// Upper bound on any single shared region (constant blob or execution region).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 1 << 30;
pub const DEFAULT_REQUEST_QUEUE_DEPTH: usize = 64;

pub const ENV_BACKEND: &str = "NN_SERVICE_BACKEND";
pub const ENV_MAX_MEMORY: &str = "NN_SERVICE_MAX_MEMORY";
pub const ENV_PASSTHROUGH: &str = "NN_SERVICE_PASSTHROUGH";
pub const ENV_QUEUE_DEPTH: &str = "NN_SERVICE_QUEUE_DEPTH";

/// Behavior of the software reference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// Log the graph and buffers, leave outputs untouched.
    #[default]
    LogOnly,
    /// Copy input `k` into output `k`.
    Passthrough,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("malformed service config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub backend: BackendSelection,
    pub max_memory_bytes: usize,
    pub reference_mode: ReferenceMode,
    /// Capacity of the request channel between callers and the service loop.
    pub request_queue_depth: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: BackendSelection::Auto,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            reference_mode: ReferenceMode::LogOnly,
            request_queue_depth: DEFAULT_REQUEST_QUEUE_DEPTH,
        }
    }
}

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_positive(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let parsed: usize = value
        .trim()
        .parse()
        .map_err(|err: std::num::ParseIntError| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: err.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(parsed)
}

impl ServiceConfig {
    pub fn from_json_str(src: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(src)?)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|var| env::var(var).ok())
    }

    /// Applies `NN_SERVICE_*` overrides resolved through `lookup`. Blank values are ignored.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_BACKEND) {
            self.backend = BackendSelection::from(value);
        }
        if let Some(value) = get(ENV_MAX_MEMORY) {
            self.max_memory_bytes = parse_positive(ENV_MAX_MEMORY, &value)?;
        }
        if let Some(value) = get(ENV_PASSTHROUGH) {
            self.reference_mode = if parse_bool(&value) {
                ReferenceMode::Passthrough
            } else {
                ReferenceMode::LogOnly
            };
        }
        if let Some(value) = get(ENV_QUEUE_DEPTH) {
            self.request_queue_depth = parse_positive(ENV_QUEUE_DEPTH, &value)?;
        }
        Ok(self)
    }
}
