//! Engine Configuration
//!
//! Knobs that change how a [`Scene`](crate::scene::Scene) propagates and
//! resolves. Every field has a default, so a partial JSON document is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Traversal order used by dirty propagation.
///
/// The set of dirtied entities is the same either way; only the order in
/// which they are reported differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationOrder {
    #[default]
    BreadthFirst,
    DepthFirst,
}

/// Configuration of a scene's dependency engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frame rate used to derive `$T` from `$F`.
    pub frames_per_second: f64,

    /// When an expression references a whole node by path, dirty the
    /// parameter whenever that node changes and cook the node before the
    /// parameter's owner.
    pub dependent_on_found_node: bool,

    /// Maximum length of a parameter-to-parameter reference chain followed
    /// during one evaluation.
    pub max_reference_depth: usize,

    pub propagation: PropagationOrder,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_per_second: 60.0,
            dependent_on_found_node: true,
            max_reference_depth: 64,
            propagation: PropagationOrder::default(),
        }
    }
}

/// Errors raised while loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frames_per_second must be positive, got {0}")]
    FrameRate(f64),
}

impl EngineConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.frames_per_second.is_finite() && self.frames_per_second > 0.0 {
            Ok(self)
        } else {
            Err(ConfigError::FrameRate(self.frames_per_second))
        }
    }
}
