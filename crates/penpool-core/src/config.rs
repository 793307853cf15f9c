//! Tool settings, read once when tools are created.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Default ink width in world units.
pub const DEFAULT_INK_WIDTH: f32 = 0.005;

/// Default collision layer for committed ink.
pub const DEFAULT_INK_LAYER: u32 = 9;

/// Default collision layer for erase volumes.
pub const DEFAULT_ERASER_LAYER: u32 = 8;

/// Default name prefix of committed strokes.
pub const DEFAULT_INK_PREFIX: &str = "Ink";

/// Default radius of the erase volume used by local sweeps.
pub const DEFAULT_ERASER_RADIUS: f32 = 0.01;

/// Settings errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings shared by every tool of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Full width of the ink ribbon.
    pub ink_width: f32,
    /// Layer tag that marks committed ink for erase matching.
    pub ink_layer: u32,
    /// Layer tag of the erase volume.
    pub eraser_layer: u32,
    /// Prefix of stroke names.
    pub ink_prefix: String,
    /// Session-unique pool identifier. Stroke pools are named after it.
    pub ink_pool_name: String,
    /// Whether double-click gestures start out enabled.
    pub double_click_enabled: bool,
    /// Radius of the erase volume for [`crate::SessionCoordinator::erase_at`].
    pub eraser_radius: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ink_width: DEFAULT_INK_WIDTH,
            ink_layer: DEFAULT_INK_LAYER,
            eraser_layer: DEFAULT_ERASER_LAYER,
            ink_prefix: DEFAULT_INK_PREFIX.to_string(),
            ink_pool_name: generate_pool_name(),
            double_click_enabled: true,
            eraser_radius: DEFAULT_ERASER_RADIUS,
        }
    }
}

impl Settings {
    /// Parse settings from a JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Name of the stroke pool belonging to a tool.
    pub fn pool_name(&self, tool: crate::ToolId) -> String {
        format!("{}#{}", self.ink_pool_name, tool)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ink_width.is_finite() && self.ink_width > 0.0) {
            return Err(ConfigError::Invalid {
                field: "ink_width",
                reason: format!("must be positive, got {}", self.ink_width),
            });
        }
        if !(self.eraser_radius.is_finite() && self.eraser_radius >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "eraser_radius",
                reason: format!("must not be negative, got {}", self.eraser_radius),
            });
        }
        if self.ink_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "ink_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ink_pool_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "ink_pool_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Generate a fresh pool identifier for this session.
fn generate_pool_name() -> String {
    format!("obj_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.ink_width, 0.005);
        assert_eq!(settings.ink_layer, 9);
        assert_eq!(settings.ink_prefix, "Ink");
        assert!(settings.ink_pool_name.starts_with("obj_"));
        assert!(settings.double_click_enabled);
    }

    #[test]
    fn test_pool_names_are_unique_per_session() {
        let a = Settings::default();
        let b = Settings::default();
        assert_ne!(a.ink_pool_name, b.ink_pool_name);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = Settings::from_json(r#"{"ink_width": 0.01, "double_click_enabled": false}"#).unwrap();
        assert_eq!(settings.ink_width, 0.01);
        assert!(!settings.double_click_enabled);
        assert_eq!(settings.ink_layer, DEFAULT_INK_LAYER);
    }

    #[test]
    fn test_rejects_bad_width() {
        let err = Settings::from_json(r#"{"ink_width": 0.0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "ink_width", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ink_prefix": "Stroke", "ink_pool_name": "obj_test"}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.ink_prefix, "Stroke");
        assert_eq!(settings.pool_name(3), "obj_test#3");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
