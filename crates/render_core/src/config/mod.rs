//! Configuration system
//!
//! Renderer settings are plain serde structs that can be loaded from TOML or
//! RON files through the [`Config`] trait.

use std::path::{Path, PathBuf};

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("ron") => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Parse configuration from a TOML document
    fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?,
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside the range the renderer accepts
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Persistent pipeline cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineCacheConfig {
    /// Whether the cache blob is read at startup and written at shutdown
    pub enabled: bool,
    /// Fixed location of the cache blob
    pub path: PathBuf,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("pipeline_cache.bin"),
        }
    }
}

/// Descriptor pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Number of descriptor sets each material pool holds before a new pool is added
    pub sets_per_pool: u32,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self { sets_per_pool: 16 }
    }
}

/// # Renderer Configuration
///
/// Settings consumed by [`crate::renderer::Renderer`] and the Vulkan backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frame contexts in the ring
    pub frames_in_flight: usize,
    /// Clear color of the swapchain render pass
    pub clear_color: [f32; 4],
    /// Clear depth of the swapchain render pass
    pub clear_depth: f32,
    /// Prefer a tear-free present mode
    pub vsync: bool,
    /// Whether to enable Vulkan validation layers (`None` follows the build type)
    pub enable_validation: Option<bool>,
    /// Pipeline cache persistence
    pub pipeline_cache: PipelineCacheConfig,
    /// Descriptor pool sizing
    pub descriptors: DescriptorConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the pipeline cache location
    pub fn with_pipeline_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_cache.path = path.into();
        self
    }

    /// Disable pipeline cache persistence
    pub fn without_pipeline_cache(mut self) -> Self {
        self.pipeline_cache.enabled = false;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "frames_in_flight",
                reason: "at least one frame context is required".to_string(),
            });
        }
        if self.descriptors.sets_per_pool == 0 {
            return Err(ConfigError::Invalid {
                field: "descriptors.sets_per_pool",
                reason: "pools must hold at least one set".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.clear_depth) {
            return Err(ConfigError::Invalid {
                field: "clear_depth",
                reason: format!("{} is outside [0, 1]", self.clear_depth),
            });
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Render Core".to_string(),
            frames_in_flight: crate::frame::FRAMES_IN_FLIGHT,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            clear_depth: 1.0,
            vsync: true,
            enable_validation: None,
            pipeline_cache: PipelineCacheConfig::default(),
            descriptors: DescriptorConfig::default(),
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            application_name = "Editor"
            clear_color = [1.0, 0.0, 0.0, 1.0]

            [pipeline_cache]
            path = "cache/editor.bin"
            "#,
        ).unwrap();

        assert_eq!(config.application_name, "Editor");
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert!(config.pipeline_cache.enabled);
        assert_eq!(config.pipeline_cache.path, PathBuf::from("cache/editor.bin"));
        assert_eq!(config.descriptors.sets_per_pool, 16);
    }

    #[test]
    fn validate_rejects_empty_ring() {
        let mut config = RendererConfig::default();
        config.frames_in_flight = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "frames_in_flight", .. })
        ));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let path = std::env::temp_dir().join("render_core_config_test.yaml");
        std::fs::write(&path, "application_name: nope").unwrap();
        let result = RendererConfig::load_from_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn ron_file_round_trip() {
        let path = std::env::temp_dir().join("render_core_config_test.ron");
        let config = RendererConfig::new("Viewer").with_clear_color([0.0, 0.0, 1.0, 1.0]);
        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
