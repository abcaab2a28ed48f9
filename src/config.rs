//! Configuration for the canvas

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::window::{CellGeometry, Placement, WindowOptions};

/// Which transport draws images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Sixel escape sequences on standard output
    #[default]
    Sixel,
    /// GPU texture composited into an overlay window
    Gpu,
}

impl BackendKind {
    /// Parse backend name from string
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sixel" => Some(BackendKind::Sixel),
            "gpu" | "overlay" => Some(BackendKind::Gpu),
            _ => None,
        }
    }
}

/// Canvas configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport used for new windows
    pub backend: BackendKind,
    /// Scale-to-fit limit in pixels, 0 for unbounded
    pub max_width: u32,
    /// Scale-to-fit limit in pixels, 0 for unbounded
    pub max_height: u32,
    /// Terminal cell metrics
    pub cell: CellGeometry,
    /// Sixel encoder settings
    pub sixel: SixelConfig,
    /// Overlay window settings
    pub overlay: OverlayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            max_width: 1280,
            max_height: 720,
            cell: CellGeometry::default(),
            sixel: SixelConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

/// Sixel encoder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SixelConfig {
    /// Colour registers to use (2-256)
    pub max_colors: u16,
    /// Diffuse quantization error when the palette is reduced
    pub dither: bool,
}

impl Default for SixelConfig {
    fn default() -> Self {
        Self {
            max_colors: 256,
            dither: true,
        }
    }
}

/// Overlay window configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Map windows as soon as they are created
    pub show_on_create: bool,
    /// Native id of the terminal window to parent overlays to
    pub parent_window: Option<u64>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from default location or return default config
    pub fn load_or_default() -> Self {
        // Try to load from ~/.config/mochi-canvas/config.json
        if let Some(config_dir) = dirs_config_path() {
            let config_path = config_dir.join("config.json");
            if config_path.exists() {
                match Self::load(&config_path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Ignoring {}: {}", config_path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=256).contains(&self.sixel.max_colors) {
            return Err(ConfigError::Invalid(format!(
                "sixel.max_colors must be between 2 and 256, got {}",
                self.sixel.max_colors
            )));
        }
        if self.cell.width == 0 || self.cell.height == 0 {
            return Err(ConfigError::Invalid(
                "cell width and height must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Window options for an image at `col`/`row`.
    pub fn window_options(&self, col: u16, row: u16) -> WindowOptions {
        WindowOptions {
            placement: Placement { col, row },
            cell: self.cell,
            show_on_create: match self.backend {
                BackendKind::Sixel => true,
                BackendKind::Gpu => self.overlay.show_on_create,
            },
        }
    }
}

/// Get the configuration directory path
fn dirs_config_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config").join("mochi-canvas"))
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.backend, BackendKind::Sixel);
        assert_eq!(config.sixel.max_colors, 256);
        assert!(!config.overlay.show_on_create);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendKind::from_name("SIXEL"), Some(BackendKind::Sixel));
        assert_eq!(BackendKind::from_name("overlay"), Some(BackendKind::Gpu));
        assert_eq!(BackendKind::from_name("kitty"), None);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"backend": "gpu", "sixel": {"dither": false}}"#).unwrap();
        assert_eq!(config.backend, BackendKind::Gpu);
        assert!(!config.sixel.dither);
        assert_eq!(config.sixel.max_colors, 256);
        assert_eq!(config.max_width, 1280);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = Config::default();
        config.sixel.max_colors = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.cell.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.max_width = 640;
        config.overlay.parent_window = Some(0x2a00007);
        config.save(&path).unwrap();

        let restored = Config::load(&path).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_window_options_follow_backend() {
        let mut config = Config::default();
        assert!(config.window_options(1, 2).show_on_create);
        config.backend = BackendKind::Gpu;
        let options = config.window_options(1, 2);
        assert!(!options.show_on_create);
        assert_eq!(options.placement, Placement { col: 1, row: 2 });
    }
}
