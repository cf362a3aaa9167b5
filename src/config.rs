// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing or partial config.toml is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// "auto" lets the surface negotiation decide
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Upper bound on the per-frame fence wait before the device is considered lost
    pub fence_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "auto".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout_ms: 5000,
        }
    }
}

/// Compiled SPIR-V locations (produced by build.rs)
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honored in debug builds
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

/// Where the configuration came from. Loading happens before the logger exists,
/// so the outcome is kept and reported once logging is up.
#[derive(Debug)]
pub enum ConfigOrigin {
    File(PathBuf),
    Missing(PathBuf),
    Invalid(anyhow::Error),
}

impl ConfigOrigin {
    pub fn log(&self) {
        match self {
            ConfigOrigin::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigOrigin::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigOrigin::Invalid(e) => {
                log::warn!("Failed to load config.toml: {:#}. Using defaults.", e)
            }
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> (Self, ConfigOrigin) {
        Self::load_or_default("config.toml")
    }

    /// Never fails; a bad file yields the defaults and an `Invalid` origin
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigOrigin) {
        let path = path.as_ref();

        if !path.exists() {
            return (Config::default(), ConfigOrigin::Missing(path.to_path_buf()));
        }

        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigOrigin::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigOrigin::Invalid(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Present mode override, `None` for automatic selection
    pub fn preferred_present_mode(&self) -> Option<vk::PresentModeKHR> {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "auto" | "" => None,
            "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
            _ => {
                log::warn!(
                    "Unknown present mode '{}', using automatic selection",
                    self.graphics.present_mode
                );
                None
            }
        }
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.graphics.fence_timeout_ms.max(1))
    }

    /// Validation is a debug-build feature
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "Vulkan");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!(config.graphics.fence_timeout_ms, 5000);
        assert_eq!(config.shaders.vertex, Path::new("shaders/triangle.vert.spv"));
        assert_eq!(config.preferred_present_mode(), None);
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Triangle"

            [graphics]
            present_mode = "FIFO"
            clear_color = [0.1, 0.2, 0.3, 1.0]

            [debug]
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.graphics.fence_timeout_ms, 5000);
        assert_eq!(config.preferred_present_mode(), Some(vk::PresentModeKHR::FIFO));
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
        assert!(config.debug.show_fps);
    }

    #[test]
    fn unknown_present_mode_means_auto() {
        let config = Config::parse("[graphics]\npresent_mode = \"vsync-please\"\n").unwrap();
        assert_eq!(config.preferred_present_mode(), None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("config.toml")).unwrap();
        assert_eq!(config.window.title, "Vulkan");
    }

    #[test]
    fn file_on_disk_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[graphics]\nfence_timeout_ms = 250\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.fence_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn malformed_file_on_disk_falls_back_with_the_error_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, origin) = Config::load_or_default(&path);
        assert_eq!(config.window.width, 800);
        match origin {
            ConfigOrigin::Invalid(e) => {
                assert!(format!("{:#}", e).contains("Failed to parse config file"))
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn load_reports_where_the_config_came_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let (_, origin) = Config::load_or_default(&path);
        assert!(matches!(origin, ConfigOrigin::Missing(p) if p == path));

        std::fs::write(&path, "[window]\ntitle = \"Triangle\"\n").unwrap();
        let (config, origin) = Config::load_or_default(&path);
        assert_eq!(config.window.title, "Triangle");
        assert!(matches!(origin, ConfigOrigin::File(p) if p == path));
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let config = Config::parse("[graphics]\nfence_timeout_ms = 0\n").unwrap();
        assert_eq!(config.fence_timeout(), Duration::from_millis(1));
    }
}
