//! Application configuration.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tessera_core::constants::{DEFAULT_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT};

/// Application configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// FIFO presentation when set, MAILBOX otherwise.
    pub vsync: bool,
    /// Frames that may be in flight at once (clamped to 1..=3).
    pub frames_in_flight: usize,
    /// Requested swapchain image count (0 lets the surface decide).
    pub swapchain_images: u32,
    /// Render with a depth buffer.
    pub depth_test: bool,
    /// Clear color, RGBA.
    pub clear_color: [f32; 4],
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Upper bound on every fence wait, in nanoseconds.
    pub fence_timeout_ns: u64,
    /// Exit after this many presented frames.
    pub max_frames: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Tessera".to_string(),
            width: 800,
            height: 600,
            vsync: true,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            swapchain_images: 3,
            depth_test: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            validation: cfg!(debug_assertions),
            fence_timeout_ns: u64::MAX,
            max_frames: None,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        toml::from_str(source).context("Invalid configuration")
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("In {}", path.display()))
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Stop after `frames` presented frames.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Frames in flight actually used.
    pub fn effective_frames_in_flight(&self) -> usize {
        self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.effective_frames_in_flight(), 2);
        assert_eq!(config.fence_timeout_ns, u64::MAX);
    }

    #[test]
    fn partial_document_overrides_only_given_keys() {
        let config = AppConfig::from_toml_str(
            r#"
            title = "Viewer"
            vsync = false
            frames_in_flight = 3
            clear_color = [0.1, 0.2, 0.3, 1.0]
            max_frames = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.title, "Viewer");
        assert!(!config.vsync);
        assert_eq!(config.effective_frames_in_flight(), 3);
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.max_frames, Some(120));
        assert_eq!(config.width, 800);
        assert!(config.depth_test);
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        assert_eq!(
            AppConfig::default()
                .with_frames_in_flight(0)
                .effective_frames_in_flight(),
            1
        );
        assert_eq!(
            AppConfig::default()
                .with_frames_in_flight(8)
                .effective_frames_in_flight(),
            3
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AppConfig::from_toml_str("frames_in_fligth = 2").is_err());
        assert!(AppConfig::from_toml_str("width = -1").is_err());
    }

    #[test]
    fn builder_methods() {
        let config = AppConfig::new("Demo")
            .with_size(1024, 768)
            .with_vsync(false)
            .with_validation(false)
            .with_max_frames(10);
        assert_eq!(config.title, "Demo");
        assert_eq!((config.width, config.height), (1024, 768));
        assert!(!config.vsync);
        assert!(!config.validation);
        assert_eq!(config.max_frames, Some(10));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = AppConfig::load("/nonexistent/tessera.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/tessera.toml"));
    }
}
