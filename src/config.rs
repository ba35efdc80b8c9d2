// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and field has a default, so a partial (or missing) file is
// fine. Config::engine() turns the graphics section into the EngineConfig the
// renderer core consumes.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use vk_engine::{EngineConfig, PresentModePreference};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub assets: AssetsConfig,
    pub run: RunConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vk-engine".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Winding order of front-facing triangles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winding {
    CounterClockwise,
    Clockwise,
}

impl From<Winding> for vk::FrontFace {
    fn from(winding: Winding) -> Self {
        match winding {
            Winding::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            Winding::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub depth_test: bool,
    pub front_face: Winding,
    pub present_mode_preference: PresentModePreference,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.1, 0.1, 1.0],
            max_frames_in_flight: 2,
            depth_test: true,
            front_face: Winding::CounterClockwise,
            present_mode_preference: PresentModePreference::Mailbox,
            vertex_shader: PathBuf::from("shaders/shader.vert.spv"),
            fragment_shader: PathBuf::from("shaders/shader.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vk_engine.log".to_string(),
            show_fps: true,
        }
    }
}

/// Model and texture to render; unset means the built-in quad / white texel
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AssetsConfig {
    pub model: Option<PathBuf>,
    pub texture: Option<PathBuf>,
}

/// How to run
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Render this many frames on the simulated device and exit
    pub headless_frames: Option<u32>,
}

impl Config {
    /// Load configuration from file, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Settings for the renderer core
    pub fn engine(&self) -> EngineConfig {
        let graphics = &self.graphics;
        EngineConfig {
            frames_in_flight: graphics.max_frames_in_flight.max(1),
            clear_color: graphics.clear_color,
            depth_test: graphics.depth_test,
            front_face: graphics.front_face.into(),
            present_mode: graphics.present_mode_preference,
            vertex_shader: graphics.vertex_shader.clone(),
            fragment_shader: graphics.fragment_shader.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load_from_path(dir.path().join("config.toml")).unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert!(config.run.headless_frames.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
            [graphics]
            clear_color = [0.0, 0.0, 0.0, 1.0]
            present_mode_preference = "fifo"
            front_face = "clockwise"

            [assets]
            model = "assets/room.obj"

            [run]
            headless_frames = 10
            "#,
        );

        let config = Config::load_from_path(file.path()).unwrap();

        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.graphics.present_mode_preference, PresentModePreference::Fifo);
        assert!(config.graphics.depth_test);
        assert_eq!(config.assets.model, Some(PathBuf::from("assets/room.obj")));
        assert!(config.assets.texture.is_none());
        assert_eq!(config.run.headless_frames, Some(10));

        let engine = config.engine();
        assert_eq!(engine.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(engine.present_mode, PresentModePreference::Fifo);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("[graphics]\nmax_frames_in_flight = \"two\"\n");

        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn frames_in_flight_is_clamped_to_one() {
        let file = write_config("[graphics]\nmax_frames_in_flight = 0\n");

        let config = Config::load_from_path(file.path()).unwrap();

        assert_eq!(config.engine().frames_in_flight, 1);
    }
}
