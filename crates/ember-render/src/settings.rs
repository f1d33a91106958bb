use std::{
    io,
    path::{Path, PathBuf},
};

use ember_render_base::shader_constants::{
    DEFAULT_MAX_LIGHTS, DEFAULT_MAX_LIGHTS_PER_TILE, DEFAULT_TILE_SIZE, MAX_SHADOW_CASCADES,
};
use ember_render_shadows::ShadowSettings;
use ember_vk::surface::PresentMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SHADER_DIRECTORY: &str = "./shaders/spv";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unable to access settings file `{path}`: {err}")]
    Io { path: PathBuf, err: io::Error },
    #[error("malformed settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("unable to serialize settings: {0}")]
    Serialize(#[from] ron::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Initial surface width.
    pub width: u32,
    /// Initial surface height.
    pub height: u32,
    /// Width and height of a light culling tile in pixels.
    pub tile_size: u32,
    /// Lights past this many in a single tile are dropped.
    pub max_lights_per_tile: u32,
    /// Lights past this many in a scene are dropped.
    pub max_lights: u32,
    /// Preferred presentation mode. FIFO is used if it isn't supported.
    pub present_mode: PresentMode,
    /// Enables validation layers and debug object names.
    pub debug: bool,
    /// Directory containing compiled shaders.
    pub shader_dir: PathBuf,
    /// Pretend the device has no compute support, forcing the unculled forward path.
    pub force_fallback: bool,
    pub shadows: ShadowSettings,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            tile_size: DEFAULT_TILE_SIZE,
            max_lights_per_tile: DEFAULT_MAX_LIGHTS_PER_TILE,
            max_lights: DEFAULT_MAX_LIGHTS,
            present_mode: PresentMode::Fifo,
            debug: cfg!(debug_assertions),
            shader_dir: PathBuf::from(DEFAULT_SHADER_DIRECTORY),
            force_fallback: false,
            shadows: ShadowSettings::default(),
        }
    }
}

impl RendererSettings {
    /// Loads settings from a RON file. A missing file gives the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(SettingsError::Io {
                    path: path.into(),
                    err,
                })
            }
        };

        let settings: RendererSettings = ron::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let contents = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        std::fs::write(path, contents).map_err(|err| SettingsError::Io {
            path: path.into(),
            err,
        })
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: &str| Err(SettingsError::Invalid(msg.into()));

        if self.width == 0 || self.height == 0 {
            return invalid("surface dimensions must be non-zero");
        }
        if self.tile_size == 0 {
            return invalid("tile size must be non-zero");
        }
        if self.max_lights_per_tile == 0 {
            return invalid("max lights per tile must be non-zero");
        }
        if self.max_lights == 0 {
            return invalid("max lights must be non-zero");
        }
        if self.shadows.cascades == 0 || self.shadows.cascades > MAX_SHADOW_CASCADES {
            return Err(SettingsError::Invalid(format!(
                "cascade count must be between 1 and {MAX_SHADOW_CASCADES}, got {}",
                self.shadows.cascades
            )));
        }
        if self.shadows.resolution == 0 {
            return invalid("shadow map resolution must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.shadows.split_lambda) {
            return invalid("split lambda must be in [0, 1]");
        }

        Ok(())
    }
}
