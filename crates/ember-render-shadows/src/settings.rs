use ember_math::Vec3;
use ember_render_base::shader_constants::MAX_SHADOW_CASCADES;
use serde::{Deserialize, Serialize};

use crate::cascades::light_direction_from_angles;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Number of cascades. At most `MAX_SHADOW_CASCADES`.
    pub cascades: usize,
    /// Width and height of each cascade's depth map in texels.
    pub resolution: u32,
    /// Blend between logarithmic (`1.0`) and uniform (`0.0`) split placement.
    pub split_lambda: f32,
    /// Constant depth bias applied to every cascade.
    pub depth_bias_constant: f32,
    /// Largest bias allowed. `0.0` disables clamping.
    pub depth_bias_clamp: f32,
    /// Sun direction angles in degrees.
    pub light_yaw: f32,
    pub light_pitch: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            cascades: MAX_SHADOW_CASCADES,
            resolution: 2048,
            split_lambda: 0.95,
            depth_bias_constant: 1.345,
            depth_bias_clamp: 0.0,
            light_yaw: 225.0,
            light_pitch: 45.0,
        }
    }
}

impl ShadowSettings {
    #[inline]
    pub fn light_direction(&self) -> Vec3 {
        light_direction_from_angles(self.light_yaw, self.light_pitch)
    }
}
