use ember_render_camera::Camera;
use ember_render_lighting::{
    reference::{CulledLights, LightAssignment},
    tiles::TileGrid,
    PointLight,
};
use ember_vk::capabilities::DeviceCapabilities;

use crate::settings::RendererSettings;

/// How frames are rendered. Chosen once when the renderer is created and never re-checked per
/// frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderStrategy {
    /// Shadowed forward shading with lights culled per screen tile by a compute pass.
    ForwardPlus,
    /// Every fragment considers every light.
    Forward { shadows: bool },
}

impl RenderStrategy {
    /// Picks the best strategy the device supports.
    pub fn negotiate(
        capabilities: &DeviceCapabilities,
        settings: &RendererSettings,
        grid: &TileGrid,
    ) -> Self {
        let capabilities = if settings.force_fallback {
            capabilities.without_compute()
        } else {
            *capabilities
        };

        if !capabilities.supports_tile_work_groups(grid.tile_size()) {
            return RenderStrategy::Forward { shadows: true };
        }

        // Every list must be addressable from a single storage buffer binding
        if grid.index_buffer_size() > capabilities.max_storage_buffer_range as u64 {
            return RenderStrategy::Forward { shadows: true };
        }

        RenderStrategy::ForwardPlus
    }

    #[inline(always)]
    pub fn tiled(&self) -> bool {
        matches!(self, RenderStrategy::ForwardPlus)
    }

    #[inline(always)]
    pub fn shadows(&self) -> bool {
        match self {
            RenderStrategy::ForwardPlus => true,
            RenderStrategy::Forward { shadows } => *shadows,
        }
    }

    /// Same strategy with tiled culling turned off.
    #[inline]
    pub fn without_culling(self) -> Self {
        RenderStrategy::Forward {
            shadows: self.shadows(),
        }
    }

    /// The next simpler strategy, or `None` if this is already the simplest one.
    ///
    /// Losing shadows always loses culling too.
    pub fn downgrade(self) -> Option<Self> {
        match self {
            RenderStrategy::ForwardPlus => Some(RenderStrategy::Forward { shadows: true }),
            RenderStrategy::Forward { shadows: true } => {
                Some(RenderStrategy::Forward { shadows: false })
            }
            RenderStrategy::Forward { shadows: false } => None,
        }
    }

    /// Lights each tile is shaded with under this strategy, computed on the CPU with the same
    /// test the culling shader runs.
    pub fn assign_lights(
        &self,
        grid: &TileGrid,
        camera: &Camera,
        lights: &[PointLight],
    ) -> LightAssignment {
        if self.tiled() {
            LightAssignment::Tiled(CulledLights::cull(grid, camera, lights))
        } else {
            LightAssignment::Unculled {
                num_lights: lights.len() as u32,
            }
        }
    }

    /// Fragment shader implementing the strategy.
    pub fn fragment_shader(&self) -> &'static str {
        match self {
            RenderStrategy::ForwardPlus => "forward_plus.frag",
            RenderStrategy::Forward { shadows: true } => "forward.frag",
            RenderStrategy::Forward { shadows: false } => "forward_unshadowed.frag",
        }
    }
}

impl std::fmt::Display for RenderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderStrategy::ForwardPlus => write!(f, "forward+"),
            RenderStrategy::Forward { shadows: true } => write!(f, "forward"),
            RenderStrategy::Forward { shadows: false } => write!(f, "forward (unshadowed)"),
        }
    }
}
