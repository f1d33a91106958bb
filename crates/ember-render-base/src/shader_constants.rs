//! Constants shared between the renderer and the GLSL sources in `shaders/`. Keep the two in
//! sync when changing anything here.

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound on shadow cascades. Shaders size their cascade arrays with this.
pub const MAX_SHADOW_CASCADES: usize = 4;

pub const DEFAULT_TILE_SIZE: u32 = 16;

pub const DEFAULT_MAX_LIGHTS_PER_TILE: u32 = 1024;

pub const DEFAULT_MAX_LIGHTS: u32 = 1024;

/// Specialization constant ids for the light culling work group size. Both are set to the tile
/// size.
pub const TILE_SIZE_X_CONSTANT_ID: u32 = 0;
pub const TILE_SIZE_Y_CONSTANT_ID: u32 = 1;

/// Global set bindings. The culling pass uses the first four with the same numbers.
pub const CAMERA_UBO_BINDING: u32 = 0;
pub const LIGHTS_BINDING: u32 = 1;
pub const LIGHT_INDICES_BINDING: u32 = 2;
pub const TILE_COUNTS_BINDING: u32 = 3;
pub const LIGHTING_UBO_BINDING: u32 = 4;
pub const SHADOW_UBO_BINDING: u32 = 5;
pub const SHADOW_MAPS_BINDING: u32 = 6;

/// Vertex attribute locations.
pub const POSITION_LOCATION: u32 = 0;
pub const NORMAL_LOCATION: u32 = 1;
