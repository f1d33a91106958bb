pub mod bindings;
pub mod forward;
pub mod frame;
pub mod mesh;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod slot;
pub mod strategy;

#[cfg(test)]
mod tests;

pub use ember_render_base::{Material, Vertex, FRAMES_IN_FLIGHT};
pub use ember_render_camera::Camera;
pub use ember_render_lighting::PointLight;
pub use ember_render_shadows::{DepthBias, ShadowSettings};

pub mod prelude {
    pub use crate::forward::DebugMode;
    pub use crate::renderer::*;
    pub use crate::scene::*;
    pub use crate::settings::*;
    pub use crate::strategy::*;
    pub use crate::{Camera, DepthBias, Material, PointLight, ShadowSettings, Vertex};
}
