use ember_math::{Mat4, Vec3};
use ember_render_base::{IndexedDraw, Material};
use ember_render_camera::Camera;
use ember_vk::vk;
use ember_render_lighting::PointLight;
use serde::{Deserialize, Serialize};

/// Handle to geometry uploaded with [`Renderer::upload_mesh`](crate::renderer::Renderer::upload_mesh).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshHandle(pub(crate) u32);

/// A range of a resident mesh drawn with one transform.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Drawable {
    pub mesh: MeshHandle,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub model: Mat4,
    pub material: Material,
}

/// Everything the renderer needs from the scene for one frame. Must not change while the frame
/// is being recorded, which borrowing guarantees.
#[derive(Debug, Copy, Clone)]
pub struct SceneSnapshot<'a> {
    pub camera: Camera,
    pub lights: &'a [PointLight],
    /// Direction the sun light travels in.
    pub light_direction: Vec3,
    pub drawables: &'a [Drawable],
}

impl MeshHandle {
    #[inline(always)]
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl Drawable {
    /// Draws every index of a mesh.
    #[inline]
    pub fn whole(mesh: MeshHandle, index_count: u32, model: Mat4) -> Self {
        Self {
            mesh,
            first_index: 0,
            index_count,
            vertex_offset: 0,
            model,
            material: Material::default(),
        }
    }

    #[inline]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    /// Determines if the index range lies within a mesh with `mesh_index_count` indices.
    #[inline]
    pub fn fits(&self, mesh_index_count: u32) -> bool {
        self.first_index
            .checked_add(self.index_count)
            .map_or(false, |end| end <= mesh_index_count)
    }

    /// The draw of this drawable's range out of the given mesh buffers.
    #[inline]
    pub fn to_draw(
        &self,
        vertex_buffer: vk::Buffer,
        index_buffer: vk::Buffer,
        object_id: u32,
    ) -> IndexedDraw {
        IndexedDraw {
            vertex_buffer,
            index_buffer,
            first_index: self.first_index,
            index_count: self.index_count,
            vertex_offset: self.vertex_offset,
            model: self.model,
            material: self.material,
            object_id,
        }
    }
}
