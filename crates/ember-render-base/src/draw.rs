use ember_math::Mat4;
use ember_vk::vk;

use crate::material::Material;

/// An indexed draw of resident geometry, resolved from a scene drawable for one frame.
#[derive(Debug, Copy, Clone)]
pub struct IndexedDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub model: Mat4,
    pub material: Material,
    /// Index of the drawable in the scene it came from.
    pub object_id: u32,
}

impl IndexedDraw {
    /// Binds the geometry buffers and issues the draw. Push constants must already be set.
    pub fn record(&self, device: &ember_vk::ash::Device, cb: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cb, 0, &[self.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cb, self.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(
                cb,
                self.index_count,
                1,
                self.first_index,
                self.vertex_offset,
                0,
            );
        }
    }
}
