use bytemuck::{Pod, Zeroable};
use ember_math::Vec3;
use ember_vk::vk;

use crate::shader_constants::{NORMAL_LOCATION, POSITION_LOCATION};

/// Vertex format shared by every geometry pass.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
}

unsafe impl Pod for Vertex {}
unsafe impl Zeroable for Vertex {}

impl Vertex {
    #[inline(always)]
    pub const fn new(position: Vec3, normal: Vec3) -> Self {
        Self { position, normal }
    }

    pub fn bindings() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: POSITION_LOCATION,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: NORMAL_LOCATION,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::size_of::<Vec3>() as u32,
            },
        ]
    }

    /// Only the position is read by depth only passes.
    pub fn position_attributes() -> [vk::VertexInputAttributeDescription; 1] {
        [Self::attributes()[0]]
    }
}
