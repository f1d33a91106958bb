use bytemuck::{Pod, Zeroable};
use ember_math::{Sphere, Vec3, Vec4};

pub mod culling;
pub mod lights;
pub mod reference;
pub mod tiles;

#[cfg(test)]
mod tests;

/// A point light as supplied by the scene. The CPU copy is authoritative and is uploaded every
/// frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    /// Distance past which the light has no influence.
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

/// Point light as laid out in the light storage buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GpuPointLight {
    pub position_radius: Vec4,
    pub color_intensity: Vec4,
}

unsafe impl Pod for GpuPointLight {}
unsafe impl Zeroable for GpuPointLight {}

impl PointLight {
    #[inline]
    pub fn to_gpu_light(self) -> GpuPointLight {
        GpuPointLight {
            position_radius: Vec4::from((self.position, self.radius)),
            color_intensity: Vec4::from((self.color, self.intensity)),
        }
    }

    /// Sphere of influence in world space.
    #[inline(always)]
    pub fn bounds(&self) -> Sphere {
        Sphere::new(self.position, self.radius)
    }
}
