use bytemuck::{Pod, Zeroable};
use ember_math::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Surface parameters of one drawable, pushed along with its transform.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub albedo: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    /// Light emitted by the surface, added after lighting.
    pub emissive: Vec3,
}

/// Push constant form of [`Material`].
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GpuMaterial {
    pub albedo_roughness: Vec4,
    pub emissive_metallic: Vec4,
}

unsafe impl Pod for GpuMaterial {}
unsafe impl Zeroable for GpuMaterial {}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.8),
            roughness: 0.5,
            metallic: 0.0,
            emissive: Vec3::ZERO,
        }
    }
}

impl Material {
    #[inline]
    pub fn from_albedo(albedo: Vec3) -> Self {
        Self {
            albedo,
            ..Default::default()
        }
    }

    /// Roughness and metallic are clamped to `[0, 1]`.
    #[inline]
    pub fn to_gpu_material(self) -> GpuMaterial {
        GpuMaterial {
            albedo_roughness: Vec4::from((self.albedo, self.roughness.clamp(0.0, 1.0))),
            emissive_metallic: Vec4::from((self.emissive, self.metallic.clamp(0.0, 1.0))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_material_packing() {
        assert_eq!(std::mem::size_of::<GpuMaterial>(), 32);

        let material = Material {
            albedo: Vec3::new(1.0, 0.5, 0.25),
            roughness: 2.0,
            metallic: -1.0,
            emissive: Vec3::new(0.0, 0.0, 3.0),
        };
        let gpu = material.to_gpu_material();
        assert_eq!(gpu.albedo_roughness, Vec4::new(1.0, 0.5, 0.25, 1.0));
        assert_eq!(gpu.emissive_metallic, Vec4::new(0.0, 0.0, 3.0, 0.0));
    }
}
