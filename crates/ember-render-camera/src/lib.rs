use bytemuck::{Pod, Zeroable};
use ember_math::{frustum_corners, Mat4, Vec3, Vec4};

#[cfg(test)]
mod tests;

/// Camera description handed to the renderer once per frame.
///
/// View space is left handed with the camera looking down `+Z`. Projections map depth to the
/// `[0, 1]` range and `+Y` in view space to the top of the screen.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera {
    pub view: Mat4,
    pub projection: Mat4,
    /// Near clipping plane.
    pub near: f32,
    /// Far clipping plane.
    pub far: f32,
}

/// Camera data as laid out in the camera uniform buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct GpuCamera {
    pub view: Mat4,
    pub projection: Mat4,
    pub vp: Mat4,
    pub view_inv: Mat4,
    pub projection_inv: Mat4,
    pub position: Vec4,
    /// `(near, far, width, height)`
    pub clip_viewport: Vec4,
}

unsafe impl Pod for GpuCamera {}
unsafe impl Zeroable for GpuCamera {}

impl Default for Camera {
    fn default() -> Self {
        Camera::perspective(
            Vec3::new(0.0, 2.0, -8.0),
            Vec3::ZERO,
            Vec3::Y,
            60.0_f32.to_radians(),
            16.0 / 9.0,
            0.1,
            100.0,
        )
    }
}

impl Camera {
    /// Camera at `position` looking at `target` with a vertical field of view in radians.
    pub fn perspective(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let view = Mat4::look_at_lh(position, target, up);
        let mut projection = Mat4::perspective_lh(fov, aspect, near, far);
        // Clip space Y points down in Vulkan
        projection.y_axis.y = -projection.y_axis.y;

        Self {
            view,
            projection,
            near,
            far,
        }
    }

    #[inline(always)]
    pub fn vp(&self) -> Mat4 {
        self.projection * self.view
    }

    /// World space position of the camera.
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }

    /// Given a new camera, determines if the clipping planes have changed, requiring shadow
    /// cascade splits to be recomputed.
    #[inline]
    pub fn needs_split_regen(&self, new_camera: &Camera) -> bool {
        self.near != new_camera.near || self.far != new_camera.far
    }

    /// World space corners of the part of the view volume between view space depths `near` and
    /// `far`. The first four corners lie on the `near` plane.
    pub fn slice_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let view_inv = self.view.inverse();
        let corners = frustum_corners(self.projection.inverse());

        // Far plane corners of the full volume in view space. Every point along the ray from the
        // origin through one of them scales linearly with depth.
        let mut slice = [Vec3::ZERO; 8];
        let mut i = 0;
        for corner in corners.iter().skip(1).step_by(2) {
            let ray = *corner / corner.z;
            slice[i] = view_inv.transform_point3(ray * near);
            slice[i + 4] = view_inv.transform_point3(ray * far);
            i += 1;
        }
        slice
    }

    /// Makes a GPU compatible version of the camera given render target dimensions.
    pub fn into_gpu_struct(&self, width: f32, height: f32) -> GpuCamera {
        debug_assert_ne!(width, 0.0);
        debug_assert_ne!(height, 0.0);

        let vp = self.vp();
        GpuCamera {
            view: self.view,
            projection: self.projection,
            vp,
            view_inv: self.view.inverse(),
            projection_inv: self.projection.inverse(),
            position: Vec4::from((self.position(), 1.0)),
            clip_viewport: Vec4::new(self.near, self.far, width, height),
        }
    }
}
