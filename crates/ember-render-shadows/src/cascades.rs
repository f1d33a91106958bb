use bytemuck::{Pod, Zeroable};
use ember_math::{Mat4, Vec3, Vec4};
use ember_render_base::shader_constants::MAX_SHADOW_CASCADES;
use ember_render_camera::Camera;
use smallvec::SmallVec;
use thiserror::Error;

/// How far behind a cascade's bounding sphere, in multiples of its radius, casters are still
/// rendered into the cascade.
const CASTER_DEPTH_SCALE: f32 = 4.0;

#[derive(Debug, Error, PartialEq)]
pub enum CascadeError {
    #[error("cascade count must be between 1 and {max}, got {0}", max = MAX_SHADOW_CASCADES)]
    InvalidCount(usize),
    #[error("clipping range [{near}, {far}] must satisfy 0 < near < far")]
    InvalidRange { near: f32, far: f32 },
    #[error("split lambda must be in [0, 1], got {0}")]
    InvalidLambda(f32),
    #[error("shadow map resolution must be non-zero")]
    ZeroResolution,
}

/// Split distances partitioning the camera's view depth range. Recomputed only when the clipping
/// planes change.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeSplits {
    near: f32,
    far: f32,
    lambda: f32,
    /// `count + 1` distances. The first is `near` and the last is `far`.
    splits: SmallVec<[f32; MAX_SHADOW_CASCADES + 1]>,
}

/// Light space transform of one cascade.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CascadeTransform {
    pub view: Mat4,
    pub projection: Mat4,
    pub vp: Mat4,
    /// Radius of the bounding sphere of the frustum slice, rounded up to a sixteenth of a unit.
    pub radius: f32,
}

/// Cascade data as laid out in the shadow uniform buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct GpuShadowCascades {
    pub vp: [Mat4; MAX_SHADOW_CASCADES],
    /// Far split distance of each cascade in view space depth.
    pub splits: Vec4,
    /// Direction the light travels in.
    pub light_direction: Vec4,
    pub cascade_count: u32,
    pub resolution: u32,
    pub _pad: [u32; 2],
}

unsafe impl Pod for GpuShadowCascades {}
unsafe impl Zeroable for GpuShadowCascades {}

/// Practical split scheme. Blends a logarithmic and a uniform partition of `[near, far]` so near
/// cascades get finer resolution.
///
/// Returns `count + 1` strictly increasing distances starting at `near` and ending at `far`.
pub fn compute_splits(
    near: f32,
    far: f32,
    count: usize,
    lambda: f32,
) -> Result<SmallVec<[f32; MAX_SHADOW_CASCADES + 1]>, CascadeError> {
    if count == 0 || count > MAX_SHADOW_CASCADES {
        return Err(CascadeError::InvalidCount(count));
    }
    if !(near > 0.0 && far > near && far.is_finite()) {
        return Err(CascadeError::InvalidRange { near, far });
    }
    if !(0.0..=1.0).contains(&lambda) {
        return Err(CascadeError::InvalidLambda(lambda));
    }

    let mut splits = SmallVec::new();
    splits.push(near);
    for i in 1..count {
        let p = i as f32 / count as f32;
        let log = near * (far / near).powf(p);
        let uniform = near + (far - near) * p;
        splits.push(lambda * log + (1.0 - lambda) * uniform);
    }
    splits.push(far);

    // Planes too close together collapse neighbouring splits in f32
    if !splits.windows(2).all(|w| w[0] < w[1]) {
        return Err(CascadeError::InvalidRange { near, far });
    }

    Ok(splits)
}

impl CascadeSplits {
    pub fn new(near: f32, far: f32, count: usize, lambda: f32) -> Result<Self, CascadeError> {
        Ok(Self {
            near,
            far,
            lambda,
            splits: compute_splits(near, far, count, lambda)?,
        })
    }

    /// Recomputes the splits if the clipping planes differ from the ones they were computed for.
    /// Returns `true` if they were recomputed.
    pub fn update(&mut self, near: f32, far: f32) -> Result<bool, CascadeError> {
        if self.near == near && self.far == far {
            return Ok(false);
        }
        self.splits = compute_splits(near, far, self.count(), self.lambda)?;
        self.near = near;
        self.far = far;
        Ok(true)
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.splits.len() - 1
    }

    #[inline(always)]
    pub fn splits(&self) -> &[f32] {
        &self.splits
    }

    /// View space depth range covered by a cascade.
    #[inline(always)]
    pub fn range(&self, cascade: usize) -> (f32, f32) {
        (self.splits[cascade], self.splits[cascade + 1])
    }

    /// Cascade a fragment at the given view space depth samples from.
    pub fn cascade_for_depth(&self, depth: f32) -> usize {
        self.splits[1..]
            .iter()
            .position(|split| depth <= *split)
            .unwrap_or(self.count() - 1)
    }
}

impl CascadeTransform {
    /// Tight orthographic transform around a frustum slice as seen by a directional light.
    ///
    /// The slice is bounded by a sphere so the projection doesn't change size as the camera
    /// rotates, and the sphere center is snapped to whole texels so edges don't shimmer as the
    /// camera moves.
    pub fn new(corners: &[Vec3; 8], light_dir: Vec3, resolution: u32) -> Self {
        let light_dir = light_dir.try_normalize().unwrap_or(Vec3::NEG_Y);
        let up = light_up(light_dir);

        let mut center = corners.iter().copied().sum::<Vec3>() / 8.0;
        let mut radius = corners
            .iter()
            .map(|corner| (*corner - center).length())
            .fold(f32::EPSILON, f32::max);
        radius = (radius * 16.0).ceil() / 16.0;

        // Clamp the center of the frustum to be a multiple of the texel size
        let texels_per_unit = resolution as f32 / (radius * 2.0);
        let look_at = Mat4::from_scale(Vec3::splat(texels_per_unit))
            * Mat4::look_at_lh(Vec3::ZERO, light_dir, up);
        let mut snapped = look_at * Vec4::from((center, 1.0));
        snapped.x = snapped.x.floor();
        snapped.y = snapped.y.floor();
        center = (look_at.inverse() * snapped).truncate();

        let view = Mat4::look_at_lh(center, center + light_dir, up);
        let projection = Mat4::orthographic_lh(
            -radius,
            radius,
            -radius,
            radius,
            -radius * CASTER_DEPTH_SCALE,
            radius,
        );

        Self {
            view,
            projection,
            vp: projection * view,
            radius,
        }
    }
}

/// Computes the light space transform of every cascade for the current camera.
pub fn cascade_transforms(
    camera: &Camera,
    splits: &CascadeSplits,
    light_dir: Vec3,
    resolution: u32,
) -> SmallVec<[CascadeTransform; MAX_SHADOW_CASCADES]> {
    (0..splits.count())
        .map(|i| {
            let (near, far) = splits.range(i);
            CascadeTransform::new(&camera.slice_corners(near, far), light_dir, resolution)
        })
        .collect()
}

/// Direction a light travels given yaw and pitch in degrees. Positive pitch points downwards.
pub fn light_direction_from_angles(yaw: f32, pitch: f32) -> Vec3 {
    let (yaw, pitch) = (yaw.to_radians(), pitch.to_radians());
    Vec3::new(pitch.cos() * yaw.cos(), -pitch.sin(), pitch.cos() * yaw.sin()).normalize()
}

impl GpuShadowCascades {
    pub fn new(
        transforms: &[CascadeTransform],
        splits: &CascadeSplits,
        light_dir: Vec3,
        resolution: u32,
    ) -> Self {
        let mut gpu = GpuShadowCascades {
            vp: [Mat4::IDENTITY; MAX_SHADOW_CASCADES],
            splits: Vec4::splat(splits.splits().last().copied().unwrap_or(0.0)),
            light_direction: Vec4::from((light_dir.normalize_or_zero(), 0.0)),
            cascade_count: transforms.len() as u32,
            resolution,
            _pad: [0; 2],
        };
        for (i, transform) in transforms.iter().enumerate().take(MAX_SHADOW_CASCADES) {
            gpu.vp[i] = transform.vp;
            gpu.splits[i] = splits.range(i).1;
        }
        gpu
    }
}

/// `look_at` breaks down when looking straight along the up vector.
#[inline]
fn light_up(light_dir: Vec3) -> Vec3 {
    if light_dir.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}
