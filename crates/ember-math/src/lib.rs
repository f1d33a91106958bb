pub use glam::*;

/// A plane in Hessian normal form. Points with a positive signed distance are "in front" of the
/// plane.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

/// A bounding sphere.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Plane {
    #[inline]
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Plane containing the three points. The winding `a -> b -> c` determines which side is
    /// the front.
    #[inline]
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(a),
        }
    }

    /// Plane with the given normal passing through `point`.
    #[inline]
    pub fn from_normal_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(point),
        }
    }

    #[inline(always)]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Returns the same plane facing the opposite direction.
    #[inline(always)]
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            d: -self.d,
        }
    }

    /// Orients the plane so that `inside` lies in front of it.
    #[inline]
    pub fn facing(self, inside: Vec3) -> Self {
        if self.signed_distance(inside) < 0.0 {
            self.flipped()
        } else {
            self
        }
    }

    #[inline(always)]
    pub fn as_vec4(&self) -> Vec4 {
        Vec4::from((self.normal, self.d))
    }
}

impl Sphere {
    #[inline(always)]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// `true` if any part of the sphere lies in front of or touches the plane.
    #[inline(always)]
    pub fn intersects_plane(&self, plane: &Plane) -> bool {
        plane.signed_distance(self.center) >= -self.radius
    }

    /// Conservative test against a convex volume bounded by inward facing planes.
    #[inline]
    pub fn intersects_planes(&self, planes: &[Plane]) -> bool {
        planes.iter().all(|plane| self.intersects_plane(plane))
    }
}

/// Computes the eight world space corners of the view volume described by the inverse of a
/// view-projection matrix. Depth is assumed to be in the `[0, 1]` range.
///
/// Corners are ordered by `x`, then `y`, then `z` where `0` is the negative extent.
pub fn frustum_corners(vp_inv: Mat4) -> [Vec3; 8] {
    let mut corners = [Vec3::ZERO; 8];
    for x in 0..2 {
        for y in 0..2 {
            for z in 0..2 {
                let pt =
                    vp_inv * Vec4::new(2.0 * x as f32 - 1.0, 2.0 * y as f32 - 1.0, z as f32, 1.0);
                corners[(x * 4) + (y * 2) + z] = pt.truncate() / pt.w;
            }
        }
    }
    corners
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_facing() {
        let plane = Plane::from_normal_point(Vec3::X, Vec3::ZERO);
        assert!(plane.signed_distance(Vec3::new(1.0, 0.0, 0.0)) > 0.0);

        let flipped = plane.facing(Vec3::new(-2.0, 0.0, 0.0));
        assert!(flipped.signed_distance(Vec3::new(-2.0, 0.0, 0.0)) > 0.0);
    }

    #[test]
    fn sphere_touching_plane() {
        let plane = Plane::from_normal_point(Vec3::Y, Vec3::ZERO);
        assert!(Sphere::new(Vec3::new(0.0, -1.0, 0.0), 1.0).intersects_plane(&plane));
        assert!(!Sphere::new(Vec3::new(0.0, -1.5, 0.0), 1.0).intersects_plane(&plane));
    }

    #[test]
    fn identity_frustum_corners() {
        let corners = frustum_corners(Mat4::IDENTITY);
        assert_eq!(corners[0], Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(corners[7], Vec3::new(1.0, 1.0, 1.0));
    }
}
