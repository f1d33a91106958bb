//! CPU version of the tile culling done by `light_culling.comp`. Both use the same tile volumes
//! and the same sphere test, so results only differ in the order indices are written within a
//! tile (the shader appends with atomics).

use ember_math::{Mat4, Plane, Sphere, Vec3, Vec4};
use ember_render_camera::Camera;

use crate::{tiles::TileGrid, PointLight};

/// View space volume covered by one tile between the near and far clipping planes.
#[derive(Debug, Copy, Clone)]
pub struct TileFrustum {
    planes: [Plane; 6],
}

/// Visible light lists for every tile.
#[derive(Debug, Clone)]
pub struct CulledLights {
    grid: TileGrid,
    counts: Vec<u32>,
    indices: Vec<u32>,
}

/// Which lights the forward pass considers for a tile.
#[derive(Debug, Clone)]
pub enum LightAssignment {
    /// Per-tile lists produced by culling.
    Tiled(CulledLights),
    /// Every light is considered for every fragment.
    Unculled { num_lights: u32 },
}

impl TileFrustum {
    pub fn new(
        grid: &TileGrid,
        projection_inv: Mat4,
        near: f32,
        far: f32,
        tile_x: u32,
        tile_y: u32,
    ) -> Self {
        let bounds = grid.tile_bounds(tile_x, tile_y);
        let width = grid.width().max(1) as f32;
        let height = grid.height().max(1) as f32;

        // Far plane corners of the tile in view space, walking around the tile
        let unproject = |px: u32, py: u32| {
            let ndc = Vec4::new(
                (px as f32 / width) * 2.0 - 1.0,
                (py as f32 / height) * 2.0 - 1.0,
                1.0,
                1.0,
            );
            let view = projection_inv * ndc;
            view.truncate() / view.w
        };
        let corners = [
            unproject(bounds.min_x, bounds.min_y),
            unproject(bounds.max_x, bounds.min_y),
            unproject(bounds.max_x, bounds.max_y),
            unproject(bounds.min_x, bounds.max_y),
        ];

        // A point known to be inside the volume orients every plane
        let center = (corners[0] + corners[1] + corners[2] + corners[3]) * 0.25;
        let inside = center * (0.5 * (near + far) / center.z);

        let side = |a: Vec3, b: Vec3| Plane::from_points(Vec3::ZERO, a, b).facing(inside);

        Self {
            planes: [
                side(corners[0], corners[1]),
                side(corners[1], corners[2]),
                side(corners[2], corners[3]),
                side(corners[3], corners[0]),
                Plane::new(Vec3::Z, -near),
                Plane::new(Vec3::NEG_Z, far),
            ],
        }
    }

    #[inline(always)]
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    /// `sphere` must be in view space.
    #[inline]
    pub fn intersects(&self, sphere: &Sphere) -> bool {
        sphere.intersects_planes(&self.planes)
    }
}

impl CulledLights {
    /// Culls `lights` against every tile of `grid` as seen from `camera`.
    pub fn cull(grid: &TileGrid, camera: &Camera, lights: &[PointLight]) -> Self {
        let projection_inv = camera.projection.inverse();
        let view_space: Vec<Sphere> = lights
            .iter()
            .map(|light| Sphere::new(camera.view.transform_point3(light.position), light.radius))
            .collect();

        let max = grid.max_lights_per_tile();
        let mut counts = vec![0; grid.tile_count() as usize];
        let mut indices = vec![0; grid.index_count() as usize];

        for tile_y in 0..grid.num_tiles_y() {
            for tile_x in 0..grid.num_tiles_x() {
                let tile = grid.tile_index(tile_x, tile_y);
                let frustum =
                    TileFrustum::new(grid, projection_inv, camera.near, camera.far, tile_x, tile_y);
                let list = &mut indices[tile * max as usize..(tile + 1) * max as usize];

                let mut count = 0;
                for (i, sphere) in view_space.iter().enumerate() {
                    if count == max {
                        break;
                    }
                    if frustum.intersects(sphere) {
                        list[count as usize] = i as u32;
                        count += 1;
                    }
                }
                counts[tile] = count;
            }
        }

        Self {
            grid: *grid,
            counts,
            indices,
        }
    }

    #[inline(always)]
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    #[inline(always)]
    pub fn count(&self, tile_x: u32, tile_y: u32) -> u32 {
        self.counts[self.grid.tile_index(tile_x, tile_y)]
    }

    /// Light indices recorded for a tile.
    pub fn tile(&self, tile_x: u32, tile_y: u32) -> &[u32] {
        let tile = self.grid.tile_index(tile_x, tile_y);
        let start = tile * self.grid.max_lights_per_tile() as usize;
        &self.indices[start..start + self.counts[tile] as usize]
    }

    #[inline(always)]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}

impl LightAssignment {
    /// Indices of the lights shaded for fragments in the given tile.
    pub fn lights_for_tile(&self, tile_x: u32, tile_y: u32) -> Vec<u32> {
        match self {
            LightAssignment::Tiled(culled) => culled.tile(tile_x, tile_y).to_vec(),
            LightAssignment::Unculled { num_lights } => (0..*num_lights).collect(),
        }
    }
}
