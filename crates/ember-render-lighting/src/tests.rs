use ember_math::{Sphere, Vec3};
use ember_render_camera::Camera;

use crate::{
    lights::{grown_capacity, overflow_warning, uploaded_light_count},
    reference::{CulledLights, LightAssignment, TileFrustum},
    tiles::{TileGrid, TileGridError},
    PointLight,
};

fn camera(width: u32, height: u32) -> Camera {
    Camera::perspective(
        Vec3::new(0.0, 0.0, -20.0),
        Vec3::ZERO,
        Vec3::Y,
        60.0_f32.to_radians(),
        width as f32 / height as f32,
        0.1,
        100.0,
    )
}

fn light(position: Vec3, radius: f32) -> PointLight {
    PointLight {
        position,
        radius,
        color: Vec3::ONE,
        intensity: 1.0,
    }
}

/// Small deterministic generator so scenarios are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }
}

fn scenario_lights(count: usize) -> Vec<PointLight> {
    let mut rng = Lcg(0x5eed);
    (0..count)
        .map(|_| {
            light(
                Vec3::new(
                    rng.range(-15.0, 15.0),
                    rng.range(-10.0, 10.0),
                    rng.range(-15.0, 15.0),
                ),
                rng.range(1.0, 6.0),
            )
        })
        .collect()
}

/// Brute force count of lights touching a tile.
fn true_count(grid: &TileGrid, camera: &Camera, lights: &[PointLight], x: u32, y: u32) -> u32 {
    let frustum = TileFrustum::new(
        grid,
        camera.projection.inverse(),
        camera.near,
        camera.far,
        x,
        y,
    );
    lights
        .iter()
        .filter(|light| {
            frustum.intersects(&Sphere::new(
                camera.view.transform_point3(light.position),
                light.radius,
            ))
        })
        .count() as u32
}

#[test]
fn tile_grid_dimensions() {
    let grid = TileGrid::new(1280, 720, 16, 1024).unwrap();
    assert_eq!((grid.num_tiles_x(), grid.num_tiles_y()), (80, 45));

    let grid = TileGrid::new(1920, 1080, 16, 1024).unwrap();
    assert_eq!((grid.num_tiles_x(), grid.num_tiles_y()), (120, 68));
    assert_eq!(grid.tile_count(), 8160);
    assert_eq!(grid.index_count(), 8160 * 1024);
    assert_eq!(grid.index_buffer_size(), 8160 * 1024 * 4);
    assert_eq!(grid.count_buffer_size(), 8160 * 4);
}

#[test]
fn tile_grid_rounds_up() {
    for (width, height, tile_size) in [(1, 1, 16), (17, 33, 16), (100, 100, 7), (4096, 2160, 32)] {
        let grid = TileGrid::new(width, height, tile_size, 4).unwrap();
        assert_eq!(grid.num_tiles_x(), width.div_ceil(tile_size));
        assert_eq!(grid.num_tiles_y(), height.div_ceil(tile_size));
        assert!(grid.num_tiles_x() * tile_size >= width);
        assert!((grid.num_tiles_x() - 1) * tile_size < width);
    }
}

#[test]
fn tile_grid_rejects_bad_parameters() {
    assert_eq!(TileGrid::new(1280, 720, 0, 8), Err(TileGridError::ZeroTileSize));
    assert_eq!(TileGrid::new(1280, 720, 16, 0), Err(TileGridError::ZeroCapacity));
}

#[test]
fn edge_tiles_are_clipped() {
    let grid = TileGrid::new(1920, 1080, 16, 8).unwrap();
    let bounds = grid.tile_bounds(119, 67);
    assert_eq!((bounds.min_x, bounds.max_x), (1904, 1920));
    assert_eq!((bounds.min_y, bounds.max_y), (1072, 1080));
}

#[test]
fn resize_recomputes_grid() {
    let grid = TileGrid::new(1280, 720, 16, 32).unwrap();
    let resized = grid.resized(1920, 1080);
    assert_eq!((resized.num_tiles_x(), resized.num_tiles_y()), (120, 68));
    assert_eq!(resized.max_lights_per_tile(), 32);
    assert_eq!(resized.resized(1920, 1080), resized);
    assert_eq!(resized.resized(1280, 720), grid);
}

#[test]
fn tile_capacity_is_a_silent_clamp() {
    let max = 8;
    let grid = TileGrid::new(1280, 720, 16, max).unwrap();
    let camera = camera(1280, 720);

    // Every light sits in front of the camera at the center of the screen
    let lights: Vec<_> = (0..max + 5).map(|_| light(Vec3::ZERO, 1.0)).collect();
    let culled = CulledLights::cull(&grid, &camera, &lights);

    let (x, y) = grid.tile_at(640, 360);
    assert_eq!(true_count(&grid, &camera, &lights, x, y), max + 5);
    assert_eq!(culled.count(x, y), max);
    assert_eq!(culled.tile(x, y), (0..max).collect::<Vec<_>>().as_slice());
}

#[test]
fn lights_behind_the_camera_are_culled() {
    let grid = TileGrid::new(1280, 720, 16, 16).unwrap();
    let camera = camera(1280, 720);
    let culled = CulledLights::cull(&grid, &camera, &[light(Vec3::new(0.0, 0.0, -40.0), 2.0)]);
    assert!(culled.counts().iter().all(|count| *count == 0));
}

#[test]
fn light_around_the_camera_touches_every_tile() {
    let grid = TileGrid::new(1280, 720, 16, 16).unwrap();
    let camera = camera(1280, 720);
    let culled = CulledLights::cull(&grid, &camera, &[light(Vec3::new(0.0, 0.0, -20.0), 5.0)]);
    assert!(culled.counts().iter().all(|count| *count == 1));
}

#[test]
fn small_light_stays_local() {
    let grid = TileGrid::new(1280, 720, 16, 16).unwrap();
    let camera = camera(1280, 720);
    let culled = CulledLights::cull(&grid, &camera, &[light(Vec3::ZERO, 0.05)]);

    let touched = culled.counts().iter().filter(|count| **count > 0).count();
    assert!(touched > 0);
    assert!(touched < 16, "{touched} tiles touched");

    let (x, y) = grid.tile_at(640, 360);
    assert_eq!(culled.count(x, y), 1);
    assert_eq!(culled.count(0, 0), 0);
}

#[test]
fn three_hundred_light_scenario() {
    let lights = scenario_lights(300);
    let camera = camera(1920, 1080);

    let grid = TileGrid::new(1920, 1080, 16, 1024).unwrap();
    assert_eq!((grid.num_tiles_x(), grid.num_tiles_y()), (120, 68));
    let culled = CulledLights::cull(&grid, &camera, &lights);

    let clamped_grid = TileGrid::new(1920, 1080, 16, 10).unwrap();
    let clamped = CulledLights::cull(&clamped_grid, &camera, &lights);

    let mut tiles_over_capacity = 0;
    for y in 0..grid.num_tiles_y() {
        for x in 0..grid.num_tiles_x() {
            let expected = true_count(&grid, &camera, &lights, x, y);

            // 300 lights never exceed the 1024 capacity
            assert_eq!(culled.count(x, y), expected);

            assert_eq!(clamped.count(x, y), expected.min(10));
            if expected > 10 {
                tiles_over_capacity += 1;
                assert_eq!(clamped.count(x, y), 10);
            }

            // Clamped lists are a prefix of the full lists
            let full = culled.tile(x, y);
            let partial = clamped.tile(x, y);
            assert_eq!(&full[..partial.len()], partial);
        }
    }

    assert!(tiles_over_capacity > 0);
}

#[test]
fn unculled_fallback_keeps_every_light() {
    let lights = scenario_lights(300);
    let camera = camera(1920, 1080);
    let grid = TileGrid::new(1920, 1080, 16, 10).unwrap();

    let tiled = LightAssignment::Tiled(CulledLights::cull(&grid, &camera, &lights));
    let unculled = LightAssignment::Unculled {
        num_lights: lights.len() as u32,
    };

    for (x, y) in [(0, 0), (60, 34), (119, 67), (10, 50)] {
        let all = unculled.lights_for_tile(x, y);
        assert_eq!(all, (0..300).collect::<Vec<u32>>());
        assert!(tiled
            .lights_for_tile(x, y)
            .iter()
            .all(|index| all.contains(index)));
    }
}

#[test]
fn light_buffer_growth() {
    assert_eq!(grown_capacity(64, 10, 1024), 64);
    assert_eq!(grown_capacity(64, 65, 1024), 128);
    assert_eq!(grown_capacity(64, 300, 1024), 512);
    assert_eq!(grown_capacity(64, 5000, 1024), 1024);
    assert_eq!(grown_capacity(1024, 5000, 1024), 1024);
    assert_eq!(grown_capacity(64, 100, 100), 100);
}

#[test]
fn light_count_after_failed_growth() {
    // Buffer grew to fit everything
    assert_eq!(uploaded_light_count(300, 1024, 512), 300);
    // Growth failed, so only what the old buffer holds is uploaded
    assert_eq!(uploaded_light_count(300, 1024, 64), 64);
    // Past the maximum
    assert_eq!(uploaded_light_count(5000, 1024, 1024), 1024);
    assert_eq!(uploaded_light_count(0, 1024, 64), 0);
}

#[test]
fn overflow_is_reported_once() {
    let (report, last) = overflow_warning(None, 2000, 1024);
    assert!(report);
    assert_eq!(last, Some(2000));

    // Same scene on later frames
    let (report, last) = overflow_warning(last, 2000, 1024);
    assert!(!report);
    assert_eq!(last, Some(2000));

    // The count changed
    let (report, last) = overflow_warning(last, 3000, 1024);
    assert!(report);

    // Back under the limit, then over again
    let (report, last) = overflow_warning(last, 10, 1024);
    assert!(!report);
    assert_eq!(last, None);
    assert!(overflow_warning(last, 3000, 1024).0);
}

#[test]
fn gpu_light_layout() {
    let gpu = light(Vec3::new(1.0, 2.0, 3.0), 4.0).to_gpu_light();
    assert_eq!(gpu.position_radius.to_array(), [1.0, 2.0, 3.0, 4.0]);
    assert_eq!(std::mem::size_of_val(&gpu), 32);
}
