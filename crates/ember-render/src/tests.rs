use std::cell::Cell;

use ember_math::{Mat4, Vec3};
use ember_render_base::{
    shader_constants::{
        LIGHT_INDICES_BINDING, MAX_SHADOW_CASCADES, SHADOW_MAPS_BINDING, TILE_COUNTS_BINDING,
    },
    Frame, IndexedDraw, Material, FRAMES_IN_FLIGHT,
};
use ember_render_camera::Camera;
use ember_render_lighting::{reference::LightAssignment, tiles::TileGrid, PointLight};
use ember_vk::{capabilities::DeviceCapabilities, vk};
use thiserror::Error;

use crate::{
    bindings::{find_binding, global_bindings},
    forward::{sort_draws, DebugMode, ObjectPushConstants},
    frame::{FrameError, FrameRing, FrameSlot, FrameState, ResizeTracker},
    mesh::{validate_mesh, MeshError},
    scene::{Drawable, MeshHandle},
    settings::{RendererSettings, SettingsError},
    strategy::RenderStrategy,
};

#[derive(Debug, Error)]
#[error("dummy slot failure")]
struct DummyError;

/// Slot whose fence is "signaled" only once waited on after a submit.
#[derive(Default)]
struct DummySlot {
    signaled: Cell<bool>,
    fail_wait: bool,
    waits: Cell<u32>,
    submits: Cell<u32>,
    writes: u32,
}

impl DummySlot {
    fn write(&mut self) {
        assert!(
            self.signaled.get(),
            "slot written before its fence was observed signaled"
        );
        self.writes += 1;
    }
}

impl FrameSlot for DummySlot {
    type Error = DummyError;

    fn wait(&self) -> Result<(), DummyError> {
        if self.fail_wait {
            return Err(DummyError);
        }
        // The GPU finishes whatever was submitted
        self.waits.set(self.waits.get() + 1);
        self.signaled.set(true);
        Ok(())
    }

    fn reset(&self) -> Result<(), DummyError> {
        self.signaled.set(false);
        Ok(())
    }
}

fn dummy_ring() -> FrameRing<DummySlot> {
    FrameRing::new((0..FRAMES_IN_FLIGHT).map(|_| DummySlot::default()).collect())
}

fn run_frame(ring: &mut FrameRing<DummySlot>) -> Frame {
    let frame = ring.begin().unwrap();
    assert_eq!(ring.state(), FrameState::AcquiringImage);
    ring.record().unwrap().write();
    assert_eq!(ring.state(), FrameState::Recording);
    ring.submit(|_| Ok(())).unwrap();
    assert_eq!(ring.state(), FrameState::Submitted);
    ring.present().unwrap();
    assert_eq!(ring.state(), FrameState::Presenting);
    ring.finish().unwrap();
    assert_eq!(ring.state(), FrameState::Idle);
    frame
}

fn test_lights(count: usize) -> Vec<PointLight> {
    // Deterministic spread of lights in front of the default camera
    let mut seed = 0x2545_f491_u32;
    let mut next = move || {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (seed >> 8) as f32 / (1 << 24) as f32
    };
    (0..count)
        .map(|_| PointLight {
            position: Vec3::new(next() * 40.0 - 20.0, next() * 10.0, next() * 40.0 - 10.0),
            radius: 1.0 + next() * 4.0,
            color: Vec3::ONE,
            intensity: 1.0,
        })
        .collect()
}

fn draw_at(position: Vec3, object_id: u32) -> IndexedDraw {
    IndexedDraw {
        vertex_buffer: vk::Buffer::null(),
        index_buffer: vk::Buffer::null(),
        first_index: 0,
        index_count: 36,
        vertex_offset: 0,
        model: Mat4::from_translation(position),
        material: Material::default(),
        object_id,
    }
}

#[test]
fn frame_states() {
    use FrameState::*;
    assert!(Idle.can_transition(AcquiringImage));
    assert!(AcquiringImage.can_transition(Recording));
    assert!(AcquiringImage.can_transition(Idle));
    assert!(Recording.can_transition(Submitted));
    assert!(Submitted.can_transition(Presenting));
    assert!(Presenting.can_transition(Idle));
    assert!(Recording.can_transition(Idle));

    assert!(!Idle.can_transition(Recording));
    assert!(!Submitted.can_transition(Idle));
    assert!(!Presenting.can_transition(AcquiringImage));
}

#[test]
fn slots_are_round_robin() {
    let mut ring = dummy_ring();
    for i in 0..(FRAMES_IN_FLIGHT * 4) {
        let frame = run_frame(&mut ring);
        assert_eq!(frame, Frame::for_frame_number(i as u64));
    }
    assert_eq!(ring.frame_number(), (FRAMES_IN_FLIGHT * 4) as u64);
    for slot in ring.slots() {
        assert_eq!(slot.writes, 4);
        assert_eq!(slot.waits.get(), 4);
    }
}

#[test]
fn slot_exclusivity() {
    let mut ring = dummy_ring();

    // Recording without waiting on the slot's fence is refused
    assert!(matches!(
        ring.record(),
        Err(FrameError::InvalidTransition {
            from: FrameState::Idle,
            to: FrameState::Recording
        })
    ));

    for _ in 0..10 {
        let frame = ring.begin().unwrap();
        // Fence was observed signaled before the slot became writable
        assert!(ring.slot(frame).signaled.get());
        let slot = ring.record().unwrap();
        slot.write();
        ring.submit(|slot| {
            assert!(!slot.signaled.get());
            slot.submits.set(slot.submits.get() + 1);
            Ok(())
        })
        .unwrap();
        ring.present().unwrap();
        ring.finish().unwrap();
    }

    let total: u32 = ring.slots().iter().map(|slot| slot.submits.get()).sum();
    assert_eq!(total, 10);
}

#[test]
fn out_of_order_transitions() {
    let mut ring = dummy_ring();
    assert!(ring.present().is_err());
    assert!(ring.finish().is_err());
    assert!(ring.abandon().is_err());

    ring.begin().unwrap();
    assert!(ring.begin().is_err());
    assert!(ring.submit(|_| Ok(())).is_err());
    assert_eq!(ring.state(), FrameState::AcquiringImage);
}

#[test]
fn abandoned_frame_reuses_slot() {
    let mut ring = dummy_ring();
    let first = ring.begin().unwrap();
    ring.abandon().unwrap();
    assert_eq!(ring.state(), FrameState::Idle);
    assert_eq!(ring.current(), first);
    assert_eq!(ring.frame_number(), 0);

    // The fence was never reset so waiting again succeeds immediately
    assert_eq!(run_frame(&mut ring), first);
    assert_eq!(ring.current(), first.next());
}

#[test]
fn failed_recording_frees_the_ring() {
    let mut ring = dummy_ring();
    let first = ring.begin().unwrap();
    ring.record().unwrap().write();

    // Only a frame being recorded can be cancelled, and finishing it is refused
    assert!(ring.finish().is_err());
    assert!(ring.abandon().is_err());
    assert_eq!(ring.state(), FrameState::Recording);

    ring.cancel().unwrap();
    assert_eq!(ring.state(), FrameState::Idle);
    assert_eq!(ring.current(), first);
    assert_eq!(ring.frame_number(), 0);
    assert!(ring.cancel().is_err());

    // Nothing was submitted so the fence is still signaled and the slot is usable again
    assert!(ring.slot(first).signaled.get());
    assert_eq!(ring.slot(first).submits.get(), 0);
    assert_eq!(run_frame(&mut ring), first);
    assert_eq!(ring.current(), first.next());
    assert_eq!(ring.frame_number(), 1);
}

#[test]
fn failed_wait_keeps_ring_idle() {
    let mut slots: Vec<DummySlot> = (0..FRAMES_IN_FLIGHT).map(|_| DummySlot::default()).collect();
    slots[0].fail_wait = true;
    let mut ring = FrameRing::new(slots);

    assert!(matches!(ring.begin(), Err(FrameError::Slot(DummyError))));
    assert_eq!(ring.state(), FrameState::Idle);
    assert!(ring.record().is_err());
}

#[test]
fn resize_is_idempotent() {
    let mut tracker = ResizeTracker::new(1280, 720);
    assert_eq!(tracker.take(), None);

    tracker.request(1280, 720);
    assert_eq!(tracker.take(), None);

    tracker.request(1920, 1080);
    assert_eq!(tracker.take(), Some((1920, 1080)));
    tracker.request(1920, 1080);
    assert_eq!(tracker.take(), None);
    assert_eq!(tracker.applied(), (1920, 1080));

    // Resources sized from the grid come out identical the second time
    let grid = TileGrid::new(1280, 720, 16, 1024).unwrap();
    let once = grid.resized(1920, 1080);
    let twice = once.resized(1920, 1080);
    assert_eq!(once, twice);
    assert_eq!(once.index_buffer_size(), twice.index_buffer_size());
}

#[test]
fn stale_swapchain_rebuilds_once() {
    let mut tracker = ResizeTracker::new(800, 600);
    tracker.invalidate();
    assert_eq!(tracker.take(), Some((800, 600)));
    assert_eq!(tracker.take(), None);
}

#[test]
fn minimized_window_defers_rebuild() {
    let mut tracker = ResizeTracker::new(800, 600);
    tracker.request(0, 0);
    assert!(tracker.is_minimized());
    assert_eq!(tracker.take(), None);

    tracker.invalidate();
    assert_eq!(tracker.take(), None);

    tracker.request(1024, 768);
    assert!(!tracker.is_minimized());
    assert_eq!(tracker.take(), Some((1024, 768)));
    assert_eq!(tracker.take(), None);
}

#[test]
fn negotiation() {
    let settings = RendererSettings::default();
    let grid = TileGrid::new(1280, 720, settings.tile_size, settings.max_lights_per_tile).unwrap();
    let capabilities = DeviceCapabilities::default();

    assert_eq!(
        RenderStrategy::negotiate(&capabilities, &settings, &grid),
        RenderStrategy::ForwardPlus
    );
    assert_eq!(
        RenderStrategy::negotiate(&capabilities.without_compute(), &settings, &grid),
        RenderStrategy::Forward { shadows: true }
    );

    let forced = RendererSettings {
        force_fallback: true,
        ..RendererSettings::default()
    };
    assert_eq!(
        RenderStrategy::negotiate(&capabilities, &forced, &grid),
        RenderStrategy::Forward { shadows: true }
    );

    // 32x32 work groups exceed the guaranteed 128 invocations
    let big_tiles = TileGrid::new(1280, 720, 32, 1024).unwrap();
    assert_eq!(
        RenderStrategy::negotiate(&capabilities, &settings, &big_tiles),
        RenderStrategy::Forward { shadows: true }
    );

    let small_buffers = DeviceCapabilities {
        max_storage_buffer_range: 1 << 16,
        ..capabilities
    };
    assert_eq!(
        RenderStrategy::negotiate(&small_buffers, &settings, &grid),
        RenderStrategy::Forward { shadows: true }
    );
}

#[test]
fn strategy_downgrades() {
    let plus = RenderStrategy::ForwardPlus;
    assert!(plus.tiled());
    assert!(plus.shadows());
    assert_eq!(plus.without_culling(), RenderStrategy::Forward { shadows: true });
    assert_eq!(
        RenderStrategy::Forward { shadows: false }.without_culling(),
        RenderStrategy::Forward { shadows: false }
    );

    let mut chain = vec![plus];
    while let Some(next) = chain.last().and_then(|s| s.downgrade()) {
        chain.push(next);
    }
    assert_eq!(
        chain,
        vec![
            RenderStrategy::ForwardPlus,
            RenderStrategy::Forward { shadows: true },
            RenderStrategy::Forward { shadows: false },
        ]
    );

    let shaders: Vec<&str> = chain.iter().map(|s| s.fragment_shader()).collect();
    assert_eq!(
        shaders,
        ["forward_plus.frag", "forward.frag", "forward_unshadowed.frag"]
    );
}

#[test]
fn fallback_keeps_every_light() {
    let settings = RendererSettings {
        width: 1920,
        height: 1080,
        force_fallback: true,
        ..RendererSettings::default()
    };
    let grid = TileGrid::new(1920, 1080, 16, 10).unwrap();
    let strategy = RenderStrategy::negotiate(&DeviceCapabilities::default(), &settings, &grid);
    assert!(!strategy.tiled());

    let camera = Camera::default();
    let lights = test_lights(300);
    let fallback = strategy.assign_lights(&grid, &camera, &lights);
    let tiled = RenderStrategy::ForwardPlus.assign_lights(&grid, &camera, &lights);
    assert!(matches!(fallback, LightAssignment::Unculled { num_lights: 300 }));

    let all: Vec<u32> = (0..300).collect();
    for tile_y in 0..grid.num_tiles_y() {
        for tile_x in 0..grid.num_tiles_x() {
            let shaded = fallback.lights_for_tile(tile_x, tile_y);
            assert_eq!(shaded, all);

            // Anything the tiled path shades, the fallback shades too
            for light in tiled.lights_for_tile(tile_x, tile_y) {
                assert!(shaded.contains(&light));
            }
        }
    }
}

#[test]
fn binding_tables() {
    let plus = global_bindings(RenderStrategy::ForwardPlus);
    let shadowed = global_bindings(RenderStrategy::Forward { shadows: true });
    let unshadowed = global_bindings(RenderStrategy::Forward { shadows: false });

    assert_eq!(plus.len(), 7);
    assert_eq!(shadowed.len(), 5);
    assert_eq!(unshadowed.len(), 3);

    for table in [&plus, &shadowed, &unshadowed] {
        let mut numbers: Vec<u32> = table.iter().map(|b| b.binding).collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), table.len());
    }

    assert!(find_binding(&plus, LIGHT_INDICES_BINDING).is_some());
    assert!(find_binding(&plus, TILE_COUNTS_BINDING).is_some());
    assert!(find_binding(&shadowed, LIGHT_INDICES_BINDING).is_none());
    assert!(find_binding(&unshadowed, SHADOW_MAPS_BINDING).is_none());

    let shadow_maps = find_binding(&shadowed, SHADOW_MAPS_BINDING).unwrap();
    assert_eq!(shadow_maps.descriptor_count, MAX_SHADOW_CASCADES as u32);
    assert_eq!(
        shadow_maps.descriptor_type,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    );
}

#[test]
fn draw_order_is_stable() {
    let eye = Vec3::new(0.0, 2.0, -8.0);
    let positions = [
        Vec3::new(0.0, 0.0, 10.0),
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(3.0, 0.0, 0.0),
        Vec3::new(-3.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 30.0),
    ];
    let draws: Vec<IndexedDraw> = positions
        .iter()
        .enumerate()
        .map(|(i, p)| draw_at(*p, i as u32))
        .collect();

    let mut sorted = draws.clone();
    sort_draws(&mut sorted, eye);
    let order: Vec<u32> = sorted.iter().map(|d| d.object_id).collect();
    // Objects 2 and 3 are the same distance away and are ordered by id
    assert_eq!(order, vec![1, 2, 3, 0, 4]);

    let mut reversed: Vec<IndexedDraw> = draws.iter().rev().copied().collect();
    sort_draws(&mut reversed, eye);
    let reversed_order: Vec<u32> = reversed.iter().map(|d| d.object_id).collect();
    assert_eq!(reversed_order, order);
}

#[test]
fn debug_modes_cycle() {
    let mut mode = DebugMode::default();
    assert_eq!(mode, DebugMode::Normal);
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(mode.as_i32());
        mode = mode.next();
    }
    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(mode, DebugMode::Normal);
}

#[test]
fn object_push_constants() {
    // Must fit the 128 bytes every device guarantees and match `ObjectConstants` in GLSL
    assert_eq!(std::mem::size_of::<ObjectPushConstants>(), 112);
    assert_eq!(std::mem::offset_of!(ObjectPushConstants, debug_mode), 64);
    assert_eq!(std::mem::offset_of!(ObjectPushConstants, object_id), 68);
    assert_eq!(std::mem::offset_of!(ObjectPushConstants, material), 80);

    let constants =
        ObjectPushConstants::new(&draw_at(Vec3::X, 7), DebugMode::CascadeLevels);
    assert_eq!(constants.object_id, 7);
    assert_eq!(constants.debug_mode, 2);
    assert_eq!(constants.model, Mat4::from_translation(Vec3::X));
}

#[test]
fn drawable_material_reaches_push_constants() {
    let material = Material {
        albedo: Vec3::new(0.9, 0.1, 0.1),
        roughness: 0.25,
        metallic: 1.0,
        emissive: Vec3::new(0.0, 2.0, 0.0),
    };
    let drawable = Drawable::whole(MeshHandle(3), 36, Mat4::from_translation(Vec3::Y))
        .with_material(material);

    let draw = drawable.to_draw(vk::Buffer::null(), vk::Buffer::null(), 5);
    assert_eq!(draw.material, material);
    assert_eq!(draw.object_id, 5);
    assert_eq!(draw.index_count, 36);

    let constants = ObjectPushConstants::new(&draw, DebugMode::Normal);
    assert_eq!(constants.material, material.to_gpu_material());
    assert_eq!(constants.material.albedo_roughness.w, 0.25);
    assert_eq!(constants.material.emissive_metallic.y, 2.0);
    assert_eq!(constants.model, Mat4::from_translation(Vec3::Y));

    let plain = Drawable::whole(MeshHandle(3), 36, Mat4::IDENTITY);
    assert_eq!(plain.material, Material::default());
}

#[test]
fn drawable_ranges() {
    let mut drawable = Drawable::whole(MeshHandle(0), 36, Mat4::IDENTITY);
    assert!(drawable.fits(36));
    assert!(!drawable.fits(35));

    drawable.first_index = 30;
    drawable.index_count = 6;
    assert!(drawable.fits(36));

    drawable.first_index = u32::MAX;
    assert!(!drawable.fits(36));
}

#[test]
fn mesh_validation() {
    assert!(validate_mesh(3, &[0, 1, 2]).is_ok());
    assert!(matches!(validate_mesh(0, &[0, 1, 2]), Err(MeshError::Empty)));
    assert!(matches!(validate_mesh(3, &[]), Err(MeshError::Empty)));
    assert!(matches!(
        validate_mesh(3, &[0, 1]),
        Err(MeshError::NotTriangles(2))
    ));
    assert!(matches!(
        validate_mesh(3, &[0, 1, 3]),
        Err(MeshError::IndexOutOfRange {
            index: 3,
            vertex_count: 3
        })
    ));
}

#[test]
fn default_settings_are_valid() {
    let settings = RendererSettings::default();
    assert!(settings.validate().is_ok());
    assert_eq!((settings.width, settings.height), (1280, 720));
    assert_eq!(settings.tile_size, 16);
    assert_eq!(settings.max_lights_per_tile, 1024);
    assert_eq!(settings.shadows.cascades, 4);
}

#[test]
fn invalid_settings() {
    let zero_tiles = RendererSettings {
        tile_size: 0,
        ..RendererSettings::default()
    };
    assert!(matches!(zero_tiles.validate(), Err(SettingsError::Invalid(_))));

    let mut too_many_cascades = RendererSettings::default();
    too_many_cascades.shadows.cascades = MAX_SHADOW_CASCADES + 1;
    assert!(matches!(
        too_many_cascades.validate(),
        Err(SettingsError::Invalid(_))
    ));

    let no_capacity = RendererSettings {
        max_lights_per_tile: 0,
        ..RendererSettings::default()
    };
    assert!(no_capacity.validate().is_err());
}

#[test]
fn settings_files() {
    let dir = std::env::temp_dir().join("ember_render_settings");
    std::fs::create_dir_all(&dir).unwrap();

    // Missing files give the defaults
    let missing = RendererSettings::load(dir.join("does_not_exist.ron")).unwrap();
    assert_eq!(missing, RendererSettings::default());

    let mut settings = RendererSettings {
        width: 1920,
        height: 1080,
        max_lights_per_tile: 10,
        force_fallback: true,
        ..RendererSettings::default()
    };
    settings.shadows.depth_bias_constant = 2.5;
    let path = dir.join("round_trip.ron");
    settings.save(&path).unwrap();
    assert_eq!(RendererSettings::load(&path).unwrap(), settings);

    // Fields left out keep their defaults
    let partial = dir.join("partial.ron");
    std::fs::write(&partial, "(tile_size: 8, shadows: (cascades: 2))").unwrap();
    let loaded = RendererSettings::load(&partial).unwrap();
    assert_eq!(loaded.tile_size, 8);
    assert_eq!(loaded.shadows.cascades, 2);
    assert_eq!(loaded.shadows.resolution, 2048);
    assert_eq!(loaded.width, 1280);

    let malformed = dir.join("malformed.ron");
    std::fs::write(&malformed, "(tile_size: \"sixteen\"").unwrap();
    assert!(matches!(
        RendererSettings::load(&malformed),
        Err(SettingsError::Parse(_))
    ));

    let invalid = dir.join("invalid.ron");
    std::fs::write(&invalid, "(tile_size: 0)").unwrap();
    assert!(matches!(
        RendererSettings::load(&invalid),
        Err(SettingsError::Invalid(_))
    ));
}
