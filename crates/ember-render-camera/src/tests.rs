use ember_math::{Vec3, Vec4Swizzles};

use crate::Camera;

fn camera() -> Camera {
    Camera::perspective(
        Vec3::new(0.0, 0.0, -10.0),
        Vec3::ZERO,
        Vec3::Y,
        90.0_f32.to_radians(),
        1.0,
        0.5,
        50.0,
    )
}

#[test]
fn position_round_trips() {
    let position = camera().position();
    assert!((position - Vec3::new(0.0, 0.0, -10.0)).length() < 1e-4);
}

#[test]
fn split_regen_only_on_clip_change() {
    let a = camera();
    let mut b = a;
    b.view = ember_math::Mat4::IDENTITY;
    assert!(!a.needs_split_regen(&b));

    b.far = 80.0;
    assert!(a.needs_split_regen(&b));
}

#[test]
fn slice_corners_lie_on_requested_depths() {
    let camera = camera();
    let corners = camera.slice_corners(2.0, 6.0);

    for (i, corner) in corners.iter().enumerate() {
        let view_space = camera.view.transform_point3(*corner);
        let expected = if i < 4 { 2.0 } else { 6.0 };
        assert!((view_space.z - expected).abs() < 1e-3, "{i}: {view_space}");

        // 90 degree field of view with a square aspect ratio
        assert!((view_space.x.abs() - expected).abs() < 1e-3);
        assert!((view_space.y.abs() - expected).abs() < 1e-3);
    }
}

#[test]
fn up_is_top_of_screen() {
    let camera = camera();
    let clip = camera.vp() * Vec3::new(0.0, 1.0, 0.0).extend(1.0);
    let ndc = clip.xyz() / clip.w;
    // Vulkan NDC has -Y at the top of the screen
    assert!(ndc.y < 0.0);
    assert!(ndc.z > 0.0 && ndc.z < 1.0);
}

#[test]
fn gpu_struct_carries_clip_planes() {
    let gpu = camera().into_gpu_struct(1920.0, 1080.0);
    assert_eq!(gpu.clip_viewport.x, 0.5);
    assert_eq!(gpu.clip_viewport.y, 50.0);
    assert_eq!(gpu.clip_viewport.z, 1920.0);
    assert_eq!(gpu.position.w, 1.0);
    assert_eq!(std::mem::size_of_val(&gpu) % 16, 0);
}
