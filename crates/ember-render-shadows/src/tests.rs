use ember_math::{Vec3, Vec4};
use ember_render_base::shader_constants::MAX_SHADOW_CASCADES;
use ember_render_camera::Camera;

use crate::{
    cascades::{
        cascade_transforms, compute_splits, light_direction_from_angles, CascadeError,
        CascadeSplits, CascadeTransform, GpuShadowCascades,
    },
    settings::ShadowSettings,
    shadows::DepthBias,
};

#[test]
fn splits_are_monotonic() {
    for count in 1..=MAX_SHADOW_CASCADES {
        for lambda in [0.0, 0.5, 0.95, 1.0] {
            let splits = compute_splits(0.1, 100.0, count, lambda).unwrap();
            assert_eq!(splits.len(), count + 1);
            assert_eq!(splits[0], 0.1);
            assert_eq!(splits[count], 100.0);
            for pair in splits.windows(2) {
                assert!(
                    pair[0] < pair[1],
                    "splits {splits:?} not increasing for lambda {lambda}"
                );
            }
        }
    }
}

#[test]
fn uniform_splits() {
    let splits = compute_splits(1.0, 101.0, 4, 0.0).unwrap();
    let expected = [1.0, 26.0, 51.0, 76.0, 101.0];
    for (split, expected) in splits.iter().zip(expected) {
        assert!((split - expected).abs() < 1e-3);
    }
}

#[test]
fn logarithmic_splits() {
    let splits = compute_splits(1.0, 10_000.0, 4, 1.0).unwrap();
    let expected = [1.0, 10.0, 100.0, 1000.0, 10_000.0];
    for (split, expected) in splits.iter().zip(expected) {
        assert!((split - expected).abs() / expected < 1e-3);
    }
}

#[test]
fn invalid_split_parameters() {
    assert_eq!(
        compute_splits(0.1, 100.0, 0, 0.5),
        Err(CascadeError::InvalidCount(0))
    );
    assert_eq!(
        compute_splits(0.1, 100.0, MAX_SHADOW_CASCADES + 1, 0.5),
        Err(CascadeError::InvalidCount(MAX_SHADOW_CASCADES + 1))
    );
    assert!(matches!(
        compute_splits(0.0, 100.0, 4, 0.5),
        Err(CascadeError::InvalidRange { .. })
    ));
    assert!(matches!(
        compute_splits(10.0, 10.0, 4, 0.5),
        Err(CascadeError::InvalidRange { .. })
    ));
    assert!(matches!(
        compute_splits(0.1, f32::INFINITY, 4, 0.5),
        Err(CascadeError::InvalidRange { .. })
    ));
    assert!(matches!(
        compute_splits(0.1, 100.0, 4, 1.5),
        Err(CascadeError::InvalidLambda(_))
    ));
    assert!(matches!(
        compute_splits(0.1, 100.0, 4, f32::NAN),
        Err(CascadeError::InvalidLambda(_))
    ));
}

#[test]
fn nearly_equal_planes_are_rejected() {
    // Only a few ulps apart, so the inner splits can't all be distinct
    assert!(matches!(
        compute_splits(100.0, 100.00002, 4, 0.95),
        Err(CascadeError::InvalidRange { .. })
    ));

    let splits = compute_splits(1.0, 1.001, MAX_SHADOW_CASCADES, 0.95).unwrap();
    assert!(splits.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn splits_recomputed_only_on_change() {
    let mut splits = CascadeSplits::new(0.1, 100.0, 4, 0.95).unwrap();
    let before = splits.clone();

    assert!(!splits.update(0.1, 100.0).unwrap());
    assert_eq!(splits, before);

    assert!(splits.update(0.1, 200.0).unwrap());
    assert_eq!(splits.count(), 4);
    assert_eq!(splits.splits()[4], 200.0);

    // A bad range leaves the previous splits in place
    assert!(splits.update(5.0, 1.0).is_err());
    assert_eq!(splits.splits()[4], 200.0);
}

#[test]
fn cascade_selection() {
    let splits = CascadeSplits::new(1.0, 101.0, 4, 0.0).unwrap();
    assert_eq!(splits.range(1), (26.0, 51.0));
    assert_eq!(splits.cascade_for_depth(1.0), 0);
    assert_eq!(splits.cascade_for_depth(10.0), 0);
    assert_eq!(splits.cascade_for_depth(30.0), 1);
    assert_eq!(splits.cascade_for_depth(60.0), 2);
    assert_eq!(splits.cascade_for_depth(100.0), 3);
    // Past the far plane falls back to the last cascade
    assert_eq!(splits.cascade_for_depth(500.0), 3);
}

#[test]
fn default_light_points_down() {
    let dir = ShadowSettings::default().light_direction();
    assert!((dir.length() - 1.0).abs() < 1e-5);
    assert!(dir.y < 0.0);
    assert!(dir.x < 0.0);
    assert!(dir.z < 0.0);

    let straight_down = light_direction_from_angles(0.0, 90.0);
    assert!((straight_down - Vec3::NEG_Y).length() < 1e-5);
}

#[test]
fn cascades_contain_their_slice() {
    let camera = Camera::default();
    let settings = ShadowSettings::default();
    let splits = CascadeSplits::new(
        camera.near,
        camera.far,
        settings.cascades,
        settings.split_lambda,
    )
    .unwrap();
    let transforms = cascade_transforms(
        &camera,
        &splits,
        settings.light_direction(),
        settings.resolution,
    );
    assert_eq!(transforms.len(), settings.cascades);

    // Snapping may shift the center by up to one texel
    let xy_limit = 1.0 + 4.0 / settings.resolution as f32;
    for (i, transform) in transforms.iter().enumerate() {
        let (near, far) = splits.range(i);
        for corner in camera.slice_corners(near, far) {
            let clip = transform.vp * Vec4::from((corner, 1.0));
            assert!(clip.x.abs() <= xy_limit, "cascade {i}: {clip:?}");
            assert!(clip.y.abs() <= xy_limit, "cascade {i}: {clip:?}");
            assert!(clip.z >= -1e-4 && clip.z <= 1.0 + 1e-4, "cascade {i}: {clip:?}");
        }
    }

    // Later cascades cover more of the view volume
    for pair in transforms.windows(2) {
        assert!(pair[0].radius <= pair[1].radius);
    }
}

#[test]
fn cascade_center_snaps_to_texels() {
    let camera = Camera::perspective(
        Vec3::new(1.37, 3.11, -7.93),
        Vec3::new(0.4, 0.0, 0.2),
        Vec3::Y,
        60.0_f32.to_radians(),
        16.0 / 9.0,
        0.1,
        50.0,
    );
    let light_dir = ShadowSettings::default().light_direction();
    let resolution = 1024;
    let corners = camera.slice_corners(0.1, 8.0);
    let transform = CascadeTransform::new(&corners, light_dir, resolution);

    let center = transform.view.inverse().w_axis.truncate();
    let texels_per_unit = resolution as f32 / (transform.radius * 2.0);
    let light_space = ember_math::Mat4::look_at_lh(Vec3::ZERO, light_dir, Vec3::Y)
        .transform_point3(center)
        * texels_per_unit;

    for coord in [light_space.x, light_space.y] {
        let off = (coord - coord.round()).abs();
        assert!(off < 0.05, "{coord} is not on a texel boundary");
    }
}

#[test]
fn vertical_light_is_well_formed() {
    let camera = Camera::default();
    let corners = camera.slice_corners(0.1, 10.0);
    let transform = CascadeTransform::new(&corners, Vec3::NEG_Y, 2048);
    assert!(transform.vp.is_finite());
    assert!(transform.radius > 0.0);
}

#[test]
fn gpu_cascade_layout() {
    assert_eq!(
        std::mem::size_of::<GpuShadowCascades>(),
        64 * MAX_SHADOW_CASCADES + 16 + 16 + 16
    );

    let camera = Camera::default();
    let splits = CascadeSplits::new(camera.near, camera.far, 2, 0.5).unwrap();
    let light_dir = Vec3::new(0.0, -2.0, 0.0);
    let transforms = cascade_transforms(&camera, &splits, light_dir, 512);
    let gpu = GpuShadowCascades::new(&transforms, &splits, light_dir, 512);

    assert_eq!(gpu.cascade_count, 2);
    assert_eq!(gpu.resolution, 512);
    assert_eq!(gpu.splits.x, splits.splits()[1]);
    assert_eq!(gpu.splits.y, camera.far);
    assert_eq!(gpu.splits.z, camera.far);
    assert_eq!(gpu.vp[0], transforms[0].vp);
    assert_eq!(gpu.vp[3], ember_math::Mat4::IDENTITY);
    assert_eq!(gpu.light_direction, Vec4::new(0.0, -1.0, 0.0, 0.0));
}

#[test]
fn depth_bias_clamp_needs_device_support() {
    let settings = ShadowSettings {
        depth_bias_clamp: 0.05,
        ..Default::default()
    };
    let bias = DepthBias {
        constant: settings.depth_bias_constant,
        clamp: settings.depth_bias_clamp,
    };

    assert_eq!(bias.for_device(true), bias);
    let unsupported = bias.for_device(false);
    assert_eq!(unsupported.clamp, 0.0);
    assert_eq!(unsupported.constant, settings.depth_bias_constant);
}
