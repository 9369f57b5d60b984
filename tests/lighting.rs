//! Light accumulation, spot cones and shadows on the CPU backend

mod common;

use common::*;
use deferred_pipeline::{backend::software::mean_rgb, scene::SpotLight, FrameState};
use glam::{Vec3, Vec4};
use rstest::rstest;

fn accent_lights() -> Vec<SpotLight> {
    vec![
        SpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO),
        SpotLight::new(Vec3::new(6.0, 6.0, 2.0), Vec3::new(1.0, 0.0, 0.0))
            .with_color(Vec3::new(1.0, 0.5, 0.2), 60.0),
        SpotLight::new(Vec3::new(-5.0, 7.0, -3.0), Vec3::new(-1.0, 0.0, 1.0))
            .with_color(Vec3::new(0.2, 0.4, 1.0), 80.0)
            .with_cone(15.0, 30.0),
    ]
}

#[test]
fn test_shaded_target_is_sum_of_single_lights() {
    let mut renderer = renderer(32, 24);
    add_floor(&mut renderer);
    add_cube(&mut renderer, Vec3::new(0.0, 0.5, 0.0));

    renderer.scene_mut().lights = accent_lights();
    let report = renderer.render().unwrap();
    assert!(report.presented);
    assert_eq!(report.lights, 3);
    let combined = shaded_texels(&renderer);

    let mut summed = vec![Vec4::ZERO; combined.len()];
    for index in 0..3 {
        let light = accent_lights().swap_remove(index);
        renderer.scene_mut().lights = vec![light];
        assert!(renderer.render().unwrap().presented);
        for (sum, texel) in summed.iter_mut().zip(shaded_texels(&renderer)) {
            *sum += texel;
        }
    }

    assert!(summed.iter().any(|t| t.truncate().max_element() > 0.0));
    assert_rgb_close(&combined, &summed, 1e-4);
}

#[rstest]
#[case(&[0, 1, 2])]
#[case(&[2, 1, 0])]
#[case(&[1, 2, 0])]
fn test_light_order_does_not_change_result(#[case] order: &[usize]) {
    let mut renderer = renderer(24, 24);
    add_floor(&mut renderer);

    renderer.scene_mut().lights = accent_lights();
    renderer.render().unwrap();
    let reference = shaded_texels(&renderer);

    let mut lights: Vec<Option<SpotLight>> = accent_lights().into_iter().map(Some).collect();
    renderer.scene_mut().lights = order.iter().filter_map(|&i| lights[i].take()).collect();
    renderer.render().unwrap();

    assert_rgb_close(&reference, &shaded_texels(&renderer), 1e-4);
}

#[test]
fn test_lit_floor_and_occluded_floor() {
    let mut renderer = renderer(64, 64);
    add_floor(&mut renderer);
    add_cube(&mut renderer, Vec3::new(0.0, 3.0, 0.0));
    renderer.add_light(overhead_light(), true).unwrap();

    let report = renderer.render().unwrap();
    assert!(report.presented);
    assert_eq!(report.shadow_draws, 2);

    let targets = &renderer.resources().unwrap().targets;
    let lit = project(&renderer, Vec3::new(2.0, 0.0, 2.0));
    let occluded = project(&renderer, Vec3::ZERO);
    for (x, y) in [lit, occluded] {
        let position = renderer.backend().texel(targets.position(), x, y).unwrap();
        assert_eq!(position.w, 1.0);
        assert!(position.y.abs() < 0.05, "floor expected at {:?}", position);
    }

    let shaded = targets.shaded();
    let lit = renderer.backend().texel(shaded, lit.0, lit.1).unwrap();
    let occluded = renderer.backend().texel(shaded, occluded.0, occluded.1).unwrap();
    assert!(lit.truncate().min_element() > 0.0);
    assert_eq!(occluded.truncate(), Vec3::ZERO);
}

#[test]
fn test_floor_outside_cone_is_dark() {
    let mut renderer = renderer(48, 48);
    add_floor(&mut renderer);
    renderer
        .add_light(overhead_light().with_cone(5.0, 10.0), false)
        .unwrap();
    renderer.render().unwrap();

    let shaded = renderer.resources().unwrap().targets.shaded();
    let (x, y) = project(&renderer, Vec3::new(3.0, 0.0, 0.0));
    let outside = renderer.backend().texel(shaded, x, y).unwrap();
    assert_eq!(outside.truncate(), Vec3::ZERO);
    let (x, y) = project(&renderer, Vec3::new(0.3, 0.0, 0.3));
    let inside = renderer.backend().texel(shaded, x, y).unwrap();
    assert!(inside.x > 0.0);
}

#[test]
fn test_shadows_disabled_skips_depth_and_sampling() {
    let mut renderer = renderer(32, 32);
    add_floor(&mut renderer);
    add_cube(&mut renderer, Vec3::new(0.0, 3.0, 0.0));
    let light = renderer.add_light(overhead_light(), true).unwrap();

    renderer.render().unwrap();
    let depth = renderer.scene().lights[light].shadow().unwrap().depth();
    assert!(renderer.backend().stats().depth_writes(depth) > 0);
    assert!(renderer.backend().stats().fetches("deferred", 10) > 0);

    renderer.set_cast_shadows(light, false).unwrap();
    let report = renderer.render().unwrap();
    assert!(report.presented);
    assert_eq!(report.states[0], FrameState::ShadowDepth);
    assert_eq!(report.shadow_draws, 0);

    let stats = renderer.backend().stats();
    assert_eq!(stats.draws("shadow_map"), 0);
    assert_eq!(stats.depth_writes(depth), 0);
    assert_eq!(stats.fetches("deferred", 10), 0);

    // Without a shadow map the floor under the cube is fully lit
    let shaded = renderer.resources().unwrap().targets.shaded();
    let (x, y) = project(&renderer, Vec3::ZERO);
    assert!(renderer.backend().texel(shaded, x, y).unwrap().x > 0.0);
}

#[test]
fn test_exposure_brightens_composite() {
    let mut renderer = renderer(24, 24);
    add_floor(&mut renderer);
    renderer.add_light(overhead_light(), false).unwrap();

    renderer.render().unwrap();
    let dim = mean_rgb(renderer.backend().surface_pixels());
    renderer.set_exposure(4.0);
    renderer.render().unwrap();
    let bright = mean_rgb(renderer.backend().surface_pixels());

    assert!(bright.x > dim.x);
    assert!(bright.max_element() <= 1.0);
}
