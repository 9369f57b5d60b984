#![allow(dead_code)]

use deferred_pipeline::{
    resources::{Material, MeshData},
    scene::{Drawable, SpotLight, Transform},
    Renderer, RendererConfig, SoftwareBackend,
};
use glam::{Vec3, Vec4};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Initialized renderer on the CPU backend with small shadow maps
pub fn renderer(width: u32, height: u32) -> Renderer<SoftwareBackend> {
    init_logger();
    let config = RendererConfig::default()
        .with_size(width, height)
        .with_shadow_resolution(128);
    let mut renderer = Renderer::new(SoftwareBackend::new(width, height), config);
    renderer.init(width, height).unwrap();
    renderer.scene_mut().camera.position = Vec3::new(0.0, 8.0, 8.0);
    renderer.scene_mut().camera.target = Vec3::ZERO;
    renderer
}

/// Matte floor plane at y = 0
pub fn add_floor(renderer: &mut Renderer<SoftwareBackend>) -> usize {
    let plane = renderer.upload_mesh(&MeshData::plane(20.0, 20.0, 4)).unwrap();
    renderer
        .scene_mut()
        .add(Drawable::new(plane, Material::matte(Vec3::splat(0.8))))
}

pub fn add_cube(renderer: &mut Renderer<SoftwareBackend>, position: Vec3) -> usize {
    let cube = renderer.upload_mesh(&MeshData::cube()).unwrap();
    renderer.scene_mut().add(
        Drawable::new(cube, Material::matte(Vec3::splat(0.5)))
            .with_transform(Transform::from_position(position)),
    )
}

pub fn overhead_light() -> SpotLight {
    SpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO)
}

/// Pixel the camera sees `point` at
pub fn project(renderer: &Renderer<SoftwareBackend>, point: Vec3) -> (u32, u32) {
    let (width, height) = renderer.resources().unwrap().targets.size();
    let clip = renderer.scene().camera.view_projection_matrix() * point.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    let x = (ndc.x + 1.0) * 0.5 * width as f32;
    let y = (1.0 - ndc.y) * 0.5 * height as f32;
    (x as u32, y as u32)
}

/// Texels of the accumulated lighting target after the last frame
pub fn shaded_texels(renderer: &Renderer<SoftwareBackend>) -> Vec<Vec4> {
    let shaded = renderer.resources().unwrap().targets.shaded();
    renderer.backend().texture_texels(shaded).unwrap().to_vec()
}

/// Compare the color channels of two texel lists with a relative tolerance
pub fn assert_rgb_close(a: &[Vec4], b: &[Vec4], tolerance: f32) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        let (x, y) = (x.truncate(), y.truncate());
        let scale = x.abs().max(y.abs()).max_element().max(1.0);
        assert!(
            (x - y).abs().max_element() <= tolerance * scale,
            "texel {} differs: {:?} vs {:?}",
            i,
            x,
            y
        );
    }
}
