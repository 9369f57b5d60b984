//! Material inputs as they reach the G-buffer and the composite

mod common;

use std::io::Cursor;

use common::*;
use deferred_pipeline::{
    resources::{Material, MeshData, TextureData},
    scene::Drawable,
    Renderer, SoftwareBackend,
};
use glam::Vec3;

fn floor_with(renderer: &mut Renderer<SoftwareBackend>, material: Material) {
    let plane = renderer.upload_mesh(&MeshData::plane(20.0, 20.0, 2)).unwrap();
    renderer.scene_mut().add(Drawable::new(plane, material));
}

#[test]
fn test_masked_out_surface_leaves_background() {
    let mut renderer = renderer(16, 16);
    let mask = renderer
        .upload_texture(&TextureData::solid_color([0, 0, 0, 255], "mask").linear())
        .unwrap();
    floor_with(&mut renderer, Material::matte(Vec3::ONE).with_mask_texture(mask));
    renderer.add_light(overhead_light(), false).unwrap();

    let report = renderer.render().unwrap();
    assert_eq!(report.geometry_draws, 1);

    let position = renderer.resources().unwrap().targets.position();
    let texels = renderer.backend().texture_texels(position).unwrap();
    assert!(texels.iter().all(|t| t.w == 0.0));

    let clear = renderer.config().clear_color;
    assert!(renderer
        .backend()
        .surface_pixels()
        .iter()
        .all(|p| p.to_array() == clear));
}

#[test]
fn test_ambient_and_emissive_glow_without_lights() {
    let mut renderer = renderer(16, 16);
    let emissive = renderer
        .upload_texture(&TextureData::solid_color([255, 255, 255, 255], "glow"))
        .unwrap();
    floor_with(
        &mut renderer,
        Material::matte(Vec3::splat(0.5))
            .with_ambient(Vec3::splat(0.4))
            .with_emissive_texture(emissive),
    );
    renderer.render().unwrap();

    let (x, y) = project(&renderer, Vec3::ZERO);
    let targets = &renderer.resources().unwrap().targets;
    let mask = renderer.backend().texel(targets.mask(), x, y).unwrap();
    assert!((mask.truncate() - Vec3::splat(1.2)).abs().max_element() < 1e-5);
    assert_eq!(renderer.backend().texel(targets.shaded(), x, y).unwrap().truncate(), Vec3::ZERO);

    let expected = 1.2 / 2.2;
    let pixel = renderer.backend().surface_pixel(x, y);
    assert!((pixel.truncate() - Vec3::splat(expected)).abs().max_element() < 1e-4);
}

#[test]
fn test_decoded_diffuse_texture_tints_albedo() {
    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]));
    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)
        .unwrap();
    let data = TextureData::from_bytes(&png, "red.png").unwrap();
    assert_eq!((data.width, data.height), (4, 4));

    let mut renderer = renderer(16, 16);
    let red = renderer.upload_texture(&data).unwrap();
    floor_with(
        &mut renderer,
        Material::matte(Vec3::splat(0.8)).with_diffuse_texture(red),
    );
    renderer.render().unwrap();

    let (x, y) = project(&renderer, Vec3::ZERO);
    let albedo = renderer.resources().unwrap().targets.albedo();
    let texel = renderer.backend().texel(albedo, x, y).unwrap();
    assert!((texel.x - 0.8).abs() < 1e-5);
    assert_eq!((texel.y, texel.z), (0.0, 0.0));
}
