//! Frame sequencing, resizing, shader reloading and resource cleanup

mod common;

use std::fs;
use std::path::PathBuf;

use common::*;
use deferred_pipeline::{
    backend::{BackendError, FramebufferStatus, GraphicsBackend},
    resources::{Material, MeshData},
    scene::Drawable,
    shader::ProgramKind,
    pipeline::PassError,
    FrameState, Renderer, RendererConfig, RendererError, SoftwareBackend,
};
use glam::Vec3;
use rstest::rstest;

#[test]
fn test_frame_walks_every_state_once() {
    let mut renderer = renderer(16, 16);
    add_floor(&mut renderer);
    renderer.add_light(overhead_light(), true).unwrap();

    let report = renderer.render().unwrap();
    assert_eq!(
        report.states,
        vec![
            FrameState::ShadowDepth,
            FrameState::Geometry,
            FrameState::Lighting,
            FrameState::PostProcess,
            FrameState::Idle,
        ]
    );
    assert_eq!(renderer.orchestrator().state(), FrameState::Idle);

    let passes = renderer.backend().stats().passes();
    let labels: Vec<_> = passes.iter().map(|p| p.as_deref()).collect();
    assert_eq!(
        labels,
        vec![Some("shadow"), Some("geometry"), Some("lighting"), Some("post")]
    );
}

#[test]
fn test_background_shows_clear_color() {
    init_logger();
    let config = RendererConfig::default()
        .with_size(8, 8)
        .with_clear_color([0.25, 0.5, 0.75, 1.0]);
    let mut renderer = Renderer::new(SoftwareBackend::new(8, 8), config);
    renderer.init(8, 8).unwrap();
    renderer.render().unwrap();

    let pixel = renderer.backend().surface_pixel(3, 3);
    assert_eq!(pixel.to_array(), [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn test_empty_drawable_is_skipped() {
    let mut renderer = renderer(16, 16);
    let cube = renderer.upload_mesh(&MeshData::cube()).unwrap();
    renderer
        .scene_mut()
        .add(Drawable::with_parts(cube.clone(), Vec::new()));
    renderer
        .scene_mut()
        .add(Drawable::new(cube, Material::matte(Vec3::ONE)));
    renderer.add_light(overhead_light(), true).unwrap();

    let report = renderer.render().unwrap();
    assert!(report.presented);
    assert_eq!(report.geometry_draws, 1);
    assert_eq!(report.shadow_draws, 1);
    assert_eq!(renderer.backend().stats().draws("geometry"), 1);
}

#[test]
fn test_removed_drawable_is_skipped() {
    let mut renderer = renderer(16, 16);
    let floor = add_floor(&mut renderer);
    add_cube(&mut renderer, Vec3::new(0.0, 0.5, 0.0));

    assert_eq!(renderer.render().unwrap().geometry_draws, 2);
    renderer.scene_mut().remove(floor);
    let report = renderer.render().unwrap();
    assert!(report.presented);
    assert_eq!(report.geometry_draws, 1);
}

#[rstest]
#[case((32, 24), (48, 40))]
#[case((32, 24), (8, 4))]
#[case((16, 16), (17, 31))]
fn test_resize_round_trip(#[case] first: (u32, u32), #[case] second: (u32, u32)) {
    let mut renderer = renderer(first.0, first.1);
    add_floor(&mut renderer);

    for (width, height) in [second, first] {
        renderer.resize_buffers(width, height).unwrap();
        let targets = &renderer.resources().unwrap().targets;
        assert_eq!(targets.size(), (width, height));
        assert!(targets.status(renderer.backend()).is_complete());
        assert_eq!(renderer.backend().surface_size(), (width, height));
        assert!(renderer.render().unwrap().presented);
    }
    assert_eq!(shaded_texels(&renderer).len(), (first.0 * first.1) as usize);
}

#[test]
fn test_failed_resize_keeps_rendering_at_old_size() {
    let mut renderer = renderer(16, 12);
    add_floor(&mut renderer);
    renderer.render().unwrap();
    let before = renderer.backend().surface_pixels().to_vec();

    renderer
        .backend_mut()
        .fail_next_framebuffer(FramebufferStatus::IncompleteAttachment { index: 4 });
    let err = renderer.resize_buffers(40, 30).unwrap_err();
    assert!(matches!(err, RendererError::Pass(_)));
    assert_eq!(renderer.resources().unwrap().targets.size(), (16, 12));
    assert_eq!(renderer.backend().surface_size(), (16, 12));

    let report = renderer.render().unwrap();
    assert!(report.presented);
    assert!(report.failure.is_none());
    assert_eq!(renderer.backend().surface_pixels(), &before[..]);
}

#[test]
fn test_failed_pending_resize_drops_frame_once() {
    let mut renderer = renderer(16, 12);
    add_floor(&mut renderer);
    renderer.render().unwrap();
    let before = renderer.backend().surface_pixels().to_vec();

    renderer
        .backend_mut()
        .fail_next_framebuffer(FramebufferStatus::Unsupported);
    renderer.request_resize(20, 20);

    let dropped = renderer.render().unwrap();
    assert!(!dropped.presented);
    assert_eq!(dropped.states, vec![FrameState::Idle]);
    let failure = dropped.failure.as_ref().unwrap();
    assert_eq!(failure.state, FrameState::Idle);
    assert!(matches!(failure.error, PassError::IncompleteFramebuffer { .. }));
    assert!(dropped.newly_reported);
    assert_eq!(renderer.resources().unwrap().targets.size(), (16, 12));
    assert_eq!(renderer.backend().surface_size(), (16, 12));

    let next = renderer.render().unwrap();
    assert!(next.presented);
    assert!(next.failure.is_none());
    assert_eq!(next.states.last(), Some(&FrameState::Idle));
    assert_eq!(renderer.backend().surface_pixels(), &before[..]);
}

#[test]
fn test_repeated_resize_failure_is_reported_once() {
    let mut renderer = renderer(16, 12);
    let mut newly_reported = Vec::new();
    for _ in 0..2 {
        renderer
            .backend_mut()
            .fail_next_framebuffer(FramebufferStatus::Unsupported);
        renderer.request_resize(20, 20);
        let report = renderer.render().unwrap();
        assert!(report.dropped());
        newly_reported.push(report.newly_reported);
    }
    assert_eq!(newly_reported, vec![true, false]);
    assert!(renderer.render().unwrap().presented);
    assert!(renderer.orchestrator().last_failure().is_none());
}

#[test]
fn test_api_error_does_not_stop_next_frame() {
    let mut renderer = renderer(8, 8);
    renderer
        .backend_mut()
        .inject_error(BackendError::Validation("stale bind group".into()));

    let first = renderer.render().unwrap();
    assert!(first.presented);
    assert!(first.api_error.is_some());

    let second = renderer.render().unwrap();
    assert!(second.presented);
    assert!(second.api_error.is_none());
}

fn shader_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("deferred-pipeline-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    for kind in ProgramKind::ALL {
        fs::write(dir.join(kind.file_name()), kind.embedded_source()).unwrap();
    }
    dir
}

#[test]
fn test_reload_from_directory() {
    init_logger();
    let dir = shader_dir("reload");
    let config = RendererConfig::default().with_size(8, 8).with_shader_dir(&dir);
    let mut renderer = Renderer::new(SoftwareBackend::new(8, 8), config);
    renderer.init(8, 8).unwrap();

    renderer.reload_shaders().unwrap();
    assert!(renderer.render().unwrap().presented);
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_broken_reload_keeps_previous_programs() {
    init_logger();
    let dir = shader_dir("broken");
    let config = RendererConfig::default().with_size(8, 8).with_shader_dir(&dir);
    let mut renderer = Renderer::new(SoftwareBackend::new(8, 8), config);
    renderer.init(8, 8).unwrap();
    let handles: Vec<_> = ProgramKind::ALL
        .iter()
        .map(|kind| renderer.resources().unwrap().programs.get(*kind).handle())
        .collect();

    fs::write(dir.join(ProgramKind::Lighting.file_name()), "fn broken(").unwrap();
    assert!(matches!(
        renderer.reload_shaders(),
        Err(RendererError::Shader(_))
    ));

    let after: Vec<_> = ProgramKind::ALL
        .iter()
        .map(|kind| renderer.resources().unwrap().programs.get(*kind).handle())
        .collect();
    assert_eq!(handles, after);
    assert!(renderer.render().unwrap().presented);
    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_shutdown_releases_all_resources() {
    let mut renderer = renderer(16, 16);
    add_floor(&mut renderer);
    add_cube(&mut renderer, Vec3::Y);
    renderer.add_light(overhead_light(), true).unwrap();
    renderer.add_light(overhead_light(), false).unwrap();
    renderer.render().unwrap();
    assert!(renderer.backend().live_resources() > 0);

    renderer.shutdown();
    assert_eq!(renderer.backend().live_resources(), 0);
}
