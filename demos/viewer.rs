//! Interactive viewer for the deferred pipeline
//!
//! Run with:
//!   cargo run --example viewer
//!   cargo run --example viewer -- --shader-dir shaders
//!
//! Controls:
//!   WASD / arrows - Move camera
//!   Left mouse    - Look around (hold)
//!   R             - Reload shaders
//!   Tab           - Cycle debug view
//!   Escape        - Exit

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use deferred_pipeline::{
    resources::{Material, MeshData, TextureData},
    scene::{CameraController, Drawable, FreeFlyController, SpotLight, Transform},
    window::WindowCommand,
    Renderer, RendererConfig, WgpuBackend, Window,
};
use glam::Vec3;
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Deferred shading viewer")]
struct Args {
    /// Initial window width
    #[arg(long, default_value_t = 1280)]
    width: u32,
    /// Initial window height
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Load shaders from this directory so `R` picks up edits
    #[arg(long)]
    shader_dir: Option<PathBuf>,
    /// Shadow map edge length in texels
    #[arg(long, default_value_t = 1024)]
    shadow_resolution: u32,
    #[arg(long, default_value_t = 1.0)]
    exposure: f32,
    /// Camera speed in units per second
    #[arg(long, default_value_t = 5.0)]
    move_speed: f32,
    /// Image file for the floor instead of the checkerboard
    #[arg(long)]
    floor_texture: Option<PathBuf>,
    #[arg(long)]
    no_vsync: bool,
}

/// A drawable that spins in place every frame
struct Showcase {
    index: usize,
    pivot: Vec3,
    axis: Vec3,
    position: Vec3,
    speed: f32,
}

impl Showcase {
    fn transform(&self, time: f32) -> Transform {
        Transform::spin_about(self.pivot, self.axis, time * self.speed, self.position)
    }
}

fn setup_scene(
    renderer: &mut Renderer<WgpuBackend>,
    floor_texture: Option<&Path>,
) -> Result<Vec<Showcase>, Box<dyn Error>> {
    let plane = renderer.upload_mesh(&MeshData::plane(20.0, 20.0, 8))?;
    let cube = renderer.upload_mesh(&MeshData::cube())?;
    let sphere = renderer.upload_mesh(&MeshData::sphere(32, 16))?;
    let floor = match floor_texture {
        Some(path) => TextureData::from_file(path)?,
        None => TextureData::checkerboard(256, [210, 210, 210, 255], [80, 80, 80, 255]),
    };
    let floor = renderer.upload_texture(&floor)?;

    let scene = renderer.scene_mut();
    scene.add(Drawable::new(
        plane,
        Material::matte(Vec3::ONE).with_diffuse_texture(floor),
    ));
    for x in [-5.0, 5.0] {
        scene.add(
            Drawable::new(cube.clone(), Material::matte(Vec3::splat(0.7))).with_transform(
                Transform::from_position_scale(Vec3::new(x, 1.5, -3.0), Vec3::new(1.0, 3.0, 1.0)),
            ),
        );
    }

    let spinning_cube = scene.add(Drawable::new(
        cube,
        Material::plastic(Vec3::new(0.8, 0.15, 0.1)),
    ));
    let spinning_sphere = scene.add(Drawable::new(
        sphere,
        Material::metal(Vec3::new(0.9, 0.75, 0.3)),
    ));
    let showcase = vec![
        Showcase {
            index: spinning_cube,
            pivot: Vec3::ZERO,
            axis: Vec3::new(1.0, 1.0, 0.0).normalize(),
            position: Vec3::new(1.0, 1.5, 0.0),
            speed: 0.8,
        },
        Showcase {
            index: spinning_sphere,
            pivot: Vec3::new(1.5, 0.0, 0.0),
            axis: Vec3::Y,
            position: Vec3::new(-1.5, 1.0, 1.5),
            speed: 1.2,
        },
    ];

    renderer.add_light(
        SpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::new(1.0, 1.5, 0.0)),
        true,
    )?;
    renderer.add_light(
        SpotLight::new(Vec3::new(7.0, 6.0, 7.0), Vec3::ZERO)
            .with_color(Vec3::new(1.0, 0.6, 0.3), 60.0)
            .with_cone(20.0, 30.0),
        false,
    )?;
    renderer.add_light(
        SpotLight::new(Vec3::new(-7.0, 5.0, 4.0), Vec3::new(0.0, 1.0, 0.0))
            .with_color(Vec3::new(0.3, 0.5, 1.0), 60.0)
            .with_cone(15.0, 25.0),
        false,
    )?;

    Ok(showcase)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RendererConfig::default()
        .with_size(args.width, args.height)
        .with_shadow_resolution(args.shadow_resolution)
        .with_exposure(args.exposure);
    config.vsync = !args.no_vsync;
    if let Some(dir) = &args.shader_dir {
        config = config.with_shader_dir(dir);
    }

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut window = Window::new(&event_loop, &config.title, config.width, config.height)
        .expect("Failed to create window");

    let backend = match WgpuBackend::new(window.window_arc(), config.vsync) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("Failed to create wgpu backend: {}", e);
            return;
        }
    };

    let mut renderer = Renderer::new(backend, config);
    let (width, height) = window.dimensions();
    if let Err(e) = renderer.init(width, height) {
        log::error!("Failed to initialize renderer: {}", e);
        return;
    }
    let showcase = match setup_scene(&mut renderer, args.floor_texture.as_deref()) {
        Ok(showcase) => showcase,
        Err(e) => {
            log::error!("Failed to build scene: {}", e);
            return;
        }
    };
    log::info!(
        "Scene ready: {} drawables, {} lights",
        renderer.scene().visible().count(),
        renderer.scene().lights.len()
    );

    let mut controller = FreeFlyController::new().with_speed(args.move_speed);
    let start = Instant::now();
    let mut last_frame = start;

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    match window.handle_event(&event) {
                        Some(WindowCommand::Quit) => elwt.exit(),
                        Some(WindowCommand::ReloadShaders) => {
                            // Failures are logged and the previous programs stay in use
                            let _ = renderer.reload_shaders();
                        }
                        Some(WindowCommand::NextDebugView) => {
                            let view = renderer.debug_view().next();
                            renderer.set_debug_view(view);
                            log::info!("Debug view: {:?}", view);
                        }
                        None => {}
                    }
                    if let Some((width, height)) = window.take_resize() {
                        if width > 0 && height > 0 {
                            renderer.request_resize(width, height);
                        }
                    }
                    if let WindowEvent::RedrawRequested = event {
                        if let Err(e) = renderer.render() {
                            log::error!("Render failed: {}", e);
                        }
                    }
                }
                Event::AboutToWait => {
                    let now = Instant::now();
                    let dt = (now - last_frame).as_secs_f32();
                    last_frame = now;

                    controller.update(&mut renderer.scene_mut().camera, window.input(), dt);
                    window.input_mut().reset_deltas();

                    let time = (now - start).as_secs_f32();
                    for object in &showcase {
                        if let Some(drawable) = renderer.scene_mut().drawable_mut(object.index) {
                            drawable.transform = object.transform(time);
                        }
                    }

                    window.request_redraw();
                }
                _ => {}
            }
        })
        .expect("Event loop failed");
}
