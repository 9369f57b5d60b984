//! Deferred lighting pass
//!
//! Resolves the G-buffer for one spotlight by drawing the full-screen quad.
//! Contributions of several lights are summed by a [`LightAccumulator`].

use glam::Mat4;

use crate::backend::GraphicsBackend;
use crate::scene::SpotLight;
use crate::shader::ShaderProgram;

use super::accumulator::LightAccumulator;
use super::frame_targets::FrameTargets;
use super::quad::FullscreenQuad;
use super::texture_units::{TextureSlot, LIGHTING};
use super::FrameView;

pub struct LightingPass;

impl LightingPass {
    /// Bind the G-buffer inputs shared by every light of the frame
    pub fn bind_gbuffer<B: GraphicsBackend>(
        backend: &mut B,
        program: &ShaderProgram,
        targets: &FrameTargets,
    ) {
        backend.set_program(program.handle());
        LIGHTING.bind(backend, TextureSlot::GBufferPosition, Some(targets.position()));
        LIGHTING.bind(backend, TextureSlot::GBufferNormal, Some(targets.normal()));
        LIGHTING.bind(backend, TextureSlot::GBufferAlbedo, Some(targets.albedo()));
        LIGHTING.bind(backend, TextureSlot::GBufferMask, Some(targets.mask()));
        LIGHTING.bind(backend, TextureSlot::GBufferDepth, Some(targets.depth()));
    }

    /// Add one light's contribution to the shaded target.
    ///
    /// The shadow map unit is only bound for lights that own a shadow target;
    /// for the others it is unbound and the shadow test is switched off.
    pub fn accumulate_light<B: GraphicsBackend>(
        backend: &mut B,
        accumulator: &mut LightAccumulator,
        program: &ShaderProgram,
        quad: &FullscreenQuad,
        light: &SpotLight,
        view: &FrameView,
    ) {
        backend.set_program(program.handle());

        match light.shadow() {
            Some(target) => {
                LIGHTING.bind(backend, TextureSlot::ShadowMap, Some(target.depth()));
                backend.load_int("uniform_cast_shadows", 1);
                backend.load_mat4("uniform_light_projection_view", target.projection_view());
            }
            None => {
                LIGHTING.bind(backend, TextureSlot::ShadowMap, None);
                backend.load_int("uniform_cast_shadows", 0);
                backend.load_mat4("uniform_light_projection_view", Mat4::IDENTITY);
            }
        }
        backend.load_float("uniform_shadow_bias", view.shadow_bias);

        backend.load_vec3("uniform_light_color", light.radiance());
        backend.load_vec3("uniform_light_pos", light.position);
        backend.load_vec3("uniform_light_dir", light.direction());
        backend.load_float("uniform_light_umbra", light.umbra);
        backend.load_float("uniform_light_penumbra", light.penumbra);
        backend.load_vec3("uniform_camera_pos", view.camera_position);
        backend.load_vec3("uniform_camera_dir", view.camera_direction);

        accumulator.accumulate(backend, |backend| quad.draw(backend));
    }
}
