//! G-buffer fill
//!
//! Renders every visible drawable once, writing world position, normal,
//! albedo and the material mask channel. Material textures go to the fixed
//! units of [`texture_units::GEOMETRY`](super::texture_units::GEOMETRY); a
//! missing texture is unbound and its `uniform_has_tex_*` flag cleared.

use glam::Mat4;

use crate::backend::{CompareFunction, GraphicsBackend, RasterState};
use crate::resources::Material;
use crate::scene::SceneEntry;
use crate::shader::ShaderProgram;

use super::frame_targets::FrameTargets;
use super::texture_units::{TextureSlot, GEOMETRY};
use super::PassError;

pub struct GeometryPass;

impl GeometryPass {
    /// Fill the G-buffer. Returns the number of draw calls issued.
    pub fn render_geometry<B: GraphicsBackend>(
        backend: &mut B,
        targets: &FrameTargets,
        program: &ShaderProgram,
        view_projection: Mat4,
        world: Mat4,
        entries: &[SceneEntry],
    ) -> Result<u32, PassError> {
        targets.bind_for_geometry_write(backend)?;
        backend.set_program(program.handle());
        backend.set_raster_state(
            RasterState::default().with_depth(CompareFunction::LessEqual, true),
        );

        let mut draws = 0;
        for drawable in entries.iter().filter_map(SceneEntry::visible) {
            if drawable.parts.is_empty() {
                continue;
            }
            let model = world * drawable.transform.matrix();
            backend.load_mat4("uniform_projection_matrix", view_projection * model);
            backend.load_mat4("uniform_world_matrix", model);
            backend.load_mat4("uniform_normal_matrix", model.inverse().transpose());
            drawable.mesh.bind(backend);

            for part in &drawable.parts {
                Self::load_material(backend, &part.material);
                backend.draw(part.range());
                draws += 1;
            }
        }

        backend.end_render_pass();
        log::trace!("Geometry pass: {} draws", draws);
        Ok(draws)
    }

    fn load_material<B: GraphicsBackend>(backend: &mut B, material: &Material) {
        backend.load_vec3("uniform_diffuse", material.diffuse);
        backend.load_vec3("uniform_ambient", material.ambient);
        backend.load_vec3("uniform_specular", material.specular);
        backend.load_float("uniform_shininess", material.shininess);
        backend.load_float("uniform_metallic", material.metallic);

        let diffuse = material.diffuse_texture.as_ref().map(|t| t.handle());
        let mask = material.mask_texture.as_ref().map(|t| t.handle());
        let emissive = material.emissive_texture.as_ref().map(|t| t.handle());
        let (normal, is_bump) = material.surface_texture();
        let normal = normal.map(|t| t.handle());

        GEOMETRY.bind(backend, TextureSlot::Diffuse, diffuse);
        GEOMETRY.bind(backend, TextureSlot::Mask, mask);
        GEOMETRY.bind(backend, TextureSlot::Normal, normal);
        GEOMETRY.bind(backend, TextureSlot::Emissive, emissive);

        backend.load_int("uniform_has_tex_diffuse", diffuse.is_some() as i32);
        backend.load_int("uniform_has_tex_mask", mask.is_some() as i32);
        backend.load_int("uniform_has_tex_normal", normal.is_some() as i32);
        backend.load_int("uniform_is_tex_bump", is_bump as i32);
        backend.load_int("uniform_has_tex_emissive", emissive.is_some() as i32);
    }
}
