//! CPU versions of the pipeline programs
//!
//! Each function mirrors the WGSL entry point of the same program, so the
//! software backend produces the same G-buffer contents and shading as the
//! GPU up to sampling differences (textures are sampled nearest).

use glam::{IVec2, Mat3, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};

use super::raster::{ClipVertex, Fragment, Varyings, VARYINGS};
use super::{SoftTexture, MAX_TEXTURE_UNITS};
use crate::backend::types::{QuadVertex, Vertex};
use crate::shader::{ProgramKind, TextureKind, UniformBlock};

const BUMP_SCALE: f32 = 4.0;

/// A vertex pulled from the bound vertex buffer
#[derive(Debug, Clone, Copy)]
pub enum VertexInput {
    Mesh(Vertex),
    Quad(QuadVertex),
}

/// Texture units as seen by one draw
pub struct Inputs<'a> {
    units: [Option<&'a SoftTexture>; MAX_TEXTURE_UNITS],
    kinds: [Option<TextureKind>; MAX_TEXTURE_UNITS],
    pub fetches: [u64; MAX_TEXTURE_UNITS],
}

impl<'a> Inputs<'a> {
    pub fn new(
        units: [Option<&'a SoftTexture>; MAX_TEXTURE_UNITS],
        kinds: [Option<TextureKind>; MAX_TEXTURE_UNITS],
    ) -> Self {
        Self {
            units,
            kinds,
            fetches: [0; MAX_TEXTURE_UNITS],
        }
    }

    /// Size of the texture on `unit`; unbound units read as 1x1
    pub fn dimensions(&self, unit: usize) -> UVec2 {
        match self.units[unit] {
            Some(texture) => UVec2::new(texture.info.width, texture.info.height),
            None => UVec2::ONE,
        }
    }

    /// Unfiltered fetch; out of range texels read as zero
    pub fn load(&mut self, unit: usize, texel: IVec2) -> Vec4 {
        self.fetches[unit] += 1;
        match self.units[unit] {
            Some(texture) => {
                let in_range = texel.x >= 0
                    && texel.y >= 0
                    && (texel.x as u32) < texture.info.width
                    && (texel.y as u32) < texture.info.height;
                if in_range {
                    texture.load(texel.x as u32, texel.y as u32)
                } else {
                    Vec4::ZERO
                }
            }
            None => self.fallback(unit),
        }
    }

    pub fn load_depth(&mut self, unit: usize, texel: IVec2) -> f32 {
        self.load(unit, texel).x
    }

    /// Nearest sample with repeat addressing
    pub fn sample(&mut self, unit: usize, uv: Vec2) -> Vec4 {
        let size = self.dimensions(unit);
        let wrapped = uv - uv.floor();
        let texel = (wrapped * size.as_vec2())
            .as_ivec2()
            .clamp(IVec2::ZERO, size.as_ivec2() - IVec2::ONE);
        self.load(unit, texel)
    }

    fn fallback(&self, unit: usize) -> Vec4 {
        match self.kinds[unit] {
            Some(TextureKind::Depth) => Vec4::ZERO,
            _ => Vec4::ONE,
        }
    }
}

/// Color outputs of one fragment, `None` when discarded
pub type FragmentOutput = Option<[Vec4; 4]>;

pub fn vertex(kind: ProgramKind, uniforms: &UniformBlock, input: VertexInput) -> ClipVertex {
    let mut varyings = [0.0; VARYINGS];
    let position = match (kind, input) {
        (ProgramKind::ShadowMap, VertexInput::Mesh(v)) => {
            uniforms.mat4("uniform_projection_matrix") * v.position.extend(1.0)
        }
        (ProgramKind::Geometry, VertexInput::Mesh(v)) => {
            let world_matrix = uniforms.mat4("uniform_world_matrix");
            let world = world_matrix * v.position.extend(1.0);
            let normal = uniforms.mat4("uniform_normal_matrix") * v.normal.extend(0.0);
            let tangent = world_matrix * v.tangent.xyz().extend(0.0);
            write(&mut varyings, 0, &world.xyz().to_array());
            write(&mut varyings, 3, &normal.xyz().to_array());
            write(&mut varyings, 6, &v.uv.to_array());
            write(&mut varyings, 8, &tangent.xyz().extend(v.tangent.w).to_array());
            uniforms.mat4("uniform_projection_matrix") * v.position.extend(1.0)
        }
        (ProgramKind::Lighting | ProgramKind::PostProcess, VertexInput::Quad(v)) => {
            write(&mut varyings, 0, &v.uv.to_array());
            Vec4::new(v.position.x, v.position.y, 0.0, 1.0)
        }
        // Layouts are checked before a draw starts
        _ => Vec4::ZERO,
    };
    ClipVertex { position, varyings }
}

fn write(varyings: &mut Varyings, at: usize, values: &[f32]) {
    varyings[at..at + values.len()].copy_from_slice(values);
}

pub fn fragment(
    kind: ProgramKind,
    uniforms: &UniformBlock,
    inputs: &mut Inputs<'_>,
    fragment: &Fragment,
) -> FragmentOutput {
    match kind {
        ProgramKind::ShadowMap => Some([Vec4::ZERO; 4]),
        ProgramKind::Geometry => geometry(uniforms, inputs, &fragment.varyings),
        ProgramKind::Lighting => {
            let texel = IVec2::new(fragment.x as i32, fragment.y as i32);
            Some([lighting(uniforms, inputs, texel), Vec4::ZERO, Vec4::ZERO, Vec4::ZERO])
        }
        ProgramKind::PostProcess => {
            let uv = Vec2::new(fragment.varyings[0], fragment.varyings[1]);
            Some([post(uniforms, inputs, uv), Vec4::ZERO, Vec4::ZERO, Vec4::ZERO])
        }
    }
}

fn geometry(uniforms: &UniformBlock, inputs: &mut Inputs<'_>, v: &Varyings) -> FragmentOutput {
    let world_position = Vec3::new(v[0], v[1], v[2]);
    let world_normal = Vec3::new(v[3], v[4], v[5]);
    let uv = Vec2::new(v[6], v[7]);
    let world_tangent = Vec4::new(v[8], v[9], v[10], v[11]);

    if uniforms.int("uniform_has_tex_mask") != 0 && inputs.sample(1, uv).x < 0.5 {
        return None;
    }

    let mut albedo = uniforms.vec3("uniform_diffuse");
    if uniforms.int("uniform_has_tex_diffuse") != 0 {
        albedo *= inputs.sample(0, uv).xyz();
    }

    let mut n = world_normal.normalize_or_zero();
    if uniforms.int("uniform_has_tex_normal") != 0 {
        let normal_sample = inputs.sample(2, uv);
        let mut tangent_normal = normal_sample.xyz() * 2.0 - Vec3::ONE;
        if uniforms.int("uniform_is_tex_bump") != 0 {
            let step = Vec2::ONE / inputs.dimensions(2).as_vec2();
            let height = normal_sample.x;
            let bump_u = inputs.sample(2, uv + Vec2::new(step.x, 0.0)).x;
            let bump_v = inputs.sample(2, uv + Vec2::new(0.0, step.y)).x;
            tangent_normal = Vec3::new(
                (height - bump_u) * BUMP_SCALE,
                (height - bump_v) * BUMP_SCALE,
                1.0,
            );
        }
        let tangent = world_tangent.xyz();
        let t = (tangent - n * n.dot(tangent)).normalize_or_zero();
        let b = n.cross(t) * world_tangent.w;
        n = (Mat3::from_cols(t, b, n) * tangent_normal.normalize_or_zero()).normalize_or_zero();
    }

    let emissive = if uniforms.int("uniform_has_tex_emissive") != 0 {
        inputs.sample(3, uv).xyz()
    } else {
        Vec3::ZERO
    };

    let specular_intensity = uniforms.vec3("uniform_specular").dot(Vec3::splat(1.0 / 3.0));
    let ambient = uniforms.vec3("uniform_ambient") * albedo;

    Some([
        world_position.extend(1.0),
        n.extend(uniforms.float("uniform_shininess")),
        albedo.extend(uniforms.float("uniform_metallic")),
        (emissive + ambient).extend(specular_intensity),
    ])
}

/// Cone falloff, angles in degrees
pub fn spot_factor(cos_theta: f32, umbra: f32, penumbra: f32) -> f32 {
    let umbra = umbra.clamp(0.0, 89.0);
    let penumbra = penumbra.clamp(umbra, 89.0);
    let inner = umbra.to_radians().cos();
    let outer = penumbra.to_radians().cos();
    let t = ((cos_theta - outer) / (inner - outer).max(1e-4)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn shadow_factor(uniforms: &UniformBlock, inputs: &mut Inputs<'_>, world_position: Vec3) -> f32 {
    if uniforms.int("uniform_cast_shadows") == 0 {
        return 1.0;
    }
    let light_clip = uniforms.mat4("uniform_light_projection_view") * world_position.extend(1.0);
    if light_clip.w <= 0.0 {
        return 1.0;
    }
    let ndc = light_clip.xyz() / light_clip.w;
    if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 || ndc.z > 1.0 {
        return 1.0;
    }
    let size = inputs.dimensions(10).as_ivec2();
    let shadow_uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    let texel = (shadow_uv * size.as_vec2())
        .as_ivec2()
        .clamp(IVec2::ZERO, size - IVec2::ONE);
    let stored = inputs.load_depth(10, texel);
    if ndc.z - uniforms.float("uniform_shadow_bias") > stored {
        0.0
    } else {
        1.0
    }
}

fn lighting(uniforms: &UniformBlock, inputs: &mut Inputs<'_>, texel: IVec2) -> Vec4 {
    let world = inputs.load(0, texel);
    if world.w == 0.0 {
        return Vec4::new(0.0, 0.0, 0.0, 1.0);
    }
    let normal_shininess = inputs.load(1, texel);
    let albedo_metallic = inputs.load(2, texel);
    let mask = inputs.load(3, texel);

    let p = world.xyz();
    let n = normal_shininess.xyz().normalize_or_zero();
    let to_light = uniforms.vec3("uniform_light_pos") - p;
    let dist = to_light.length();
    let l = to_light / dist.max(1e-4);
    let attenuation = 1.0 / (dist * dist).max(1e-4);
    let spot = spot_factor(
        (-l).dot(uniforms.vec3("uniform_light_dir").normalize_or_zero()),
        uniforms.float("uniform_light_umbra"),
        uniforms.float("uniform_light_penumbra"),
    );

    let albedo = albedo_metallic.xyz();
    let metallic = albedo_metallic.w;
    let n_dot_l = n.dot(l).max(0.0);
    let diffuse = albedo * (1.0 - metallic) * n_dot_l;

    let mut specular = Vec3::ZERO;
    if n_dot_l > 0.0 {
        let v = (uniforms.vec3("uniform_camera_pos") - p).normalize_or_zero();
        let h = (l + v).normalize_or_zero();
        let tint = Vec3::ONE.lerp(albedo, metallic);
        specular = tint * mask.w * n.dot(h).max(0.0).powf(normal_shininess.w.max(1.0));
    }

    let radiance = (diffuse + specular)
        * uniforms.vec3("uniform_light_color")
        * attenuation
        * spot
        * shadow_factor(uniforms, inputs, p);
    radiance.extend(1.0)
}

fn texel_at(size: UVec2, uv: Vec2) -> IVec2 {
    (uv * size.as_vec2())
        .as_ivec2()
        .clamp(IVec2::ZERO, size.as_ivec2() - IVec2::ONE)
}

/// Reinhard
pub fn tonemap(hdr: Vec3, exposure: f32) -> Vec3 {
    let exposed = hdr * exposure;
    exposed / (Vec3::ONE + exposed)
}

fn post(uniforms: &UniformBlock, inputs: &mut Inputs<'_>, uv: Vec2) -> Vec4 {
    let texel = texel_at(inputs.dimensions(0), uv);
    let world = inputs.load(2, texel);

    match uniforms.int("uniform_debug_view") {
        1 => {
            let p = world.xyz();
            return (p - p.floor()).extend(1.0);
        }
        2 => return (inputs.load(3, texel).xyz() * 0.5 + Vec3::splat(0.5)).extend(1.0),
        3 => return inputs.load(4, texel).xyz().extend(1.0),
        4 => return inputs.load(5, texel).xyz().extend(1.0),
        5 => return Vec3::splat(inputs.load_depth(6, texel)).extend(1.0),
        6 => {
            let shadow_texel = texel_at(inputs.dimensions(1), uv);
            return Vec3::splat(inputs.load_depth(1, shadow_texel)).extend(1.0);
        }
        _ => {}
    }

    if world.w == 0.0 {
        return uniforms.vec4("uniform_clear_color");
    }
    let hdr = inputs.load(0, texel).xyz() + inputs.load(5, texel).xyz();
    tonemap(hdr, uniforms.float("uniform_exposure")).extend(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_factor_inside_umbra_is_full() {
        assert_eq!(spot_factor(1.0, 20.0, 30.0), 1.0);
        assert_eq!(spot_factor(25.0f32.to_radians().cos(), 30.0, 40.0), 1.0);
    }

    #[test]
    fn test_spot_factor_outside_penumbra_is_zero() {
        assert_eq!(spot_factor(45.0f32.to_radians().cos(), 20.0, 30.0), 0.0);
    }

    #[test]
    fn test_spot_factor_falls_off_monotonically() {
        let samples: Vec<f32> = (20..=30)
            .map(|deg| spot_factor((deg as f32).to_radians().cos(), 20.0, 30.0))
            .collect();
        assert!(samples.windows(2).all(|w| w[0] >= w[1]));
        assert!(samples[5] > 0.0 && samples[5] < 1.0);
    }

    #[test]
    fn test_spot_factor_penumbra_below_umbra() {
        // A penumbra narrower than the umbra collapses to a hard edge
        assert_eq!(spot_factor(10.0f32.to_radians().cos(), 20.0, 5.0), 1.0);
        assert_eq!(spot_factor(21.0f32.to_radians().cos(), 20.0, 5.0), 0.0);
    }

    #[test]
    fn test_tonemap_is_bounded() {
        let mapped = tonemap(Vec3::new(0.0, 1.0, 1000.0), 1.0);
        assert_eq!(mapped.x, 0.0);
        assert!((mapped.y - 0.5).abs() < 1e-6);
        assert!(mapped.z < 1.0);
    }
}
