//! Texture unit assignments
//!
//! Every pass binds its inputs to fixed, numbered texture units. The tables
//! here are the single place those numbers are written down; programs are
//! checked against them when they are loaded.

use crate::backend::{GraphicsBackend, TextureHandle};
use crate::shader::{ProgramKind, ShaderError, ShaderReflection, TextureKind, TEXTURE_GROUP};

/// A named input of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Diffuse,
    Mask,
    /// Normal map, or bump map when the part only has one of those
    Normal,
    Emissive,
    GBufferPosition,
    GBufferNormal,
    GBufferAlbedo,
    GBufferMask,
    GBufferDepth,
    ShadowMap,
    Shaded,
}

/// Where a slot is bound and how the shader declares it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitBinding {
    pub slot: TextureSlot,
    pub unit: u32,
    pub name: &'static str,
    pub kind: TextureKind,
}

const fn unit(slot: TextureSlot, unit: u32, name: &'static str, kind: TextureKind) -> UnitBinding {
    UnitBinding {
        slot,
        unit,
        name,
        kind,
    }
}

/// Unit table of one program
#[derive(Debug, Clone, Copy)]
pub struct UnitTable(&'static [UnitBinding]);

pub const SHADOW_MAP: UnitTable = UnitTable(&[]);

pub const GEOMETRY: UnitTable = UnitTable(&[
    unit(TextureSlot::Diffuse, 0, "tex_diffuse", TextureKind::Float),
    unit(TextureSlot::Mask, 1, "tex_mask", TextureKind::Float),
    unit(TextureSlot::Normal, 2, "tex_normal", TextureKind::Float),
    unit(TextureSlot::Emissive, 3, "tex_emissive", TextureKind::Float),
]);

pub const LIGHTING: UnitTable = UnitTable(&[
    unit(TextureSlot::GBufferPosition, 0, "tex_pos", TextureKind::Float),
    unit(TextureSlot::GBufferNormal, 1, "tex_normal", TextureKind::Float),
    unit(TextureSlot::GBufferAlbedo, 2, "tex_albedo", TextureKind::Float),
    unit(TextureSlot::GBufferMask, 3, "tex_mask", TextureKind::Float),
    unit(TextureSlot::GBufferDepth, 4, "tex_depth", TextureKind::Depth),
    unit(TextureSlot::ShadowMap, 10, "shadow_map", TextureKind::Depth),
]);

pub const POST_PROCESS: UnitTable = UnitTable(&[
    unit(TextureSlot::Shaded, 0, "tex_shaded", TextureKind::Float),
    unit(TextureSlot::ShadowMap, 1, "shadow_map", TextureKind::Depth),
    unit(TextureSlot::GBufferPosition, 2, "tex_pos", TextureKind::Float),
    unit(TextureSlot::GBufferNormal, 3, "tex_normal", TextureKind::Float),
    unit(TextureSlot::GBufferAlbedo, 4, "tex_albedo", TextureKind::Float),
    unit(TextureSlot::GBufferMask, 5, "tex_mask", TextureKind::Float),
    unit(TextureSlot::GBufferDepth, 6, "tex_depth", TextureKind::Depth),
]);

pub fn table_for(kind: ProgramKind) -> UnitTable {
    match kind {
        ProgramKind::ShadowMap => SHADOW_MAP,
        ProgramKind::Geometry => GEOMETRY,
        ProgramKind::Lighting => LIGHTING,
        ProgramKind::PostProcess => POST_PROCESS,
    }
}

impl UnitTable {
    pub fn bindings(&self) -> &'static [UnitBinding] {
        self.0
    }

    pub fn unit(&self, slot: TextureSlot) -> Option<u32> {
        self.0.iter().find(|b| b.slot == slot).map(|b| b.unit)
    }

    /// Bind `texture` to the unit of `slot`; `None` unbinds it
    pub fn bind<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        slot: TextureSlot,
        texture: Option<TextureHandle>,
    ) {
        match self.unit(slot) {
            Some(unit) => backend.bind_texture(unit, texture),
            None => log::error!("No texture unit assigned to {:?}", slot),
        }
    }

    /// Check that the program declares every unit of the table with the
    /// expected name and texture kind, and nothing else
    pub fn validate(&self, reflection: &ShaderReflection) -> Result<(), ShaderError> {
        let mismatch = |unit: u32, expected: String, found: String| ShaderError::UnitMismatch {
            label: reflection.label.clone(),
            unit,
            expected,
            found,
        };

        for binding in self.0 {
            match reflection.texture_unit(binding.unit) {
                Some(texture) if texture.name == binding.name && texture.kind == binding.kind => {}
                Some(texture) => {
                    return Err(mismatch(
                        binding.unit,
                        format!("{}: {}", binding.name, binding.kind),
                        format!("'{}: {}'", texture.name, texture.kind),
                    ))
                }
                None => {
                    return Err(mismatch(
                        binding.unit,
                        format!("{}: {}", binding.name, binding.kind),
                        "nothing".to_string(),
                    ))
                }
            }
        }

        for texture in &reflection.textures {
            let known = texture.group == TEXTURE_GROUP
                && self.0.iter().any(|b| b.unit == texture.binding);
            if !known {
                return Err(mismatch(
                    texture.binding,
                    "no texture".to_string(),
                    format!("'{}: {}'", texture.name, texture.kind),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::geometry(GEOMETRY, TextureSlot::Diffuse, 0)]
    #[case::geometry_mask(GEOMETRY, TextureSlot::Mask, 1)]
    #[case::geometry_normal(GEOMETRY, TextureSlot::Normal, 2)]
    #[case::geometry_emissive(GEOMETRY, TextureSlot::Emissive, 3)]
    #[case::lighting_depth(LIGHTING, TextureSlot::GBufferDepth, 4)]
    #[case::lighting_shadow(LIGHTING, TextureSlot::ShadowMap, 10)]
    #[case::post_shaded(POST_PROCESS, TextureSlot::Shaded, 0)]
    #[case::post_shadow(POST_PROCESS, TextureSlot::ShadowMap, 1)]
    #[case::post_depth(POST_PROCESS, TextureSlot::GBufferDepth, 6)]
    fn test_fixed_units(#[case] table: UnitTable, #[case] slot: TextureSlot, #[case] expected: u32) {
        assert_eq!(table.unit(slot), Some(expected));
    }

    #[test]
    fn test_units_are_unique_per_table() {
        for table in [GEOMETRY, LIGHTING, POST_PROCESS] {
            let mut units: Vec<u32> = table.bindings().iter().map(|b| b.unit).collect();
            units.sort_unstable();
            units.dedup();
            assert_eq!(units.len(), table.bindings().len());
        }
    }

    #[test]
    fn test_shadow_map_not_bound_by_geometry() {
        assert_eq!(GEOMETRY.unit(TextureSlot::ShadowMap), None);
    }

    #[test]
    fn test_validate_rejects_moved_binding() {
        let source = ProgramKind::Lighting
            .embedded_source()
            .replace("@binding(10) var shadow_map", "@binding(9) var shadow_map");
        let reflection = ShaderReflection::from_wgsl("deferred", &source).unwrap();
        let err = LIGHTING.validate(&reflection).unwrap_err();
        assert!(matches!(err, ShaderError::UnitMismatch { unit: 10, .. }));
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let source = ProgramKind::Lighting
            .embedded_source()
            .replace("var tex_depth: texture_depth_2d", "var tex_depth: texture_2d<f32>");
        let reflection = ShaderReflection::from_wgsl("deferred", &source).unwrap();
        let err = LIGHTING.validate(&reflection).unwrap_err();
        assert!(matches!(err, ShaderError::UnitMismatch { unit: 4, .. }));
    }
}
