//! WGSL reflection with naga
//!
//! Programs follow a fixed binding convention: the uniform block lives at
//! `@group(0) @binding(0)`, textures live in `@group(1)` with the binding
//! number equal to their texture unit, and an optional sampler sits at
//! [`SAMPLER_BINDING`] in the same group.

use std::sync::Arc;

use naga::{AddressSpace, ImageClass, ImageDimension, ScalarKind, TypeInner, VectorSize};

use super::uniform::{UniformKind, UniformLayout, UniformMember};
use super::ShaderError;

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;
/// Binding of the material sampler inside [`TEXTURE_GROUP`]
pub const SAMPLER_BINDING: u32 = 15;

/// What a texture binding expects to be fed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// `texture_2d<f32>`
    Float,
    /// `texture_depth_2d`
    Depth,
}

impl std::fmt::Display for TextureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextureKind::Float => f.write_str("texture_2d<f32>"),
            TextureKind::Depth => f.write_str("texture_depth_2d"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: TextureKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub comparison: bool,
}

/// Interface of a WGSL program as seen by the backends
#[derive(Debug, Clone)]
pub struct ShaderReflection {
    pub label: String,
    pub uniforms: Option<Arc<UniformLayout>>,
    pub textures: Vec<TextureBinding>,
    pub samplers: Vec<SamplerBinding>,
    pub vertex_entry: Option<String>,
    pub fragment_entry: Option<String>,
    /// Number of `@location` outputs of the fragment entry point
    pub fragment_outputs: u32,
}

impl ShaderReflection {
    pub fn from_wgsl(label: &str, source: &str) -> Result<Self, ShaderError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
            label: label.to_string(),
            message: e.emit_to_string(source),
        })?;

        let mut uniforms = None;
        let mut textures = Vec::new();
        let mut samplers = Vec::new();

        for (_, var) in module.global_variables.iter() {
            let (Some(binding), Some(name)) = (&var.binding, &var.name) else {
                continue;
            };
            let inner = &module.types[var.ty].inner;

            match (var.space, inner) {
                (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                    let members = members
                        .iter()
                        .filter_map(|member| {
                            let member_name = member.name.clone()?;
                            let Some(kind) = uniform_kind(&module.types[member.ty].inner) else {
                                log::warn!(
                                    "{}: uniform member '{}' has an unsupported type",
                                    label,
                                    member_name
                                );
                                return None;
                            };
                            Some(UniformMember {
                                name: member_name,
                                offset: member.offset,
                                kind,
                            })
                        })
                        .collect();
                    if binding.group == UNIFORM_GROUP && binding.binding == 0 {
                        uniforms = Some(Arc::new(UniformLayout {
                            group: binding.group,
                            binding: binding.binding,
                            size: *span,
                            members,
                        }));
                    } else {
                        log::warn!(
                            "{}: uniform block '{}' is not at group {} binding 0",
                            label,
                            name,
                            UNIFORM_GROUP
                        );
                    }
                }
                (
                    AddressSpace::Handle,
                    TypeInner::Image {
                        dim: ImageDimension::D2,
                        arrayed: false,
                        class,
                    },
                ) => {
                    let kind = match class {
                        ImageClass::Sampled {
                            kind: ScalarKind::Float,
                            multi: false,
                        } => TextureKind::Float,
                        ImageClass::Depth { multi: false } => TextureKind::Depth,
                        _ => {
                            return Err(ShaderError::UnsupportedBinding {
                                label: label.to_string(),
                                name: name.clone(),
                            })
                        }
                    };
                    textures.push(TextureBinding {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        kind,
                    });
                }
                (AddressSpace::Handle, TypeInner::Sampler { comparison }) => {
                    samplers.push(SamplerBinding {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        comparison: *comparison,
                    });
                }
                _ => {
                    return Err(ShaderError::UnsupportedBinding {
                        label: label.to_string(),
                        name: name.clone(),
                    })
                }
            }
        }

        let mut vertex_entry = None;
        let mut fragment_entry = None;
        let mut fragment_outputs = 0;
        for entry in &module.entry_points {
            match entry.stage {
                naga::ShaderStage::Vertex => vertex_entry = Some(entry.name.clone()),
                naga::ShaderStage::Fragment => {
                    fragment_entry = Some(entry.name.clone());
                    fragment_outputs = entry
                        .function
                        .result
                        .as_ref()
                        .map(|result| match (&result.binding, &module.types[result.ty].inner) {
                            (Some(naga::Binding::Location { .. }), _) => 1,
                            (None, TypeInner::Struct { members, .. }) => members
                                .iter()
                                .filter(|m| matches!(m.binding, Some(naga::Binding::Location { .. })))
                                .count() as u32,
                            _ => 0,
                        })
                        .unwrap_or(0);
                }
                naga::ShaderStage::Compute => {}
            }
        }

        textures.sort_by_key(|t| (t.group, t.binding));

        Ok(Self {
            label: label.to_string(),
            uniforms,
            textures,
            samplers,
            vertex_entry,
            fragment_entry,
            fragment_outputs,
        })
    }

    /// Texture declared for a texture unit
    pub fn texture_unit(&self, unit: u32) -> Option<&TextureBinding> {
        self.textures
            .iter()
            .find(|t| t.group == TEXTURE_GROUP && t.binding == unit)
    }

    /// Whether the program samples through a filtering sampler
    pub fn has_filtering_sampler(&self) -> bool {
        self.samplers
            .iter()
            .any(|s| s.group == TEXTURE_GROUP && s.binding == SAMPLER_BINDING && !s.comparison)
    }

    pub fn has_fragment_stage(&self) -> bool {
        self.fragment_entry.is_some()
    }
}

fn uniform_kind(inner: &TypeInner) -> Option<UniformKind> {
    match *inner {
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => Some(UniformKind::Mat4),
        TypeInner::Vector {
            size: VectorSize::Tri,
            scalar,
        } if scalar.kind == ScalarKind::Float => Some(UniformKind::Vec3),
        TypeInner::Vector {
            size: VectorSize::Quad,
            scalar,
        } if scalar.kind == ScalarKind::Float => Some(UniformKind::Vec4),
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Float => Some(UniformKind::Float),
            ScalarKind::Sint => Some(UniformKind::Int),
            ScalarKind::Uint => Some(UniformKind::UInt),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
struct Uniforms {
    uniform_projection_matrix: mat4x4<f32>,
    uniform_diffuse: vec3<f32>,
    uniform_shininess: f32,
    uniform_has_tex_diffuse: i32,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(1) @binding(0) var tex_diffuse: texture_2d<f32>;
@group(1) @binding(10) var shadow_map: texture_depth_2d;
@group(1) @binding(15) var material_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return uniforms.uniform_projection_matrix * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(uniforms.uniform_diffuse, 1.0);
}
"#;

    #[test]
    fn test_uniform_block_offsets() {
        let reflection = ShaderReflection::from_wgsl("sample", SAMPLE).unwrap();
        let uniforms = reflection.uniforms.as_ref().unwrap();
        assert_eq!(uniforms.size, 96);
        let offsets: Vec<(&str, u32, UniformKind)> = uniforms
            .members
            .iter()
            .map(|m| (m.name.as_str(), m.offset, m.kind))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("uniform_projection_matrix", 0, UniformKind::Mat4),
                ("uniform_diffuse", 64, UniformKind::Vec3),
                ("uniform_shininess", 76, UniformKind::Float),
                ("uniform_has_tex_diffuse", 80, UniformKind::Int),
            ]
        );
    }

    #[test]
    fn test_texture_units_and_sampler() {
        let reflection = ShaderReflection::from_wgsl("sample", SAMPLE).unwrap();
        let diffuse = reflection.texture_unit(0).unwrap();
        assert_eq!(diffuse.name, "tex_diffuse");
        assert_eq!(diffuse.kind, TextureKind::Float);
        assert_eq!(reflection.texture_unit(10).unwrap().kind, TextureKind::Depth);
        assert!(reflection.texture_unit(1).is_none());
        assert!(reflection.has_filtering_sampler());
    }

    #[test]
    fn test_entry_points() {
        let reflection = ShaderReflection::from_wgsl("sample", SAMPLE).unwrap();
        assert_eq!(reflection.vertex_entry.as_deref(), Some("vs_main"));
        assert_eq!(reflection.fragment_entry.as_deref(), Some("fs_main"));
        assert_eq!(reflection.fragment_outputs, 1);
    }

    #[test]
    fn test_parse_error_carries_label() {
        let err = ShaderReflection::from_wgsl("broken", "fn vs_main( {").unwrap_err();
        assert!(matches!(err, ShaderError::Parse { ref label, .. } if label == "broken"));
    }
}
