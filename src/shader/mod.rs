//! Shader programs
//!
//! The four programs of the pipeline are WGSL modules embedded in the crate.
//! When a shader directory is configured they are read from disk instead,
//! which is what [`ProgramSet::reload`] uses to pick up edits at runtime.

mod reflection;
mod uniform;

pub use reflection::*;
pub use uniform::*;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::{BackendError, GraphicsBackend, Owned, ProgramHandle};
use crate::pipeline::texture_units;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShaderError {
    #[error("failed to read shader '{}': {message}", path.display())]
    Io { path: PathBuf, message: String },
    #[error("failed to parse shader '{label}':\n{message}")]
    Parse { label: String, message: String },
    #[error("shader '{label}': binding '{name}' has an unsupported type")]
    UnsupportedBinding { label: String, name: String },
    #[error("shader '{label}' has no {stage} entry point")]
    MissingEntryPoint { label: String, stage: &'static str },
    #[error("shader '{label}' is missing uniform '{name}'")]
    MissingUniform { label: String, name: String },
    #[error("shader '{label}' writes {found} color outputs, expected {expected}")]
    OutputMismatch {
        label: String,
        expected: u32,
        found: u32,
    },
    #[error("shader '{label}': texture unit {unit} should be '{expected}', found {found}")]
    UnitMismatch {
        label: String,
        unit: u32,
        expected: String,
        found: String,
    },
    #[error("shader '{label}': {source}")]
    Backend {
        label: String,
        #[source]
        source: BackendError,
    },
}

/// The programs the pipeline runs, one per pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    ShadowMap,
    Geometry,
    Lighting,
    PostProcess,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 4] = [
        ProgramKind::ShadowMap,
        ProgramKind::Geometry,
        ProgramKind::Lighting,
        ProgramKind::PostProcess,
    ];

    /// Program label, also the name backends key built-in programs by
    pub fn label(&self) -> &'static str {
        match self {
            ProgramKind::ShadowMap => "shadow_map",
            ProgramKind::Geometry => "geometry",
            ProgramKind::Lighting => "deferred",
            ProgramKind::PostProcess => "post",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ProgramKind::ShadowMap => "shadow_map.wgsl",
            ProgramKind::Geometry => "geometry.wgsl",
            ProgramKind::Lighting => "deferred.wgsl",
            ProgramKind::PostProcess => "post.wgsl",
        }
    }

    pub fn embedded_source(&self) -> &'static str {
        match self {
            ProgramKind::ShadowMap => include_str!("shaders/shadow_map.wgsl"),
            ProgramKind::Geometry => include_str!("shaders/geometry.wgsl"),
            ProgramKind::Lighting => include_str!("shaders/deferred.wgsl"),
            ProgramKind::PostProcess => include_str!("shaders/post.wgsl"),
        }
    }

    /// Color outputs the pass's render target expects
    pub fn color_outputs(&self) -> u32 {
        match self {
            ProgramKind::ShadowMap => 0,
            ProgramKind::Geometry => 4,
            ProgramKind::Lighting | ProgramKind::PostProcess => 1,
        }
    }

    /// Uniforms the passes load every frame
    pub fn required_uniforms(&self) -> &'static [&'static str] {
        match self {
            ProgramKind::ShadowMap => &["uniform_projection_matrix"],
            ProgramKind::Geometry => &[
                "uniform_projection_matrix",
                "uniform_world_matrix",
                "uniform_normal_matrix",
                "uniform_diffuse",
                "uniform_ambient",
                "uniform_specular",
                "uniform_shininess",
                "uniform_metallic",
                "uniform_has_tex_diffuse",
                "uniform_has_tex_mask",
                "uniform_has_tex_normal",
                "uniform_is_tex_bump",
                "uniform_has_tex_emissive",
            ],
            ProgramKind::Lighting => &[
                "uniform_light_color",
                "uniform_light_dir",
                "uniform_light_pos",
                "uniform_light_umbra",
                "uniform_light_penumbra",
                "uniform_camera_pos",
                "uniform_camera_dir",
                "uniform_light_projection_view",
                "uniform_cast_shadows",
                "uniform_shadow_bias",
            ],
            ProgramKind::PostProcess => &[
                "uniform_clear_color",
                "uniform_exposure",
                "uniform_debug_view",
            ],
        }
    }
}

/// Source and interface of a program, ready to hand to a backend
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: String,
    pub source: String,
    pub reflection: ShaderReflection,
}

impl ProgramDescriptor {
    /// Read, reflect and validate a program against the pass it feeds
    pub fn load(kind: ProgramKind, shader_dir: Option<&Path>) -> Result<Self, ShaderError> {
        let source = match shader_dir {
            Some(dir) => {
                let path = dir.join(kind.file_name());
                std::fs::read_to_string(&path).map_err(|e| ShaderError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                })?
            }
            None => kind.embedded_source().to_string(),
        };
        Self::from_source(kind, source)
    }

    pub fn from_source(kind: ProgramKind, source: String) -> Result<Self, ShaderError> {
        let label = kind.label();
        let reflection = ShaderReflection::from_wgsl(label, &source)?;

        if reflection.vertex_entry.is_none() {
            return Err(ShaderError::MissingEntryPoint {
                label: label.to_string(),
                stage: "vertex",
            });
        }
        if kind.color_outputs() > 0 && !reflection.has_fragment_stage() {
            return Err(ShaderError::MissingEntryPoint {
                label: label.to_string(),
                stage: "fragment",
            });
        }
        if reflection.has_fragment_stage() && reflection.fragment_outputs != kind.color_outputs() {
            return Err(ShaderError::OutputMismatch {
                label: label.to_string(),
                expected: kind.color_outputs(),
                found: reflection.fragment_outputs,
            });
        }
        for name in kind.required_uniforms() {
            let present = reflection
                .uniforms
                .as_ref()
                .is_some_and(|layout| layout.member(name).is_some());
            if !present {
                return Err(ShaderError::MissingUniform {
                    label: label.to_string(),
                    name: name.to_string(),
                });
            }
        }
        texture_units::table_for(kind).validate(&reflection)?;

        Ok(Self {
            label: label.to_string(),
            source,
            reflection,
        })
    }
}

/// A program living on the backend
pub struct ShaderProgram {
    kind: ProgramKind,
    handle: Owned<ProgramHandle>,
    reflection: ShaderReflection,
}

impl ShaderProgram {
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        desc: ProgramDescriptor,
        kind: ProgramKind,
    ) -> Result<Self, ShaderError> {
        let handle = backend
            .create_program(&desc)
            .map_err(|source| ShaderError::Backend {
                label: desc.label.clone(),
                source,
            })?;
        log::debug!("Created program '{}'", desc.label);
        Ok(Self {
            kind,
            handle: backend.release_queue().own(handle),
            reflection: desc.reflection,
        })
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle.handle()
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    fn replace<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        desc: ProgramDescriptor,
    ) -> Result<(), ShaderError> {
        backend
            .reload_program(self.handle(), &desc)
            .map_err(|source| ShaderError::Backend {
                label: desc.label.clone(),
                source,
            })?;
        self.reflection = desc.reflection;
        Ok(())
    }
}

/// All four pipeline programs
pub struct ProgramSet {
    pub shadow_map: ShaderProgram,
    pub geometry: ShaderProgram,
    pub lighting: ShaderProgram,
    pub post: ShaderProgram,
}

impl ProgramSet {
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        shader_dir: Option<&Path>,
    ) -> Result<Self, ShaderError> {
        let mut build = |kind: ProgramKind| -> Result<ShaderProgram, ShaderError> {
            let desc = ProgramDescriptor::load(kind, shader_dir)?;
            ShaderProgram::create(backend, desc, kind)
        };
        Ok(Self {
            shadow_map: build(ProgramKind::ShadowMap)?,
            geometry: build(ProgramKind::Geometry)?,
            lighting: build(ProgramKind::Lighting)?,
            post: build(ProgramKind::PostProcess)?,
        })
    }

    pub fn get(&self, kind: ProgramKind) -> &ShaderProgram {
        match kind {
            ProgramKind::ShadowMap => &self.shadow_map,
            ProgramKind::Geometry => &self.geometry,
            ProgramKind::Lighting => &self.lighting,
            ProgramKind::PostProcess => &self.post,
        }
    }

    fn get_mut(&mut self, kind: ProgramKind) -> &mut ShaderProgram {
        match kind {
            ProgramKind::ShadowMap => &mut self.shadow_map,
            ProgramKind::Geometry => &mut self.geometry,
            ProgramKind::Lighting => &mut self.lighting,
            ProgramKind::PostProcess => &mut self.post,
        }
    }

    /// Reload every program.
    ///
    /// All sources are read and validated before any program is touched, so
    /// a broken file leaves the whole set as it was. A program the backend
    /// refuses keeps its previous code.
    pub fn reload<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        shader_dir: Option<&Path>,
    ) -> Result<(), ShaderError> {
        let descriptors = ProgramKind::ALL
            .iter()
            .map(|kind| ProgramDescriptor::load(*kind, shader_dir).map(|desc| (*kind, desc)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut first_error = None;
        for (kind, desc) in descriptors {
            if let Err(e) = self.get_mut(kind).replace(backend, desc) {
                log::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_programs_validate() {
        for kind in ProgramKind::ALL {
            let desc = ProgramDescriptor::load(kind, None)
                .unwrap_or_else(|e| panic!("{} failed to validate: {}", kind.label(), e));
            assert_eq!(desc.label, kind.label());
        }
    }

    #[test]
    fn test_shadow_program_is_depth_only() {
        let desc = ProgramDescriptor::load(ProgramKind::ShadowMap, None).unwrap();
        assert!(!desc.reflection.has_fragment_stage());
        assert!(desc.reflection.textures.is_empty());
    }

    #[test]
    fn test_geometry_writes_four_targets() {
        let desc = ProgramDescriptor::load(ProgramKind::Geometry, None).unwrap();
        assert_eq!(desc.reflection.fragment_outputs, 4);
        assert!(desc.reflection.has_filtering_sampler());
    }

    #[test]
    fn test_missing_uniform_is_reported() {
        let source = ProgramKind::ShadowMap
            .embedded_source()
            .replace("uniform_projection_matrix", "uniform_mvp");
        let err = ProgramDescriptor::from_source(ProgramKind::ShadowMap, source).unwrap_err();
        assert_eq!(
            err,
            ShaderError::MissingUniform {
                label: "shadow_map".into(),
                name: "uniform_projection_matrix".into(),
            }
        );
    }

    #[test]
    fn test_missing_shader_file() {
        let dir = std::env::temp_dir().join("deferred-pipeline-no-such-dir");
        let err = ProgramDescriptor::load(ProgramKind::Geometry, Some(&dir)).unwrap_err();
        assert!(matches!(err, ShaderError::Io { .. }));
    }
}
