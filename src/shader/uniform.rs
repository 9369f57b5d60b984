//! Named uniforms packed into a reflected uniform block

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use thiserror::Error;

/// A value loaded into a program's uniform block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Mat4(Mat4),
    Vec3(Vec3),
    Vec4(Vec4),
    Float(f32),
    Int(i32),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Mat4(_) => UniformKind::Mat4,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
        }
    }
}

/// Types a uniform block member may have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Mat4,
    Vec3,
    Vec4,
    Float,
    Int,
    UInt,
}

impl UniformKind {
    pub fn size(&self) -> u32 {
        match self {
            UniformKind::Mat4 => 64,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Float | UniformKind::Int | UniformKind::UInt => 4,
        }
    }

    /// Whether a value of kind `value` can be written into a member of this kind
    pub fn accepts(&self, value: UniformKind) -> bool {
        *self == value || (*self == UniformKind::UInt && value == UniformKind::Int)
    }
}

impl std::fmt::Display for UniformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UniformKind::Mat4 => "mat4x4<f32>",
            UniformKind::Vec3 => "vec3<f32>",
            UniformKind::Vec4 => "vec4<f32>",
            UniformKind::Float => "f32",
            UniformKind::Int => "i32",
            UniformKind::UInt => "u32",
        };
        f.write_str(name)
    }
}

/// One member of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub kind: UniformKind,
}

/// Byte layout of a program's uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    pub members: Vec<UniformMember>,
}

impl UniformLayout {
    pub fn member(&self, name: &str) -> Option<&UniformMember> {
        self.members.iter().find(|member| member.name == name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UniformError {
    #[error("uniform '{name}' is {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
}

/// CPU copy of a uniform block, addressed by member name
#[derive(Debug, Clone)]
pub struct UniformBlock {
    layout: Arc<UniformLayout>,
    data: Vec<u8>,
}

impl UniformBlock {
    pub fn new(layout: Arc<UniformLayout>) -> Self {
        let data = vec![0; layout.size as usize];
        Self { layout, data }
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Write a member. Returns `Ok(false)` when the block has no such member.
    pub fn set(&mut self, name: &str, value: UniformValue) -> Result<bool, UniformError> {
        let Some(member) = self.layout.member(name) else {
            return Ok(false);
        };
        if !member.kind.accepts(value.kind()) {
            return Err(UniformError::TypeMismatch {
                name: name.to_string(),
                expected: member.kind,
                found: value.kind(),
            });
        }

        let offset = member.offset as usize;
        let bytes: &[u8] = match &value {
            UniformValue::Mat4(m) => bytemuck::bytes_of(m),
            UniformValue::Vec3(v) => bytemuck::bytes_of(v),
            UniformValue::Vec4(v) => bytemuck::bytes_of(v),
            UniformValue::Float(f) => bytemuck::bytes_of(f),
            UniformValue::Int(i) => bytemuck::bytes_of(i),
        };
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        let member = self.layout.member(name)?;
        let start = member.offset as usize;
        let bytes = &self.data[start..start + member.kind.size() as usize];
        Some(match member.kind {
            UniformKind::Mat4 => UniformValue::Mat4(bytemuck::pod_read_unaligned(bytes)),
            UniformKind::Vec3 => UniformValue::Vec3(bytemuck::pod_read_unaligned(bytes)),
            UniformKind::Vec4 => UniformValue::Vec4(bytemuck::pod_read_unaligned(bytes)),
            UniformKind::Float => UniformValue::Float(bytemuck::pod_read_unaligned(bytes)),
            UniformKind::Int | UniformKind::UInt => {
                UniformValue::Int(bytemuck::pod_read_unaligned(bytes))
            }
        })
    }

    pub fn mat4(&self, name: &str) -> Mat4 {
        match self.get(name) {
            Some(UniformValue::Mat4(m)) => m,
            _ => Mat4::ZERO,
        }
    }

    pub fn vec3(&self, name: &str) -> Vec3 {
        match self.get(name) {
            Some(UniformValue::Vec3(v)) => v,
            _ => Vec3::ZERO,
        }
    }

    pub fn vec4(&self, name: &str) -> Vec4 {
        match self.get(name) {
            Some(UniformValue::Vec4(v)) => v,
            _ => Vec4::ZERO,
        }
    }

    pub fn float(&self, name: &str) -> f32 {
        match self.get(name) {
            Some(UniformValue::Float(f)) => f,
            _ => 0.0,
        }
    }

    pub fn int(&self, name: &str) -> i32 {
        match self.get(name) {
            Some(UniformValue::Int(i)) => i,
            _ => 0,
        }
    }
}
