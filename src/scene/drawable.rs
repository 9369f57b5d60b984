//! Drawable scene nodes

use std::ops::Range;
use std::sync::Arc;

use crate::resources::{GpuMesh, Material};

use super::Transform;

/// A material applied to a vertex range of the drawable's mesh
#[derive(Debug, Clone)]
pub struct MaterialPart {
    pub material: Material,
    pub offset: u32,
    pub count: u32,
}

impl MaterialPart {
    pub fn new(material: Material, range: Range<u32>) -> Self {
        Self {
            material,
            offset: range.start,
            count: range.end.saturating_sub(range.start),
        }
    }

    pub fn range(&self) -> Range<u32> {
        self.offset..self.offset.saturating_add(self.count)
    }
}

/// Mesh instance with a transform and ordered material parts
#[derive(Debug, Clone)]
pub struct Drawable {
    pub mesh: Arc<GpuMesh>,
    pub transform: Transform,
    pub parts: Vec<MaterialPart>,
    /// Hidden drawables stay in the scene but are not rendered
    pub visible: bool,
}

impl Drawable {
    /// One part covering the whole mesh
    pub fn new(mesh: Arc<GpuMesh>, material: Material) -> Self {
        let count = mesh.vertex_count();
        Self {
            mesh,
            transform: Transform::default(),
            parts: vec![MaterialPart::new(material, 0..count)],
            visible: true,
        }
    }

    pub fn with_parts(mesh: Arc<GpuMesh>, parts: Vec<MaterialPart>) -> Self {
        Self {
            mesh,
            transform: Transform::default(),
            parts,
            visible: true,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// Slot in the scene's drawable list.
///
/// Removing a drawable leaves its slot behind so indices held by the
/// simulation stay valid.
#[derive(Debug, Clone)]
pub enum SceneEntry {
    Active(Drawable),
    Removed,
}

impl SceneEntry {
    /// The drawable, if it exists and should be rendered
    pub fn visible(&self) -> Option<&Drawable> {
        match self {
            SceneEntry::Active(drawable) if drawable.visible => Some(drawable),
            _ => None,
        }
    }

    pub fn drawable(&self) -> Option<&Drawable> {
        match self {
            SceneEntry::Active(drawable) => Some(drawable),
            SceneEntry::Removed => None,
        }
    }

    pub fn drawable_mut(&mut self) -> Option<&mut Drawable> {
        match self {
            SceneEntry::Active(drawable) => Some(drawable),
            SceneEntry::Removed => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, SceneEntry::Removed)
    }
}

impl From<Drawable> for SceneEntry {
    fn from(drawable: Drawable) -> Self {
        SceneEntry::Active(drawable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_part_range_saturates_at_u32_max() {
        let part = MaterialPart {
            material: Material::matte(Vec3::ONE),
            offset: u32::MAX - 2,
            count: 10,
        };
        assert_eq!(part.range(), u32::MAX - 2..u32::MAX);
        assert_eq!(MaterialPart::new(Material::matte(Vec3::ONE), 6..12).range(), 6..12);
    }
}
