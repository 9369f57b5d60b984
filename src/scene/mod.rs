//! Scene state consumed by the pipeline
//!
//! The pipeline only reads transforms, visibility and material parts of the
//! drawables, and mutates lights solely to keep their shadow matrices.

mod camera;
mod camera_controller;
mod drawable;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use drawable::*;
pub use light::*;
pub use transform::*;

use glam::Mat4;

/// Everything that is drawn in a frame
#[derive(Debug)]
pub struct Scene {
    pub camera: Camera,
    /// Applied to every drawable before its own transform
    pub world: Mat4,
    pub entries: Vec<SceneEntry>,
    pub lights: Vec<SpotLight>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            camera: Camera::default(),
            world: Mat4::IDENTITY,
            entries: Vec::new(),
            lights: Vec::new(),
        }
    }

    /// Add a drawable and return its index
    pub fn add(&mut self, drawable: Drawable) -> usize {
        self.entries.push(SceneEntry::Active(drawable));
        self.entries.len() - 1
    }

    /// Take a drawable out, leaving a `Removed` slot
    pub fn remove(&mut self, index: usize) -> Option<Drawable> {
        let entry = self.entries.get_mut(index)?;
        match std::mem::replace(entry, SceneEntry::Removed) {
            SceneEntry::Active(drawable) => Some(drawable),
            SceneEntry::Removed => None,
        }
    }

    pub fn drawable(&self, index: usize) -> Option<&Drawable> {
        self.entries.get(index).and_then(SceneEntry::drawable)
    }

    pub fn drawable_mut(&mut self, index: usize) -> Option<&mut Drawable> {
        self.entries.get_mut(index).and_then(SceneEntry::drawable_mut)
    }

    pub fn add_light(&mut self, light: SpotLight) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    /// Drawables that will be rendered this frame
    pub fn visible(&self) -> impl Iterator<Item = &Drawable> {
        self.entries.iter().filter_map(SceneEntry::visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::resources::{GpuMesh, Material, MeshData};

    #[test]
    fn test_remove_keeps_indices() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mesh = GpuMesh::upload(&mut backend, &MeshData::cube()).unwrap();
        let mut scene = Scene::new();
        let a = scene.add(Drawable::new(mesh.clone(), Material::default()));
        let b = scene.add(Drawable::new(mesh, Material::default()));

        assert!(scene.remove(a).is_some());
        assert!(scene.remove(a).is_none());
        assert!(scene.entries[a].is_removed());
        assert!(scene.drawable(b).is_some());
        assert_eq!(scene.visible().count(), 1);

        scene.drawable_mut(b).unwrap().visible = false;
        assert_eq!(scene.visible().count(), 0);
    }
}
