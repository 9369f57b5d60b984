//! Scene resources
//!
//! Procedural meshes, material parameters and material textures. GPU copies
//! are shared through `Arc` and release their handles when the last user
//! goes away.

mod material;
mod mesh;
mod texture;

pub use material::*;
pub use mesh::*;
pub use texture::*;
