//! Backend abstraction layer
//!
//! Provides the traits and types that both the wgpu backend and the CPU
//! reference backend implement.

pub mod framebuffer;
pub mod release;
pub mod software;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use framebuffer::validate_framebuffer;
pub use release::{Owned, ReleaseQueue, ResourceId};
pub use traits::*;
pub use types::*;
