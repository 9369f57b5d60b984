//! Final composite onto the presented surface
//!
//! The shaded color plus the emissive part of the mask channel is tonemapped
//! (Reinhard) at the configured exposure. Pixels the geometry pass did not
//! cover show the clear color. Debug views show one raw input instead.

use crate::backend::{GraphicsBackend, LoadOp, RasterState, RenderPassDescriptor, RenderTarget, TextureHandle};
use crate::shader::{ShaderProgram, UniformValue};

use super::frame_targets::FrameTargets;
use super::quad::FullscreenQuad;
use super::texture_units::{TextureSlot, POST_PROCESS};
use super::{FrameView, PassError};

/// What the post-process pass puts on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugView {
    /// Tonemapped lighting
    #[default]
    Final,
    Position,
    Normal,
    Albedo,
    Mask,
    Depth,
    ShadowMap,
}

impl DebugView {
    pub const ALL: [DebugView; 7] = [
        DebugView::Final,
        DebugView::Position,
        DebugView::Normal,
        DebugView::Albedo,
        DebugView::Mask,
        DebugView::Depth,
        DebugView::ShadowMap,
    ];

    /// Value of `uniform_debug_view`
    pub fn index(&self) -> i32 {
        match self {
            DebugView::Final => 0,
            DebugView::Position => 1,
            DebugView::Normal => 2,
            DebugView::Albedo => 3,
            DebugView::Mask => 4,
            DebugView::Depth => 5,
            DebugView::ShadowMap => 6,
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|view| view.index() == index)
    }

    /// The next view, wrapping around
    pub fn next(&self) -> Self {
        Self::ALL[(self.index() as usize + 1) % Self::ALL.len()]
    }
}

pub struct PostProcessPass;

impl PostProcessPass {
    /// Draw the final image to the surface
    pub fn composite<B: GraphicsBackend>(
        backend: &mut B,
        program: &ShaderProgram,
        quad: &FullscreenQuad,
        targets: &FrameTargets,
        shadow_map: Option<TextureHandle>,
        view: &FrameView,
    ) -> Result<(), PassError> {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("post".into()),
            target: RenderTarget::Surface,
            color_load: LoadOp::Clear(view.clear_color),
            depth_load: LoadOp::Load,
            viewport: None,
        })?;
        backend.set_program(program.handle());
        backend.set_raster_state(RasterState::default());

        POST_PROCESS.bind(backend, TextureSlot::Shaded, Some(targets.shaded()));
        POST_PROCESS.bind(backend, TextureSlot::ShadowMap, shadow_map);
        POST_PROCESS.bind(backend, TextureSlot::GBufferPosition, Some(targets.position()));
        POST_PROCESS.bind(backend, TextureSlot::GBufferNormal, Some(targets.normal()));
        POST_PROCESS.bind(backend, TextureSlot::GBufferAlbedo, Some(targets.albedo()));
        POST_PROCESS.bind(backend, TextureSlot::GBufferMask, Some(targets.mask()));
        POST_PROCESS.bind(backend, TextureSlot::GBufferDepth, Some(targets.depth()));

        backend.set_uniform("uniform_clear_color", UniformValue::Vec4(view.clear_color.into()));
        backend.load_float("uniform_exposure", view.exposure);
        backend.load_int("uniform_debug_view", view.debug_view.index());

        quad.draw(backend);
        backend.end_render_pass();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_view_cycles() {
        let mut view = DebugView::Final;
        for _ in 0..DebugView::ALL.len() {
            view = view.next();
        }
        assert_eq!(view, DebugView::Final);
        assert_eq!(DebugView::Final.next(), DebugView::Position);
    }

    #[test]
    fn test_debug_view_index_round_trip() {
        for view in DebugView::ALL {
            assert_eq!(DebugView::from_index(view.index()), Some(view));
        }
        assert_eq!(DebugView::from_index(7), None);
    }
}
