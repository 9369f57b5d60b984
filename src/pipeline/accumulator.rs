//! Additive accumulation of light contributions into the shaded target

use crate::backend::{BlendState, GraphicsBackend, LoadOp, RasterState};

use super::frame_targets::FrameTargets;
use super::PassError;

/// Open lighting pass over the shaded-color target.
///
/// The target is cleared once when the accumulator begins. The first light
/// then writes with blending disabled and every later light is added on top
/// with `one + one` blending. [`finish`](Self::finish) turns blending off
/// again and closes the pass.
#[must_use = "a light accumulator must be finished to close its pass"]
pub struct LightAccumulator {
    lights: u32,
}

impl LightAccumulator {
    pub fn begin<B: GraphicsBackend>(
        backend: &mut B,
        targets: &FrameTargets,
    ) -> Result<Self, PassError> {
        targets.bind_for_lighting_write(backend, LoadOp::Clear([0.0; 4]))?;
        Ok(Self { lights: 0 })
    }

    /// Lights accumulated so far
    pub fn lights(&self) -> u32 {
        self.lights
    }

    /// Blend state for the next contribution
    pub fn next_blend(&self) -> Option<BlendState> {
        if self.lights == 0 {
            None
        } else {
            Some(BlendState::additive())
        }
    }

    /// Set the blend state for the next light, then let `draw` issue it
    pub fn accumulate<B, F>(&mut self, backend: &mut B, draw: F)
    where
        B: GraphicsBackend,
        F: FnOnce(&mut B),
    {
        backend.set_raster_state(RasterState::default().with_blend(self.next_blend()));
        draw(backend);
        self.lights += 1;
    }

    /// Restore replace blending and close the pass
    pub fn finish<B: GraphicsBackend>(self, backend: &mut B) -> u32 {
        backend.set_raster_state(RasterState::default());
        backend.end_render_pass();
        self.lights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::{Command, SoftwareBackend};
    use crate::backend::RenderTarget;
    use crate::pipeline::{FrameOrchestrator, FrameView, PipelineResources};
    use crate::scene::{Scene, SpotLight};
    use glam::Vec3;

    #[test]
    fn test_first_light_replaces_then_adds() {
        let mut accumulator = LightAccumulator { lights: 0 };
        assert_eq!(accumulator.next_blend(), None);
        accumulator.lights = 1;
        assert_eq!(accumulator.next_blend(), Some(BlendState::additive()));
        accumulator.lights = 7;
        assert_eq!(accumulator.next_blend(), Some(BlendState::additive()));
    }

    #[test]
    fn test_second_light_adds_and_finish_disables_blending() {
        let mut backend = SoftwareBackend::new(8, 8);
        let resources = PipelineResources::new(&mut backend, 8, 8, None).unwrap();
        let mut scene = Scene::default();
        scene.lights.push(SpotLight::new(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO));
        scene.lights.push(SpotLight::new(Vec3::new(2.0, 5.0, 0.0), Vec3::ZERO));

        let report = FrameOrchestrator::new().run_frame(
            &mut backend,
            &resources,
            &mut scene,
            &FrameView::default(),
        );
        assert_eq!(report.lights, 2);

        let commands = &backend.stats().commands;
        let light_draws: Vec<(usize, Option<BlendState>)> = commands
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                Command::Draw {
                    program: "deferred",
                    blend,
                    ..
                } => Some((i, *blend)),
                _ => None,
            })
            .collect();
        assert_eq!(light_draws.len(), 2);
        assert_eq!(light_draws[0].1, None);
        assert_eq!(light_draws[1].1, Some(BlendState::additive()));

        let after_last = commands[light_draws[1].0 + 1..]
            .iter()
            .find_map(|c| match c {
                Command::RasterState(state) => Some(*state),
                _ => None,
            });
        assert_eq!(after_last, Some(RasterState::default()));
        assert_eq!(after_last.and_then(|s| s.blend), None);
    }

    #[test]
    fn test_zero_lights_still_clears() {
        let mut backend = SoftwareBackend::new(8, 8);
        let targets = FrameTargets::new(&mut backend, 8, 8).unwrap();
        backend.begin_frame().unwrap();
        let accumulator = LightAccumulator::begin(&mut backend, &targets).unwrap();
        assert_eq!(accumulator.finish(&mut backend), 0);
        backend.end_frame(false).unwrap();

        let clears: Vec<&Command> = backend
            .stats()
            .commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Command::BeginPass {
                        target: RenderTarget::Framebuffer { .. },
                        color_load: LoadOp::Clear(_),
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(clears.len(), 1);
        assert!(backend
            .texture_texels(targets.shaded())
            .unwrap()
            .iter()
            .all(|t| *t == glam::Vec4::ZERO));
    }
}
