//! Per-frame pass sequencing
//!
//! A frame walks `Idle -> ShadowDepth -> Geometry -> Lighting -> PostProcess
//! -> Idle`. When any pass fails the frame goes straight back to `Idle`
//! without presenting. The same failure repeating on consecutive frames is
//! only logged once.

use std::fmt;

use thiserror::Error;

use crate::backend::{BackendError, GraphicsBackend, TextureHandle};
use crate::scene::Scene;

use super::accumulator::LightAccumulator;
use super::geometry_pass::GeometryPass;
use super::lighting_pass::LightingPass;
use super::postprocess::PostProcessPass;
use super::shadow::ShadowPass;
use super::{FrameView, PassError, PipelineResources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    #[default]
    Idle,
    ShadowDepth,
    Geometry,
    Lighting,
    PostProcess,
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameState::Idle => "idle",
            FrameState::ShadowDepth => "shadow depth",
            FrameState::Geometry => "geometry",
            FrameState::Lighting => "lighting",
            FrameState::PostProcess => "post-process",
        };
        f.write_str(name)
    }
}

/// Why a frame was dropped
#[derive(Error, Debug, Clone, PartialEq)]
#[error("frame dropped in {state} state: {error}")]
pub struct FrameFailure {
    pub state: FrameState,
    pub error: PassError,
}

/// Outcome of one frame
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// The frame reached the surface
    pub presented: bool,
    /// States entered, in order, ending with `Idle`
    pub states: Vec<FrameState>,
    pub shadow_draws: u32,
    pub geometry_draws: u32,
    /// Lights accumulated into the shaded target
    pub lights: u32,
    pub failure: Option<FrameFailure>,
    /// The failure differs from the previous frame's and was logged
    pub newly_reported: bool,
    /// Graphics API error collected after the pass sequence
    pub api_error: Option<BackendError>,
}

impl FrameReport {
    pub fn dropped(&self) -> bool {
        self.failure.is_some()
    }
}

/// Runs the four passes of a frame in order
#[derive(Debug, Default)]
pub struct FrameOrchestrator {
    state: FrameState,
    last_failure: Option<FrameFailure>,
    frames: u64,
}

impl FrameOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frames started so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Failure of the most recent dropped frame, cleared by a good frame
    pub fn last_failure(&self) -> Option<&FrameFailure> {
        self.last_failure.as_ref()
    }

    /// Produce one frame
    pub fn run_frame<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        resources: &PipelineResources,
        scene: &mut Scene,
        view: &FrameView,
    ) -> FrameReport {
        debug_assert_eq!(self.state, FrameState::Idle, "frames must not nest");
        self.frames += 1;

        let mut report = FrameReport::default();
        let result = match backend.begin_frame() {
            Ok(()) => self.run_passes(backend, resources, scene, view, &mut report),
            Err(e) => Err(FrameFailure {
                state: FrameState::Idle,
                error: e.into(),
            }),
        };

        match result {
            Ok(()) => match backend.end_frame(true) {
                Ok(()) => {
                    report.presented = true;
                    self.last_failure = None;
                }
                Err(e) => self.record_failure(
                    &mut report,
                    FrameFailure {
                        state: FrameState::PostProcess,
                        error: e.into(),
                    },
                ),
            },
            Err(failure) => {
                if failure.state != FrameState::Idle {
                    if let Err(e) = backend.end_frame(false) {
                        log::debug!("Discarding dropped frame: {}", e);
                    }
                }
                self.record_failure(&mut report, failure);
            }
        }
        self.enter(FrameState::Idle, &mut report);

        report.api_error = backend.take_error();
        if let Some(error) = &report.api_error {
            log::warn!("Graphics API error during frame {}: {}", self.frames, error);
            while let Some(more) = backend.take_error() {
                log::warn!("Graphics API error during frame {}: {}", self.frames, more);
            }
        }

        report
    }

    /// Drop a frame before its shadow pass starts
    ///
    /// The failure goes through the same report-once bookkeeping as a pass
    /// failure, so the next frame starts fresh on the current targets.
    pub fn skip_frame(&mut self, error: PassError) -> FrameReport {
        debug_assert_eq!(self.state, FrameState::Idle, "frames must not nest");
        self.frames += 1;

        let mut report = FrameReport::default();
        self.record_failure(
            &mut report,
            FrameFailure {
                state: FrameState::Idle,
                error,
            },
        );
        self.enter(FrameState::Idle, &mut report);
        report
    }

    fn run_passes<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        resources: &PipelineResources,
        scene: &mut Scene,
        view: &FrameView,
        report: &mut FrameReport,
    ) -> Result<(), FrameFailure> {
        let programs = &resources.programs;

        self.enter(FrameState::ShadowDepth, report);
        for light in scene.lights.iter_mut().filter(|l| l.casts_shadows()) {
            report.shadow_draws += ShadowPass::render_depth(
                backend,
                &programs.shadow_map,
                light,
                view.world,
                &scene.entries,
            )
            .map_err(|e| self.fail(e))?;
        }

        self.enter(FrameState::Geometry, report);
        report.geometry_draws = GeometryPass::render_geometry(
            backend,
            &resources.targets,
            &programs.geometry,
            view.view_projection,
            view.world,
            &scene.entries,
        )
        .map_err(|e| self.fail(e))?;

        self.enter(FrameState::Lighting, report);
        let mut accumulator =
            LightAccumulator::begin(backend, &resources.targets).map_err(|e| self.fail(e))?;
        LightingPass::bind_gbuffer(backend, &programs.lighting, &resources.targets);
        for light in &scene.lights {
            LightingPass::accumulate_light(
                backend,
                &mut accumulator,
                &programs.lighting,
                &resources.quad,
                light,
                view,
            );
        }
        report.lights = accumulator.finish(backend);

        self.enter(FrameState::PostProcess, report);
        PostProcessPass::composite(
            backend,
            &programs.post,
            &resources.quad,
            &resources.targets,
            primary_shadow_map(scene),
            view,
        )
        .map_err(|e| self.fail(e))?;

        Ok(())
    }

    fn enter(&mut self, state: FrameState, report: &mut FrameReport) {
        log::trace!("Frame {}: {} -> {}", self.frames, self.state, state);
        self.state = state;
        report.states.push(state);
    }

    fn fail(&self, error: PassError) -> FrameFailure {
        FrameFailure {
            state: self.state,
            error,
        }
    }

    fn record_failure(&mut self, report: &mut FrameReport, failure: FrameFailure) {
        report.newly_reported = self.last_failure.as_ref() != Some(&failure);
        if report.newly_reported {
            log::warn!("{}", failure);
        }
        self.last_failure = Some(failure.clone());
        report.failure = Some(failure);
    }
}

/// Shadow map shown by the post-process debug view
fn primary_shadow_map(scene: &Scene) -> Option<TextureHandle> {
    scene
        .lights
        .iter()
        .find_map(|light| light.shadow().map(|target| target.depth()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{FramebufferStatus, GraphicsBackend};
    use crate::scene::SpotLight;
    use glam::Vec3;

    fn setup(width: u32, height: u32) -> (SoftwareBackend, PipelineResources, Scene) {
        let mut backend = SoftwareBackend::new(width, height);
        let resources = PipelineResources::new(&mut backend, width, height, None).unwrap();
        let mut scene = Scene::default();
        scene.lights.push(SpotLight::new(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO));
        (backend, resources, scene)
    }

    #[test]
    fn test_full_state_sequence() {
        let (mut backend, resources, mut scene) = setup(8, 8);
        let mut orchestrator = FrameOrchestrator::new();
        let report = orchestrator.run_frame(&mut backend, &resources, &mut scene, &FrameView::default());

        assert!(report.presented);
        assert_eq!(
            report.states,
            vec![
                FrameState::ShadowDepth,
                FrameState::Geometry,
                FrameState::Lighting,
                FrameState::PostProcess,
                FrameState::Idle,
            ]
        );
        assert_eq!(report.lights, 1);
        assert_eq!(orchestrator.state(), FrameState::Idle);
        assert_eq!(backend.frames_presented(), 1);
    }

    #[test]
    fn test_incomplete_framebuffer_drops_frame_and_reports_once() {
        let (mut backend, resources, mut scene) = setup(8, 8);
        let mut orchestrator = FrameOrchestrator::new();
        let view = FrameView::default();
        backend.inject_framebuffer_status(
            resources.targets.framebuffer(),
            Some(FramebufferStatus::MissingAttachment),
        );

        let first = orchestrator.run_frame(&mut backend, &resources, &mut scene, &view);
        assert!(!first.presented);
        assert!(first.newly_reported);
        let failure = first.failure.as_ref().unwrap();
        assert_eq!(failure.state, FrameState::Geometry);
        assert_eq!(
            first.states,
            vec![FrameState::ShadowDepth, FrameState::Geometry, FrameState::Idle]
        );

        let second = orchestrator.run_frame(&mut backend, &resources, &mut scene, &view);
        assert!(second.dropped());
        assert!(!second.newly_reported);
        assert_eq!(backend.frames_presented(), 0);

        backend.inject_framebuffer_status(resources.targets.framebuffer(), None);
        let third = orchestrator.run_frame(&mut backend, &resources, &mut scene, &view);
        assert!(third.presented);
        assert!(orchestrator.last_failure().is_none());
    }

    #[test]
    fn test_skipped_frame_reports_once_then_recovers() {
        let (mut backend, resources, mut scene) = setup(8, 8);
        let mut orchestrator = FrameOrchestrator::new();
        let error = PassError::IncompleteFramebuffer {
            target: "frame targets",
            status: FramebufferStatus::Unsupported,
        };

        let first = orchestrator.skip_frame(error.clone());
        assert!(!first.presented);
        assert!(first.newly_reported);
        assert_eq!(first.states, vec![FrameState::Idle]);
        assert_eq!(
            first.failure,
            Some(FrameFailure {
                state: FrameState::Idle,
                error: error.clone(),
            })
        );

        let second = orchestrator.skip_frame(error);
        assert!(second.dropped());
        assert!(!second.newly_reported);
        assert_eq!(orchestrator.frames(), 2);

        let third = orchestrator.run_frame(&mut backend, &resources, &mut scene, &FrameView::default());
        assert!(third.presented);
        assert!(orchestrator.last_failure().is_none());
        assert_eq!(backend.frames_presented(), 1);
    }

    #[test]
    fn test_api_error_is_reported_after_sequence() {
        let (mut backend, resources, mut scene) = setup(8, 8);
        let mut orchestrator = FrameOrchestrator::new();
        backend.inject_error(BackendError::Validation("bad bind group".into()));

        let report = orchestrator.run_frame(&mut backend, &resources, &mut scene, &FrameView::default());
        assert!(report.presented);
        assert_eq!(
            report.api_error,
            Some(BackendError::Validation("bad bind group".into()))
        );
        assert!(backend.take_error().is_none());
    }
}
