//! Frame-loop facade over a [`CullBackend`].

use std::time::{Duration, Instant};

use crate::config::{CullConfig, DepthConvention, DEFAULT_FRAME_BUDGET_MS};
use crate::core::camera::CameraRig;
use crate::core::types::FrameUniforms;
use crate::error::Result;
use crate::gpu::CullBackend;
use crate::indirect::CullStats;
use crate::sync::FrameState;
use crate::utils::{warn_if_frame_budget_exceeded, TraceSpan};

/// Drives one backend through the per-frame host protocol.
pub struct CullingEngine<B: CullBackend> {
    backend: B,
    camera: CameraRig,
    uniforms: FrameUniforms,
    convention: DepthConvention,
    fence_timeout: Duration,
    frame_budget_ms: f32,
    last_stats: Option<CullStats>,
}

impl<B: CullBackend> CullingEngine<B> {
    pub fn new(backend: B, config: &CullConfig, camera: CameraRig) -> Self {
        let camera = camera.with_frozen(camera.frozen || config.frozen_frustum);
        let uniforms = FrameUniforms::from_camera(&camera, config.depth_convention);
        Self {
            backend,
            camera,
            uniforms,
            convention: config.depth_convention,
            fence_timeout: config.fence_timeout,
            frame_budget_ms: DEFAULT_FRAME_BUDGET_MS,
            last_stats: None,
        }
    }

    pub fn with_frame_budget(mut self, budget_ms: f32) -> Self {
        self.frame_budget_ms = budget_ms;
        self
    }

    /// Runs one frame: wait for the previous one, read its statistics,
    /// commit this frame's camera and submit.
    ///
    /// Returns the statistics of the frame that just completed, or `None`
    /// on the first call.
    pub fn frame(&mut self, input: B::FrameInput) -> Result<Option<CullStats>> {
        let _span = TraceSpan::new("cull frame");
        let started = Instant::now();

        self.backend.wait_frame_complete(self.fence_timeout)?;
        let stats = if self.backend.timeline().state() == FrameState::StatsReadable {
            Some(self.backend.read_stats()?)
        } else {
            None
        };
        if let Some(stats) = stats {
            log::debug!("{}", stats.format());
            self.last_stats = Some(stats);
        }

        self.uniforms.update(&self.camera, self.convention);
        self.backend.submit_frame(&self.uniforms, input)?;

        warn_if_frame_budget_exceeded(started.elapsed(), self.frame_budget_ms);
        Ok(stats)
    }

    /// Camera used from the next frame on. The engine's freeze flag is kept.
    pub fn set_camera(&mut self, camera: CameraRig) {
        let frozen = self.camera.frozen;
        self.camera = camera.with_frozen(frozen);
    }

    pub fn camera(&self) -> &CameraRig {
        &self.camera
    }

    /// Holds the committed frustum planes and camera position while set.
    pub fn set_frozen(&mut self, frozen: bool) {
        if frozen != self.camera.frozen {
            log::info!("frustum {}", if frozen { "frozen" } else { "released" });
        }
        self.camera.frozen = frozen;
    }

    pub fn is_frozen(&self) -> bool {
        self.camera.frozen
    }

    /// Uniforms submitted with the most recent frame.
    pub fn uniforms(&self) -> &FrameUniforms {
        &self.uniforms
    }

    /// Statistics of the most recently completed frame.
    pub fn stats(&self) -> Option<CullStats> {
        self.last_stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}
