//! Host implementation of the frame protocol.
//!
//! The compute and graphics contexts are two worker threads. Resources move
//! between them as [`Released`] tokens over channels, so the type system
//! enforces the same hand-off discipline a device queue pair needs.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{CullConfig, DepthConvention};
use crate::core::scene::Scene;
use crate::core::types::{FrameUniforms, ObjectInstance};
use crate::error::{CullError, Result};
use crate::gpu::CullBackend;
use crate::indirect::{
    CullStats, DrawIndexedIndirectCommand, DrawIndirectCountCall, IndirectCommandBuffer,
    StatsBlock, COMMAND_STRIDE, DRAW_EXTENT_OFFSET,
};
use crate::kernel::{KernelOptions, VisibilityKernel};
use crate::pyramid::{DepthImage, DepthPyramid};
use crate::sync::{
    BarrierBatch, ComputeContext, FrameFence, FrameState, FrameTimeline, GraphicsContext, Owned,
    QueueFamilies, Released,
};
use crate::utils::{CullProfiler, ScopedTimer};

/// Consumer of the resolved indirect draws. It renders into the depth image
/// the next frame's pyramid is built from.
pub trait RenderStage: Send + 'static {
    fn draw(
        &mut self,
        draws: &[DrawIndexedIndirectCommand],
        instances: &[ObjectInstance],
        depth: &mut DepthImage,
    );
}

impl<F> RenderStage for F
where
    F: FnMut(&[DrawIndexedIndirectCommand], &[ObjectInstance], &mut DepthImage) + Send + 'static,
{
    fn draw(
        &mut self,
        draws: &[DrawIndexedIndirectCommand],
        instances: &[ObjectInstance],
        depth: &mut DepthImage,
    ) {
        self(draws, instances, depth)
    }
}

/// Clears the depth image to the far plane every frame; nothing ever occludes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FarPlaneStage {
    pub convention: DepthConvention,
}

impl FarPlaneStage {
    pub fn new(convention: DepthConvention) -> Self {
        Self { convention }
    }
}

impl RenderStage for FarPlaneStage {
    fn draw(&mut self, _: &[DrawIndexedIndirectCommand], _: &[ObjectInstance], depth: &mut DepthImage) {
        depth.fill(self.convention.far_value());
    }
}

/// Writes the same depth image every frame.
#[derive(Debug, Clone)]
pub struct StaticDepthStage {
    image: DepthImage,
}

impl StaticDepthStage {
    pub fn new(image: DepthImage) -> Self {
        Self { image }
    }
}

impl RenderStage for StaticDepthStage {
    fn draw(&mut self, _: &[DrawIndexedIndirectCommand], _: &[ObjectInstance], depth: &mut DepthImage) {
        depth.copy_from(&self.image);
    }
}

/// Barriers recorded by both contexts during the last frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferLog {
    pub compute_acquire: BarrierBatch,
    pub compute_release: BarrierBatch,
    pub graphics_acquire: BarrierBatch,
    pub graphics_release: BarrierBatch,
}

struct ToGraphics {
    commands: Released<IndirectCommandBuffer, ComputeContext, GraphicsContext>,
    stats: Released<StatsBlock, ComputeContext, GraphicsContext>,
    depth: Released<DepthImage, ComputeContext, GraphicsContext>,
    profile: CullProfiler,
    started: Instant,
}

struct ToCompute {
    commands: Released<IndirectCommandBuffer, GraphicsContext, ComputeContext>,
    stats: Released<StatsBlock, GraphicsContext, ComputeContext>,
    depth: Released<DepthImage, GraphicsContext, ComputeContext>,
}

struct Shared {
    scene: Scene,
    families: QueueFamilies,
    options: KernelOptions,
    fence: FrameFence,
    timeline: FrameTimeline,
    transfers: Mutex<TransferLog>,
    profile: Mutex<CullProfiler>,
}

/// Marks the fence lost when the graphics context stops.
struct FenceLossGuard(Arc<Shared>);

impl Drop for FenceLossGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("graphics context panicked; frame fence lost");
        }
        self.0.fence.mark_lost();
    }
}

pub struct CpuBackend {
    shared: Arc<Shared>,
    jobs: Option<Sender<FrameUniforms>>,
    compute: Option<JoinHandle<()>>,
    graphics: Option<JoinHandle<()>>,
    fence_timeout: Duration,
    fence_observed: bool,
    last_stats: CullStats,
}

impl CpuBackend {
    /// Spawns both contexts with distinct queue families.
    pub fn new(config: &CullConfig, scene: Scene, stage: impl RenderStage) -> Result<Self> {
        Self::with_queue_families(config, scene, stage, QueueFamilies::new(0, 1))
    }

    pub fn with_queue_families(
        config: &CullConfig,
        scene: Scene,
        stage: impl RenderStage,
        families: QueueFamilies,
    ) -> Result<Self> {
        config.validate()?;
        if scene.lods().len() > config.max_lod_levels {
            return Err(CullError::TooManyLods {
                count: scene.lods().len(),
                max: config.max_lod_levels,
            });
        }

        let (width, height) = config.viewport;
        let convention = config.depth_convention;
        let pyramid = DepthPyramid::new(width, height, convention)?;
        let depth = DepthImage::cleared(width, height, convention)?;
        let commands = IndirectCommandBuffer::new(scene.object_count(), scene.lods().finest());

        log::info!(
            "cpu backend: {} objects, {} LODs, {}x{} viewport, {} pyramid levels",
            scene.object_count(),
            scene.lods().len(),
            width,
            height,
            pyramid.level_count()
        );

        let shared = Arc::new(Shared {
            scene,
            families,
            options: KernelOptions {
                convention,
                occlusion_enabled: config.occlusion_enabled,
                parallel: config.parallel,
            },
            fence: FrameFence::new_signaled(),
            timeline: FrameTimeline::new(),
            transfers: Mutex::new(TransferLog::default()),
            profile: Mutex::new(CullProfiler::default()),
        });

        let (jobs_tx, jobs_rx) = mpsc::channel::<FrameUniforms>();
        let (returns_tx, returns_rx) = mpsc::channel::<ToCompute>();
        let (handoff_tx, handoff_rx) = mpsc::channel::<ToGraphics>();

        // Resources start on the graphics side, as if a frame had just been drawn.
        let mut initial = BarrierBatch::new();
        let initial_handoff = ToCompute {
            commands: Owned::<_, GraphicsContext>::new(commands)
                .release::<ComputeContext>(&families, &mut initial),
            stats: Owned::<_, GraphicsContext>::new(StatsBlock::new())
                .release::<ComputeContext>(&families, &mut initial),
            depth: Owned::<_, GraphicsContext>::new(depth)
                .release::<ComputeContext>(&families, &mut initial),
        };
        shared.transfers.lock().graphics_release = initial;
        returns_tx
            .send(initial_handoff)
            .map_err(|_| CullError::DeviceLost("compute context unavailable".to_string()))?;

        let compute_shared = Arc::clone(&shared);
        let compute = std::thread::Builder::new()
            .name("cull-compute".to_string())
            .spawn(move || run_compute(compute_shared, pyramid, jobs_rx, returns_rx, handoff_tx))
            .map_err(|err| CullError::DeviceLost(format!("failed to spawn compute context: {err}")))?;

        let graphics_shared = Arc::clone(&shared);
        let mut stage = stage;
        let graphics = std::thread::Builder::new()
            .name("cull-graphics".to_string())
            .spawn(move || run_graphics(graphics_shared, &mut stage, handoff_rx, returns_tx))
            .map_err(|err| CullError::DeviceLost(format!("failed to spawn graphics context: {err}")))?;

        Ok(Self {
            shared,
            jobs: Some(jobs_tx),
            compute: Some(compute),
            graphics: Some(graphics),
            fence_timeout: config.fence_timeout,
            fence_observed: false,
            last_stats: CullStats::default(),
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.shared.scene
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.shared.families
    }

    /// Barriers recorded by the most recent frame on each context.
    pub fn transfer_log(&self) -> TransferLog {
        self.shared.transfers.lock().clone()
    }

    /// Stage timings of the most recent completed frame.
    pub fn last_profile(&self) -> CullProfiler {
        *self.shared.profile.lock()
    }
}

impl CullBackend for CpuBackend {
    type FrameInput = ();

    fn name(&self) -> &str {
        "cpu-threads"
    }

    fn object_count(&self) -> u32 {
        self.shared.scene.object_count()
    }

    fn timeline(&self) -> &FrameTimeline {
        &self.shared.timeline
    }

    fn wait_frame_complete(&mut self, timeout: Duration) -> Result<()> {
        self.last_stats = self.shared.fence.wait(timeout)?;
        self.fence_observed = true;
        if self.shared.timeline.state() == FrameState::DrawSubmitted {
            self.shared.timeline.advance(FrameState::DrawSubmitted);
        }
        Ok(())
    }

    fn read_stats(&self) -> Result<CullStats> {
        if !self.fence_observed {
            return Err(CullError::StatsNotReady);
        }
        Ok(self.last_stats)
    }

    fn submit_frame(&mut self, uniforms: &FrameUniforms, _input: ()) -> Result<()> {
        // Single generation of buffers: the previous frame must be done.
        self.shared.fence.wait(self.fence_timeout)?;
        if self.shared.timeline.state() == FrameState::DrawSubmitted {
            self.shared.timeline.advance(FrameState::DrawSubmitted);
        }
        if self.shared.timeline.state() == FrameState::StatsReadable {
            self.shared.timeline.advance(FrameState::StatsReadable);
        }

        self.fence_observed = false;
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| CullError::DeviceLost("backend shut down".to_string()))?;

        self.shared.fence.reset();
        jobs.send(*uniforms).map_err(|_| {
            self.shared.fence.mark_lost();
            CullError::DeviceLost("compute context stopped".to_string())
        })
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        self.jobs.take();
        for (name, handle) in [("compute", self.compute.take()), ("graphics", self.graphics.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    log::error!("{name} context terminated with a panic");
                }
            }
        }
    }
}

fn run_compute(
    shared: Arc<Shared>,
    mut pyramid: DepthPyramid,
    jobs: Receiver<FrameUniforms>,
    returns: Receiver<ToCompute>,
    to_graphics: Sender<ToGraphics>,
) {
    let families = shared.families;
    let options = shared.options;

    while let Ok(uniforms) = jobs.recv() {
        let Ok(handoff) = returns.recv() else {
            break;
        };
        let started = Instant::now();
        let mut profile = CullProfiler::default();
        let mut acquire = BarrierBatch::new();
        let mut release = BarrierBatch::new();

        shared.timeline.advance(FrameState::Idle);
        let depth = handoff.depth.acquire(&families, &mut acquire);
        let mut commands = handoff.commands.acquire(&families, &mut acquire);
        let stats = handoff.stats.acquire(&families, &mut acquire);

        {
            let _timer = ScopedTimer::new(&mut profile.pyramid_time);
            pyramid.build_with(&depth, options.parallel);
        }
        shared.timeline.advance(FrameState::PyramidBuilding);
        let depth = depth.release::<GraphicsContext>(&families, &mut release);

        {
            let _timer = ScopedTimer::new(&mut profile.kernel_time);
            let kernel = VisibilityKernel::new(
                &uniforms,
                shared.scene.lods(),
                Some(&pyramid),
                options,
            );
            kernel.dispatch(shared.scene.instances(), &mut commands, &stats);
        }
        shared.timeline.advance(FrameState::KernelReady);

        let commands = commands.release::<GraphicsContext>(&families, &mut release);
        let stats = stats.release::<GraphicsContext>(&families, &mut release);

        {
            let mut log = shared.transfers.lock();
            log.compute_acquire = acquire;
            log.compute_release = release;
        }

        profile.object_count = shared.scene.object_count();
        profile.pyramid_levels = pyramid.level_count();

        let sent = to_graphics.send(ToGraphics {
            commands,
            stats,
            depth,
            profile,
            started,
        });
        if sent.is_err() {
            log::warn!("graphics context gone; compute context stopping");
            break;
        }
    }
    log::debug!("compute context stopped");
}

fn run_graphics(
    shared: Arc<Shared>,
    stage: &mut dyn RenderStage,
    handoffs: Receiver<ToGraphics>,
    to_compute: Sender<ToCompute>,
) {
    let _guard = FenceLossGuard(Arc::clone(&shared));
    let families = shared.families;
    let object_count = shared.scene.object_count();

    while let Ok(handoff) = handoffs.recv() {
        let mut acquire = BarrierBatch::new();
        let mut release = BarrierBatch::new();
        let mut profile = CullProfiler::default();

        let commands = handoff.commands.acquire(&families, &mut acquire);
        let stats = handoff.stats.acquire(&families, &mut acquire);
        let mut depth = handoff.depth.acquire(&families, &mut acquire);
        shared.timeline.advance(FrameState::KernelDispatched);

        let call = DrawIndirectCountCall {
            buffer: (),
            offset: 0,
            stride: COMMAND_STRIDE,
            count_buffer: (),
            count_offset: DRAW_EXTENT_OFFSET,
            max_draw_count: object_count,
        };
        let executed = call.executed_count(stats.draw_extent());
        let draws: Vec<DrawIndexedIndirectCommand> = commands
            .resolve_draws(executed, call.max_draw_count)
            .map(|(_, cmd)| *cmd)
            .collect();

        {
            let _timer = ScopedTimer::new(&mut profile.draw_time);
            stage.draw(&draws, shared.scene.instances(), &mut depth);
        }
        shared.timeline.advance(FrameState::DrawReady);

        let frame_stats = CullStats::from_raw(object_count, &stats.snapshot());
        debug_assert_eq!(draws.len() as u32, frame_stats.visible);

        let returned = ToCompute {
            commands: commands.release::<ComputeContext>(&families, &mut release),
            stats: stats.release::<ComputeContext>(&families, &mut release),
            depth: depth.release::<ComputeContext>(&families, &mut release),
        };
        {
            let mut log = shared.transfers.lock();
            log.graphics_acquire = acquire;
            log.graphics_release = release;
        }

        profile.merge(&handoff.profile);
        profile.visible_count = frame_stats.visible;
        profile.total_frame_time = handoff.started.elapsed();
        *shared.profile.lock() = profile;
        log::debug!("{}", frame_stats.format());

        if to_compute.send(returned).is_err() {
            log::warn!("compute context gone; graphics context stopping");
            break;
        }
        shared.fence.signal(frame_stats);
    }
    log::debug!("graphics context stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::camera::CameraRig;
    use crate::core::lod::{LodRange, LodTable};
    use glam::Vec3;

    fn backend() -> CpuBackend {
        let lods = LodTable::with_default_distances(&[LodRange::new(0, 36), LodRange::new(36, 12)])
            .unwrap();
        let config = CullConfig {
            object_grid: 4,
            viewport: (64, 64),
            ..Default::default()
        };
        let scene = Scene::grid(config.object_grid, lods).unwrap();
        CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap()
    }

    #[test]
    fn test_stats_not_ready_before_wait() {
        let backend = backend();
        assert!(matches!(backend.read_stats(), Err(CullError::StatsNotReady)));
    }

    #[test]
    fn test_one_frame_round_trip() {
        let mut backend = backend();
        let camera = CameraRig::default().look_at(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO, Vec3::Y);
        let uniforms = FrameUniforms::from_camera(&camera, DepthConvention::Standard);

        backend.wait_frame_complete(Duration::from_secs(1)).unwrap();
        backend.submit_frame(&uniforms, ()).unwrap();
        assert!(matches!(backend.read_stats(), Err(CullError::StatsNotReady)));

        backend.wait_frame_complete(Duration::from_secs(5)).unwrap();
        let stats = backend.read_stats().unwrap();
        assert_eq!(stats.total_objects, 64);
        assert_eq!(stats.visible + stats.occluded + stats.frustum_culled, 64);
        assert_eq!(backend.timeline().state(), FrameState::StatsReadable);
    }

    #[test]
    fn test_failed_submit_leaves_fence_signaled() {
        let mut backend = backend();
        let uniforms = FrameUniforms::from_camera(&CameraRig::default(), DepthConvention::Standard);
        backend.jobs.take();

        let err = backend.submit_frame(&uniforms, ()).unwrap_err();
        assert!(matches!(err, CullError::DeviceLost(_)));
        assert!(backend.shared.fence.is_signaled());
        assert!(backend.wait_frame_complete(Duration::from_millis(10)).is_ok());
    }
}
