pub mod ash_backend;
pub mod cpu_backend;

pub use ash_backend::{AshBackend, AshFrameInput, DepthTarget, ShaderSources};
pub use cpu_backend::{CpuBackend, FarPlaneStage, RenderStage, StaticDepthStage, TransferLog};

use std::time::Duration;

use crate::core::types::FrameUniforms;
use crate::error::Result;
use crate::indirect::CullStats;
use crate::sync::FrameTimeline;

/// A compute + graphics pair executing the culling frame protocol.
///
/// Per frame the host calls, in order: [`wait_frame_complete`], [`read_stats`]
/// and [`submit_frame`]. The wait is the only point where the host blocks.
///
/// [`wait_frame_complete`]: CullBackend::wait_frame_complete
/// [`read_stats`]: CullBackend::read_stats
/// [`submit_frame`]: CullBackend::submit_frame
pub trait CullBackend: Send {
    /// Per-frame input from the caller (e.g. the recorded graphics command buffer).
    type FrameInput;

    fn name(&self) -> &str;

    fn object_count(&self) -> u32;

    fn timeline(&self) -> &FrameTimeline;

    /// Blocks until the previously submitted frame has fully completed.
    fn wait_frame_complete(&mut self, timeout: Duration) -> Result<()>;

    /// Statistics of the last completed frame. Fails with
    /// [`CullError::StatsNotReady`](crate::CullError::StatsNotReady) unless the
    /// frame-complete signal has been observed since the last submission.
    fn read_stats(&self) -> Result<CullStats>;

    /// Uploads `uniforms` and submits compute then graphics work.
    fn submit_frame(&mut self, uniforms: &FrameUniforms, input: Self::FrameInput) -> Result<()>;
}
