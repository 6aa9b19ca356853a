//! Frame state, completion fence and ownership transfer between contexts.

pub mod fence;
pub mod ownership;
pub mod state;

pub use fence::FrameFence;
pub use ownership::{
    BarrierBatch, ComputeContext, ContextRole, ContextUsage, GraphicsContext, Owned,
    QueueContext, QueueFamilies, Released, TransferBarrier, TransferHalf, TransferHandle,
    TransferTarget, Transferable,
};
pub use state::{FrameState, FrameTimeline};
