//! Device-resident indirect draw commands, count cells and statistics.

pub mod command;
pub mod stats;

pub use command::{
    DrawIndexedIndirectCommand, DrawIndirectCountCall, IndirectCommandBuffer, COMMAND_STRIDE,
};
pub use stats::{CullStats, IndirectStats, StatsBlock, DRAW_EXTENT_OFFSET, VISIBLE_COUNT_OFFSET};
