//! Profiling and logging helpers.

pub mod logging;
pub mod profiling;

pub use logging::{warn_if_frame_budget_exceeded, TraceSpan};
pub use profiling::{CullProfiler, ScopedTimer};
