//! Per-frame state machine shared by the host and both contexts.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    Idle = 0,
    PyramidBuilding = 1,
    KernelReady = 2,
    KernelDispatched = 3,
    DrawReady = 4,
    DrawSubmitted = 5,
    StatsReadable = 6,
}

impl FrameState {
    /// The only legal successor.
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::PyramidBuilding,
            Self::PyramidBuilding => Self::KernelReady,
            Self::KernelReady => Self::KernelDispatched,
            Self::KernelDispatched => Self::DrawReady,
            Self::DrawReady => Self::DrawSubmitted,
            Self::DrawSubmitted => Self::StatsReadable,
            Self::StatsReadable => Self::Idle,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::PyramidBuilding,
            2 => Self::KernelReady,
            3 => Self::KernelDispatched,
            4 => Self::DrawReady,
            5 => Self::DrawSubmitted,
            _ => Self::StatsReadable,
        }
    }
}

/// Atomic frame state plus a generation counter bumped on every `StatsReadable -> Idle`.
#[derive(Debug)]
pub struct FrameTimeline {
    state: AtomicU8,
    generation: AtomicU64,
}

impl Default for FrameTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimeline {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(FrameState::Idle as u8),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> FrameState {
        FrameState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Completed frame cycles.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Moves `expected` to its successor. On mismatch returns the observed state.
    pub fn try_advance(&self, expected: FrameState) -> Result<FrameState, FrameState> {
        let next = expected.next();
        self.state
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(FrameState::from_u8)?;

        if next == FrameState::Idle {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        log::trace!("frame {}: {:?} -> {:?}", self.generation(), expected, next);
        Ok(next)
    }

    /// Like [`try_advance`](Self::try_advance), but a mismatch is a protocol bug.
    pub fn advance(&self, expected: FrameState) -> FrameState {
        match self.try_advance(expected) {
            Ok(next) => next,
            Err(observed) => {
                log::error!(
                    "frame timeline out of order: expected {:?}, observed {:?}",
                    expected,
                    observed
                );
                debug_assert!(false, "frame timeline out of order");
                observed
            }
        }
    }
}
