//! Configuration constants and the serializable [`CullConfig`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CullError, Result};

/// Default edge length of the object grid (the scene holds `grid^3` objects).
pub const DEFAULT_OBJECT_GRID: u32 = 100;

/// Index of the coarsest LOD the statistics block can bucket.
pub const MAX_LOD_LEVEL: usize = 5;

/// Number of LOD buckets in the statistics block.
pub const MAX_LOD_LEVELS: usize = MAX_LOD_LEVEL + 1;

/// Distance threshold of LOD 0.
pub const DEFAULT_LOD_BASE_DISTANCE: f32 = 5.0;

/// Distance added to the threshold for each coarser LOD.
pub const DEFAULT_LOD_DISTANCE_STEP: f32 = 5.0;

/// Uniform scale applied to every grid object.
pub const DEFAULT_INSTANCE_SCALE: f32 = 2.0;

/// Bounding sphere radius per unit of instance scale.
pub const BOUNDING_RADIUS_SCALE: f32 = 1.0;

/// Work items per workgroup axis of the depth reduction kernel.
pub const PYRAMID_WORKGROUP_SIZE: u32 = 32;

/// Work items per workgroup of the visibility kernel.
pub const CULL_WORKGROUP_SIZE: u32 = 64;

/// How long the host waits for a frame's completion signal before declaring a fault.
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_secs(2);

/// Frame budget used for overrun warnings (milliseconds).
pub const DEFAULT_FRAME_BUDGET_MS: f32 = 16.6;

/// Depth value convention shared by the depth buffer, the pyramid and the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthConvention {
    /// Near plane at 0.0, far plane at 1.0.
    #[default]
    Standard,
    /// Near plane at 1.0, far plane at 0.0.
    Reversed,
}

impl DepthConvention {
    /// Depth value written by a cleared depth buffer.
    pub fn far_value(self) -> f32 {
        match self {
            Self::Standard => 1.0,
            Self::Reversed => 0.0,
        }
    }

    /// The farther of two depth values.
    #[inline]
    pub fn farthest(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Standard => a.max(b),
            Self::Reversed => a.min(b),
        }
    }

    /// The nearer of two depth values.
    #[inline]
    pub fn nearest(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Standard => a.min(b),
            Self::Reversed => a.max(b),
        }
    }

    /// True when `depth` lies strictly behind `occluder`.
    #[inline]
    pub fn is_behind(self, depth: f32, occluder: f32) -> bool {
        match self {
            Self::Standard => depth > occluder,
            Self::Reversed => depth < occluder,
        }
    }
}

/// Runtime configuration of the culling pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CullConfig {
    /// Edge length of the object grid.
    pub object_grid: u32,
    /// Maximum number of LOD levels accepted from the mesh.
    pub max_lod_levels: usize,
    /// Start culling with a frozen frustum.
    pub frozen_frustum: bool,
    /// Run the Hi-Z occlusion test (frustum + LOD only when false).
    pub occlusion_enabled: bool,
    pub depth_convention: DepthConvention,
    /// Viewport size, which sizes the depth pyramid.
    pub viewport: (u32, u32),
    /// Use data-parallel execution on the CPU backend.
    pub parallel: bool,
    #[serde(with = "duration_millis")]
    pub fence_timeout: Duration,
}

impl Default for CullConfig {
    fn default() -> Self {
        Self {
            object_grid: DEFAULT_OBJECT_GRID,
            max_lod_levels: MAX_LOD_LEVELS,
            frozen_frustum: false,
            occlusion_enabled: true,
            depth_convention: DepthConvention::Standard,
            viewport: (1280, 720),
            parallel: cfg!(feature = "parallel"),
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
        }
    }
}

impl CullConfig {
    /// Checks every precondition the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        let (width, height) = self.viewport;
        if width == 0 || height == 0 {
            return Err(CullError::InvalidViewport { width, height });
        }
        if self.object_grid == 0 || self.object_grid > 1024 {
            return Err(CullError::InvalidObjectGrid(self.object_grid));
        }
        if self.max_lod_levels == 0 {
            return Err(CullError::EmptyLodTable);
        }
        if self.max_lod_levels > MAX_LOD_LEVELS {
            return Err(CullError::TooManyLods {
                count: self.max_lod_levels,
                max: MAX_LOD_LEVELS,
            });
        }
        Ok(())
    }

    /// Total number of objects produced by the grid.
    pub fn object_count(&self) -> u32 {
        self.object_grid.pow(3)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
