use glam::Vec3;

use crate::config::DEFAULT_INSTANCE_SCALE;
use crate::core::lod::LodTable;
use crate::core::types::ObjectInstance;
use crate::{CullError, Result};

/// Immutable scene data uploaded once: the instance array and the LOD table.
#[derive(Debug, Clone)]
pub struct Scene {
    instances: Vec<ObjectInstance>,
    lods: LodTable,
}

impl Scene {
    pub fn new(instances: Vec<ObjectInstance>, lods: LodTable) -> Result<Self> {
        if instances.is_empty() || instances.len() > u32::MAX as usize {
            return Err(CullError::InvalidObjectGrid(instances.len().min(u32::MAX as usize) as u32));
        }
        Ok(Self { instances, lods })
    }

    /// Lays out `grid^3` objects centred on the origin with unit spacing.
    pub fn grid(grid: u32, lods: LodTable) -> Result<Self> {
        Self::grid_with_scale(grid, DEFAULT_INSTANCE_SCALE, lods)
    }

    pub fn grid_with_scale(grid: u32, scale: f32, lods: LodTable) -> Result<Self> {
        if grid == 0 || grid > 1024 {
            return Err(CullError::InvalidObjectGrid(grid));
        }
        let n = grid as usize;
        let half = grid as f32 / 2.0;
        let mut instances = vec![ObjectInstance::default(); n * n * n];
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let index = x + y * n + z * n * n;
                    instances[index] = ObjectInstance::new(
                        Vec3::new(x as f32, y as f32, z as f32) - Vec3::splat(half),
                        scale,
                    );
                }
            }
        }
        Self::new(instances, lods)
    }

    pub fn instances(&self) -> &[ObjectInstance] {
        &self.instances
    }

    pub fn lods(&self) -> &LodTable {
        &self.lods
    }

    pub fn object_count(&self) -> u32 {
        self.instances.len() as u32
    }
}
