use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::config::BOUNDING_RADIUS_SCALE;

/// Per-instance data uploaded once at scene setup (GPU layout, 16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ObjectInstance {
    pub position: Vec3,
    pub scale: f32,
}

impl ObjectInstance {
    pub fn new(position: Vec3, scale: f32) -> Self {
        Self { position, scale }
    }

    /// Radius of the bounding sphere used by the frustum and occlusion tests.
    #[inline]
    pub fn bounding_radius(&self) -> f32 {
        self.scale * BOUNDING_RADIUS_SCALE
    }
}

/// Index range and switch distance of one level of detail (GPU layout, 16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct LodDescriptor {
    pub first_index: u32,
    pub index_count: u32,
    /// The LOD is used while the viewer distance does not exceed this value.
    pub distance: f32,
    #[serde(skip)]
    pub _pad: f32,
}

impl LodDescriptor {
    pub fn new(first_index: u32, index_count: u32, distance: f32) -> Self {
        Self {
            first_index,
            index_count,
            distance,
            _pad: 0.0,
        }
    }

    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Per-frame camera data shared by the kernel and the draw stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    /// World-space camera position (w = 1).
    pub camera_position: Vec4,
    /// Normalized planes in `left, right, bottom, top, near, far` order.
    pub frustum_planes: [Vec4; 6],
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            camera_position: Vec4::W,
            frustum_planes: [Vec4::ZERO; 6],
        }
    }
}

impl FrameUniforms {
    #[inline]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    #[inline]
    pub fn camera_position(&self) -> Vec3 {
        self.camera_position.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_layouts() {
        assert_eq!(std::mem::size_of::<ObjectInstance>(), 16);
        assert_eq!(std::mem::size_of::<LodDescriptor>(), 16);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 240);
    }

    #[test]
    fn test_triangle_count() {
        let lod = LodDescriptor::new(0, 300, 5.0);
        assert_eq!(lod.triangle_count(), 100);
    }
}
