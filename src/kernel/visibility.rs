//! Per-object visibility and LOD kernel.
//!
//! Each object is one work item: frustum test, Hi-Z occlusion test, distance
//! LOD selection, then a write into the object's own command slot plus atomic
//! statistics updates. Slots are exclusive per work item, so the only shared
//! writes are the atomic cells of the [`StatsBlock`].

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use glam::{Mat4, Vec2, Vec3};

use crate::config::DepthConvention;
use crate::core::frustum::Frustum;
use crate::core::lod::LodTable;
use crate::core::types::{FrameUniforms, ObjectInstance};
use crate::indirect::{DrawIndexedIndirectCommand, IndirectCommandBuffer, StatsBlock};
use crate::pyramid::DepthPyramid;

/// Outcome for a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullDecision {
    FrustumCulled,
    Occluded,
    Visible { lod: usize },
}

impl CullDecision {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Visible { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelOptions {
    pub convention: DepthConvention,
    pub occlusion_enabled: bool,
    pub parallel: bool,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            convention: DepthConvention::Standard,
            occlusion_enabled: true,
            parallel: cfg!(feature = "parallel"),
        }
    }
}

/// One frame's kernel invocation: uniforms, LOD table and the pyramid it reads.
pub struct VisibilityKernel<'a> {
    frustum: Frustum,
    view_projection: Mat4,
    camera_position: Vec3,
    lods: &'a LodTable,
    pyramid: Option<&'a DepthPyramid>,
    options: KernelOptions,
}

impl<'a> VisibilityKernel<'a> {
    pub fn new(
        uniforms: &FrameUniforms,
        lods: &'a LodTable,
        pyramid: Option<&'a DepthPyramid>,
        options: KernelOptions,
    ) -> Self {
        Self {
            frustum: uniforms.frustum(),
            view_projection: uniforms.view_projection(),
            camera_position: uniforms.camera_position(),
            lods,
            pyramid,
            options,
        }
    }

    /// Frustum test, occlusion test and LOD selection for one object.
    pub fn evaluate(&self, instance: &ObjectInstance) -> CullDecision {
        let center = instance.position;
        let radius = instance.bounding_radius();

        if !self.frustum.contains_sphere(center, radius) {
            return CullDecision::FrustumCulled;
        }

        if self.options.occlusion_enabled {
            if let Some(pyramid) = self.pyramid {
                if is_occluded(center, radius, self.view_projection, pyramid) {
                    return CullDecision::Occluded;
                }
            }
        }

        let distance = center.distance(self.camera_position);
        CullDecision::Visible {
            lod: self.lods.select(distance),
        }
    }

    /// Clears `stats`, then rewrites every command slot from its object.
    pub fn dispatch(
        &self,
        instances: &[ObjectInstance],
        commands: &mut IndirectCommandBuffer,
        stats: &StatsBlock,
    ) {
        debug_assert_eq!(instances.len(), commands.len());
        stats.clear();

        let slots = commands.slots_mut();

        #[cfg(feature = "parallel")]
        if self.options.parallel {
            slots
                .par_iter_mut()
                .zip(instances.par_iter())
                .enumerate()
                .for_each(|(slot, (cmd, instance))| self.emit(slot as u32, cmd, instance, stats));
            return;
        }

        slots
            .iter_mut()
            .zip(instances.iter())
            .enumerate()
            .for_each(|(slot, (cmd, instance))| self.emit(slot as u32, cmd, instance, stats));
    }

    #[inline]
    fn emit(
        &self,
        slot: u32,
        cmd: &mut DrawIndexedIndirectCommand,
        instance: &ObjectInstance,
        stats: &StatsBlock,
    ) {
        match self.evaluate(instance) {
            CullDecision::Visible { lod } => {
                let descriptor = self.lods.level(lod);
                *cmd = DrawIndexedIndirectCommand::visible(slot, descriptor);
                stats.record_visible(slot, lod, descriptor.triangle_count());
            }
            CullDecision::Occluded => {
                *cmd = DrawIndexedIndirectCommand::culled(slot, self.lods.finest());
                stats.record_occluded();
            }
            CullDecision::FrustumCulled => {
                *cmd = DrawIndexedIndirectCommand::culled(slot, self.lods.finest());
                stats.record_frustum_culled();
            }
        }
    }
}

/// Hi-Z test of a bounding sphere. Objects straddling the camera plane are never occluded.
pub fn is_occluded(center: Vec3, radius: f32, view_projection: Mat4, pyramid: &DepthPyramid) -> bool {
    let convention = pyramid.convention();
    let mut uv_min = Vec2::splat(f32::MAX);
    let mut uv_max = Vec2::splat(f32::MIN);
    let mut nearest = match convention {
        DepthConvention::Standard => f32::INFINITY,
        DepthConvention::Reversed => f32::NEG_INFINITY,
    };

    for corner in 0..8u32 {
        let offset = Vec3::new(
            if corner & 1 == 0 { -radius } else { radius },
            if corner & 2 == 0 { -radius } else { radius },
            if corner & 4 == 0 { -radius } else { radius },
        );
        let clip = view_projection * (center + offset).extend(1.0);
        if clip.w <= f32::EPSILON {
            return false;
        }
        let ndc = clip.truncate() / clip.w;
        let uv = Vec2::new(ndc.x, ndc.y) * 0.5 + Vec2::splat(0.5);
        uv_min = uv_min.min(uv);
        uv_max = uv_max.max(uv);
        nearest = convention.nearest(nearest, ndc.z);
    }

    if uv_max.x < 0.0 || uv_max.y < 0.0 || uv_min.x > 1.0 || uv_min.y > 1.0 {
        return false;
    }

    let (base_width, base_height) = pyramid.base_size();
    let footprint = uv_max - uv_min;
    let extent = (footprint.x * base_width as f32).max(footprint.y * base_height as f32);
    let level = pyramid.level_for_extent(extent);
    let occluder = pyramid.sample_farthest(level, uv_min, uv_max);

    convention.is_behind(nearest, occluder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::camera::CameraRig;
    use crate::core::lod::LodRange;
    use crate::pyramid::DepthImage;

    fn lods() -> LodTable {
        LodTable::with_default_distances(&[
            LodRange::new(0, 300),
            LodRange::new(300, 150),
            LodRange::new(450, 30),
        ])
        .unwrap()
    }

    fn uniforms() -> FrameUniforms {
        let camera = CameraRig::default().look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        FrameUniforms::from_camera(&camera, DepthConvention::Standard)
    }

    #[test]
    fn test_behind_camera_is_frustum_culled() {
        let lods = lods();
        let uniforms = uniforms();
        let kernel = VisibilityKernel::new(&uniforms, &lods, None, KernelOptions::default());
        let decision = kernel.evaluate(&ObjectInstance::new(Vec3::new(0.0, 0.0, 20.0), 1.0));
        assert_eq!(decision, CullDecision::FrustumCulled);
    }

    #[test]
    fn test_lod_by_distance() {
        let lods = lods();
        let uniforms = uniforms();
        let kernel = VisibilityKernel::new(&uniforms, &lods, None, KernelOptions::default());
        let near = kernel.evaluate(&ObjectInstance::new(Vec3::new(0.0, 0.0, -3.0), 1.0));
        let mid = kernel.evaluate(&ObjectInstance::new(Vec3::new(0.0, 0.0, -8.0), 1.0));
        let far = kernel.evaluate(&ObjectInstance::new(Vec3::new(0.0, 0.0, -100.0), 1.0));
        assert_eq!(near, CullDecision::Visible { lod: 0 });
        assert_eq!(mid, CullDecision::Visible { lod: 1 });
        assert_eq!(far, CullDecision::Visible { lod: 2 });
    }

    #[test]
    fn test_near_occluder_hides_object() {
        let lods = lods();
        let uniforms = uniforms();
        let depth = DepthImage::filled(64, 64, 0.0).unwrap();
        let mut pyramid = DepthPyramid::new(64, 64, DepthConvention::Standard).unwrap();
        pyramid.build_with(&depth, false);

        let kernel =
            VisibilityKernel::new(&uniforms, &lods, Some(&pyramid), KernelOptions::default());
        let decision = kernel.evaluate(&ObjectInstance::new(Vec3::new(0.0, 0.0, -10.0), 1.0));
        assert_eq!(decision, CullDecision::Occluded);
    }

    #[test]
    fn test_object_around_camera_is_not_occluded() {
        let lods = lods();
        let uniforms = uniforms();
        let depth = DepthImage::filled(64, 64, 0.0).unwrap();
        let mut pyramid = DepthPyramid::new(64, 64, DepthConvention::Standard).unwrap();
        pyramid.build_with(&depth, false);

        let kernel =
            VisibilityKernel::new(&uniforms, &lods, Some(&pyramid), KernelOptions::default());
        let decision = kernel.evaluate(&ObjectInstance::new(Vec3::ZERO, 2.0));
        assert_eq!(decision, CullDecision::Visible { lod: 0 });
    }
}
