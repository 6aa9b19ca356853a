//! Statistics block written by the visibility kernel.
//!
//! The block doubles as the indirect count buffer: the visible-count cell sits
//! at offset 0 and the slot-extent cell (read by the indirect-count draw) at
//! offset 4.

use bytemuck::{Pod, Zeroable};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::MAX_LOD_LEVELS;

/// GPU layout of the statistics block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectStats {
    /// Live number of visible objects.
    pub draw_count: u32,
    /// One past the highest visible slot index; the draw's count source.
    pub draw_extent: u32,
    /// Objects inside the frustum rejected by the Hi-Z test.
    pub occluded: u32,
    /// Objects rejected by the frustum test.
    pub frustum_culled: u32,
    /// Triangles submitted for visible objects, modulo 2^32 like the
    /// shader's `atomicAdd` on the same cell.
    pub primitive_count: u32,
    pub lod_count: [u32; MAX_LOD_LEVELS],
}

/// Byte offset of the visible-count cell.
pub const VISIBLE_COUNT_OFFSET: u64 = std::mem::offset_of!(IndirectStats, draw_count) as u64;

/// Byte offset of the slot-extent cell used as the indirect draw count.
pub const DRAW_EXTENT_OFFSET: u64 = std::mem::offset_of!(IndirectStats, draw_extent) as u64;

/// Host-side statistics block with atomic accumulation.
#[derive(Debug, Default)]
pub struct StatsBlock {
    draw_count: AtomicU32,
    draw_extent: AtomicU32,
    occluded: AtomicU32,
    frustum_culled: AtomicU32,
    primitive_count: AtomicU32,
    lod_count: [AtomicU32; MAX_LOD_LEVELS],
}

impl StatsBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-frame reset point; runs before the kernel dispatch.
    pub fn clear(&self) {
        self.draw_count.store(0, Ordering::Relaxed);
        self.draw_extent.store(0, Ordering::Relaxed);
        self.occluded.store(0, Ordering::Relaxed);
        self.frustum_culled.store(0, Ordering::Relaxed);
        self.primitive_count.store(0, Ordering::Relaxed);
        for cell in &self.lod_count {
            cell.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_visible(&self, slot: u32, lod: usize, triangles: u32) {
        self.draw_count.fetch_add(1, Ordering::Relaxed);
        self.draw_extent.fetch_max(slot + 1, Ordering::Relaxed);
        // Wraps on overflow, matching the device counter.
        self.primitive_count.fetch_add(triangles, Ordering::Relaxed);
        self.lod_count[lod].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_occluded(&self) {
        self.occluded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frustum_culled(&self) {
        self.frustum_culled.fetch_add(1, Ordering::Relaxed);
    }

    /// The visible-count cell.
    pub fn visible_count(&self) -> u32 {
        self.draw_count.load(Ordering::Relaxed)
    }

    /// The cell the indirect-count draw reads.
    pub fn draw_extent(&self) -> u32 {
        self.draw_extent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> IndirectStats {
        IndirectStats {
            draw_count: self.draw_count.load(Ordering::Relaxed),
            draw_extent: self.draw_extent.load(Ordering::Relaxed),
            occluded: self.occluded.load(Ordering::Relaxed),
            frustum_culled: self.frustum_culled.load(Ordering::Relaxed),
            primitive_count: self.primitive_count.load(Ordering::Relaxed),
            lod_count: std::array::from_fn(|i| self.lod_count[i].load(Ordering::Relaxed)),
        }
    }
}

/// Read-only telemetry snapshot, valid once the frame's completion signal was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullStats {
    pub total_objects: u32,
    pub visible: u32,
    pub occluded: u32,
    pub frustum_culled: u32,
    pub visible_primitives: u32,
    pub draw_extent: u32,
    pub lod_counts: [u32; MAX_LOD_LEVELS],
}

impl CullStats {
    pub fn from_raw(total_objects: u32, raw: &IndirectStats) -> Self {
        Self {
            total_objects,
            visible: raw.draw_count,
            occluded: raw.occluded,
            frustum_culled: raw.frustum_culled,
            visible_primitives: raw.primitive_count,
            draw_extent: raw.draw_extent,
            lod_counts: raw.lod_count,
        }
    }

    /// Fraction of objects not drawn.
    pub fn cull_rate(&self) -> f64 {
        if self.total_objects == 0 {
            0.0
        } else {
            1.0 - (self.visible as f64 / self.total_objects as f64)
        }
    }

    /// Format as summary string
    pub fn format(&self) -> String {
        let lods = self
            .lod_counts
            .iter()
            .enumerate()
            .map(|(lod, count)| format!("LOD {lod}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Visible {}/{} ({:.1}% culled, {} occluded, {} outside frustum), {} tris [{}]",
            self.visible,
            self.total_objects,
            self.cull_rate() * 100.0,
            self.occluded,
            self.frustum_culled,
            self.visible_primitives,
            lods
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_cell_offsets() {
        assert_eq!(VISIBLE_COUNT_OFFSET, 0);
        assert_eq!(DRAW_EXTENT_OFFSET, 4);
        assert_eq!(
            std::mem::size_of::<IndirectStats>(),
            (5 + MAX_LOD_LEVELS) * std::mem::size_of::<u32>()
        );
    }

    #[test]
    fn test_accumulate_and_clear() {
        let block = StatsBlock::new();
        block.record_visible(3, 0, 100);
        block.record_visible(9, 2, 10);
        block.record_occluded();
        block.record_frustum_culled();

        let raw = block.snapshot();
        assert_eq!(raw.draw_count, 2);
        assert_eq!(raw.draw_extent, 10);
        assert_eq!(raw.primitive_count, 110);
        assert_eq!(raw.lod_count[2], 1);
        assert_eq!(raw.occluded, 1);

        block.clear();
        assert_eq!(block.snapshot(), IndirectStats::default());
    }

    #[test]
    fn test_primitive_count_wraps_like_device_counter() {
        let block = StatsBlock::new();
        block.record_visible(0, 0, u32::MAX - 5);
        block.record_visible(1, 0, 10);
        assert_eq!(block.snapshot().primitive_count, 4);
        assert_eq!(block.visible_count(), 2);
    }

    #[test]
    fn test_cull_rate() {
        let stats = CullStats {
            total_objects: 100,
            visible: 30,
            ..Default::default()
        };
        assert!((stats.cull_rate() - 0.7).abs() < 0.001);
        assert!(stats.format().contains("30/100"));
    }
}
