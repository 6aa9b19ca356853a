//! Hierarchical depth (Hi-Z) pyramid.
//!
//! Each level stores the farthest depth of its source footprint, so a coarse
//! lookup can only overestimate the distance to the nearest occluder and never
//! culls something that is actually visible.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use glam::Vec2;

use crate::config::DepthConvention;
use crate::pyramid::depth::DepthImage;
use crate::{CullError, Result};

/// One mip level of the pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLevel {
    width: u32,
    height: u32,
    texels: Vec<f32>,
}

impl PyramidLevel {
    fn new(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            texels: vec![value; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.texels[y as usize * self.width as usize + x as usize]
    }

    pub fn texels(&self) -> &[f32] {
        &self.texels
    }
}

/// Number of levels for a viewport: `ceil(log2(max(width, height)))`, at least one.
pub fn level_count(width: u32, height: u32) -> u32 {
    let extent = width.max(height);
    if extent <= 1 {
        1
    } else {
        32 - (extent - 1).leading_zeros()
    }
}

/// Max-reduced depth mip chain rebuilt in place every frame.
#[derive(Debug, Clone)]
pub struct DepthPyramid {
    source_width: u32,
    source_height: u32,
    convention: DepthConvention,
    levels: Vec<PyramidLevel>,
}

impl DepthPyramid {
    /// Sizes the chain for a viewport. A zero-sized viewport is a configuration error.
    pub fn new(width: u32, height: u32, convention: DepthConvention) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CullError::InvalidViewport { width, height });
        }

        let base_width = width.next_power_of_two();
        let base_height = height.next_power_of_two();
        let count = level_count(width, height);
        let far = convention.far_value();

        let levels = (0..count)
            .map(|level| {
                PyramidLevel::new(
                    (base_width >> level).max(1),
                    (base_height >> level).max(1),
                    far,
                )
            })
            .collect();

        log::debug!(
            "Depth pyramid sized for {width}x{height}: base {base_width}x{base_height}, {count} levels"
        );

        Ok(Self {
            source_width: width,
            source_height: height,
            convention,
            levels,
        })
    }

    /// Rebuilds every level from `depth`, level by level.
    pub fn build(&mut self, depth: &DepthImage) {
        self.build_with(depth, cfg!(feature = "parallel"));
    }

    pub fn build_with(&mut self, depth: &DepthImage, parallel: bool) {
        if depth.width() != self.source_width || depth.height() != self.source_height {
            log::warn!(
                "Depth image {}x{} does not match pyramid source {}x{}; remapping",
                depth.width(),
                depth.height(),
                self.source_width,
                self.source_height
            );
        }

        let convention = self.convention;
        remap_base(&mut self.levels[0], depth, convention, parallel);

        for level in 1..self.levels.len() {
            let (built, pending) = self.levels.split_at_mut(level);
            reduce_level(&built[level - 1], &mut pending[0], convention, parallel);
        }
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> &PyramidLevel {
        &self.levels[index]
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn convention(&self) -> DepthConvention {
        self.convention
    }

    /// Resolution of level 0.
    pub fn base_size(&self) -> (u32, u32) {
        (self.levels[0].width, self.levels[0].height)
    }

    pub fn source_size(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    /// Level whose texel covers a footprint of `extent` base texels; rounds toward coarser.
    pub fn level_for_extent(&self, extent: f32) -> usize {
        if extent <= 1.0 {
            return 0;
        }
        let level = extent.log2().ceil() as usize;
        level.min(self.levels.len() - 1)
    }

    /// Farthest depth among the texels of `level` overlapping the uv rectangle.
    pub fn sample_farthest(&self, level: usize, uv_min: Vec2, uv_max: Vec2) -> f32 {
        let level = &self.levels[level.min(self.levels.len() - 1)];
        let to_texel = |uv: f32, size: u32| -> u32 {
            ((uv.clamp(0.0, 1.0) * size as f32).floor() as u32).min(size - 1)
        };

        let x0 = to_texel(uv_min.x, level.width);
        let x1 = to_texel(uv_max.x, level.width).max(x0);
        let y0 = to_texel(uv_min.y, level.height);
        let y1 = to_texel(uv_max.y, level.height).max(y0);

        let mut farthest = level.get(x0, y0);
        for y in y0..=y1 {
            for x in x0..=x1 {
                farthest = self.convention.farthest(farthest, level.get(x, y));
            }
        }
        farthest
    }
}

/// Level 0: each base texel takes the farthest source texel overlapping it.
fn remap_base(base: &mut PyramidLevel, depth: &DepthImage, convention: DepthConvention, parallel: bool) {
    let (src_w, src_h) = (depth.width() as u64, depth.height() as u64);
    let (dst_w, dst_h) = (base.width as u64, base.height as u64);

    // Source span [first, last] covered by destination texel `i`.
    let span = |i: u64, src: u64, dst: u64| -> (u32, u32) {
        let first = (i * src / dst).min(src - 1);
        let last = ((i + 1) * src).div_ceil(dst).saturating_sub(1).clamp(first, src - 1);
        (first as u32, last as u32)
    };

    let width = base.width as usize;
    for_each_row(&mut base.texels, width, parallel, |y, row| {
        let (sy0, sy1) = span(y as u64, src_h, dst_h);
        for (x, texel) in row.iter_mut().enumerate() {
            let (sx0, sx1) = span(x as u64, src_w, dst_w);
            let mut farthest = depth.get(sx0, sy0);
            for sy in sy0..=sy1 {
                for sx in sx0..=sx1 {
                    farthest = convention.farthest(farthest, depth.get(sx, sy));
                }
            }
            *texel = farthest;
        }
    });
}

/// Level k: farthest of the 2x2 parent block, clamped at the parent's edges.
fn reduce_level(parent: &PyramidLevel, child: &mut PyramidLevel, convention: DepthConvention, parallel: bool) {
    let max_x = parent.width - 1;
    let max_y = parent.height - 1;
    let width = child.width as usize;

    for_each_row(&mut child.texels, width, parallel, |y, row| {
        let py0 = (2 * y as u32).min(max_y);
        let py1 = (2 * y as u32 + 1).min(max_y);
        for (x, texel) in row.iter_mut().enumerate() {
            let px0 = (2 * x as u32).min(max_x);
            let px1 = (2 * x as u32 + 1).min(max_x);
            let top = convention.farthest(parent.get(px0, py0), parent.get(px1, py0));
            let bottom = convention.farthest(parent.get(px0, py1), parent.get(px1, py1));
            *texel = convention.farthest(top, bottom);
        }
    });
}

/// One work item per output row; rows of a level never alias.
fn for_each_row<F>(texels: &mut [f32], width: usize, parallel: bool, f: F)
where
    F: Fn(usize, &mut [f32]) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    if parallel {
        texels
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| f(y, row));
        return;
    }

    let _ = parallel;
    texels
        .chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| f(y, row));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_count() {
        assert_eq!(level_count(1, 1), 1);
        assert_eq!(level_count(2, 1), 1);
        assert_eq!(level_count(1024, 768), 10);
        assert_eq!(level_count(1280, 720), 11);
        assert_eq!(level_count(1000, 3), 10);
    }

    #[test]
    fn test_zero_viewport_is_rejected() {
        assert!(matches!(
            DepthPyramid::new(0, 16, DepthConvention::Standard),
            Err(CullError::InvalidViewport { .. })
        ));
    }

    #[test]
    fn test_base_rounds_up_to_power_of_two() {
        let pyramid = DepthPyramid::new(1280, 720, DepthConvention::Standard).unwrap();
        assert_eq!(pyramid.base_size(), (2048, 1024));
        assert_eq!(pyramid.level(1).width(), 1024);
        assert_eq!(pyramid.level(10).height(), 1);
    }

    #[test]
    fn test_reduction_takes_maximum() {
        let depth = DepthImage::from_fn(4, 4, |x, y| (x + y * 4) as f32 / 16.0).unwrap();
        let mut pyramid = DepthPyramid::new(4, 4, DepthConvention::Standard).unwrap();
        pyramid.build_with(&depth, false);
        assert_eq!(pyramid.level_count(), 2);
        assert_eq!(pyramid.level(1).get(0, 0), 5.0 / 16.0);
        assert_eq!(pyramid.level(1).get(1, 1), 15.0 / 16.0);
    }

    #[test]
    fn test_reversed_reduction_takes_minimum() {
        let depth = DepthImage::from_fn(2, 2, |x, y| 0.1 + (x + y) as f32 * 0.2).unwrap();
        let mut pyramid = DepthPyramid::new(2, 2, DepthConvention::Reversed).unwrap();
        pyramid.build_with(&depth, false);
        assert_eq!(pyramid.level_count(), 1);
        assert_eq!(pyramid.sample_farthest(0, Vec2::ZERO, Vec2::ONE), 0.1);
    }

    #[test]
    fn test_level_for_extent_rounds_coarser() {
        let pyramid = DepthPyramid::new(256, 256, DepthConvention::Standard).unwrap();
        assert_eq!(pyramid.level_for_extent(0.5), 0);
        assert_eq!(pyramid.level_for_extent(2.0), 1);
        assert_eq!(pyramid.level_for_extent(2.1), 2);
        assert_eq!(pyramid.level_for_extent(10_000.0), 7);
    }
}
