use crate::config::DepthConvention;
use crate::{CullError, Result};

/// Single-channel depth image as produced by the draw stage.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    width: u32,
    height: u32,
    texels: Vec<f32>,
}

impl DepthImage {
    /// Creates an image with every texel at `value`.
    pub fn filled(width: u32, height: u32, value: f32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CullError::InvalidViewport { width, height });
        }
        Ok(Self {
            width,
            height,
            texels: vec![value; width as usize * height as usize],
        })
    }

    /// Creates a cleared image (every texel on the far plane).
    pub fn cleared(width: u32, height: u32, convention: DepthConvention) -> Result<Self> {
        Self::filled(width, height, convention.far_value())
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Result<Self> {
        let mut image = Self::filled(width, height, 0.0)?;
        for y in 0..height {
            for x in 0..width {
                image.set(x, y, f(x, y));
            }
        }
        Ok(image)
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

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        self.texels[y as usize * self.width as usize + x as usize] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.texels.fill(value);
    }

    /// Writes `value` into the clamped rectangle `[x0, x1) x [y0, y1)`.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, value: f32) {
        for y in y0.min(self.height)..y1.min(self.height) {
            for x in x0.min(self.width)..x1.min(self.width) {
                self.set(x, y, value);
            }
        }
    }

    pub fn texels(&self) -> &[f32] {
        &self.texels
    }

    /// Copies another image of identical size into this one.
    pub fn copy_from(&mut self, other: &DepthImage) {
        if self.width == other.width && self.height == other.height {
            self.texels.copy_from_slice(&other.texels);
        } else {
            log::warn!(
                "Depth copy size mismatch: {}x{} <- {}x{}",
                self.width,
                self.height,
                other.width,
                other.height
            );
        }
    }
}
