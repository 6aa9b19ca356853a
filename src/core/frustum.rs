//! View frustum planes extracted from a view-projection matrix.

use glam::{Mat4, Vec3, Vec4};

use crate::config::DepthConvention;

/// Plane order used in [`Frustum::planes`] and the uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumSide {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
    Near = 4,
    Far = 5,
}

/// Six inward-facing planes (`xyz` normal, `w` distance).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Default for Frustum {
    fn default() -> Self {
        Self {
            planes: [Vec4::ZERO; 6],
        }
    }
}

impl Frustum {
    /// Extracts the planes of `projection * view` for a `[0, 1]` clip depth range.
    pub fn from_matrix(view_projection: Mat4, convention: DepthConvention) -> Self {
        let r0 = view_projection.row(0);
        let r1 = view_projection.row(1);
        let r2 = view_projection.row(2);
        let r3 = view_projection.row(3);

        let (near, far) = match convention {
            DepthConvention::Standard => (r2, r3 - r2),
            DepthConvention::Reversed => (r3 - r2, r2),
        };

        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, near, far].map(normalize_plane);
        Self { planes }
    }

    #[inline]
    pub fn plane(&self, side: FrustumSide) -> Vec4 {
        self.planes[side as usize]
    }

    /// Signed distance of `point` to a plane (positive inside).
    #[inline]
    pub fn signed_distance(plane: Vec4, point: Vec3) -> f32 {
        plane.truncate().dot(point) + plane.w
    }

    /// False only when the sphere lies entirely outside at least one plane.
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|&plane| Self::signed_distance(plane, center) >= -radius)
    }
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.truncate().length();
    // Infinite far planes degenerate to a zero normal; keep them as always-passing.
    if length <= f32::EPSILON {
        Vec4::ZERO
    } else {
        plane / length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera_frustum() -> Frustum {
        let projection = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 512.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_matrix(projection * view, DepthConvention::Standard)
    }

    #[test]
    fn test_planes_are_normalized() {
        let frustum = camera_frustum();
        for plane in frustum.planes {
            assert_relative_eq!(plane.truncate().length(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_sphere_in_front_is_inside() {
        let frustum = camera_frustum();
        assert!(frustum.contains_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
    }

    #[test]
    fn test_sphere_behind_is_outside() {
        let frustum = camera_frustum();
        assert!(!frustum.contains_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
    }

    #[test]
    fn test_near_plane_distance() {
        let frustum = camera_frustum();
        let near = frustum.plane(FrustumSide::Near);
        assert_relative_eq!(
            Frustum::signed_distance(near, Vec3::new(0.0, 0.0, -0.1)),
            0.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_infinite_reversed_far_plane_passes() {
        let projection = Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1);
        let frustum = Frustum::from_matrix(projection, DepthConvention::Reversed);
        assert!(frustum.contains_sphere(Vec3::new(0.0, 0.0, -1.0e6), 1.0));
    }
}
