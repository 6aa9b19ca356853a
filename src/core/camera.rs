//! Camera input consumed from the frame loop and the uniform update policy.

use glam::{Mat4, Vec3};

use crate::config::DepthConvention;
use crate::core::frustum::Frustum;
use crate::core::types::FrameUniforms;

/// Camera state supplied by the caller every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRig {
    pub projection: Mat4,
    pub view: Mat4,
    pub position: Vec3,
    /// Hold the committed frustum and camera position while the camera moves.
    pub frozen: bool,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self::perspective(60f32.to_radians(), 16.0 / 9.0, 0.1, 512.0)
    }
}

impl CameraRig {
    /// Right-handed perspective with a `[0, 1]` depth range, looking down -Z from the origin.
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
            view: Mat4::IDENTITY,
            position: Vec3::ZERO,
            frozen: false,
        }
    }

    pub fn look_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.view = Mat4::look_at_rh(eye, target, up);
        self.position = eye;
        self
    }

    pub fn with_frozen(mut self, frozen: bool) -> Self {
        self.frozen = frozen;
        self
    }
}

impl FrameUniforms {
    /// Builds uniforms from scratch, ignoring the freeze flag.
    pub fn from_camera(camera: &CameraRig, convention: DepthConvention) -> Self {
        let mut uniforms = Self {
            projection: camera.projection,
            view: camera.view,
            ..Default::default()
        };
        uniforms.commit_frustum(camera, convention);
        uniforms
    }

    /// Applies this frame's camera. Matrices always follow the camera; the
    /// frustum planes and camera position are held while the camera is frozen.
    pub fn update(&mut self, camera: &CameraRig, convention: DepthConvention) {
        self.projection = camera.projection;
        self.view = camera.view;
        if !camera.frozen {
            self.commit_frustum(camera, convention);
        }
    }

    fn commit_frustum(&mut self, camera: &CameraRig, convention: DepthConvention) {
        self.camera_position = camera.position.extend(1.0);
        self.frustum_planes =
            Frustum::from_matrix(camera.projection * camera.view, convention).planes;
    }

    pub fn frustum(&self) -> Frustum {
        Frustum {
            planes: self.frustum_planes,
        }
    }
}
