//! Scene data model: instances, LOD table, camera input and frustum planes.

pub mod camera;
pub mod frustum;
pub mod lod;
pub mod scene;
pub mod types;

pub use camera::CameraRig;
pub use frustum::{Frustum, FrustumSide};
pub use lod::{LodRange, LodTable};
pub use scene::Scene;
pub use types::{FrameUniforms, LodDescriptor, ObjectInstance};
