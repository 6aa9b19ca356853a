//! Places a wall of depth in front of the camera and reports which
//! instances the Hi-Z test hides.

use gpu_cull::kernel::is_occluded;
use gpu_cull::*;

fn main() -> Result<()> {
    env_logger::init();

    let convention = DepthConvention::Standard;
    let (width, height) = (320, 180);
    let camera = CameraRig::default().look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
    let uniforms = FrameUniforms::from_camera(&camera, convention);
    let view_projection = uniforms.view_projection();

    // Occluder covering the left half of the screen, 4 units from the camera.
    let wall = view_projection.project_point3(Vec3::new(0.0, 0.0, 6.0)).z;
    let mut depth = DepthImage::cleared(width, height, convention)?;
    depth.fill_rect(0, 0, width / 2, height, wall);

    let mut pyramid = DepthPyramid::new(width, height, convention)?;
    pyramid.build(&depth);
    println!(
        "pyramid: {} levels over a {}x{} base",
        pyramid.level_count(),
        pyramid.base_size().0,
        pyramid.base_size().1
    );

    for x in [-6.0f32, -2.0, 0.0, 2.0, 6.0] {
        for z in [8.0f32, 0.0, -20.0] {
            let center = Vec3::new(x, 0.0, z);
            let hidden = is_occluded(center, 0.5, view_projection, &pyramid);
            println!("object at ({x:5.1}, 0.0, {z:5.1}) -> {}", if hidden { "occluded" } else { "visible" });
        }
    }
    Ok(())
}
