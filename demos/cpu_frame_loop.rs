//! Runs the two-context frame loop on the host and orbits the camera
//! around a grid of instances, printing per-frame statistics.
//!
//! `RUST_LOG=debug cargo run --example cpu_frame_loop`

use gpu_cull::*;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CullConfig {
        object_grid: 16,
        ..Default::default()
    };
    config.validate()?;

    let lods = LodTable::with_default_distances(&[
        LodRange::new(0, 960),
        LodRange::new(960, 480),
        LodRange::new(1440, 120),
    ])?;
    let scene = Scene::grid(config.object_grid, lods)?;
    let backend = CpuBackend::new(&config, scene, FarPlaneStage::new(config.depth_convention))?;

    let mut camera = CameraRig::default();
    let mut engine = CullingEngine::new(backend, &config, camera).with_frame_budget(8.0);

    for frame in 0..120u32 {
        let angle = frame as f32 * 0.05;
        let eye = Vec3::new(angle.cos() * 30.0, 8.0, angle.sin() * 30.0);
        camera = camera.look_at(eye, Vec3::ZERO, Vec3::Y);
        engine.set_camera(camera);

        // Freeze halfway through to watch the culling from outside.
        if frame == 60 {
            engine.set_frozen(true);
        }

        if let Some(stats) = engine.frame(())? {
            if frame % 20 == 0 {
                println!("frame {frame:3}: {}", stats.format());
            }
        }
    }

    let backend = engine.into_backend();
    log::info!("{} backend, {} objects", backend.name(), backend.object_count());
    backend.last_profile().report();
    Ok(())
}
