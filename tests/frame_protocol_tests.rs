use std::sync::Arc;
use std::time::Duration;

use gpu_cull::sync::TransferHalf;
use gpu_cull::*;
use parking_lot::Mutex;

fn lods() -> LodTable {
    LodTable::with_default_distances(&[
        LodRange::new(0, 960),
        LodRange::new(960, 480),
        LodRange::new(1440, 120),
    ])
    .unwrap()
}

fn config(grid: u32) -> CullConfig {
    CullConfig {
        object_grid: grid,
        viewport: (96, 64),
        ..Default::default()
    }
}

fn looking_at_origin(eye: Vec3) -> CameraRig {
    CameraRig::default().look_at(eye, Vec3::ZERO, Vec3::Y)
}

fn depth_at(camera: &CameraRig, point: Vec3) -> f32 {
    (camera.projection * camera.view).project_point3(point).z
}

fn run_frames<B: CullBackend>(engine: &mut CullingEngine<B>, count: usize) -> Option<CullStats>
where
    B::FrameInput: Default,
{
    let mut last = None;
    for _ in 0..count {
        last = engine.frame(B::FrameInput::default()).unwrap().or(last);
    }
    last
}

#[test]
fn far_plane_depth_occludes_nothing() {
    let config = config(6);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let backend = CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap();
    let mut engine = CullingEngine::new(backend, &config, looking_at_origin(Vec3::new(0.0, 0.0, 40.0)));

    assert_eq!(engine.frame(()).unwrap(), None);
    let stats = run_frames(&mut engine, 3).unwrap();

    assert_eq!(stats.occluded, 0);
    assert_eq!(stats.frustum_culled, 0);
    assert_eq!(stats.visible, 216);
    assert_eq!(stats.total_objects, 216);
    assert_eq!(stats.draw_extent, 216);
}

#[test]
fn single_hidden_instance_is_not_drawn() {
    let config = config(1);
    let camera = looking_at_origin(Vec3::new(0.0, 0.0, 10.0));
    let hidden = ObjectInstance::new(Vec3::new(0.0, 0.0, -40.0), 1.0);
    let scene = Scene::new(vec![hidden], lods()).unwrap();

    // Every frame the render stage writes a wall 5 units in front of the camera.
    let wall = depth_at(&camera, Vec3::new(0.0, 0.0, 5.0));
    let drawn = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&drawn);
    let stage = move |draws: &[DrawIndexedIndirectCommand], _: &[ObjectInstance], depth: &mut DepthImage| {
        recorder.lock().push(draws.len());
        depth.fill(wall);
    };

    let backend = CpuBackend::new(&config, scene, stage).unwrap();
    let mut engine = CullingEngine::new(backend, &config, camera);

    engine.frame(()).unwrap();
    // Frame 1 reads the cleared depth buffer, so the object is still drawn.
    let first = engine.frame(()).unwrap().unwrap();
    assert_eq!(first.visible, 1);

    let second = engine.frame(()).unwrap().unwrap();
    assert_eq!(second.visible, 0);
    assert_eq!(second.occluded, 1);
    assert_eq!(second.draw_extent, 0);
    assert_eq!(drawn.lock()[..2], [1, 0]);
}

#[test]
fn lone_object_beyond_every_threshold_uses_coarsest_lod() {
    let config = config(1);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let backend = CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap();
    let mut engine = CullingEngine::new(backend, &config, looking_at_origin(Vec3::new(0.0, 0.0, 100.0)));

    let stats = run_frames(&mut engine, 2).unwrap();
    assert_eq!(stats.visible, 1);
    assert_eq!(stats.lod_counts[..3], [0, 0, 1]);
    assert_eq!(stats.visible_primitives, 40);
}

#[test]
fn stalled_graphics_context_times_out() {
    let config = CullConfig {
        fence_timeout: Duration::from_millis(20),
        ..config(2)
    };
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let stage = |_: &[DrawIndexedIndirectCommand], _: &[ObjectInstance], _: &mut DepthImage| {
        std::thread::sleep(Duration::from_millis(300));
    };
    let mut backend = CpuBackend::new(&config, scene, stage).unwrap();
    let uniforms = FrameUniforms::from_camera(&CameraRig::default(), DepthConvention::Standard);

    backend.wait_frame_complete(Duration::from_millis(20)).unwrap();
    backend.submit_frame(&uniforms, ()).unwrap();

    let err = backend
        .wait_frame_complete(Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, CullError::DeviceTimeout(_)));
    assert!(err.is_device_fault());
    assert!(matches!(backend.read_stats(), Err(CullError::StatsNotReady)));

    backend.wait_frame_complete(Duration::from_secs(5)).unwrap();
    assert!(backend.read_stats().is_ok());
}

#[test]
fn stats_require_an_observed_fence() {
    let config = config(2);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let mut backend = CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap();
    assert!(matches!(backend.read_stats(), Err(CullError::StatsNotReady)));

    let uniforms = FrameUniforms::from_camera(&CameraRig::default(), DepthConvention::Standard);
    backend.submit_frame(&uniforms, ()).unwrap();
    assert!(matches!(backend.read_stats(), Err(CullError::StatsNotReady)));
    backend.wait_frame_complete(Duration::from_secs(5)).unwrap();
    assert_eq!(backend.read_stats().unwrap().total_objects, 8);
}

#[test]
fn frozen_frustum_keeps_planes_and_position() {
    let config = config(4);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let backend = CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap();
    let mut engine = CullingEngine::new(backend, &config, looking_at_origin(Vec3::new(0.0, 0.0, 20.0)));

    run_frames(&mut engine, 2);
    let planes = engine.uniforms().frustum_planes;
    let visible = engine.stats().unwrap().visible;

    engine.set_frozen(true);
    assert!(engine.is_frozen());
    let away = CameraRig::default().look_at(Vec3::new(0.0, 0.0, 20.0), Vec3::new(0.0, 0.0, 40.0), Vec3::Y);
    engine.set_camera(away);
    let stats = run_frames(&mut engine, 2).unwrap();

    assert_eq!(engine.uniforms().frustum_planes, planes);
    assert_eq!(engine.uniforms().camera_position(), Vec3::new(0.0, 0.0, 20.0));
    assert_eq!(engine.uniforms().view, away.view);
    assert_eq!(stats.visible, visible);

    engine.set_frozen(false);
    let stats = run_frames(&mut engine, 2).unwrap();
    assert_eq!(stats.visible, 0);
}

#[test]
fn timeline_cycles_once_per_frame() {
    let config = config(2);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let backend = CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap();
    let mut engine = CullingEngine::new(backend, &config, looking_at_origin(Vec3::new(0.0, 0.0, 10.0)));

    run_frames(&mut engine, 4);
    engine
        .backend_mut()
        .wait_frame_complete(Duration::from_secs(5))
        .unwrap();
    let timeline = engine.backend().timeline();
    assert_eq!(timeline.state(), FrameState::StatsReadable);
    assert_eq!(timeline.generation(), 3);
}

#[test]
fn every_release_has_a_matching_acquire() {
    let config = config(2);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let mut backend = CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap();
    let uniforms = FrameUniforms::from_camera(&CameraRig::default(), DepthConvention::Standard);
    backend.submit_frame(&uniforms, ()).unwrap();
    backend.wait_frame_complete(Duration::from_secs(5)).unwrap();

    let log = backend.transfer_log();
    for (releases, acquires) in [
        (&log.compute_release, &log.graphics_acquire),
        (&log.graphics_release, &log.compute_acquire),
    ] {
        assert_eq!(releases.len(), 3);
        assert_eq!(acquires.len(), 3);
        for release in releases.iter() {
            assert_eq!(release.half, TransferHalf::Release);
            assert!(
                acquires.iter().any(|acquire| release.pairs_with(acquire)),
                "no acquire for {:?}",
                release.target
            );
        }
    }
}

#[test]
fn shared_queue_family_skips_acquire_halves() {
    let config = config(2);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let mut backend = CpuBackend::with_queue_families(
        &config,
        scene,
        FarPlaneStage::default(),
        QueueFamilies::shared(0),
    )
    .unwrap();
    let uniforms = FrameUniforms::from_camera(&CameraRig::default(), DepthConvention::Standard);
    backend.submit_frame(&uniforms, ()).unwrap();
    backend.wait_frame_complete(Duration::from_secs(5)).unwrap();

    assert!(backend.queue_families().is_shared());
    let log = backend.transfer_log();
    assert!(log.compute_acquire.is_empty());
    assert!(log.graphics_acquire.is_empty());
    assert!(log
        .compute_release
        .iter()
        .all(|barrier| barrier.half == TransferHalf::Full));
}

#[test]
fn lod_table_longer_than_configured_limit_is_rejected() {
    let config = CullConfig {
        max_lod_levels: 2,
        ..config(2)
    };
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let err = CpuBackend::new(&config, scene, FarPlaneStage::default())
        .err()
        .unwrap();
    assert!(matches!(err, CullError::TooManyLods { count: 3, max: 2 }));
    assert!(err.is_configuration());
}

#[test]
fn backends_and_engine_cross_threads() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<CpuBackend>();
    assert_send::<AshBackend>();
    assert_send::<CullingEngine<CpuBackend>>();
    assert_sync::<FrameFence>();
    assert_sync::<FrameTimeline>();
    assert_sync::<StatsBlock>();
}

#[test]
fn profile_reports_the_last_frame() {
    let config = config(3);
    let scene = Scene::grid(config.object_grid, lods()).unwrap();
    let backend = CpuBackend::new(&config, scene, FarPlaneStage::default()).unwrap();
    let mut engine = CullingEngine::new(backend, &config, looking_at_origin(Vec3::new(0.0, 0.0, 15.0)));
    let stats = run_frames(&mut engine, 3).unwrap();

    let profile = engine.backend().last_profile();
    assert_eq!(profile.object_count, 27);
    assert_eq!(profile.visible_count, stats.visible);
    assert_eq!(profile.pyramid_levels, 7);
}
