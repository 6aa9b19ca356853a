use approx::assert_relative_eq;
use gpu_cull::kernel::is_occluded;
use gpu_cull::*;

fn lods() -> LodTable {
    LodTable::with_default_distances(&[
        LodRange::new(0, 960),
        LodRange::new(960, 480),
        LodRange::new(1440, 120),
    ])
    .unwrap()
}

fn camera_at(eye: Vec3, target: Vec3) -> FrameUniforms {
    let camera = CameraRig::default().look_at(eye, target, Vec3::Y);
    FrameUniforms::from_camera(&camera, DepthConvention::Standard)
}

fn run(
    scene: &Scene,
    uniforms: &FrameUniforms,
    pyramid: Option<&DepthPyramid>,
    options: KernelOptions,
) -> (IndirectCommandBuffer, CullStats) {
    let mut commands = IndirectCommandBuffer::new(scene.object_count(), scene.lods().finest());
    let stats = StatsBlock::new();
    let kernel = VisibilityKernel::new(uniforms, scene.lods(), pyramid, options);
    kernel.dispatch(scene.instances(), &mut commands, &stats);
    (commands, CullStats::from_raw(scene.object_count(), &stats.snapshot()))
}

/// Depth image whose every texel holds the NDC depth of a point `distance` in front of the camera.
fn wall(uniforms: &FrameUniforms, distance: f32, size: (u32, u32)) -> DepthImage {
    let eye = uniforms.camera_position();
    let forward = (uniforms.view.inverse().transform_vector3(Vec3::NEG_Z)).normalize();
    let depth = uniforms
        .view_projection()
        .project_point3(eye + forward * distance)
        .z;
    DepthImage::filled(size.0, size.1, depth).unwrap()
}

#[test]
fn visible_count_matches_visible_slots() {
    let scene = Scene::grid(12, lods()).unwrap();
    let uniforms = camera_at(Vec3::new(3.0, 2.0, 8.0), Vec3::ZERO);
    let (commands, stats) = run(&scene, &uniforms, None, KernelOptions::default());

    assert!(stats.visible <= scene.object_count());
    assert_eq!(stats.visible, commands.visible_slot_count());
    assert_eq!(
        stats.visible + stats.occluded + stats.frustum_culled,
        scene.object_count()
    );
    assert!(stats.visible > 0);
    assert!(stats.frustum_culled > 0);
    assert_eq!(stats.lod_counts.iter().sum::<u32>(), stats.visible);
}

#[test]
fn visible_slots_lie_below_draw_extent() {
    let scene = Scene::grid(10, lods()).unwrap();
    let uniforms = camera_at(Vec3::new(-8.0, 0.0, 12.0), Vec3::new(4.0, 0.0, 0.0));
    let (commands, stats) = run(&scene, &uniforms, None, KernelOptions::default());

    for (slot, cmd) in commands.slots().iter().enumerate() {
        assert_eq!(cmd.first_instance, slot as u32);
        if cmd.is_visible() {
            assert!((slot as u32) < stats.draw_extent);
        }
    }
    let executed = commands.resolve_draws(stats.draw_extent, scene.object_count()).count();
    assert_eq!(executed as u32, stats.visible);
}

#[test]
fn objects_outside_the_frustum_are_never_visible() {
    let scene = Scene::grid(10, lods()).unwrap();
    let uniforms = camera_at(Vec3::new(0.0, 0.0, 30.0), Vec3::ZERO);
    let frustum = uniforms.frustum();
    let kernel = VisibilityKernel::new(&uniforms, scene.lods(), None, KernelOptions::default());

    for instance in scene.instances() {
        let decision = kernel.evaluate(instance);
        if !frustum.contains_sphere(instance.position, instance.bounding_radius()) {
            assert_eq!(decision, CullDecision::FrustumCulled);
        } else {
            assert!(decision.is_visible());
        }
    }
}

#[test]
fn object_at_the_camera_is_drawn() {
    let eye = Vec3::new(0.0, 0.0, 10.0);
    let uniforms = camera_at(eye, Vec3::ZERO);
    let scene = Scene::new(vec![ObjectInstance::new(eye, 1.0)], lods()).unwrap();

    let mut pyramid = DepthPyramid::new(64, 64, DepthConvention::Standard).unwrap();
    pyramid.build(&wall(&uniforms, 0.5, (64, 64)));

    let (commands, stats) = run(&scene, &uniforms, Some(&pyramid), KernelOptions::default());
    assert_eq!(stats.visible, 1);
    assert_eq!(stats.lod_counts[0], 1);
    assert!(commands.slots()[0].is_visible());
}

#[test]
fn lod_never_gets_finer_with_distance() {
    let lods = lods();
    let uniforms = camera_at(Vec3::ZERO, Vec3::NEG_Z);
    let kernel = VisibilityKernel::new(&uniforms, &lods, None, KernelOptions::default());

    let mut previous = 0;
    for step in 1..200 {
        let distance = step as f32 * 0.25;
        let instance = ObjectInstance::new(Vec3::new(0.0, 0.0, -distance), 0.1);
        let CullDecision::Visible { lod } = kernel.evaluate(&instance) else {
            panic!("object on the view axis at {distance} was culled");
        };
        assert!(lod >= previous, "LOD went from {previous} to {lod} at {distance}");
        previous = lod;
    }
    assert_eq!(previous, lods.coarsest_index());
}

#[test]
fn lod_threshold_ties_pick_the_finer_level() {
    let lods = lods();
    assert_eq!(lods.select(5.0), 0);
    assert_eq!(lods.select(5.01), 1);
    assert_eq!(lods.select(15.0), 2);
    assert_eq!(lods.select(1.0e6), 2);
}

#[test]
fn wall_hides_what_is_behind_it() {
    let uniforms = camera_at(Vec3::ZERO, Vec3::NEG_Z);
    let mut pyramid = DepthPyramid::new(128, 72, DepthConvention::Standard).unwrap();
    pyramid.build(&wall(&uniforms, 5.0, (128, 72)));
    let vp = uniforms.view_projection();

    assert!(is_occluded(Vec3::new(0.0, 0.0, -50.0), 1.0, vp, &pyramid));
    assert!(!is_occluded(Vec3::new(0.0, 0.0, -2.0), 0.5, vp, &pyramid));
    // Straddles the camera plane.
    assert!(!is_occluded(Vec3::new(0.0, 0.0, -0.5), 1.0, vp, &pyramid));
    // Projects entirely off screen.
    assert!(!is_occluded(Vec3::new(500.0, 0.0, -50.0), 1.0, vp, &pyramid));
}

#[test]
fn occlusion_disabled_skips_the_pyramid() {
    let uniforms = camera_at(Vec3::ZERO, Vec3::NEG_Z);
    let mut pyramid = DepthPyramid::new(64, 64, DepthConvention::Standard).unwrap();
    pyramid.build(&wall(&uniforms, 5.0, (64, 64)));
    let scene = Scene::new(vec![ObjectInstance::new(Vec3::new(0.0, 0.0, -50.0), 1.0)], lods()).unwrap();

    let (_, occluded) = run(&scene, &uniforms, Some(&pyramid), KernelOptions::default());
    assert_eq!(occluded.occluded, 1);

    let options = KernelOptions {
        occlusion_enabled: false,
        ..Default::default()
    };
    let (_, unoccluded) = run(&scene, &uniforms, Some(&pyramid), options);
    assert_eq!(unoccluded.occluded, 0);
    assert_eq!(unoccluded.visible, 1);
}

#[test]
fn reversed_depth_gives_the_same_decisions() {
    let eye = Vec3::new(2.0, 1.0, 20.0);
    let camera = CameraRig {
        projection: Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 512.0, 0.1),
        ..CameraRig::default()
    }
    .look_at(eye, Vec3::ZERO, Vec3::Y);
    let reversed = FrameUniforms::from_camera(&camera, DepthConvention::Reversed);
    let standard = camera_at(eye, Vec3::ZERO);

    let scene = Scene::grid(8, lods()).unwrap();
    let options = KernelOptions {
        convention: DepthConvention::Reversed,
        ..Default::default()
    };
    let (_, a) = run(&scene, &standard, None, KernelOptions::default());
    let (_, b) = run(&scene, &reversed, None, options);
    assert_eq!(a.visible, b.visible);
    assert_eq!(a.lod_counts, b.lod_counts);
}

#[test]
fn repeated_dispatch_resets_statistics() {
    let scene = Scene::grid(6, lods()).unwrap();
    let uniforms = camera_at(Vec3::new(0.0, 0.0, 15.0), Vec3::ZERO);
    let mut commands = IndirectCommandBuffer::new(scene.object_count(), scene.lods().finest());
    let stats = StatsBlock::new();
    let kernel = VisibilityKernel::new(&uniforms, scene.lods(), None, KernelOptions::default());

    kernel.dispatch(scene.instances(), &mut commands, &stats);
    let first = stats.snapshot();
    kernel.dispatch(scene.instances(), &mut commands, &stats);
    assert_eq!(stats.snapshot(), first);
}

#[test]
fn parallel_dispatch_matches_sequential() {
    let scene = Scene::grid(16, lods()).unwrap();
    let uniforms = camera_at(Vec3::new(5.0, 3.0, 20.0), Vec3::ZERO);
    let sequential = KernelOptions {
        parallel: false,
        ..Default::default()
    };
    let parallel = KernelOptions {
        parallel: true,
        ..Default::default()
    };
    let (commands_a, stats_a) = run(&scene, &uniforms, None, sequential);
    let (commands_b, stats_b) = run(&scene, &uniforms, None, parallel);
    assert_eq!(commands_a, commands_b);
    assert_eq!(stats_a, stats_b);
    assert_relative_eq!(stats_a.cull_rate(), stats_b.cull_rate());
}
