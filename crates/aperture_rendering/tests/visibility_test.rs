//! # Visibility Integration Tests
//!
//! Frustum soundness and completeness, occlusion aging for objects and
//! lights, query pool overflow, late readbacks and capability fallback,
//! driven through the public API on the headless device.

use std::collections::HashSet;

use aperture_core::{math, Aabb, Entity, GeometryComponent, MaterialComponent, MeshPart};
use aperture_core::{LightComponent, RenderableComponent, Scene};
use aperture_rendering::{
    Camera, DeviceCapabilities, GpuDevice, HeadlessDevice, JobSystem, OcclusionHistory,
    RenderConfig, RenderPath, VisibilityCuller, VisibilityView,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn camera() -> Camera {
    Camera::look_at(
        [0.0, 0.0, 0.0],
        [0.0, 0.0, -1.0],
        [0.0, 1.0, 0.0],
        std::f32::consts::FRAC_PI_2,
        [800, 600],
        0.1,
        100.0,
    )
}

fn cube(center: [f32; 3], half: f32) -> RenderableComponent {
    RenderableComponent::new(Entity::NULL, Aabb::from_center_half_extents(center, [half; 3]))
}

fn cull(scene: &Scene, occlusion: bool) -> HashSet<u32> {
    let jobs = JobSystem::new(4).unwrap();
    let culler = VisibilityCuller::new(&RenderConfig::default());
    let mut view = VisibilityView::new(camera(), 0xFF);
    view.set_occlusion_enabled(occlusion);
    culler.cull(&jobs, scene, OcclusionHistory::NONE, &mut view);
    view.visible_objects().iter().copied().collect()
}

/// Clip-space classification of a box, independent of the plane code.
/// Returns `Some(true)` if every corner is well inside, `Some(false)` if
/// every corner is well outside one clip plane, `None` otherwise.
fn classify(camera: &Camera, aabb: &Aabb) -> Option<bool> {
    const SLACK: f32 = 0.05;
    let clips: Vec<[f32; 4]> = aabb
        .corners()
        .iter()
        .map(|c| math::transform_vec4(&camera.view_projection, [c[0], c[1], c[2], 1.0]))
        .collect();

    let planes: [fn(&[f32; 4]) -> f32; 6] = [
        |c| c[3] + c[0],
        |c| c[3] - c[0],
        |c| c[3] + c[1],
        |c| c[3] - c[1],
        |c| c[2],
        |c| c[3] - c[2],
    ];
    if planes.iter().any(|p| clips.iter().all(|c| p(c) < -SLACK)) {
        return Some(false);
    }
    if planes.iter().all(|p| clips.iter().all(|c| p(c) > SLACK)) {
        return Some(true);
    }
    None
}

/// Test: 100 boxes outside and 10 inside, occlusion off, gives exactly the 10.
#[test]
fn test_hundred_outside_ten_inside() {
    let mut scene = Scene::new();
    let mut inside = HashSet::new();
    for i in 0..110u32 {
        let f = i as f32;
        if i % 11 == 5 {
            let index = scene.renderables.len() as u32;
            scene.add_renderable(cube([(f % 7.0) - 3.0, 0.0, -20.0 - f * 0.5], 0.5));
            inside.insert(index);
        } else {
            // Behind the camera.
            scene.add_renderable(cube([f - 50.0, 0.0, 10.0 + f], 0.5));
        }
    }
    assert_eq!(inside.len(), 10);
    assert_eq!(cull(&scene, false), inside);
}

/// Test: seeded random boxes are never wrongly kept or wrongly dropped.
#[test]
fn test_random_soundness_and_completeness() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x00A9_E7u64);
    let camera = camera();
    let mut scene = Scene::new();
    for _ in 0..5_000 {
        let center = [
            rng.gen_range(-80.0..80.0),
            rng.gen_range(-80.0..80.0),
            rng.gen_range(-130.0..40.0),
        ];
        scene.add_renderable(cube(center, rng.gen_range(0.1..3.0)));
    }

    let visible = cull(&scene, false);
    let (mut checked_in, mut checked_out) = (0, 0);
    for (i, renderable) in scene.renderables.as_slice().iter().enumerate() {
        match classify(&camera, &renderable.aabb) {
            Some(true) => {
                assert!(visible.contains(&(i as u32)), "inside box {i} missing");
                checked_in += 1;
            }
            Some(false) => {
                assert!(!visible.contains(&(i as u32)), "outside box {i} kept");
                checked_out += 1;
            }
            None => {}
        }
    }
    assert!(checked_in > 100, "only {checked_in} inside samples");
    assert!(checked_out > 1_000, "only {checked_out} outside samples");
}

/// Test: repeated runs produce the same set.
#[test]
fn test_set_idempotence() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut scene = Scene::new();
    for _ in 0..2_000 {
        let center = [
            rng.gen_range(-50.0..50.0),
            rng.gen_range(-50.0..50.0),
            rng.gen_range(-110.0..10.0),
        ];
        scene.add_renderable(cube(center, 1.0));
    }
    let first = cull(&scene, false);
    for _ in 0..5 {
        assert_eq!(cull(&scene, false), first);
    }
}

fn occlusion_scene() -> Scene {
    let mut scene = Scene::new();
    let material = scene.add_material(MaterialComponent::default());
    let geometry = scene.add_geometry(GeometryComponent::new(
        0,
        1,
        vec![MeshPart {
            material,
            index_offset: 0,
            index_count: 36,
            vertex_offset: 0,
            lod: 0,
        }],
    ));
    let mut object = cube([0.0, 0.0, -10.0], 1.0);
    object.geometry = geometry;
    scene.add_renderable(object);
    scene
}

fn path(device: &dyn GpuDevice) -> RenderPath {
    let config = RenderConfig {
        frames_in_flight: 2,
        worker_threads: 2,
        ..RenderConfig::default()
    };
    RenderPath::new(device, config).unwrap()
}

/// Test: 32 failed queries exclude the object from frame 33, and it comes
/// back once its queries pass again.
#[test]
fn test_occlusion_aging_and_recovery() {
    let device = HeadlessDevice::new();
    device.set_visibility_oracle(|_| false);
    let scene = occlusion_scene();
    let mut path = path(&device);
    let mut view = VisibilityView::new(camera(), 0xFF);

    for frame in 0..=32 {
        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        assert_eq!(output.visible_objects, vec![0], "hidden too early at frame {frame}");
    }

    let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
    assert_eq!(output.frame, 33);
    assert!(output.visible_objects.is_empty());
    assert_eq!(output.stats.occlusion_culled, 1);
    // Still queried while hidden.
    assert_eq!(output.stats.queries_issued, 1);

    device.set_visibility_oracle(|_| true);
    for _ in 34..=35 {
        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        assert!(output.visible_objects.is_empty());
    }
    let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
    assert_eq!(output.frame, 36);
    assert_eq!(output.visible_objects, vec![0]);
}

/// Test: an object containing the eye is never occlusion culled.
#[test]
fn test_eye_inside_never_occluded() {
    let device = HeadlessDevice::new();
    device.set_visibility_oracle(|_| false);
    let mut scene = occlusion_scene();
    scene.renderables.as_mut_slice()[0].aabb = Aabb::new([-5.0; 3], [5.0; 3]);
    let mut path = path(&device);
    let mut view = VisibilityView::new(camera(), 0xFF);

    for _ in 0..40 {
        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        assert_eq!(output.visible_objects, vec![0]);
        assert_eq!(output.stats.queries_issued, 0);
    }
}

/// Test: without query hardware culling is frustum only and nothing is issued.
#[test]
fn test_missing_query_support_degrades() {
    let device = HeadlessDevice::new().with_capabilities(DeviceCapabilities {
        occlusion_queries: false,
        predication: false,
    });
    device.set_visibility_oracle(|_| false);
    let scene = occlusion_scene();
    let mut path = path(&device);
    let mut view = VisibilityView::new(camera(), 0xFF);

    for _ in 0..40 {
        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        assert_eq!(output.visible_objects, vec![0]);
        assert_eq!(output.descriptors.predication, None);
    }
    assert!(!path.occlusion().is_enabled());
    assert_eq!(device.counters().queries_issued, 0);
    assert_eq!(device.counters().pool_resets, 0);
}

/// Test: with predication, every resolve also fills the predication buffer.
#[test]
fn test_predication_resolves_twice() {
    let device = HeadlessDevice::new().with_capabilities(DeviceCapabilities {
        occlusion_queries: true,
        predication: true,
    });
    let scene = occlusion_scene();
    let mut path = path(&device);
    let mut view = VisibilityView::new(camera(), 0xFF);

    let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
    assert!(output.descriptors.predication.is_some());
    assert_eq!(device.counters().resolves, 2);
    assert_eq!(device.counters().pool_resets, 1);
}

/// Test: removed entities drop out of the occlusion state at the next frame.
#[test]
fn test_removed_entities_are_pruned() {
    let device = HeadlessDevice::new();
    let mut scene = occlusion_scene();
    let extra = scene.add_renderable(cube([3.0, 0.0, -10.0], 1.0));
    let mut path = path(&device);
    let mut view = VisibilityView::new(camera(), 0xFF);

    path.render_frame(&device, &scene, &mut view, None).unwrap();
    assert_eq!(path.occlusion().tracked_objects(), 2);
    scene.destroy_entity(extra);
    let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
    assert_eq!(path.occlusion().tracked_objects(), 1);
    assert_eq!(output.visible_objects, vec![0]);
    assert!(path.occlusion().result(extra).is_none());
}

/// Test: point lights age out like objects; directional lights never do.
#[test]
fn test_light_occlusion_aging() {
    let device = HeadlessDevice::new();
    device.set_visibility_oracle(|_| false);
    let mut scene = Scene::new();
    scene.add_light(LightComponent::point([0.0, 0.0, -10.0], [1.0; 3], 1.0, 1.0));
    scene.add_light(LightComponent::directional([0.0, -1.0, 0.0], [1.0; 3], 1.0));
    let mut path = path(&device);
    let mut view = VisibilityView::new(camera(), 0xFF);

    for frame in 0..=32 {
        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        let mut lights = output.visible_lights.clone();
        lights.sort_unstable();
        assert_eq!(lights, vec![0, 1], "light hidden too early at frame {frame}");
        assert_eq!(output.stats.queries_issued, 1);
    }

    let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
    assert_eq!(output.frame, 33);
    assert_eq!(output.visible_lights, vec![1]);
    assert_eq!(output.stats.queries_issued, 1);
}

/// Test: candidates beyond the pool capacity get no query and stay visible.
#[test]
fn test_query_pool_overflow_keeps_candidates_visible() {
    let device = HeadlessDevice::new();
    device.set_visibility_oracle(|_| false);
    let mut scene = occlusion_scene();
    let geometry = scene.renderables.as_slice()[0].geometry;
    for x in [3.0, -3.0] {
        let mut object = cube([x, 0.0, -10.0], 1.0);
        object.geometry = geometry;
        scene.add_renderable(object);
    }
    let config = RenderConfig {
        frames_in_flight: 2,
        worker_threads: 2,
        max_occlusion_queries: 1,
        ..RenderConfig::default()
    };
    let mut path = RenderPath::new(&device, config).unwrap();
    let mut view = VisibilityView::new(camera(), 0xFF);

    let mut last = None;
    for _ in 0..60 {
        last = Some(path.render_frame(&device, &scene, &mut view, None).unwrap());
    }
    let output = last.unwrap();
    let mut visible = output.visible_objects.clone();
    visible.sort_unstable();
    assert_eq!(visible, vec![1, 2]);
    assert_eq!(output.stats.queries_issued, 1);
    assert_eq!(output.stats.queries_dropped, 2);
    assert_eq!(output.stats.occlusion_culled, 1);
}

/// Test: results that have not landed read as visible, and aging resumes
/// from a full history once readbacks catch up.
#[test]
fn test_late_readbacks_count_as_visible() {
    let device = HeadlessDevice::new();
    device.set_visibility_oracle(|_| false);
    device.set_readback_ready(false);
    let scene = occlusion_scene();
    let mut path = path(&device);
    let mut view = VisibilityView::new(camera(), 0xFF);

    for _ in 0..40 {
        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        assert_eq!(output.visible_objects, vec![0]);
    }
    assert_eq!(path.occlusion().stats().readbacks_missed, 38);
    assert_eq!(device.counters().readbacks_missed, 38);
    assert_eq!(device.counters().submits, 40);

    device.set_readback_ready(true);
    for frame in 40..71 {
        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        assert_eq!(output.visible_objects, vec![0], "hidden too early at frame {frame}");
    }
    let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
    assert_eq!(output.frame, 71);
    assert!(output.visible_objects.is_empty());
}
