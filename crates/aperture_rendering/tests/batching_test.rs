//! # Batching Integration Tests
//!
//! Draw order per pass, instance merging and the dithered double-sided
//! transparent split.

use aperture_core::{
    Aabb, BlendMode, Entity, GeometryComponent, MaterialComponent, MeshPart, RenderableComponent,
    Scene,
};
use aperture_rendering::{
    Camera, CullMode, HeadlessDevice, RenderConfig, RenderPass, RenderPath, VisibilityView,
};

fn view() -> VisibilityView {
    let mut view = VisibilityView::new(
        Camera::look_at(
            [0.0, 0.0, 0.0],
            [0.0, 0.0, -1.0],
            [0.0, 1.0, 0.0],
            std::f32::consts::FRAC_PI_2,
            [1280, 720],
            0.1,
            1000.0,
        ),
        0xFF,
    );
    view.set_occlusion_enabled(false);
    view
}

fn add_geometry(scene: &mut Scene, material: Entity) -> Entity {
    scene.add_geometry(GeometryComponent::new(
        0,
        1,
        vec![MeshPart {
            material,
            index_offset: 0,
            index_count: 36,
            vertex_offset: 0,
            lod: 0,
        }],
    ))
}

fn at(geometry: Entity, z: f32) -> RenderableComponent {
    RenderableComponent::new(geometry, Aabb::from_center_half_extents([0.0, 0.0, z], [0.5; 3]))
}

fn render(scene: &Scene) -> aperture_rendering::FrameOutput {
    let device = HeadlessDevice::new();
    let config = RenderConfig {
        worker_threads: 2,
        occlusion_culling: false,
        ..RenderConfig::default()
    };
    let mut path = RenderPath::new(&device, config).unwrap();
    path.render_frame(&device, scene, &mut view(), None).unwrap()
}

/// Test: opaque draws go front to back.
#[test]
fn test_opaque_front_to_back() {
    let mut scene = Scene::new();
    let material = scene.add_material(MaterialComponent::default());
    let depths = [40.0, 5.0, 300.0, 12.0, 80.0];
    for depth in depths {
        let geometry = add_geometry(&mut scene, material);
        scene.add_renderable(at(geometry, -depth));
    }

    let output = render(&scene);
    let order: Vec<u32> = output.opaque_draws.iter().map(|d| d.geometry).collect();
    // Geometry i sits at depths[i].
    assert_eq!(order, vec![1, 3, 0, 4, 2]);
    assert!(output.transparent_draws.is_empty());
}

/// Test: transparent draws go back to front.
#[test]
fn test_transparent_back_to_front() {
    let mut scene = Scene::new();
    let glass = scene.add_material(MaterialComponent {
        blend: BlendMode::Alpha,
        ..MaterialComponent::default()
    });
    let depths = [40.0, 5.0, 300.0, 12.0, 80.0];
    for depth in depths {
        let geometry = add_geometry(&mut scene, glass);
        scene.add_renderable(at(geometry, -depth));
    }

    let output = render(&scene);
    let order: Vec<u32> = output.transparent_draws.iter().map(|d| d.geometry).collect();
    assert_eq!(order, vec![2, 4, 0, 3, 1]);
    assert!(output
        .transparent_draws
        .iter()
        .all(|d| d.pipeline.pass == RenderPass::Transparent));
    assert!(output.opaque_draws.is_empty());
}

/// Test: five adjacent instances of one geometry merge into one draw.
#[test]
fn test_five_instances_one_draw() {
    let mut scene = Scene::new();
    let material = scene.add_material(MaterialComponent::default());
    let geometry = add_geometry(&mut scene, material);
    for i in 0..5 {
        scene.add_renderable(at(geometry, -10.0 - i as f32));
    }

    let output = render(&scene);
    assert_eq!(output.opaque_draws.len(), 1);
    let draw = output.opaque_draws[0];
    assert_eq!(draw.instance_count, 5);
    assert_eq!(draw.instance_offset, 0);
    assert_eq!(draw.pipeline.cull, CullMode::Back);
    assert!(!draw.pipeline.alpha_test);
    assert_eq!(output.stats.batches, 1);
}

/// Test: interleaved geometries split into one batch per run.
#[test]
fn test_interleaved_geometries_split() {
    let mut scene = Scene::new();
    let material = scene.add_material(MaterialComponent::default());
    let a = add_geometry(&mut scene, material);
    let b = add_geometry(&mut scene, material);
    scene.add_renderable(at(a, -10.0));
    scene.add_renderable(at(b, -20.0));
    scene.add_renderable(at(a, -30.0));

    let output = render(&scene);
    let counts: Vec<(u32, u32)> = output
        .opaque_draws
        .iter()
        .map(|d| (d.geometry, d.instance_offset))
        .collect();
    assert_eq!(counts, vec![(0, 0), (1, 1), (0, 2)]);
}

/// Test: a dithered double-sided transparent batch alpha tests and draws
/// back faces before front faces.
#[test]
fn test_dithered_double_sided_transparent_splits() {
    let mut scene = Scene::new();
    let material = scene.add_material(MaterialComponent {
        blend: BlendMode::Alpha,
        double_sided: true,
        ..MaterialComponent::default()
    });
    let geometry = add_geometry(&mut scene, material);
    // Fade band is 90..100; at 99 the dither is 0.9.
    scene.add_renderable(at(geometry, -99.0).with_max_draw_distance(100.0));

    let output = render(&scene);
    let draws = &output.transparent_draws;
    assert_eq!(draws.len(), 2);
    assert!(draws.iter().all(|d| d.pipeline.alpha_test));
    assert_eq!(draws[0].pipeline.cull, CullMode::Front);
    assert_eq!(draws[1].pipeline.cull, CullMode::Back);
    assert_eq!(draws[0].instance_offset, draws[1].instance_offset);
}

/// Test: the same batch without dithering stays a single two-sided draw.
#[test]
fn test_undithered_double_sided_is_one_draw() {
    let mut scene = Scene::new();
    let material = scene.add_material(MaterialComponent {
        blend: BlendMode::Alpha,
        double_sided: true,
        ..MaterialComponent::default()
    });
    let geometry = add_geometry(&mut scene, material);
    scene.add_renderable(at(geometry, -50.0).with_max_draw_distance(100.0));

    let output = render(&scene);
    assert_eq!(output.transparent_draws.len(), 1);
    assert_eq!(output.transparent_draws[0].pipeline.cull, CullMode::None);
    assert!(!output.transparent_draws[0].pipeline.alpha_test);
}

/// Test: the camera mask limits which views draw an instance.
#[test]
fn test_camera_mask_filters_instances() {
    let mut scene = Scene::new();
    let material = scene.add_material(MaterialComponent::default());
    let geometry = add_geometry(&mut scene, material);
    scene.add_renderable(at(geometry, -10.0).with_camera_mask(0b01));
    scene.add_renderable(at(geometry, -11.0).with_camera_mask(0b10));

    let device = HeadlessDevice::new();
    let mut path = RenderPath::new(&device, RenderConfig::default()).unwrap();
    let mut second = VisibilityView::new(view().camera().clone(), 0b10);
    let output = path.render_frame(&device, &scene, &mut second, None).unwrap();
    assert_eq!(output.visible_objects, vec![1]);
    assert_eq!(output.opaque_draws[0].instance_count, 1);
}
