//! Parallel frustum and occlusion culling.
//!
//! One job per renderable or light. Each group collects survivors in
//! private scratch and reserves its range of the compacted output with a
//! single atomic add from its last job.

use std::sync::atomic::{AtomicBool, Ordering};

use aperture_core::math;
use aperture_core::{ComponentProvider, LightKind, RenderableComponent};

use super::view::{CullStats, VisibilityView};
use crate::config::RenderConfig;
use crate::jobs::{job_count, JobSystem};
use crate::occlusion::OcclusionHistory;

#[derive(Default)]
struct GroupScratch {
    visible: Vec<u32>,
    candidates: Vec<u32>,
    stats: CullStats,
}

/// Frustum and occlusion culler shared by all views of a render path.
#[derive(Debug)]
pub struct VisibilityCuller {
    group_size: u32,
    max_visible_lights: u32,
    light_overflow_warned: AtomicBool,
}

impl VisibilityCuller {
    /// Creates a culler.
    #[must_use]
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            group_size: config.cull_group_size,
            max_visible_lights: config.max_visible_lights,
            light_overflow_warned: AtomicBool::new(false),
        }
    }

    /// Fills `view` with the renderables and lights that survive culling.
    ///
    /// A renderable is kept if it is flagged renderable, its camera mask
    /// overlaps the view's, it is within its draw distance, its box touches
    /// the frustum, and, when occlusion is on for the view, its history is
    /// non-zero or the eye is inside its box.
    ///
    /// # Panics
    ///
    /// Panics if the view's camera is not valid.
    pub fn cull(
        &self,
        jobs: &JobSystem,
        provider: &dyn ComponentProvider,
        history: OcclusionHistory<'_>,
        view: &mut VisibilityView,
    ) {
        assert!(view.camera().is_valid(), "culling requires a valid camera");

        let renderables = provider.renderables();
        let lights = provider.lights();
        view.begin(renderables.len(), lights.len());

        let occlusion = view.occlusion_enabled();
        let shared: &VisibilityView = view;
        let camera = shared.camera();
        let eye = camera.eye;
        let frustum = camera.frustum;
        let mask = shared.camera_mask();
        let max_lights = self.max_visible_lights;
        let group = self.group_size;

        jobs.scope(|ctx| {
            ctx.dispatch::<GroupScratch, _>(job_count(renderables.len()), group, |args, scratch| {
                let index = args.job_index;
                let renderable = &renderables[index as usize];
                scratch.stats.objects_tested += 1;

                if !renderable.is_renderable() || renderable.camera_mask & mask == 0 {
                    scratch.stats.objects_masked += 1;
                } else if math::distance(eye, renderable.aabb.center())
                    > renderable.max_draw_distance
                {
                    scratch.stats.objects_distance_culled += 1;
                } else if !frustum.intersects_aabb(&renderable.aabb) {
                    scratch.stats.objects_frustum_culled += 1;
                } else {
                    let tested = occlusion
                        && renderable.flags & RenderableComponent::FLAG_OCCLUDER_TESTED != 0
                        && !renderable.aabb.contains_point(eye);
                    if tested {
                        scratch.candidates.push(index);
                    }
                    if tested && history.object(index as usize) == 0 {
                        scratch.stats.objects_occlusion_culled += 1;
                    } else {
                        scratch.visible.push(index);
                        scratch.stats.objects_visible += 1;
                    }
                }

                if args.is_last_in_group {
                    shared.objects.append(&scratch.visible, u32::MAX);
                    shared.object_candidates.append(&scratch.candidates, u32::MAX);
                    shared.group_stats.lock().merge(&scratch.stats);
                }
            });

            ctx.dispatch::<GroupScratch, _>(job_count(lights.len()), group, |args, scratch| {
                let index = args.job_index;
                let light = &lights[index as usize];
                scratch.stats.lights_tested += 1;

                if light.kind == LightKind::Directional {
                    scratch.visible.push(index);
                } else {
                    let bounds = light.aabb();
                    if frustum.intersects_aabb(&bounds) {
                        let tested = occlusion && !bounds.contains_point(eye);
                        if tested {
                            scratch.candidates.push(index);
                        }
                        if !tested || history.light(index as usize) != 0 {
                            scratch.visible.push(index);
                        }
                    }
                }

                if args.is_last_in_group {
                    let stored = shared.lights.append(&scratch.visible, max_lights);
                    #[allow(clippy::cast_possible_truncation)]
                    let wanted = scratch.visible.len() as u32;
                    scratch.stats.lights_visible += stored;
                    scratch.stats.lights_dropped += wanted - stored;
                    if stored < wanted && !self.light_overflow_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            max_visible_lights = max_lights,
                            "visible light capacity exceeded, excess lights dropped"
                        );
                    }
                    shared.light_candidates.append(&scratch.candidates, u32::MAX);
                    shared.group_stats.lock().merge(&scratch.stats);
                }
            });
        });

        view.finish(max_lights);
        let stats = view.stats();
        tracing::trace!(
            visible = stats.objects_visible,
            frustum_culled = stats.objects_frustum_culled,
            occlusion_culled = stats.objects_occlusion_culled,
            lights = stats.lights_visible,
            "view culled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::culling::Camera;
    use aperture_core::{Aabb, Entity, LightComponent, Scene};

    fn camera() -> Camera {
        Camera::look_at(
            [0.0, 0.0, 0.0],
            [0.0, 0.0, -1.0],
            [0.0, 1.0, 0.0],
            std::f32::consts::FRAC_PI_2,
            [640, 480],
            0.1,
            1000.0,
        )
    }

    fn cube(center: [f32; 3]) -> RenderableComponent {
        RenderableComponent::new(Entity::NULL, Aabb::from_center_half_extents(center, [0.5; 3]))
    }

    fn sorted(values: &[u32]) -> Vec<u32> {
        let mut v = values.to_vec();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_frustum_only() {
        let mut scene = Scene::new();
        scene.add_renderable(cube([0.0, 0.0, -10.0]));
        scene.add_renderable(cube([0.0, 0.0, 10.0]));
        scene.add_renderable(cube([0.0, 0.0, -5.0]).with_camera_mask(0b10));
        scene.add_renderable(cube([0.0, 0.0, -50.0]).with_max_draw_distance(20.0));

        let jobs = JobSystem::new(2).unwrap();
        let culler = VisibilityCuller::new(&RenderConfig::default());
        let mut view = VisibilityView::new(camera(), 0b01);
        view.set_occlusion_enabled(false);
        culler.cull(&jobs, &scene, OcclusionHistory::NONE, &mut view);

        assert_eq!(view.visible_objects(), &[0]);
        let stats = view.stats();
        assert_eq!(stats.objects_tested, 4);
        assert_eq!(stats.objects_frustum_culled, 1);
        assert_eq!(stats.objects_masked, 1);
        assert_eq!(stats.objects_distance_culled, 1);
        assert!(view.object_query_candidates().is_empty());
    }

    #[test]
    fn test_zero_history_excluded_unless_eye_inside() {
        let mut scene = Scene::new();
        scene.add_renderable(cube([0.0, 0.0, -10.0]));
        scene.add_renderable(RenderableComponent::new(
            Entity::NULL,
            Aabb::new([-1.0; 3], [1.0; 3]),
        ));
        scene.add_renderable(cube([2.0, 0.0, -10.0]));

        let jobs = JobSystem::new(2).unwrap();
        let culler = VisibilityCuller::new(&RenderConfig::default());
        let mut view = VisibilityView::new(camera(), 0xFF);
        let history = [0, 0, 1];
        culler.cull(
            &jobs,
            &scene,
            OcclusionHistory::new(&history, &[]),
            &mut view,
        );

        assert_eq!(sorted(view.visible_objects()), vec![1, 2]);
        assert_eq!(sorted(view.object_query_candidates()), vec![0, 2]);
        assert_eq!(view.stats().objects_occlusion_culled, 1);
    }

    #[test]
    fn test_light_capacity_clamped() {
        let mut scene = Scene::new();
        for i in 0..10 {
            scene.add_light(LightComponent::point([0.0, 0.0, -5.0 - i as f32], [1.0; 3], 1.0, 1.0));
        }
        scene.add_light(LightComponent::point([0.0, 0.0, 50.0], [1.0; 3], 1.0, 1.0));

        let jobs = JobSystem::new(2).unwrap();
        let config = RenderConfig {
            max_visible_lights: 4,
            cull_group_size: 3,
            ..RenderConfig::default()
        };
        let culler = VisibilityCuller::new(&config);
        let mut view = VisibilityView::new(camera(), 0xFF);
        view.set_occlusion_enabled(false);
        culler.cull(&jobs, &scene, OcclusionHistory::NONE, &mut view);

        assert_eq!(view.visible_lights().len(), 4);
        assert!(view.visible_lights().iter().all(|&l| l < 10));
        assert_eq!(view.stats().lights_dropped, 6);
        assert_eq!(view.stats().lights_visible, 4);
    }

    #[test]
    #[should_panic(expected = "valid camera")]
    fn test_invalid_camera_fails_fast() {
        let mut broken = camera();
        broken.z_near = 0.0;
        let jobs = JobSystem::new(1).unwrap();
        let culler = VisibilityCuller::new(&RenderConfig::default());
        let mut view = VisibilityView::new(broken, 0xFF);
        culler.cull(&jobs, &Scene::new(), OcclusionHistory::NONE, &mut view);
    }
}
