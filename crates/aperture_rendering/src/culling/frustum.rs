//! Frustum extraction and camera description.
//!
//! Extracts frustum planes from the view-projection matrix and tests
//! bounding volumes against them.

use aperture_core::math::{self, Mat4};
use aperture_core::Aabb;
use bytemuck::{Pod, Zeroable};

/// A plane in 3D space (Ax + By + Cz + D = 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Plane {
    /// Normal X component.
    pub a: f32,
    /// Normal Y component.
    pub b: f32,
    /// Normal Z component.
    pub c: f32,
    /// Distance from origin.
    pub d: f32,
}

impl Plane {
    /// Creates a new plane.
    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self { a, b, c, d }
    }

    /// Normalizes the plane.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = (self.a * self.a + self.b * self.b + self.c * self.c).sqrt();
        if len > 0.0 {
            Self {
                a: self.a / len,
                b: self.b / len,
                c: self.c / len,
                d: self.d / len,
            }
        } else {
            self
        }
    }

    /// Returns the signed distance from a point to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, p: [f32; 3]) -> f32 {
        self.a * p[0] + self.b * p[1] + self.c * p[2] + self.d
    }

    /// Projection radius of a box with half-extents `half` onto the normal.
    #[inline]
    #[must_use]
    pub fn projected_radius(&self, half: [f32; 3]) -> f32 {
        half[0] * self.a.abs() + half[1] * self.b.abs() + half[2] * self.c.abs()
    }

    /// Converts to array format.
    #[must_use]
    pub const fn as_array(&self) -> [f32; 4] {
        [self.a, self.b, self.c, self.d]
    }
}

/// Row `r` of a column-major matrix combined with row 3.
fn combine(m: &Mat4, row: usize, sign: f32) -> Plane {
    Plane::new(
        m[0][3] + sign * m[0][row],
        m[1][3] + sign * m[1][row],
        m[2][3] + sign * m[2][row],
        m[3][3] + sign * m[3][row],
    )
    .normalized()
}

/// View frustum for culling.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes; normals point inward.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Left plane index.
    pub const LEFT: usize = 0;
    /// Right plane index.
    pub const RIGHT: usize = 1;
    /// Bottom plane index.
    pub const BOTTOM: usize = 2;
    /// Top plane index.
    pub const TOP: usize = 3;
    /// Near plane index.
    pub const NEAR: usize = 4;
    /// Far plane index.
    pub const FAR: usize = 5;

    /// Extracts frustum planes from a column-major view-projection matrix
    /// with a 0..1 clip depth range.
    #[must_use]
    pub fn from_view_projection(m: &Mat4) -> Self {
        let mut planes = [Plane::default(); 6];
        planes[Self::LEFT] = combine(m, 0, 1.0);
        planes[Self::RIGHT] = combine(m, 0, -1.0);
        planes[Self::BOTTOM] = combine(m, 1, 1.0);
        planes[Self::TOP] = combine(m, 1, -1.0);
        // 0..1 depth: the near plane is row 2 alone.
        planes[Self::NEAR] =
            Plane::new(m[0][2], m[1][2], m[2][2], m[3][2]).normalized();
        planes[Self::FAR] = combine(m, 2, -1.0);
        Self { planes }
    }

    /// Conservative box test: false only if the box lies entirely outside
    /// one plane.
    #[inline]
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -plane.projected_radius(half))
    }

    /// True if the box lies entirely inside all six planes.
    #[must_use]
    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= plane.projected_radius(half))
    }

    /// Converts planes to array format for GPU upload.
    #[must_use]
    pub fn as_arrays(&self) -> [[f32; 4]; 6] {
        self.planes.map(|plane| plane.as_array())
    }
}

/// Camera state a view is culled against.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position.
    pub eye: [f32; 3],
    /// Unit view direction.
    pub forward: [f32; 3],
    /// World to view.
    pub view: Mat4,
    /// View to clip.
    pub projection: Mat4,
    /// World to clip.
    pub view_projection: Mat4,
    /// Planes of `view_projection`.
    pub frustum: Frustum,
    /// Near clip distance.
    pub z_near: f32,
    /// Far clip distance.
    pub z_far: f32,
    /// Render target size in pixels.
    pub viewport: [u32; 2],
}

impl Camera {
    /// Builds a camera from explicit matrices.
    #[must_use]
    pub fn new(view: Mat4, projection: Mat4, z_near: f32, z_far: f32, viewport: [u32; 2]) -> Self {
        let view_projection = math::mul(&projection, &view);
        let forward = math::normalize([-view[0][2], -view[1][2], -view[2][2]]);
        // Eye = -R^T * t for a rigid view matrix.
        let t = view[3];
        let eye = [
            -(view[0][0] * t[0] + view[0][1] * t[1] + view[0][2] * t[2]),
            -(view[1][0] * t[0] + view[1][1] * t[1] + view[1][2] * t[2]),
            -(view[2][0] * t[0] + view[2][1] * t[1] + view[2][2] * t[2]),
        ];
        Self {
            eye,
            forward,
            view,
            projection,
            view_projection,
            frustum: Frustum::from_view_projection(&view_projection),
            z_near,
            z_far,
            viewport,
        }
    }

    /// Right-handed perspective camera at `eye` looking at `target`.
    #[must_use]
    pub fn look_at(
        eye: [f32; 3],
        target: [f32; 3],
        up: [f32; 3],
        fov_y: f32,
        viewport: [u32; 2],
        z_near: f32,
        z_far: f32,
    ) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let aspect = viewport[0].max(1) as f32 / viewport[1].max(1) as f32;
        Self::new(
            math::look_at_rh(eye, target, up),
            math::perspective_rh(fov_y, aspect, z_near, z_far),
            z_near,
            z_far,
            viewport,
        )
    }

    /// Finite matrices, a positive depth range and a non-empty viewport.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.view_projection.iter().flatten().all(|v| v.is_finite())
            && self.eye.iter().all(|v| v.is_finite())
            && self.z_near > 0.0
            && self.z_far > self.z_near
            && self.viewport[0] > 0
            && self.viewport[1] > 0
    }

    /// Linear view depth of a world point.
    #[inline]
    #[must_use]
    pub fn linear_depth(&self, p: [f32; 3]) -> f32 {
        math::dot(self.forward, math::sub(p, self.eye))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::look_at(
            [0.0, 0.0, 0.0],
            [0.0, 0.0, -1.0],
            [0.0, 1.0, 0.0],
            std::f32::consts::FRAC_PI_2,
            [800, 800],
            0.1,
            100.0,
        )
    }

    #[test]
    fn test_plane_normalization() {
        let plane = Plane::new(3.0, 4.0, 0.0, 10.0);
        let normalized = plane.normalized();

        // 3-4-5 triangle, so length is 5
        assert!((normalized.a - 0.6).abs() < 0.001);
        assert!((normalized.b - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_near_and_far_planes() {
        let frustum = camera().frustum;
        let near = frustum.planes[Frustum::NEAR];
        let far = frustum.planes[Frustum::FAR];
        assert!((near.distance_to_point([0.0, 0.0, -0.1])).abs() < 1e-3);
        assert!((far.distance_to_point([0.0, 0.0, -100.0])).abs() < 1e-2);
        assert!(near.distance_to_point([0.0, 0.0, -50.0]) > 0.0);
        assert!(far.distance_to_point([0.0, 0.0, -50.0]) > 0.0);
    }

    #[test]
    fn test_box_tests() {
        let frustum = camera().frustum;
        let ahead = Aabb::from_center_half_extents([0.0, 0.0, -10.0], [1.0; 3]);
        let behind = Aabb::from_center_half_extents([0.0, 0.0, 10.0], [1.0; 3]);
        let beyond = Aabb::from_center_half_extents([0.0, 0.0, -200.0], [1.0; 3]);
        let straddling = Aabb::from_center_half_extents([10.0, 0.0, -10.0], [1.0; 3]);

        assert!(frustum.intersects_aabb(&ahead));
        assert!(frustum.contains_aabb(&ahead));
        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&beyond));
        assert!(frustum.intersects_aabb(&straddling));
        assert!(!frustum.contains_aabb(&straddling));
    }

    #[test]
    fn test_camera_recovers_eye_and_forward() {
        let camera = Camera::look_at(
            [5.0, 2.0, -3.0],
            [5.0, 2.0, -10.0],
            [0.0, 1.0, 0.0],
            1.0,
            [1920, 1080],
            0.5,
            500.0,
        );
        assert!(camera.is_valid());
        for axis in 0..3 {
            assert!((camera.eye[axis] - [5.0, 2.0, -3.0][axis]).abs() < 1e-4);
            assert!((camera.forward[axis] - [0.0, 0.0, -1.0][axis]).abs() < 1e-4);
        }
        assert!((camera.linear_depth([5.0, 2.0, -13.0]) - 10.0).abs() < 1e-4);
    }
}
