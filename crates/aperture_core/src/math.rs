//! Mathematical types shared between the scene and the renderer.
//!
//! Matrices are column-major `[[f32; 4]; 4]` (`m[column][row]`), the layout
//! wgpu and WGSL expect, so they can be uploaded without conversion.

use bytemuck::{Pod, Zeroable};

/// Column-major 4x4 matrix.
pub type Mat4 = [[f32; 4]; 4];

/// Identity matrix.
pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Component-wise `a - b`.
#[inline]
#[must_use]
pub fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Component-wise `a + b`.
#[inline]
#[must_use]
pub fn add(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Dot product.
#[inline]
#[must_use]
pub fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Cross product.
#[inline]
#[must_use]
pub fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Vector length.
#[inline]
#[must_use]
pub fn length(v: [f32; 3]) -> f32 {
    dot(v, v).sqrt()
}

/// Distance between two points.
#[inline]
#[must_use]
pub fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    length(sub(a, b))
}

/// Returns the unit vector, or the input unchanged if it has zero length.
#[must_use]
pub fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = length(v);
    if len > 0.0 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        v
    }
}

/// Matrix product `a * b`.
#[must_use]
pub fn mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [[0.0f32; 4]; 4];
    for (column, out_column) in out.iter_mut().enumerate() {
        for (row, value) in out_column.iter_mut().enumerate() {
            *value = (0..4).map(|k| a[k][row] * b[column][k]).sum();
        }
    }
    out
}

/// Transforms a homogeneous vector.
#[inline]
#[must_use]
pub fn transform_vec4(m: &Mat4, v: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = m[0][row] * v[0] + m[1][row] * v[1] + m[2][row] * v[2] + m[3][row] * v[3];
    }
    out
}

/// Transforms a point (w = 1), ignoring the projective row.
#[inline]
#[must_use]
pub fn transform_point(m: &Mat4, p: [f32; 3]) -> [f32; 3] {
    let v = transform_vec4(m, [p[0], p[1], p[2], 1.0]);
    [v[0], v[1], v[2]]
}

/// Translation matrix.
#[must_use]
pub const fn translation(t: [f32; 3]) -> Mat4 {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [t[0], t[1], t[2], 1.0],
    ]
}

/// Right-handed view matrix looking from `eye` towards `target`.
#[must_use]
pub fn look_at_rh(eye: [f32; 3], target: [f32; 3], up: [f32; 3]) -> Mat4 {
    let f = normalize(sub(target, eye));
    let s = normalize(cross(f, up));
    let u = cross(s, f);

    [
        [s[0], u[0], -f[0], 0.0],
        [s[1], u[1], -f[1], 0.0],
        [s[2], u[2], -f[2], 0.0],
        [-dot(s, eye), -dot(u, eye), dot(f, eye), 1.0],
    ]
}

/// Right-handed perspective projection with a 0..1 depth range.
#[must_use]
pub fn perspective_rh(fov_y: f32, aspect: f32, z_near: f32, z_far: f32) -> Mat4 {
    let f = 1.0 / (fov_y * 0.5).tan();
    let range = z_near - z_far;

    [
        [f / aspect, 0.0, 0.0, 0.0],
        [0.0, f, 0.0, 0.0],
        [0.0, 0.0, z_far / range, -1.0],
        [0.0, 0.0, z_near * z_far / range, 0.0],
    ]
}

/// Axis-aligned bounding box.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    /// Minimum corner.
    pub min: [f32; 3],
    /// Maximum corner.
    pub max: [f32; 3],
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// Inverted box; the identity for [`Aabb::union`].
    pub const EMPTY: Self = Self {
        min: [f32::MAX; 3],
        max: [f32::MIN; 3],
    };

    /// Box covering all of space.
    pub const INFINITE: Self = Self {
        min: [f32::MIN; 3],
        max: [f32::MAX; 3],
    };

    /// Creates a new AABB.
    #[must_use]
    pub const fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Creates an AABB from its center and half-extents.
    #[must_use]
    pub fn from_center_half_extents(center: [f32; 3], half: [f32; 3]) -> Self {
        Self {
            min: sub(center, half),
            max: add(center, half),
        }
    }

    /// Creates the AABB enclosing a sphere.
    #[must_use]
    pub fn from_sphere(center: [f32; 3], radius: f32) -> Self {
        Self::from_center_half_extents(center, [radius; 3])
    }

    /// Returns the center of the AABB.
    #[must_use]
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Returns the half-extents of the AABB.
    #[must_use]
    pub fn half_extents(&self) -> [f32; 3] {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }

    /// Returns true if min <= max on every axis.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (0..3).all(|axis| self.min[axis] <= self.max[axis])
    }

    /// Returns true if the point lies inside or on the box.
    #[must_use]
    pub fn contains_point(&self, p: [f32; 3]) -> bool {
        (0..3).all(|axis| p[axis] >= self.min[axis] && p[axis] <= self.max[axis])
    }

    /// Returns true if the two boxes overlap.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.max[axis] && self.max[axis] >= other.min[axis])
    }

    /// Smallest box containing both boxes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for axis in 0..3 {
            out.min[axis] = out.min[axis].min(other.min[axis]);
            out.max[axis] = out.max[axis].max(other.max[axis]);
        }
        out
    }

    /// Returns the eight corners.
    #[must_use]
    pub fn corners(&self) -> [[f32; 3]; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            [lo[0], lo[1], lo[2]],
            [hi[0], lo[1], lo[2]],
            [lo[0], hi[1], lo[2]],
            [hi[0], hi[1], lo[2]],
            [lo[0], lo[1], hi[2]],
            [hi[0], lo[1], hi[2]],
            [lo[0], hi[1], hi[2]],
            [hi[0], hi[1], hi[2]],
        ]
    }

    /// Box enclosing this box after an affine transform.
    #[must_use]
    pub fn transform(&self, m: &Mat4) -> Self {
        self.corners()
            .iter()
            .map(|&corner| transform_point(m, corner))
            .fold(Self::EMPTY, |acc, p| acc.union(&Self::new(p, p)))
    }
}
