//! Visibility culling.
//!
//! Frustum, distance and mask tests run in parallel on the CPU; occlusion
//! rejection reads the history kept by [`crate::occlusion`].

mod culler;
mod frustum;
mod view;

pub use culler::VisibilityCuller;
pub use frustum::{Camera, Frustum, Plane};
pub use view::{CullStats, VisibilityView};
