//! # APERTURE Rendering
//!
//! Per-frame visibility core of a real-time renderer:
//! - Mirror a mutable CPU scene into ring-buffered GPU memory
//! - Reject invisible objects before any shading work
//! - Turn the visible set into the fewest instanced draw submissions
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        FRAME N                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Provider → Scene Mirror → Visibility Cull ← Occlusion History│
//! │                                 ↓                 ↑ (N + F)   │
//! │                         Occlusion Proxies → Resolve           │
//! │                                 ↓                             │
//! │                  Tiled Lights → Batching → Draw Submissions   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Offsets are valid for the frame that assigned them only
//! - Anything shared with the GPU across frames lives in a ring of F slots
//! - A frame never fails for a missing capability or a full fixed-size list

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod batching;
pub mod config;
pub mod culling;
pub mod device;
pub mod error;
pub mod jobs;
pub mod lighting;
pub mod mirror;
pub mod occlusion;
pub mod pipeline;

pub use batching::{BatchKey, CullMode, DrawSubmission, PipelineKey, RenderBatcher, RenderPass};
pub use config::RenderConfig;
pub use culling::{Camera, CullStats, Frustum, Plane, VisibilityCuller, VisibilityView};
pub use device::{
    BufferHandle, BufferUsage, DeviceCapabilities, GpuDevice, HeadlessDevice, QueryPoolHandle,
    WgpuDevice,
};
pub use error::{DeviceError, RenderError, RenderResult};
pub use jobs::{JobArgs, JobSystem};
pub use lighting::{TileGrid, TilePass, TiledLightCuller};
pub use mirror::{InstancePointer, MirrorDescriptors, SceneGpuMirror};
pub use occlusion::{OcclusionHistory, OcclusionQueryManager, QueryState};
pub use pipeline::{FrameDescriptors, FrameOutput, RenderPath, RenderStats};
