//! # Frame Synchronization Primitives
//!
//! ## The Problem
//!
//! ```text
//! Frame N:    CPU writes upload slot, GPU has not started on it
//! Frame N+1:  CPU writes the next slot, GPU reads frame N's slot
//! Frame N+F:  CPU comes back to frame N's slot; GPU is done with it
//! ```
//!
//! Anything the CPU shares with the GPU across frames lives in a ring of F
//! slots indexed by `frame % F`. There is never a single "current" result.

mod frame_ring;

pub use frame_ring::{FrameRing, MAX_FRAMES_IN_FLIGHT};
