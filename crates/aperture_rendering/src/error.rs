//! # Rendering Error Types
//!
//! Only construction, configuration and true out-of-device-memory surface as
//! errors. Everything that can go wrong inside a frame is resolved locally:
//! capability gaps degrade, capacity overflows clamp, buffers grow.

use thiserror::Error;

/// Errors reported by a [`GpuDevice`](crate::device::GpuDevice).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device could not back an allocation.
    #[error("out of device memory: {label} needs {requested} bytes")]
    OutOfMemory {
        /// Debug label of the buffer.
        label: &'static str,
        /// Requested size in bytes.
        requested: u64,
    },

    /// The device lacks a required feature.
    #[error("unsupported device feature: {0}")]
    Unsupported(&'static str),
}

/// Errors that can occur while setting up or driving the render path.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fatal device failure; the frame cannot proceed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The worker pool could not be created.
    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
