//! Canvas error types

use std::path::PathBuf;

use thiserror::Error;

use crate::gpu::{AttachmentId, FramebufferId, TransferBufferId};

/// Failures reported by a [`GraphicsDevice`](crate::gpu::GraphicsDevice).
#[derive(Error, Debug)]
pub enum GpuError {
    /// Attachment, framebuffer or transfer buffer could not be created
    #[error("GPU allocation failed: {0}")]
    Allocation(String),

    /// Framebuffer failed its completeness check
    #[error("framebuffer {0:?} is incomplete: {1}")]
    Incomplete(FramebufferId, String),

    #[error("unknown attachment {0:?}")]
    UnknownAttachment(AttachmentId),

    #[error("unknown framebuffer {0:?}")]
    UnknownFramebuffer(FramebufferId),

    #[error("unknown transfer buffer {0:?}")]
    UnknownTransferBuffer(TransferBufferId),

    /// Copy into a transfer buffer could not be issued
    #[error("pixel copy failed: {0}")]
    Copy(String),

    /// Transfer buffer could not be mapped for reading
    #[error("transfer buffer map failed: {0}")]
    Map(String),

    /// Synchronous readback failed
    #[error("readback failed: {0}")]
    Readback(String),
}

/// Failures reported by a stream sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("could not open stream sink at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("stream format negotiation failed: {0}")]
    Negotiate(String),

    #[error("frame push failed: {0}")]
    Push(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures reported by an image codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("pixel buffer holds {actual} pixels, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Failures while loading a [`CanvasConfig`](crate::config::CanvasConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed canvas config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Umbrella error for canvas operations that surface failures to the caller.
#[derive(Error, Debug)]
pub enum CanvasError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The visible region has no pixels to capture
    #[error("nothing to capture: frame region is empty")]
    EmptyCapture,
}

/// Result type for canvas operations
pub type Result<T> = std::result::Result<T, CanvasError>;
