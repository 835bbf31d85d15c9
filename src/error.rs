//! Error types
//!
//! Each concern has its own error enum. [`Error`] wraps all of them for
//! callers that want a single type, and [`Error::is_fatal`] separates setup
//! defects (which should stop the program) from input defects.

use std::path::PathBuf;

use thiserror::Error;

use crate::gfx::backend::FramebufferStatus;

/// Errors raised while assembling a [`Geometry`](crate::gfx::geometry::Geometry).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("attribute `{name}` has {count} components, expected 1 to 4")]
    ComponentCount { name: String, count: u32 },

    #[error("layout describes {layout} attributes but {streams} data streams were given")]
    StreamCount { layout: usize, streams: usize },

    #[error("stream for `{name}` holds {len} scalars, not a multiple of {count}")]
    StreamLength { name: String, len: usize, count: u32 },

    #[error("attribute `{name}` describes {actual} vertices, expected {expected}")]
    VertexCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("single-batch alignment is reserved and cannot be built")]
    SingleBatch,
}

/// Errors raised by the OBJ loader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read OBJ stream")]
    Stream(#[from] std::io::Error),

    #[error("line {line}: {attribute} index {index} is out of range (have {available})")]
    IndexOutOfRange {
        line: usize,
        attribute: &'static str,
        index: i64,
        available: usize,
    },
}

/// Errors raised while decoding, encoding or manipulating an
/// [`Image2D`](crate::gfx::resources::Image2D).
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to access `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode or encode image")]
    Codec(#[from] image::ImageError),

    #[error("image dimensions {width}x{height} must both be at least 1")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("{channels} channels are not supported here")]
    UnsupportedChannels { channels: u32 },

    #[error("byte depth {byte_depth} is not supported, expected 1 or 4")]
    UnsupportedByteDepth { byte_depth: u32 },

    #[error("pixel data holds {actual} bytes, expected {expected}")]
    DataSize { expected: usize, actual: usize },

    #[error("pixel ({x}, {y}) lies outside a {width}x{height} image")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Errors reported by a [`RenderBackend`](crate::gfx::backend::RenderBackend).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("unknown texture {0}")]
    UnknownTexture(u32),

    #[error("unknown framebuffer {0}")]
    UnknownFramebuffer(u32),

    #[error("unknown vertex array {0}")]
    UnknownVertexArray(u32),

    #[error("framebuffer {framebuffer} has no color attachment {index}")]
    MissingAttachment { framebuffer: u32, index: u32 },

    #[error("texel data holds {actual} bytes, expected {expected}")]
    DataSize { expected: usize, actual: usize },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("not supported by this backend: {0}")]
    Unsupported(String),

    #[error("geometry cannot be uploaded")]
    Geometry(#[from] GeometryError),
}

/// Configuration defects. These stop the program rather than being retried.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("framebuffer is incomplete: {0:?}")]
    IncompleteFramebuffer(FramebufferStatus),

    #[error("image format not supported for texture upload")]
    UnsupportedImage(#[source] ImageError),

    #[error("graphics device unavailable: {0}")]
    Device(String),
}

/// Umbrella error for callers that mix loaders, images and GPU resources.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Setup(#[from] SetupError),
}

impl Error {
    /// Whether this error is a setup defect that should end the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Setup(_) => true,
            Error::Image(err) => matches!(
                err,
                ImageError::UnsupportedChannels { .. } | ImageError::UnsupportedByteDepth { .. }
            ),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
