//! Error types for logical textures, resources and geometry

use std::fmt;

use thiserror::Error;

/// Which axis of a texture frame overflowed its base texture, and by how much
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameOverflow {
    /// Overflow past the base texture width (`x + width - base_width`)
    pub x: Option<f32>,
    /// Overflow past the base texture height (`y + height - base_height`)
    pub y: Option<f32>,
}

impl fmt::Display for FrameOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.x, self.y) {
            (Some(x), Some(y)) => write!(f, "X overflows by {} and Y overflows by {}", x, y),
            (Some(x), None) => write!(f, "X overflows by {}", x),
            (None, Some(y)) => write!(f, "Y overflows by {}", y),
            (None, None) => write!(f, "no overflow"),
        }
    }
}

/// Errors raised by `BaseTexture`, `Texture` and the texture cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TextureError {
    /// `set_resource` was called on a base texture that already owns one
    #[error("Resource can be set only once")]
    ResourceAlreadySet,

    /// A frame rectangle does not fit inside the base texture
    #[error("Texture frame does not fit inside the base texture dimensions: {0}")]
    FrameOutOfBounds(FrameOverflow),

    /// Odd dihedral rotations would produce non-rectangular sampling
    #[error("Attempt to use diamond-shaped UVs (rotation {0}); only even rotations are supported")]
    DiamondUvs(u8),

    /// Rotation outside of the dihedral group
    #[error("Rotation {0} is not an element of the dihedral group")]
    InvalidRotation(u8),

    /// Strict cache lookup found nothing for the key
    #[error("Texture cache entry not found: {0}")]
    NotFound(String),

    /// The texture has been destroyed and can no longer be used
    #[error("Texture has been destroyed")]
    Destroyed,

    /// Resource construction failed
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Errors raised by resources, either synchronously or through the error signal
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Buffer-backed resources need explicit dimensions
    #[error("BufferResource width or height invalid ({width}x{height})")]
    InvalidBufferSize { width: u32, height: u32 },

    /// Pixel data is shorter than the declared dimensions require
    #[error("BufferResource data too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    /// Cube resources require exactly six faces
    #[error("Invalid length. Got {0}, expected 6")]
    InvalidCubeLength(usize),

    /// Layer index outside an array resource
    #[error("Index {index} is out of bounds (length {length})")]
    LayerOutOfBounds { index: usize, length: usize },

    /// An array resource was bound to a second base texture
    #[error("Only one base texture per texture array is allowed")]
    ArrayAlreadyBound,

    /// Decoding the source failed
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Reading the source failed
    #[error("Failed to read source: {0}")]
    Io(String),

    /// No resource variant can handle the source
    #[error("Unsupported texture source: {0}")]
    UnsupportedSource(String),

    /// The resource was destroyed
    #[error("Resource has been destroyed")]
    Destroyed,
}

/// Errors raised while building geometry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// An attribute references a buffer slot that does not exist
    #[error("Attribute '{name}' references missing buffer {index}")]
    MissingBuffer { name: String, index: usize },

    /// Geometries with different buffer layouts cannot be merged
    #[error("Geometries cannot be merged: {0}")]
    Incompatible(String),

    /// Interleaving or merging needs attribute sizes to be known
    #[error("Attribute '{0}' has no size")]
    UnknownSize(String),

    /// Nothing to merge
    #[error("No geometries to merge")]
    Empty,
}

/// Result type for texture operations
pub type Result<T> = std::result::Result<T, TextureError>;
