//! Renderer and backend errors

use thiserror::Error;

use tessera_core::{GeometryError, TextureError};

/// Errors raised by a native backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// No adapter satisfies the request
    #[error("No suitable GPU adapter found")]
    AdapterNotFound,

    /// The adapter refused to create a device
    #[error("Failed to request GPU device: {0}")]
    RequestDevice(String),

    /// A program failed to compile or link
    #[error("Shader compilation error in '{name}': {message}")]
    ShaderCompile { name: String, message: String },

    /// The device was lost and must be replaced
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// Copying pixels back to the host failed
    #[error("Failed to read back pixels: {0}")]
    Readback(String),

    /// The backend cannot express the request
    #[error("Unsupported by backend: {0}")]
    Unsupported(String),
}

/// Errors raised while rendering
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The bound program reads an attribute the geometry does not provide
    #[error("shader and geometry incompatible, geometry missing the \"{0}\" attribute")]
    MissingAttribute(String),

    /// A filter chain was pushed without filters
    #[error("Filter chain for target {0} is empty")]
    EmptyFilterChain(u64),
}

/// Result type for renderer operations
pub type Result<T> = std::result::Result<T, RendererError>;
