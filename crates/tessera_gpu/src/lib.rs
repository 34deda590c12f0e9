//! Tessera GPU Renderer
//!
//! Turns `tessera_core` objects into draw calls through a [`Backend`]:
//!
//! - **Textures**: unit binding, upload and idle garbage collection
//! - **Batching**: sprites packed into shared vertex buffers, split only when
//!   textures, blend modes or buffer capacity force it
//! - **Masks**: scissor rectangles when a mask is an axis-aligned rectangle,
//!   stencil shapes otherwise, and sprite masks as a filter
//! - **Filters**: off-screen passes through pooled render textures
//!
//! [`WgpuBackend`] runs everything on a wgpu device; [`RecordingBackend`]
//! captures the command stream for tests.
//!
//! # Example
//!
//! ```rust
//! use tessera_gpu::{RecordingBackend, Renderer, RendererConfig};
//!
//! let config = RendererConfig::default().with_size(320.0, 240.0);
//! let renderer = Renderer::new(RecordingBackend::default(), config);
//!
//! assert_eq!(renderer.systems().screen_pixels(), (320, 240));
//! ```

pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod filter;
pub mod framebuffer;
pub mod geometry_system;
pub mod mask;
pub mod projection;
pub mod render_target;
pub mod render_texture;
pub mod renderer;
pub mod shader;
pub mod shaders;
pub mod state;
pub mod texture_gc;
pub mod texture_system;

pub use backend::{
    Backend, BufferHandle, Capabilities, FramebufferHandle, ProgramHandle, RecordingBackend,
    TextureHandle, ViewRect, WgpuBackend,
};
pub use batch::{BatchRenderer, BatchStats, BatchVertex};
pub use config::RendererConfig;
pub use error::{BackendError, RendererError, Result};
pub use filter::{Filter, FilterSettings, FilterSystem, ShaderFilter, SpriteMaskFilter};
pub use framebuffer::{Framebuffer, FramebufferSystem};
pub use geometry_system::GeometrySystem;
pub use mask::{MaskData, MaskSystem};
pub use projection::ProjectionSystem;
pub use render_target::{ClearBits, RenderTargetSystem};
pub use render_texture::{BaseRenderTexture, RenderTexture, RenderTexturePool};
pub use renderer::{Mesh, RenderItem, RenderOptions, Renderer, Systems};
pub use shader::{Program, Shader, ShaderSystem, UniformGroup, UniformType, UniformValue};
pub use state::{State, StateSystem};
pub use texture_gc::{GcMode, TextureGc};
pub use texture_system::TextureSystem;
