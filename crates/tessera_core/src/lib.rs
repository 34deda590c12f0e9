//! Tessera Core
//!
//! CPU-side objects of the Tessera 2D renderer:
//!
//! - **Resources**: pixel sources (buffers, canvases, decoded images, layered
//!   arrays, video frames) that know their size and how to upload themselves
//! - **Textures**: `BaseTexture` with content and sampler versions, `Texture`
//!   frames with rotation-aware UVs, and an explicit `TextureCache`
//! - **Geometry**: versioned byte buffers with attribute layouts
//! - **Renderables**: the `Batchable` boundary the GPU layer consumes
//!
//! # Example
//!
//! ```rust
//! use tessera_core::{BaseTexture, Rectangle, Texture};
//!
//! let base = BaseTexture::from_buffer(vec![0; 64 * 64 * 4], 64, 64, Default::default()).unwrap();
//! let texture = Texture::with_frame(base, Rectangle::new(0.0, 0.0, 32.0, 64.0)).unwrap();
//!
//! assert_eq!(texture.uvs().x1, 0.5);
//! ```

pub mod base_texture;
pub mod cache;
pub mod color;
pub mod constants;
pub mod error;
pub mod geometry;
pub mod group_d8;
pub mod math;
pub mod resource;
pub mod signal;
pub mod sprite;
pub mod texture;
pub mod texture_matrix;
pub mod ticker;
pub mod upload;

pub use base_texture::{BaseTexture, BaseTextureOptions, WeakBaseTexture};
pub use cache::TextureCache;
pub use color::Color;
pub use constants::{
    premultiply_blend_mode, AlphaMode, BlendEquation, BlendFactor, BlendMode, BlendState,
    DrawMode, MaskType, MipmapMode, PixelFormat, PixelType, ScaleMode, TextureTarget, WrapMode,
};
pub use error::{FrameOverflow, GeometryError, ResourceError, Result, TextureError};
pub use geometry::{Attribute, Buffer, BufferKind, DataType, Geometry, IndexFormat};
pub use math::{Matrix, Point, Rectangle};
pub use resource::{
    auto_detect_resource, ArrayResource, BufferResource, CanvasResource, CubeResource,
    ImageResource, ImageSource, LoadState, Resource, ResourceCore, ResourceExt, TextureSource,
    VideoResource, VideoSource,
};
pub use signal::{next_uid, Disposal, DisposalQueue, ListenerId, Signal};
pub use sprite::{BatchElement, Batchable, MaskObject, Sprite, QUAD_INDICES};
pub use texture::{Texture, TextureOptions, TextureUvs};
pub use texture_matrix::TextureMatrix;
pub use ticker::{Tick, Ticker};
pub use upload::{GlTexture, TextureHandle, TextureUpload, TextureUploader};
