//! Native graphics backends
//!
//! Every GPU call the renderer makes goes through [`Backend`]. Systems above
//! this layer track what is bound and what is dirty and only call down when
//! something actually changes, so a backend can stay a thin translation layer.
//!
//! Coordinates follow the bottom-left convention for the screen: viewport and
//! scissor rectangles of the root target have their origin at the bottom of
//! the screen. Off-screen targets are addressed from their first row.

pub mod recording;
pub mod wgpu_backend;

use slotmap::new_key_type;
use smallvec::SmallVec;

use tessera_core::{
    BlendState, BufferKind, DataType, DrawMode, IndexFormat, PixelFormat, PixelType, Rectangle,
    ScaleMode, TextureTarget, TextureUpload, WrapMode,
};

use crate::error::BackendError;
use crate::shader::{Program, UniformValue};

pub use recording::{Command, RecordingBackend};
pub use tessera_core::TextureHandle;
pub use wgpu_backend::WgpuBackend;

new_key_type! {
    /// Native vertex, index or uniform buffer
    pub struct BufferHandle;
    /// Native compiled program
    pub struct ProgramHandle;
    /// Native framebuffer
    pub struct FramebufferHandle;
}

/// Limits and conventions of a backend
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capabilities {
    /// Texture units a fragment program may sample from
    pub max_texture_units: u32,
    pub max_texture_size: u32,
    /// Off-screen targets store their first row at the top of clip space,
    /// so projections into them flip Y like the screen does
    pub offscreen_y_down: bool,
    pub max_anisotropy: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_texture_units: 16,
            max_texture_size: 4096,
            offscreen_y_down: false,
            max_anisotropy: 16,
        }
    }
}

/// Integer rectangle in target pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ViewRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ViewRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Round a pixel-space rectangle to integers
    pub fn from_rect(rect: &Rectangle) -> Self {
        Self::new(
            rect.x.round() as i32,
            rect.y.round() as i32,
            rect.width.round() as i32,
            rect.height.round() as i32,
        )
    }
}

/// Sampler state for one texture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub wrap_mode: WrapMode,
    pub scale_mode: ScaleMode,
    pub mipmap: bool,
    pub anisotropy: u32,
}

/// What a passing fragment does to the stencil value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Increment,
    Decrement,
}

/// Stencil test: pass where the stored value equals `reference`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub reference: u32,
    pub pass_op: StencilOp,
}

impl StencilState {
    pub const fn test(reference: u32) -> Self {
        Self {
            reference,
            pass_op: StencilOp::Keep,
        }
    }
}

/// How buffer contents reach the GPU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUpload {
    /// (Re)allocate storage sized to the data
    Allocate,
    /// Overwrite the start of existing storage
    Sub,
}

/// Attachments of a framebuffer
#[derive(Clone, Debug, PartialEq)]
pub struct FramebufferDesc {
    pub width: u32,
    pub height: u32,
    pub color: SmallVec<[TextureHandle; 1]>,
    pub depth: bool,
    pub stencil: bool,
}

/// Component layout of one vertex attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexFormat {
    pub data_type: DataType,
    pub size: u32,
    pub normalized: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub buffer: BufferHandle,
    pub stride: u32,
    pub instance: bool,
    pub attributes: SmallVec<[VertexAttribute; 4]>,
}

/// Where every attribute of the next draws is read from
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub buffers: SmallVec<[VertexBufferLayout; 2]>,
    pub index: Option<(BufferHandle, IndexFormat)>,
}

/// One draw submission
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCommand {
    pub mode: DrawMode,
    /// Elements (indices or vertices) to draw
    pub count: u32,
    /// First element
    pub start: u32,
    pub index: Option<IndexFormat>,
    pub instances: u32,
}

/// The only way the renderer reaches the GPU
pub trait Backend {
    fn capabilities(&self) -> Capabilities;

    /// Changes whenever previously created native objects became invalid
    fn context_generation(&self) -> u64;

    /// Screen size in device pixels
    fn resize_screen(&mut self, width: u32, height: u32);

    fn begin_frame(&mut self) {}

    /// Submit recorded work
    fn end_frame(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    // Textures

    fn create_texture(&mut self, target: TextureTarget) -> TextureHandle;

    /// Upload (or allocate when `data` is `None`) one image
    fn upload_texture(&mut self, texture: TextureHandle, upload: &TextureUpload<'_>);

    fn allocate_texture_layers(
        &mut self,
        texture: TextureHandle,
        format: PixelFormat,
        pixel_type: PixelType,
        width: u32,
        height: u32,
        layers: u32,
    );

    fn set_sampler(&mut self, texture: TextureHandle, sampler: &SamplerDesc);

    fn generate_mipmaps(&mut self, texture: TextureHandle);

    fn delete_texture(&mut self, texture: TextureHandle);

    /// Bind `texture` (or an empty texture) to a unit
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>);

    // Buffers

    fn create_buffer(&mut self, kind: BufferKind) -> BufferHandle;

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8], mode: BufferUpload);

    fn delete_buffer(&mut self, buffer: BufferHandle);

    // Programs

    fn create_program(&mut self, program: &Program) -> Result<ProgramHandle, BackendError>;

    fn delete_program(&mut self, program: ProgramHandle);

    fn use_program(&mut self, program: ProgramHandle);

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue);

    // Framebuffers

    fn create_framebuffer(&mut self) -> FramebufferHandle;

    fn update_framebuffer(&mut self, framebuffer: FramebufferHandle, desc: &FramebufferDesc);

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// `None` binds the screen
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    fn set_viewport(&mut self, viewport: ViewRect);

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<u32>);

    // Fixed-function state

    /// `None` disables blending
    fn set_blend(&mut self, blend: Option<BlendState>);

    fn set_depth_test(&mut self, enabled: bool);

    fn set_depth_mask(&mut self, enabled: bool);

    fn set_cull_face(&mut self, enabled: bool);

    fn set_front_face(&mut self, clockwise: bool);

    fn set_polygon_offset(&mut self, enabled: bool);

    fn set_color_mask(&mut self, enabled: bool);

    /// `None` disables the stencil test
    fn set_stencil(&mut self, stencil: Option<StencilState>);

    /// `None` disables the scissor test
    fn set_scissor(&mut self, rect: Option<ViewRect>);

    // Drawing

    fn set_vertex_layout(&mut self, layout: &VertexLayout);

    fn draw(&mut self, draw: &DrawCommand);

    /// Read back RGBA8 pixels of a target
    fn read_pixels(
        &mut self,
        _framebuffer: Option<FramebufferHandle>,
        _rect: ViewRect,
    ) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::Unsupported("read_pixels".to_string()))
    }
}
