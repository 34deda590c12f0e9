//! Headless backend that records every call
//!
//! Used by tests and tooling to observe exactly what the systems send to the
//! GPU: how many uploads a frame causes, which textures end up on which
//! units, how draws are split.

use slotmap::SlotMap;

use tessera_core::{BlendState, BufferKind, PixelFormat, PixelType, TextureTarget, TextureUpload};

use super::{
    Backend, BufferHandle, BufferUpload, Capabilities, DrawCommand, FramebufferDesc,
    FramebufferHandle, ProgramHandle, SamplerDesc, StencilState, TextureHandle, VertexLayout,
    ViewRect,
};
use crate::error::BackendError;
use crate::shader::{Program, UniformValue};

/// One recorded backend call
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    ResizeScreen {
        width: u32,
        height: u32,
    },
    BeginFrame,
    EndFrame,
    CreateTexture(TextureHandle),
    UploadTexture {
        texture: TextureHandle,
        layer: u32,
        width: u32,
        height: u32,
        sub_image: bool,
        premultiply: bool,
        /// Whether pixels were sent, as opposed to allocating storage only
        with_data: bool,
    },
    AllocateLayers {
        texture: TextureHandle,
        width: u32,
        height: u32,
        layers: u32,
    },
    SetSampler {
        texture: TextureHandle,
        sampler: SamplerDesc,
    },
    GenerateMipmaps(TextureHandle),
    DeleteTexture(TextureHandle),
    BindTexture {
        unit: u32,
        texture: Option<TextureHandle>,
    },
    CreateBuffer(BufferHandle),
    UploadBuffer {
        buffer: BufferHandle,
        len: usize,
        mode: BufferUpload,
    },
    DeleteBuffer(BufferHandle),
    CreateProgram {
        program: ProgramHandle,
        name: String,
    },
    DeleteProgram(ProgramHandle),
    UseProgram(ProgramHandle),
    SetUniform {
        program: ProgramHandle,
        name: String,
        value: UniformValue,
    },
    CreateFramebuffer(FramebufferHandle),
    UpdateFramebuffer {
        framebuffer: FramebufferHandle,
        desc: FramebufferDesc,
    },
    DeleteFramebuffer(FramebufferHandle),
    BindFramebuffer(Option<FramebufferHandle>),
    Viewport(ViewRect),
    Clear {
        color: Option<[f32; 4]>,
        depth: Option<f32>,
        stencil: Option<u32>,
    },
    Blend(Option<BlendState>),
    DepthTest(bool),
    DepthMask(bool),
    CullFace(bool),
    FrontFace(bool),
    PolygonOffset(bool),
    ColorMask(bool),
    Stencil(Option<StencilState>),
    Scissor(Option<ViewRect>),
    VertexLayout(VertexLayout),
    Draw(DrawCommand),
}

/// Storage a recorded texture currently has
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordedTexture {
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: PixelFormat,
    pub pixel_type: PixelType,
    /// Uploads that carried pixel data
    pub uploads: u32,
}

#[derive(Clone, Debug)]
pub struct RecordedBuffer {
    pub kind: BufferKind,
    pub data: Vec<u8>,
    pub uploads: u32,
}

/// A [`Backend`] that keeps handle tables and a command log
#[derive(Debug)]
pub struct RecordingBackend {
    capabilities: Capabilities,
    generation: u64,
    screen: (u32, u32),
    commands: Vec<Command>,
    textures: SlotMap<TextureHandle, RecordedTexture>,
    buffers: SlotMap<BufferHandle, RecordedBuffer>,
    programs: SlotMap<ProgramHandle, String>,
    framebuffers: SlotMap<FramebufferHandle, Option<FramebufferDesc>>,
    units: Vec<Option<TextureHandle>>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(Capabilities::default())
    }
}

impl RecordingBackend {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            generation: 1,
            screen: (0, 0),
            commands: Vec::new(),
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            units: vec![None; capabilities.max_texture_units as usize],
        }
    }

    /// Backend with `units` texture units and default limits otherwise
    pub fn with_texture_units(units: u32) -> Self {
        Self::new(Capabilities {
            max_texture_units: units,
            ..Capabilities::default()
        })
    }

    /// Drop every native object, as a real context loss would
    pub fn lose_context(&mut self) {
        tracing::debug!("recording backend: context lost");
        self.textures.clear();
        self.buffers.clear();
        self.programs.clear();
        self.framebuffers.clear();
        self.units.iter_mut().for_each(|u| *u = None);
        self.generation += 1;
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draws(&self) -> Vec<DrawCommand> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Draw(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Count recorded commands matching `f`
    pub fn count(&self, f: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| f(c)).count()
    }

    /// Pixel uploads recorded for `texture` since the log was last cleared
    pub fn texture_uploads(&self, texture: TextureHandle) -> usize {
        self.count(|c| {
            matches!(c, Command::UploadTexture { texture: t, with_data: true, .. } if *t == texture)
        })
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&RecordedTexture> {
        self.textures.get(handle)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&RecordedBuffer> {
        self.buffers.get(handle)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Texture currently bound at `unit`
    pub fn bound_texture(&self, unit: u32) -> Option<TextureHandle> {
        self.units.get(unit as usize).copied().flatten()
    }

    fn record(&mut self, command: Command) {
        tracing::trace!("backend: {:?}", command);
        self.commands.push(command);
    }
}

impl Backend for RecordingBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn context_generation(&self) -> u64 {
        self.generation
    }

    fn resize_screen(&mut self, width: u32, height: u32) {
        self.screen = (width, height);
        self.record(Command::ResizeScreen { width, height });
    }

    fn begin_frame(&mut self) {
        self.record(Command::BeginFrame);
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.record(Command::EndFrame);
        Ok(())
    }

    fn create_texture(&mut self, target: TextureTarget) -> TextureHandle {
        let handle = self.textures.insert(RecordedTexture {
            target,
            layers: 1,
            ..RecordedTexture::default()
        });
        self.record(Command::CreateTexture(handle));
        handle
    }

    fn upload_texture(&mut self, texture: TextureHandle, upload: &TextureUpload<'_>) {
        if let Some(t) = self.textures.get_mut(texture) {
            if !upload.sub_image {
                t.width = upload.width;
                t.height = upload.height;
                t.format = upload.format;
                t.pixel_type = upload.pixel_type;
            }
            if upload.data.is_some() {
                t.uploads += 1;
            }
        }
        self.record(Command::UploadTexture {
            texture,
            layer: upload.layer,
            width: upload.width,
            height: upload.height,
            sub_image: upload.sub_image,
            premultiply: upload.premultiply,
            with_data: upload.data.is_some(),
        });
    }

    fn allocate_texture_layers(
        &mut self,
        texture: TextureHandle,
        format: PixelFormat,
        pixel_type: PixelType,
        width: u32,
        height: u32,
        layers: u32,
    ) {
        if let Some(t) = self.textures.get_mut(texture) {
            t.width = width;
            t.height = height;
            t.layers = layers;
            t.format = format;
            t.pixel_type = pixel_type;
        }
        self.record(Command::AllocateLayers {
            texture,
            width,
            height,
            layers,
        });
    }

    fn set_sampler(&mut self, texture: TextureHandle, sampler: &SamplerDesc) {
        self.record(Command::SetSampler {
            texture,
            sampler: *sampler,
        });
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        self.record(Command::GenerateMipmaps(texture));
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture);
        for unit in self.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
        self.record(Command::DeleteTexture(texture));
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        if let Some(slot) = self.units.get_mut(unit as usize) {
            *slot = texture;
        }
        self.record(Command::BindTexture { unit, texture });
    }

    fn create_buffer(&mut self, kind: BufferKind) -> BufferHandle {
        let handle = self.buffers.insert(RecordedBuffer {
            kind,
            data: Vec::new(),
            uploads: 0,
        });
        self.record(Command::CreateBuffer(handle));
        handle
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8], mode: BufferUpload) {
        if let Some(b) = self.buffers.get_mut(buffer) {
            match mode {
                BufferUpload::Allocate => b.data = data.to_vec(),
                BufferUpload::Sub => {
                    if b.data.len() < data.len() {
                        b.data.resize(data.len(), 0);
                    }
                    b.data[..data.len()].copy_from_slice(data);
                }
            }
            b.uploads += 1;
        }
        self.record(Command::UploadBuffer {
            buffer,
            len: data.len(),
            mode,
        });
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer);
        self.record(Command::DeleteBuffer(buffer));
    }

    fn create_program(&mut self, program: &Program) -> Result<ProgramHandle, BackendError> {
        if program.source().is_empty() {
            return Err(BackendError::ShaderCompile {
                name: program.name().to_string(),
                message: "empty source".to_string(),
            });
        }
        let handle = self.programs.insert(program.name().to_string());
        self.record(Command::CreateProgram {
            program: handle,
            name: program.name().to_string(),
        });
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program);
        self.record(Command::DeleteProgram(program));
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.record(Command::UseProgram(program));
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue) {
        self.record(Command::SetUniform {
            program,
            name: name.to_string(),
            value: *value,
        });
    }

    fn create_framebuffer(&mut self) -> FramebufferHandle {
        let handle = self.framebuffers.insert(None);
        self.record(Command::CreateFramebuffer(handle));
        handle
    }

    fn update_framebuffer(&mut self, framebuffer: FramebufferHandle, desc: &FramebufferDesc) {
        if let Some(fb) = self.framebuffers.get_mut(framebuffer) {
            *fb = Some(desc.clone());
        }
        self.record(Command::UpdateFramebuffer {
            framebuffer,
            desc: desc.clone(),
        });
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer);
        self.record(Command::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.record(Command::BindFramebuffer(framebuffer));
    }

    fn set_viewport(&mut self, viewport: ViewRect) {
        self.record(Command::Viewport(viewport));
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<u32>) {
        self.record(Command::Clear {
            color,
            depth,
            stencil,
        });
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.record(Command::Blend(blend));
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.record(Command::DepthTest(enabled));
    }

    fn set_depth_mask(&mut self, enabled: bool) {
        self.record(Command::DepthMask(enabled));
    }

    fn set_cull_face(&mut self, enabled: bool) {
        self.record(Command::CullFace(enabled));
    }

    fn set_front_face(&mut self, clockwise: bool) {
        self.record(Command::FrontFace(clockwise));
    }

    fn set_polygon_offset(&mut self, enabled: bool) {
        self.record(Command::PolygonOffset(enabled));
    }

    fn set_color_mask(&mut self, enabled: bool) {
        self.record(Command::ColorMask(enabled));
    }

    fn set_stencil(&mut self, stencil: Option<StencilState>) {
        self.record(Command::Stencil(stencil));
    }

    fn set_scissor(&mut self, rect: Option<ViewRect>) {
        self.record(Command::Scissor(rect));
    }

    fn set_vertex_layout(&mut self, layout: &VertexLayout) {
        self.record(Command::VertexLayout(layout.clone()));
    }

    fn draw(&mut self, draw: &DrawCommand) {
        self.record(Command::Draw(*draw));
    }
}
