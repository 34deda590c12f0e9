//! wgpu implementation of [`Backend`]
//!
//! The systems drive this backend like an immediate-mode API: they toggle
//! state, bind textures to units and issue draws. Every draw is captured with
//! the pipeline, bind groups and uniform block it needs and replayed into a
//! render pass when the target changes, a clear has to start a new pass, or
//! the frame ends.
//!
//! Program uniforms live in a CPU block per program. Each draw appends a copy
//! of its program's block to a ring buffer and binds it with a dynamic offset,
//! so uniform changes between draws of one pass keep their order.
//!
//! The root target is an off-screen color texture owned by the backend; use
//! [`WgpuBackend::screen_texture`] to present or copy it.

mod convert;

use std::borrow::Cow;
use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::Arc;

use lru::LruCache;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use wgpu::util::DeviceExt;

use tessera_core::{
    BlendState, BufferKind, DrawMode, IndexFormat, PixelFormat, PixelType, ScaleMode,
    TextureTarget, TextureUpload, WrapMode,
};

use super::{
    Backend, BufferHandle, BufferUpload, Capabilities, DrawCommand, FramebufferDesc,
    FramebufferHandle, ProgramHandle, SamplerDesc, StencilOp, StencilState, TextureHandle,
    VertexAttribute, VertexLayout, ViewRect,
};
use crate::error::BackendError;
use crate::shader::{Program, UniformType, UniformValue};

const fn align256(v: u64) -> u64 {
    (v + 255) & !255
}

const fn align4(v: usize) -> usize {
    (v + 3) & !3
}

/// Bytes of per-draw uniform blocks one submission can hold
const UNIFORM_RING_SIZE: u64 = 1 << 20;

/// Texture bind groups kept alive for reuse
const BIND_GROUP_CACHE: usize = 256;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

fn bytes_per_pixel(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::R8Unorm => 1,
        wgpu::TextureFormat::Rg8Unorm | wgpu::TextureFormat::R16Float => 2,
        wgpu::TextureFormat::Rgba16Float => 8,
        _ => 4,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Native object tables
// ─────────────────────────────────────────────────────────────────────────────

struct GpuTexture {
    target: TextureTarget,
    texture: Option<wgpu::Texture>,
    view: Option<Arc<wgpu::TextureView>>,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    layers: u32,
    sampler: SamplerDesc,
    /// Bumped whenever storage is reallocated
    storage: u64,
    /// Submission serial of the last draw that sampled or targeted it
    last_use: u64,
}

struct GpuBuffer {
    kind: BufferKind,
    buffer: Option<Arc<wgpu::Buffer>>,
    size: usize,
    last_use: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct UniformSlot {
    offset: u32,
    size: u32,
}

struct GpuProgram {
    name: String,
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    textures_layout: Option<wgpu::BindGroupLayout>,
    uniform_group: Arc<wgpu::BindGroup>,
    block: Vec<u8>,
    slots: FxHashMap<String, UniformSlot>,
    sampler_index: FxHashMap<String, usize>,
    /// Texture unit each sampler reads, in declaration order
    sampler_units: SmallVec<[u32; 16]>,
}

#[derive(Default)]
struct GpuFramebuffer {
    desc: Option<FramebufferDesc>,
    depth_stencil: Option<(wgpu::Texture, Arc<wgpu::TextureView>)>,
}

struct Screen {
    width: u32,
    height: u32,
    color: wgpu::Texture,
    view: Arc<wgpu::TextureView>,
    _depth_texture: wgpu::Texture,
    depth_stencil: Arc<wgpu::TextureView>,
}

/// Place in the uniform block of each non-sampler uniform, and the block size
fn block_layout(program: &Program) -> (FxHashMap<String, UniformSlot>, u32) {
    let mut slots = FxHashMap::default();
    let mut offset = 0u32;
    for (name, ty) in program.uniforms() {
        if *ty == UniformType::Sampler {
            continue;
        }
        let (size, align) = ty.block_layout();
        offset = offset.div_ceil(align) * align;
        slots.insert(name.clone(), UniformSlot { offset, size });
        offset += size;
    }
    let size = (offset.div_ceil(16) * 16).max(16);
    (slots, size)
}

fn create_depth_stencil(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, Arc<wgpu::TextureView>) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("tessera depth-stencil"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_STENCIL_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));
    (texture, view)
}

fn create_color(device: &wgpu::Device, label: &str, format: wgpu::TextureFormat, width: u32, height: u32, layers: u32) -> (wgpu::Texture, Arc<wgpu::TextureView>) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: layers.max(1),
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    // programs sample texture_2d; layered storage is read through its first layer
    let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_array_layer: 0,
        array_layer_count: Some(1),
        ..Default::default()
    }));
    (texture, view)
}

impl Screen {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let (color, view) = create_color(device, "tessera screen", COLOR_FORMAT, width, height, 1);
        let (_depth_texture, depth_stencil) = create_depth_stencil(device, width, height);
        Self {
            width: width.max(1),
            height: height.max(1),
            color,
            view,
            _depth_texture,
            depth_stencil,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline and bind group keys
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BufferShape {
    stride: u32,
    instance: bool,
    attributes: SmallVec<[VertexAttribute; 4]>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramHandle,
    format: wgpu::TextureFormat,
    depth_stencil: bool,
    blend: Option<BlendState>,
    color_write: bool,
    stencil: Option<StencilOp>,
    depth_test: bool,
    depth_write: bool,
    cull: bool,
    clockwise: bool,
    mode: DrawMode,
    strip_index: Option<IndexFormat>,
    buffers: SmallVec<[BufferShape; 2]>,
}

type TextureSlot = Option<(TextureHandle, u64, SamplerDesc)>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TextureBindKey {
    program: ProgramHandle,
    slots: SmallVec<[TextureSlot; 16]>,
}

/// Fixed-function state as last set by the systems
#[derive(Clone, Debug, Default)]
struct DrawState {
    program: Option<ProgramHandle>,
    blend: Option<BlendState>,
    depth_test: bool,
    depth_write: bool,
    cull: bool,
    clockwise: bool,
    color_write: bool,
    stencil: Option<StencilState>,
    scissor: Option<ViewRect>,
    viewport: Option<ViewRect>,
    layout: VertexLayout,
}

#[derive(Clone, Copy, Debug, Default)]
struct ClearOps {
    color: Option<[f32; 4]>,
    depth: Option<f32>,
    stencil: Option<u32>,
}

/// A draw captured with everything needed to replay it
struct RecordedDraw {
    pipeline: Arc<wgpu::RenderPipeline>,
    uniforms: Arc<wgpu::BindGroup>,
    uniform_offset: u32,
    textures: Option<Arc<wgpu::BindGroup>>,
    vertex: SmallVec<[Arc<wgpu::Buffer>; 2]>,
    index: Option<(Arc<wgpu::Buffer>, wgpu::IndexFormat)>,
    viewport: [f32; 4],
    scissor: [u32; 4],
    stencil_reference: u32,
    command: DrawCommand,
}

struct PassTarget {
    color: Arc<wgpu::TextureView>,
    depth_stencil: Option<Arc<wgpu::TextureView>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// [`Backend`] on top of a wgpu device
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    capabilities: Capabilities,
    generation: u64,
    screen: Screen,

    textures: SlotMap<TextureHandle, GpuTexture>,
    buffers: SlotMap<BufferHandle, GpuBuffer>,
    programs: SlotMap<ProgramHandle, GpuProgram>,
    framebuffers: SlotMap<FramebufferHandle, GpuFramebuffer>,

    samplers: FxHashMap<SamplerDesc, Arc<wgpu::Sampler>>,
    pipelines: FxHashMap<PipelineKey, Option<Arc<wgpu::RenderPipeline>>>,
    bind_groups: LruCache<TextureBindKey, Arc<wgpu::BindGroup>>,
    empty_view: Arc<wgpu::TextureView>,

    uniform_ring: wgpu::Buffer,
    uniform_staging: Vec<u8>,

    units: Vec<Option<TextureHandle>>,
    state: DrawState,
    target: Option<FramebufferHandle>,
    pending: Vec<RecordedDraw>,
    clear: Option<ClearOps>,
    encoder: Option<wgpu::CommandEncoder>,
    /// Serial of the submission being recorded
    serial: u64,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("capabilities", &self.capabilities)
            .field("generation", &self.generation)
            .field("screen", &(self.screen.width, self.screen.height))
            .field("textures", &self.textures.len())
            .field("buffers", &self.buffers.len())
            .field("programs", &self.programs.len())
            .field("pipelines", &self.pipelines.len())
            .field("pending_draws", &self.pending.len())
            .finish()
    }
}

impl WgpuBackend {
    /// Wrap an existing device
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!("wgpu error: {}", error);
        }));

        let limits = device.limits();
        let capabilities = Capabilities {
            max_texture_units: limits
                .max_sampled_textures_per_shader_stage
                .min(limits.max_samplers_per_shader_stage)
                .clamp(1, 32),
            max_texture_size: limits.max_texture_dimension_2d,
            offscreen_y_down: true,
            max_anisotropy: 16,
        };

        let uniform_ring = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera uniform ring"),
            size: UNIFORM_RING_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let empty = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("tessera empty texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: COLOR_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[0, 0, 0, 0],
        );
        let empty_view = Arc::new(empty.create_view(&wgpu::TextureViewDescriptor::default()));

        let screen = Screen::new(&device, 1, 1);
        let bind_groups = LruCache::new(NonZeroUsize::new(BIND_GROUP_CACHE).unwrap_or(NonZeroUsize::MIN));

        tracing::debug!(
            "wgpu backend: {} texture units, max texture size {}",
            capabilities.max_texture_units,
            capabilities.max_texture_size
        );

        Self {
            device,
            queue,
            capabilities,
            generation: 0,
            screen,
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            samplers: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            bind_groups,
            empty_view,
            uniform_ring,
            uniform_staging: Vec::new(),
            units: Vec::new(),
            state: DrawState {
                color_write: true,
                ..DrawState::default()
            },
            target: None,
            pending: Vec::new(),
            clear: None,
            encoder: None,
            serial: 1,
        }
    }

    /// Create a device without a surface
    pub fn headless() -> Result<Self, BackendError> {
        pollster::block_on(Self::request_headless())
    }

    pub async fn request_headless() -> Result<Self, BackendError> {
        let mut adapter = None;
        for backends in [Self::preferred_backends(), wgpu::Backends::all()] {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends,
                ..Default::default()
            });
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await;
            if adapter.is_some() {
                break;
            }
        }
        let adapter = adapter.ok_or(BackendError::AdapterNotFound)?;
        tracing::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Tessera GPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .map_err(|e| BackendError::RequestDevice(e.to_string()))?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    /// Get the preferred backend for the current platform
    fn preferred_backends() -> wgpu::Backends {
        #[cfg(target_os = "macos")]
        {
            wgpu::Backends::METAL
        }
        #[cfg(target_os = "windows")]
        {
            wgpu::Backends::DX12
        }
        #[cfg(target_os = "linux")]
        {
            wgpu::Backends::VULKAN
        }
        #[cfg(target_arch = "wasm32")]
        {
            wgpu::Backends::BROWSER_WEBGPU | wgpu::Backends::GL
        }
        #[cfg(not(any(
            target_os = "macos",
            target_os = "windows",
            target_os = "linux",
            target_arch = "wasm32"
        )))]
        {
            wgpu::Backends::PRIMARY
        }
    }

    /// Swap in a new device after the old one was lost
    ///
    /// Every native object is gone afterwards; the renderer notices through
    /// [`Backend::context_generation`] and recreates what it needs.
    pub fn replace_device(&mut self, device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) {
        let (width, height) = (self.screen.width, self.screen.height);
        let generation = self.generation + 1;
        tracing::warn!("replacing wgpu device, generation {}", generation);

        *self = Self::new(device, queue);
        self.generation = generation;
        self.resize_screen(width, height);
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Color texture of the root target
    pub fn screen_texture(&self) -> &wgpu::Texture {
        &self.screen.color
    }

    pub fn screen_view(&self) -> &wgpu::TextureView {
        &self.screen.view
    }

    /// Pipelines created so far, including rejected ones
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn sampler(&mut self, desc: &SamplerDesc) -> Arc<wgpu::Sampler> {
        let device = &self.device;
        self.samplers
            .entry(*desc)
            .or_insert_with(|| Arc::new(device.create_sampler(&convert::sampler_descriptor(desc))))
            .clone()
    }

    /// Drop cached bind groups that reference `matches`
    fn purge_bind_groups(&mut self, matches: impl Fn(&TextureBindKey) -> bool) {
        let stale: Vec<TextureBindKey> = self
            .bind_groups
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.bind_groups.pop(&key);
        }
    }

    fn has_recorded_work(&self) -> bool {
        !self.pending.is_empty() || self.encoder.is_some()
    }

    // ── Passes ──────────────────────────────────────────────────────────────

    fn pass_target(&mut self) -> Option<PassTarget> {
        let Some(handle) = self.target else {
            return Some(PassTarget {
                color: self.screen.view.clone(),
                depth_stencil: Some(self.screen.depth_stencil.clone()),
            });
        };

        let fb = self.framebuffers.get_mut(handle)?;
        let desc = fb.desc.as_ref()?;
        let color = desc.color.first().and_then(|h| self.textures.get(*h))?;
        let view = color.view.clone()?;
        let (width, height) = (color.width, color.height);

        let depth_stencil = if desc.stencil || desc.depth {
            let stale = fb.depth_stencil.as_ref().map_or(true, |(texture, _)| {
                texture.width() != width.max(1) || texture.height() != height.max(1)
            });
            if stale {
                fb.depth_stencil = Some(create_depth_stencil(&self.device, width, height));
            }
            fb.depth_stencil.as_ref().map(|(_, view)| view.clone())
        } else {
            None
        };

        Some(PassTarget {
            color: view,
            depth_stencil,
        })
    }

    /// Encode recorded draws and pending clears into one render pass
    fn end_pass(&mut self) {
        let clear = self.clear.take();
        if self.pending.is_empty() && clear.is_none() {
            return;
        }
        let draws = std::mem::take(&mut self.pending);
        let Some(target) = self.pass_target() else {
            tracing::warn!("dropping {} draws recorded without a color target", draws.len());
            return;
        };
        let clear = clear.unwrap_or_default();

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tessera Frame Encoder"),
            })
        });

        let color_load = match clear.color {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_stencil_attachment =
            target
                .depth_stencil
                .as_deref()
                .map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: clear.depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: clear.stencil.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Tessera Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &*target.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for draw in &draws {
            pass.set_pipeline(&draw.pipeline);
            pass.set_bind_group(0, &*draw.uniforms, &[draw.uniform_offset]);
            if let Some(textures) = &draw.textures {
                pass.set_bind_group(1, &**textures, &[]);
            }
            let [x, y, w, h] = draw.viewport;
            pass.set_viewport(x, y, w, h, 0.0, 1.0);
            let [sx, sy, sw, sh] = draw.scissor;
            pass.set_scissor_rect(sx, sy, sw, sh);
            pass.set_stencil_reference(draw.stencil_reference);
            for (slot, buffer) in draw.vertex.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }

            let command = &draw.command;
            let range = command.start..command.start + command.count;
            let instances = 0..command.instances;
            match &draw.index {
                Some((buffer, format)) => {
                    pass.set_index_buffer(buffer.slice(..), *format);
                    pass.draw_indexed(range, 0, instances);
                }
                None => pass.draw(range, instances),
            }
        }
    }

    /// Send everything recorded so far to the queue
    fn submit(&mut self) {
        self.end_pass();
        if !self.uniform_staging.is_empty() {
            self.queue
                .write_buffer(&self.uniform_ring, 0, &self.uniform_staging);
            self.uniform_staging.clear();
        }
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
        self.serial += 1;
    }

    // ── Draw recording ──────────────────────────────────────────────────────

    /// `(width, height, format, has depth-stencil)` of the bound target
    fn target_info(&self) -> Option<(u32, u32, wgpu::TextureFormat, bool)> {
        let Some(handle) = self.target else {
            return Some((self.screen.width, self.screen.height, COLOR_FORMAT, true));
        };
        let desc = self.framebuffers.get(handle)?.desc.as_ref()?;
        let color = desc.color.first().and_then(|h| self.textures.get(*h))?;
        color.view.as_ref()?;
        Some((color.width, color.height, color.format, desc.stencil || desc.depth))
    }

    /// Backend rectangle in target rows, top first
    fn to_target_rows(&self, rect: ViewRect, height: u32) -> ViewRect {
        match self.target {
            None => ViewRect::new(rect.x, height as i32 - rect.y - rect.height, rect.width, rect.height),
            Some(_) => rect,
        }
    }

    fn viewport_for(&self, width: u32, height: u32) -> [f32; 4] {
        let rect = self
            .state
            .viewport
            .map(|v| self.to_target_rows(v, height))
            .unwrap_or(ViewRect::new(0, 0, width as i32, height as i32));
        [
            rect.x as f32,
            rect.y as f32,
            rect.width.max(1) as f32,
            rect.height.max(1) as f32,
        ]
    }

    /// Scissor clamped to the target, `None` when nothing would pass
    fn scissor_for(&self, width: u32, height: u32) -> Option<[u32; 4]> {
        let Some(rect) = self.state.scissor else {
            return Some([0, 0, width, height]);
        };
        let rect = self.to_target_rows(rect, height);
        let x0 = rect.x.clamp(0, width as i32);
        let y0 = rect.y.clamp(0, height as i32);
        let x1 = (rect.x + rect.width).clamp(0, width as i32);
        let y1 = (rect.y + rect.height).clamp(0, height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some([x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32])
    }

    fn pipeline(&mut self, key: PipelineKey) -> Option<Arc<wgpu::RenderPipeline>> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return pipeline.clone();
        }
        let program = self.programs.get(key.program)?;

        let attributes: SmallVec<[Vec<wgpu::VertexAttribute>; 2]> = key
            .buffers
            .iter()
            .map(|shape| {
                shape
                    .attributes
                    .iter()
                    .filter_map(|a| {
                        let format = convert::vertex_format(&a.format);
                        if format.is_none() {
                            tracing::warn!(
                                "attribute {} of '{}' has no wgpu vertex format: {:?}",
                                a.location,
                                program.name,
                                a.format
                            );
                        }
                        Some(wgpu::VertexAttribute {
                            format: format?,
                            offset: a.offset as u64,
                            shader_location: a.location,
                        })
                    })
                    .collect()
            })
            .collect();
        let buffers: SmallVec<[wgpu::VertexBufferLayout<'_>; 2]> = key
            .buffers
            .iter()
            .zip(&attributes)
            .map(|(shape, attributes)| wgpu::VertexBufferLayout {
                array_stride: shape.stride as u64,
                step_mode: if shape.instance {
                    wgpu::VertexStepMode::Instance
                } else {
                    wgpu::VertexStepMode::Vertex
                },
                attributes,
            })
            .collect();

        let depth_stencil = key.depth_stencil.then(|| {
            let face = convert::stencil_face(key.stencil);
            wgpu::DepthStencilState {
                format: DEPTH_STENCIL_FORMAT,
                depth_write_enabled: key.depth_test && key.depth_write,
                depth_compare: if key.depth_test {
                    wgpu::CompareFunction::LessEqual
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: wgpu::StencilState {
                    front: face,
                    back: face,
                    read_mask: 0xff,
                    write_mask: 0xff,
                },
                bias: wgpu::DepthBiasState::default(),
            }
        });

        let primitive = wgpu::PrimitiveState {
            topology: convert::topology(key.mode),
            strip_index_format: key.strip_index.map(convert::index_format),
            front_face: if key.clockwise {
                wgpu::FrontFace::Cw
            } else {
                wgpu::FrontFace::Ccw
            },
            cull_mode: key.cull.then_some(wgpu::Face::Back),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        };

        let targets = [Some(wgpu::ColorTargetState {
            format: key.format,
            blend: key.blend.as_ref().map(convert::blend_state),
            write_mask: if key.color_write {
                wgpu::ColorWrites::ALL
            } else {
                wgpu::ColorWrites::empty()
            },
        })];

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&program.name),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some("vs_main"),
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some("fs_main"),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        let pipeline = match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => {
                tracing::warn!("pipeline for '{}' rejected: {}", program.name, error);
                None
            }
            None => Some(Arc::new(pipeline)),
        };

        tracing::debug!(
            "created pipeline #{} for '{}'",
            self.pipelines.len() + 1,
            program.name
        );
        self.pipelines.insert(key, pipeline.clone());
        pipeline
    }

    fn texture_bind_group(&mut self, program: ProgramHandle) -> Option<Arc<wgpu::BindGroup>> {
        let gpu = self.programs.get(program)?;
        gpu.textures_layout.as_ref()?;

        let mut slots: SmallVec<[TextureSlot; 16]> = SmallVec::new();
        for &unit in &gpu.sampler_units {
            let slot = self
                .units
                .get(unit as usize)
                .copied()
                .flatten()
                .and_then(|h| {
                    let texture = self.textures.get(h)?;
                    texture.view.as_ref()?;
                    Some((h, texture.storage, texture.sampler))
                });
            slots.push(slot);
        }

        let serial = self.serial;
        for (handle, _, _) in slots.iter().flatten() {
            if let Some(texture) = self.textures.get_mut(*handle) {
                texture.last_use = serial;
            }
        }

        let key = TextureBindKey { program, slots };
        if let Some(group) = self.bind_groups.get(&key) {
            return Some(group.clone());
        }

        let fallback = SamplerDesc {
            wrap_mode: WrapMode::Clamp,
            scale_mode: ScaleMode::Linear,
            mipmap: false,
            anisotropy: 1,
        };
        let mut resources = Vec::with_capacity(key.slots.len());
        for slot in &key.slots {
            let (view, desc) = match slot {
                Some((handle, _, desc)) => (self.textures.get(*handle)?.view.clone()?, *desc),
                None => (self.empty_view.clone(), fallback),
            };
            resources.push((view, self.sampler(&desc)));
        }

        let entries: Vec<wgpu::BindGroupEntry<'_>> = resources
            .iter()
            .enumerate()
            .flat_map(|(i, (view, sampler))| {
                [
                    wgpu::BindGroupEntry {
                        binding: (i * 2) as u32,
                        resource: wgpu::BindingResource::TextureView(&**view),
                    },
                    wgpu::BindGroupEntry {
                        binding: (i * 2 + 1) as u32,
                        resource: wgpu::BindingResource::Sampler(&**sampler),
                    },
                ]
            })
            .collect();

        let layout = self.programs.get(program)?.textures_layout.as_ref()?;
        let group = Arc::new(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tessera textures"),
            layout,
            entries: &entries,
        }));
        self.bind_groups.put(key, group.clone());
        Some(group)
    }
}

impl Backend for WgpuBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn context_generation(&self) -> u64 {
        self.generation
    }

    fn resize_screen(&mut self, width: u32, height: u32) {
        if self.screen.width == width.max(1) && self.screen.height == height.max(1) {
            return;
        }
        if self.target.is_none() {
            self.end_pass();
        }
        tracing::debug!("screen resized to {}x{}", width, height);
        self.screen = Screen::new(&self.device, width, height);
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.submit();
        let _ = self.device.poll(wgpu::Maintain::Poll);
        Ok(())
    }

    // ── Textures ────────────────────────────────────────────────────────────

    fn create_texture(&mut self, target: TextureTarget) -> TextureHandle {
        self.textures.insert(GpuTexture {
            target,
            texture: None,
            view: None,
            format: COLOR_FORMAT,
            width: 0,
            height: 0,
            layers: 1,
            sampler: SamplerDesc {
                wrap_mode: WrapMode::Clamp,
                scale_mode: ScaleMode::Linear,
                mipmap: false,
                anisotropy: 1,
            },
            storage: 0,
            last_use: 0,
        })
    }

    fn upload_texture(&mut self, handle: TextureHandle, upload: &TextureUpload<'_>) {
        let Some(format) = convert::texture_format(upload.format, upload.pixel_type) else {
            tracing::warn!(
                "no wgpu storage for {:?}/{:?}, skipping upload",
                upload.format,
                upload.pixel_type
            );
            return;
        };
        if upload.width == 0 || upload.height == 0 {
            return;
        }
        let in_flight = self
            .textures
            .get(handle)
            .is_some_and(|t| t.last_use == self.serial);
        if in_flight && upload.data.is_some() && self.has_recorded_work() {
            // queued writes land before recorded draws
            self.submit();
        }

        let device = &self.device;
        let Some(texture) = self.textures.get_mut(handle) else {
            return;
        };
        let reallocate = texture.texture.is_none()
            || texture.width != upload.width
            || texture.height != upload.height
            || texture.format != format
            || upload.layer >= texture.layers;
        if reallocate {
            let layers = match texture.target {
                TextureTarget::TextureCube => 6,
                _ => texture.layers.max(upload.layer + 1),
            };
            let (storage, view) = create_color(device, "tessera texture", format, upload.width, upload.height, layers);
            texture.texture = Some(storage);
            texture.view = Some(view);
            texture.format = format;
            texture.width = upload.width;
            texture.height = upload.height;
            texture.layers = layers;
            texture.storage += 1;
        }

        let Some(data) = upload.data else {
            return;
        };
        let Some(storage) = texture.texture.as_ref() else {
            return;
        };
        let bpp = bytes_per_pixel(format);
        let pixels = match convert::prepare_pixels(data, upload.format, upload.pixel_type, upload.premultiply) {
            Some(converted) => Cow::Owned(converted),
            None => Cow::Borrowed(data),
        };
        let expected = (upload.width * upload.height * bpp) as usize;
        if pixels.len() < expected {
            tracing::warn!(
                "texture upload of {} bytes, {}x{} needs {}",
                pixels.len(),
                upload.width,
                upload.height,
                expected
            );
            return;
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: storage,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: upload.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &pixels[..expected],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(upload.width * bpp),
                rows_per_image: Some(upload.height),
            },
            wgpu::Extent3d {
                width: upload.width,
                height: upload.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn allocate_texture_layers(
        &mut self,
        handle: TextureHandle,
        format: PixelFormat,
        pixel_type: PixelType,
        width: u32,
        height: u32,
        layers: u32,
    ) {
        let Some(format) = convert::texture_format(format, pixel_type) else {
            tracing::warn!("no wgpu storage for {:?}/{:?}", format, pixel_type);
            return;
        };
        let device = &self.device;
        let Some(texture) = self.textures.get_mut(handle) else {
            return;
        };
        let (storage, view) = create_color(device, "tessera texture array", format, width, height, layers);
        texture.texture = Some(storage);
        texture.view = Some(view);
        texture.format = format;
        texture.width = width.max(1);
        texture.height = height.max(1);
        texture.layers = layers.max(1);
        texture.storage += 1;
    }

    fn set_sampler(&mut self, handle: TextureHandle, sampler: &SamplerDesc) {
        if let Some(texture) = self.textures.get_mut(handle) {
            texture.sampler = *sampler;
        }
    }

    fn generate_mipmaps(&mut self, handle: TextureHandle) {
        // storage is single-level; samplers fall back to the base level
        tracing::trace!("mipmap generation skipped for {:?}", handle);
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        self.textures.remove(handle);
        for unit in self.units.iter_mut().filter(|u| **u == Some(handle)) {
            *unit = None;
        }
        self.purge_bind_groups(|key| key.slots.iter().flatten().any(|(h, _, _)| *h == handle));
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let unit = unit as usize;
        if self.units.len() <= unit {
            self.units.resize(unit + 1, None);
        }
        self.units[unit] = texture;
    }

    // ── Buffers ─────────────────────────────────────────────────────────────

    fn create_buffer(&mut self, kind: BufferKind) -> BufferHandle {
        self.buffers.insert(GpuBuffer {
            kind,
            buffer: None,
            size: 0,
            last_use: 0,
        })
    }

    fn upload_buffer(&mut self, handle: BufferHandle, data: &[u8], mode: BufferUpload) {
        let serial = self.serial;
        let device = &self.device;
        let Some(buffer) = self.buffers.get_mut(handle) else {
            return;
        };
        let padded = align4(data.len()).max(4);
        let contents: Cow<'_, [u8]> = if padded == data.len() {
            Cow::Borrowed(data)
        } else {
            let mut owned = data.to_vec();
            owned.resize(padded, 0);
            Cow::Owned(owned)
        };

        // recorded draws keep the storage they were recorded with
        let in_flight = buffer.last_use == serial;
        let reallocate = buffer.buffer.is_none()
            || in_flight
            || buffer.size < padded
            || (mode == BufferUpload::Allocate && buffer.size != padded);
        if reallocate {
            let usage = match buffer.kind {
                BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
                BufferKind::Index(_) => wgpu::BufferUsages::INDEX,
                BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
            } | wgpu::BufferUsages::COPY_DST;
            buffer.buffer = Some(Arc::new(device.create_buffer_init(
                &wgpu::util::BufferInitDescriptor {
                    label: Some("tessera buffer"),
                    contents: &contents,
                    usage,
                },
            )));
            buffer.size = padded;
            buffer.last_use = 0;
        } else if let Some(native) = &buffer.buffer {
            self.queue.write_buffer(native, 0, &contents);
        }
    }

    fn delete_buffer(&mut self, handle: BufferHandle) {
        self.buffers.remove(handle);
    }

    // ── Programs ────────────────────────────────────────────────────────────

    fn create_program(&mut self, program: &Program) -> Result<ProgramHandle, BackendError> {
        let (slots, block_size) = block_layout(program);
        let samplers: Vec<&String> = program
            .uniforms()
            .iter()
            .filter(|(_, ty)| **ty == UniformType::Sampler)
            .map(|(name, _)| name)
            .collect();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(program.name()),
                source: wgpu::ShaderSource::Wgsl(program.source().into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ShaderCompile {
                name: program.name().to_string(),
                message: error.to_string(),
            });
        }

        let uniforms_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("tessera uniforms layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(block_size as u64),
                    },
                    count: None,
                }],
            });

        let textures_layout = (!samplers.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..samplers.len() as u32)
                .flat_map(|i| {
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: i * 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: i * 2 + 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ]
                })
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("tessera textures layout"),
                    entries: &entries,
                })
        });

        let mut group_layouts = vec![&uniforms_layout];
        group_layouts.extend(textures_layout.as_ref());
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(program.name()),
                bind_group_layouts: &group_layouts,
                push_constant_ranges: &[],
            });

        let uniform_group = Arc::new(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tessera uniforms"),
            layout: &uniforms_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.uniform_ring,
                    offset: 0,
                    size: NonZeroU64::new(block_size as u64),
                }),
            }],
        }));

        let sampler_index = samplers
            .iter()
            .enumerate()
            .map(|(i, name)| ((*name).clone(), i))
            .collect();
        let sampler_units = (0..samplers.len() as u32).collect();

        Ok(self.programs.insert(GpuProgram {
            name: program.name().to_string(),
            module,
            layout,
            textures_layout,
            uniform_group,
            block: vec![0; block_size as usize],
            slots,
            sampler_index,
            sampler_units,
        }))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program);
        self.pipelines.retain(|key, _| key.program != program);
        self.purge_bind_groups(|key| key.program == program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.state.program = Some(program);
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: &UniformValue) {
        let Some(gpu) = self.programs.get_mut(program) else {
            return;
        };
        if let Some(&index) = gpu.sampler_index.get(name) {
            if let UniformValue::Int(unit) = value {
                gpu.sampler_units[index] = (*unit).max(0) as u32;
            }
            return;
        }
        let Some(slot) = gpu.slots.get(name) else {
            return;
        };
        let range = slot.offset as usize..(slot.offset + slot.size) as usize;
        if let Some(out) = gpu.block.get_mut(range) {
            value.write_block(out);
        }
    }

    // ── Framebuffers ────────────────────────────────────────────────────────

    fn create_framebuffer(&mut self) -> FramebufferHandle {
        self.framebuffers.insert(GpuFramebuffer::default())
    }

    fn update_framebuffer(&mut self, handle: FramebufferHandle, desc: &FramebufferDesc) {
        if desc.color.len() > 1 {
            tracing::warn!("wgpu backend renders to the first of {} color attachments", desc.color.len());
        }
        if self.target == Some(handle) {
            self.end_pass();
        }
        if let Some(fb) = self.framebuffers.get_mut(handle) {
            fb.desc = Some(desc.clone());
            if !desc.stencil && !desc.depth {
                fb.depth_stencil = None;
            }
        }
    }

    fn delete_framebuffer(&mut self, handle: FramebufferHandle) {
        if self.target == Some(handle) {
            self.end_pass();
            self.target = None;
        }
        self.framebuffers.remove(handle);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        if self.target != framebuffer {
            self.end_pass();
            self.target = framebuffer;
        }
    }

    fn set_viewport(&mut self, viewport: ViewRect) {
        self.state.viewport = Some(viewport);
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>, stencil: Option<u32>) {
        // clears are load ops, so draws before them need their own pass
        if !self.pending.is_empty() {
            self.end_pass();
        }
        let ops = self.clear.get_or_insert_with(ClearOps::default);
        if color.is_some() {
            ops.color = color;
        }
        if depth.is_some() {
            ops.depth = depth;
        }
        if stencil.is_some() {
            ops.stencil = stencil;
        }
    }

    // ── Fixed-function state ────────────────────────────────────────────────

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.state.blend = blend;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
    }

    fn set_depth_mask(&mut self, enabled: bool) {
        self.state.depth_write = enabled;
    }

    fn set_cull_face(&mut self, enabled: bool) {
        self.state.cull = enabled;
    }

    fn set_front_face(&mut self, clockwise: bool) {
        self.state.clockwise = clockwise;
    }

    fn set_polygon_offset(&mut self, _enabled: bool) {}

    fn set_color_mask(&mut self, enabled: bool) {
        self.state.color_write = enabled;
    }

    fn set_stencil(&mut self, stencil: Option<StencilState>) {
        self.state.stencil = stencil;
    }

    fn set_scissor(&mut self, rect: Option<ViewRect>) {
        self.state.scissor = rect;
    }

    // ── Drawing ─────────────────────────────────────────────────────────────

    fn set_vertex_layout(&mut self, layout: &VertexLayout) {
        self.state.layout = layout.clone();
    }

    fn draw(&mut self, draw: &DrawCommand) {
        if draw.count == 0 || draw.instances == 0 {
            return;
        }
        let Some(program) = self.state.program else {
            tracing::trace!("draw without a program");
            return;
        };
        let Some((width, height, format, depth_stencil)) = self.target_info() else {
            tracing::warn!("draw into a framebuffer without color storage");
            return;
        };
        let Some(scissor) = self.scissor_for(width, height) else {
            return;
        };
        let viewport = self.viewport_for(width, height);

        let layout = &self.state.layout;
        let key = PipelineKey {
            program,
            format,
            depth_stencil,
            blend: self.state.blend,
            color_write: self.state.color_write,
            stencil: self
                .state
                .stencil
                .filter(|_| depth_stencil)
                .map(|s| s.pass_op),
            depth_test: self.state.depth_test,
            depth_write: self.state.depth_write,
            cull: self.state.cull,
            clockwise: self.state.clockwise,
            mode: draw.mode,
            strip_index: draw.index.filter(|_| convert::is_strip(draw.mode)),
            buffers: layout
                .buffers
                .iter()
                .map(|b| BufferShape {
                    stride: b.stride,
                    instance: b.instance,
                    attributes: b.attributes.clone(),
                })
                .collect(),
        };

        let serial = self.serial;
        let mut vertex: SmallVec<[Arc<wgpu::Buffer>; 2]> = SmallVec::new();
        for b in &self.state.layout.buffers {
            let Some(buffer) = self.buffers.get_mut(b.buffer) else {
                return;
            };
            let Some(native) = buffer.buffer.clone() else {
                return;
            };
            buffer.last_use = serial;
            vertex.push(native);
        }
        let index = match (draw.index, self.state.layout.index) {
            (Some(_), Some((handle, format))) => {
                let Some(buffer) = self.buffers.get_mut(handle) else {
                    return;
                };
                let Some(native) = buffer.buffer.clone() else {
                    return;
                };
                buffer.last_use = serial;
                Some((native, convert::index_format(format)))
            }
            (Some(_), None) => {
                tracing::warn!("indexed draw without an index buffer");
                return;
            }
            (None, _) => None,
        };

        let Some(pipeline) = self.pipeline(key) else {
            return;
        };
        let textures = self.texture_bind_group(program);
        let Some(gpu) = self.programs.get(program) else {
            return;
        };
        if gpu.textures_layout.is_some() && textures.is_none() {
            return;
        }

        let stride = align256(gpu.block.len() as u64);
        if self.uniform_staging.len() as u64 + stride > UNIFORM_RING_SIZE {
            self.submit();
        }
        let Some(gpu) = self.programs.get(program) else {
            return;
        };
        let uniform_offset = self.uniform_staging.len();
        self.uniform_staging.extend_from_slice(&gpu.block);
        self.uniform_staging.resize(uniform_offset + stride as usize, 0);
        let uniforms = gpu.uniform_group.clone();

        if let Some(handle) = self.target {
            if let Some(color) = self
                .framebuffers
                .get(handle)
                .and_then(|fb| fb.desc.as_ref())
                .and_then(|d| d.color.first().copied())
                .and_then(|h| self.textures.get_mut(h))
            {
                color.last_use = self.serial;
            }
        }

        self.pending.push(RecordedDraw {
            pipeline,
            uniforms,
            uniform_offset: uniform_offset as u32,
            textures,
            vertex,
            index,
            viewport,
            scissor,
            stencil_reference: self.state.stencil.map_or(0, |s| s.reference),
            command: *draw,
        });
    }

    fn read_pixels(
        &mut self,
        framebuffer: Option<FramebufferHandle>,
        rect: ViewRect,
    ) -> Result<Vec<u8>, BackendError> {
        self.submit();

        let (texture, width, height) = match framebuffer {
            None => (&self.screen.color, self.screen.width, self.screen.height),
            Some(handle) => {
                let color = self
                    .framebuffers
                    .get(handle)
                    .and_then(|fb| fb.desc.as_ref())
                    .and_then(|d| d.color.first().copied())
                    .and_then(|h| self.textures.get(h))
                    .ok_or_else(|| BackendError::Readback("framebuffer has no color storage".to_string()))?;
                if color.format != COLOR_FORMAT {
                    return Err(BackendError::Unsupported(format!("reading back {:?}", color.format)));
                }
                let texture = color
                    .texture
                    .as_ref()
                    .ok_or_else(|| BackendError::Readback("framebuffer has no color storage".to_string()))?;
                (texture, color.width, color.height)
            }
        };

        let top = match framebuffer {
            None => height as i32 - rect.y - rect.height,
            Some(_) => rect.y,
        };
        let x0 = rect.x.clamp(0, width as i32) as u32;
        let y0 = top.clamp(0, height as i32) as u32;
        let x1 = (rect.x + rect.width).clamp(0, width as i32) as u32;
        let y1 = (top + rect.height).clamp(0, height as i32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return Ok(Vec::new());
        }
        let (w, h) = (x1 - x0, y1 - y0);

        let row_bytes = w * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = row_bytes.div_ceil(align) * align;
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera readback"),
            size: padded_row_bytes as u64 * h as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tessera Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: x0, y: y0, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(h),
                },
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::Readback(e.to_string()))?
            .map_err(|e| BackendError::Readback(e.to_string()))?;

        let mut pixels = Vec::with_capacity((row_bytes * h) as usize);
        {
            let mapped = slice.get_mapped_range();
            let rows: Vec<&[u8]> = mapped
                .chunks(padded_row_bytes as usize)
                .map(|row| &row[..row_bytes as usize])
                .collect();
            // screen rows are returned bottom first, like its coordinates
            if framebuffer.is_none() {
                rows.iter().rev().for_each(|row| pixels.extend_from_slice(row));
            } else {
                rows.iter().for_each(|row| pixels.extend_from_slice(row));
            }
        }
        readback.unmap();
        Ok(pixels)
    }
}
