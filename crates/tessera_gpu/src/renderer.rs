//! Frame orchestration
//!
//! [`Systems`] owns every GPU-facing system and is what the batch, filter and
//! mask code operate on. [`Renderer`] pairs it with a [`Backend`] and walks a
//! flat list of [`RenderItem`]s per frame.

use std::fmt;
use std::rc::Rc;

use tessera_core::{Batchable, DrawMode, Geometry, Matrix, Rectangle};

use crate::backend::{Backend, Capabilities};
use crate::batch::BatchRenderer;
use crate::config::{apply_renderer_config_overrides, log_renderer_config, RendererConfig};
use crate::error::{RendererError, Result};
use crate::filter::{Filter, FilterSystem};
use crate::framebuffer::FramebufferSystem;
use crate::geometry_system::GeometrySystem;
use crate::mask::{MaskData, MaskSystem};
use crate::projection::ProjectionSystem;
use crate::render_target::{ClearBits, RenderTargetSystem};
use crate::render_texture::RenderTexture;
use crate::shader::{Shader, ShaderSystem, UniformGroup};
use crate::shaders::batch_program;
use crate::state::{State, StateSystem};
use crate::texture_gc::TextureGc;
use crate::texture_system::TextureSystem;

/// Every system a frame touches, minus the backend
pub struct Systems {
    pub config: RendererConfig,
    pub capabilities: Capabilities,
    /// Screen size in logical units
    pub screen: Rectangle,
    /// Device pixels per logical unit of the screen
    pub resolution: f32,
    pub state: StateSystem,
    pub textures: TextureSystem,
    pub texture_gc: TextureGc,
    pub geometry: GeometrySystem,
    pub shaders: ShaderSystem,
    pub framebuffers: FramebufferSystem,
    pub projection: ProjectionSystem,
    pub render_target: RenderTargetSystem,
    pub mask: MaskSystem,
    pub filter: FilterSystem,
    pub batch: BatchRenderer,
}

impl fmt::Debug for Systems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Systems")
            .field("screen", &self.screen)
            .field("resolution", &self.resolution)
            .field("capabilities", &self.capabilities)
            .field("render_target", &self.render_target)
            .field("mask", &self.mask)
            .field("filter", &self.filter)
            .finish()
    }
}

fn pixels(size: f32, resolution: f32) -> u32 {
    (size * resolution).round().max(0.0) as u32
}

impl Systems {
    pub fn new(config: RendererConfig, capabilities: Capabilities) -> Self {
        let config = apply_renderer_config_overrides(config, &capabilities);
        log_renderer_config(&config, &capabilities);

        let units = config.texture_units(&capabilities);
        let mut shaders = ShaderSystem::new();
        let program = shaders.program(batch_program(units));
        let batch = BatchRenderer::new(
            Shader::new(program, UniformGroup::new(true)),
            config.batch_size,
            units,
        );

        let mut render_target = RenderTargetSystem::new();
        render_target.clear_color = config.background.to_array();

        let mut systems = Self {
            capabilities,
            screen: Rectangle::EMPTY,
            resolution: config.resolution,
            state: StateSystem::new(),
            textures: TextureSystem::new(capabilities.max_texture_units, capabilities.max_anisotropy),
            texture_gc: TextureGc::new(config.gc_mode, config.gc_max_idle, config.gc_check_interval),
            geometry: GeometrySystem::new(),
            shaders,
            framebuffers: FramebufferSystem::new(),
            projection: ProjectionSystem::new(),
            render_target,
            mask: MaskSystem::new(config.enable_scissor),
            filter: FilterSystem::new(),
            batch,
            config,
        };
        systems.resize(systems.config.width, systems.config.height);
        systems
    }

    /// Screen size in logical units
    pub fn resize(&mut self, width: f32, height: f32) {
        self.screen = Rectangle::new(0.0, 0.0, width, height);
        self.config.width = width;
        self.config.height = height;

        let (w, h) = (pixels(width, self.resolution), pixels(height, self.resolution));
        self.framebuffers.set_screen_size(w, h);
        self.projection.set_default_frame(self.screen);
        if self.config.full_screen_filter_pool {
            self.filter.texture_pool.set_screen_size(w, h);
        } else {
            self.filter.texture_pool.disable_full_screen();
        }
    }

    /// Screen size in device pixels
    pub fn screen_pixels(&self) -> (u32, u32) {
        (
            pixels(self.screen.width, self.resolution),
            pixels(self.screen.height, self.resolution),
        )
    }

    /// Release GPU objects whose logical owners were disposed
    pub fn drain_disposals(&mut self, backend: &mut dyn Backend) {
        self.textures.drain_disposals(backend);
        self.geometry.drain_disposals(backend);
        self.framebuffers.drain_disposals(backend);
    }

    /// Forget every native object after the backend lost them
    pub fn context_change(&mut self) {
        self.state.context_change();
        self.textures.context_change();
        self.geometry.context_change();
        self.shaders.context_change();
        self.framebuffers.context_change();
        self.filter.context_change();
        self.mask.context_change();
    }

    /// Drop mask and filter stacks a frame left behind when it returned early
    fn reset_stacks(&mut self) {
        if !self.mask.is_empty() || self.filter.depth() > 0 {
            tracing::warn!(
                filters = self.filter.depth(),
                "discarding mask and filter stacks left by an interrupted frame"
            );
        }
        self.mask.reset();
        self.filter.reset();
    }

    /// Draw a mesh with its own shader, outside the batch
    pub fn render_mesh(&mut self, backend: &mut dyn Backend, mesh: &Mesh) -> Result<()> {
        self.flush(backend)?;

        self.state.set(backend, mesh.state);
        self.shaders
            .bind(backend, &mut self.textures, &mesh.shader, false)?;
        self.geometry
            .bind(backend, &mesh.geometry, &mesh.shader.program)?;
        self.geometry.draw(
            backend,
            &mesh.geometry,
            mesh.draw_mode,
            mesh.size,
            mesh.start,
            mesh.instances,
        );
        Ok(())
    }
}

/// Geometry drawn with a custom shader
#[derive(Debug)]
pub struct Mesh {
    pub geometry: Geometry,
    pub shader: Shader,
    pub state: State,
    pub draw_mode: DrawMode,
    /// First index (or vertex) to draw
    pub start: u32,
    /// Elements to draw; `None` draws all
    pub size: Option<u32>,
    pub instances: Option<u32>,
}

impl Mesh {
    pub fn new(geometry: Geometry, shader: Shader) -> Self {
        let draw_mode = geometry.draw_mode;
        Self {
            geometry,
            shader,
            state: State::for_2d(),
            draw_mode,
            start: 0,
            size: None,
            instances: None,
        }
    }
}

/// One step of a frame
pub enum RenderItem<'a> {
    /// Stage in the batch
    Batch(&'a dyn Batchable),
    Mesh(&'a Mesh),
    PushMask {
        /// Id of the masked object, matched on pop
        target: u64,
        mask: MaskData,
    },
    PopMask {
        target: u64,
    },
    PushFilter {
        target: u64,
        /// World bounds of the filtered content
        bounds: Rectangle,
        filters: Vec<Rc<dyn Filter>>,
    },
    PopFilter,
}

impl fmt::Debug for RenderItem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderItem::Batch(item) => f
                .debug_struct("Batch")
                .field("vertices", &item.vertex_count())
                .finish(),
            RenderItem::Mesh(mesh) => f.debug_tuple("Mesh").field(mesh).finish(),
            RenderItem::PushMask { target, mask } => f
                .debug_struct("PushMask")
                .field("target", target)
                .field("mask", mask)
                .finish(),
            RenderItem::PopMask { target } => {
                f.debug_struct("PopMask").field("target", target).finish()
            }
            RenderItem::PushFilter {
                target,
                bounds,
                filters,
            } => f
                .debug_struct("PushFilter")
                .field("target", target)
                .field("bounds", bounds)
                .field("filters", &filters.len())
                .finish(),
            RenderItem::PopFilter => f.write_str("PopFilter"),
        }
    }
}

/// Per-frame options for [`Renderer::render`]
#[derive(Debug, Clone, Default)]
pub struct RenderOptions<'a> {
    /// Render into this texture instead of the screen
    pub target: Option<&'a RenderTexture>,
    /// Clear first; `None` follows the config
    pub clear: Option<bool>,
    /// Applied after the projection
    pub transform: Option<Matrix>,
}

/// Draws frames through a backend
pub struct Renderer<B: Backend> {
    backend: B,
    systems: Systems,
    context_generation: u64,
    /// Whether each pushed filter item actually pushed a chain
    filter_pushes: Vec<bool>,
}

impl<B: Backend> fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("systems", &self.systems)
            .field("context_generation", &self.context_generation)
            .finish()
    }
}

impl<B: Backend> Renderer<B> {
    pub fn new(mut backend: B, config: RendererConfig) -> Self {
        let capabilities = backend.capabilities();
        let systems = Systems::new(config, capabilities);
        let (w, h) = systems.screen_pixels();
        backend.resize_screen(w, h);
        let context_generation = backend.context_generation();

        Self {
            backend,
            systems,
            context_generation,
            filter_pushes: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn systems(&self) -> &Systems {
        &self.systems
    }

    pub fn systems_mut(&mut self) -> &mut Systems {
        &mut self.systems
    }

    pub fn config(&self) -> &RendererConfig {
        &self.systems.config
    }

    /// Resize the screen, in logical units
    pub fn resize(&mut self, width: f32, height: f32) {
        self.systems.resize(width, height);
        let (w, h) = self.systems.screen_pixels();
        self.backend.resize_screen(w, h);
    }

    /// Clear the bound target with its clear color
    pub fn clear(&mut self) {
        self.systems
            .clear_render_target(&mut self.backend, None, ClearBits::COLOR);
    }

    /// Unload idle GPU textures now; returns how many were released
    pub fn run_texture_gc(&mut self) -> usize {
        self.systems
            .texture_gc
            .run(&mut self.systems.textures, &mut self.backend)
    }

    fn check_context(&mut self) {
        let generation = self.backend.context_generation();
        if generation != self.context_generation {
            tracing::info!(
                "graphics context changed ({} -> {}), rebuilding GPU tables",
                self.context_generation,
                generation
            );
            self.systems.context_change();
            self.context_generation = generation;
        }
    }

    /// Draw `items` in order into the screen or `options.target`
    pub fn render(&mut self, items: &[RenderItem<'_>], options: RenderOptions<'_>) -> Result<()> {
        self.check_context();
        self.backend.begin_frame();
        self.filter_pushes.clear();

        let backend: &mut dyn Backend = &mut self.backend;
        let systems = &mut self.systems;
        systems.drain_disposals(backend);
        systems.reset_stacks();

        systems.projection.transform = options.transform;
        systems.bind_render_target(backend, options.target, None, None)?;
        if options.clear.unwrap_or(systems.config.clear_before_render) {
            systems.clear_render_target(backend, None, ClearBits::ALL);
        }

        for item in items {
            match item {
                RenderItem::Batch(item) => systems.batch_render(backend, *item)?,
                RenderItem::Mesh(mesh) => systems.render_mesh(backend, mesh)?,
                RenderItem::PushMask { target, mask } => {
                    systems.push_mask(backend, *target, mask.clone())?
                }
                RenderItem::PopMask { target } => systems.pop_mask(backend, *target)?,
                RenderItem::PushFilter {
                    target,
                    bounds,
                    filters,
                } => {
                    systems.flush(backend)?;
                    match systems.push_filters(backend, *target, *bounds, filters) {
                        Ok(()) => self.filter_pushes.push(true),
                        Err(RendererError::EmptyFilterChain(target)) => {
                            tracing::debug!("no enabled filters for {}, drawing unfiltered", target);
                            self.filter_pushes.push(false);
                        }
                        Err(err) => return Err(err),
                    }
                }
                RenderItem::PopFilter => match self.filter_pushes.pop() {
                    Some(true) => systems.pop_filters(backend)?,
                    Some(false) => systems.flush(backend)?,
                    None => tracing::warn!("filter pop without a matching push, ignoring"),
                },
            }
        }

        // unwind leftovers innermost first; masks pushed inside a filter live
        // on the filter's target and come off before the filter does
        loop {
            if let Some(owner) = systems.current_mask_target() {
                tracing::warn!(owner, "unbalanced mask push at end of frame");
                systems.pop_mask(backend, owner)?;
            } else if let Some(pushed) = self.filter_pushes.pop() {
                tracing::warn!("unbalanced filter push at end of frame");
                if pushed && systems.filter.depth() > 0 {
                    systems.pop_filters(backend)?;
                }
            } else {
                break;
            }
        }
        systems.flush(backend)?;

        let to_screen = options.target.is_none();
        systems
            .texture_gc
            .postrender(&mut systems.textures, backend, to_screen);
        systems.projection.transform = None;

        self.backend.end_frame()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, RecordingBackend};
    use crate::filter::ShaderFilter;
    use crate::shaders;
    use tessera_core::{BaseTexture, BatchElement, Buffer, Texture};

    fn renderer() -> Renderer<RecordingBackend> {
        Renderer::new(
            RecordingBackend::default(),
            RendererConfig::default().with_size(64.0, 32.0),
        )
    }

    fn quad(x: f32) -> BatchElement {
        let base = BaseTexture::from_buffer(vec![255; 16], 2, 2, Default::default()).unwrap();
        BatchElement::rectangle(
            Texture::from_base(base),
            Rectangle::new(x, 0.0, 8.0, 8.0),
            Matrix::IDENTITY,
        )
    }

    #[test]
    fn new_sizes_the_backend_screen() {
        let renderer = Renderer::new(
            RecordingBackend::default(),
            RendererConfig::default()
                .with_size(64.0, 32.0)
                .with_resolution(2.0),
        );

        assert_eq!(renderer.backend().screen_size(), (128, 64));
        assert_eq!(renderer.systems().view_height(), 64.0);
    }

    #[test]
    fn frame_clears_then_batches() {
        let mut renderer = renderer();
        let a = quad(0.0);
        let b = quad(10.0);

        renderer
            .render(&[RenderItem::Batch(&a), RenderItem::Batch(&b)], RenderOptions::default())
            .unwrap();

        let commands = renderer.backend().commands();
        let clear = commands
            .iter()
            .position(|c| matches!(c, Command::Clear { .. }));
        let draw = commands.iter().position(|c| matches!(c, Command::Draw(_)));
        assert!(clear.is_some());
        assert!(clear < draw);
        assert_eq!(renderer.backend().draws().len(), 1);
        assert_eq!(renderer.backend().draws()[0].count, 12);
        assert_eq!(renderer.backend().count(|c| *c == Command::EndFrame), 1);
    }

    #[test]
    fn clear_can_be_skipped() {
        let mut renderer = renderer();

        renderer
            .render(
                &[],
                RenderOptions {
                    clear: Some(false),
                    ..RenderOptions::default()
                },
            )
            .unwrap();

        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, Command::Clear { .. })),
            0
        );
    }

    #[test]
    fn meshes_break_the_batch() {
        let mut renderer = renderer();
        let program = renderer
            .systems_mut()
            .shaders
            .program(shaders::pass_through_program());
        let positions = Buffer::vertices(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0], true);
        let mut geometry = Geometry::new();
        geometry.add_attribute("aVertexPosition", &positions, tessera_core::Attribute::new(0, 2));
        let mesh = Mesh::new(geometry, Shader::new(program, UniformGroup::new(false)));
        let a = quad(0.0);
        let b = quad(10.0);

        renderer
            .render(
                &[RenderItem::Batch(&a), RenderItem::Mesh(&mesh), RenderItem::Batch(&b)],
                RenderOptions::default(),
            )
            .unwrap();

        let counts: Vec<u32> = renderer.backend().draws().iter().map(|d| d.count).collect();
        assert_eq!(counts, vec![6, 3, 6]);
    }

    #[test]
    fn empty_filter_chains_draw_unfiltered() {
        let mut renderer = renderer();
        let a = quad(0.0);

        renderer
            .render(
                &[
                    RenderItem::PushFilter {
                        target: 1,
                        bounds: Rectangle::new(0.0, 0.0, 8.0, 8.0),
                        filters: Vec::new(),
                    },
                    RenderItem::Batch(&a),
                    RenderItem::PopFilter,
                ],
                RenderOptions::default(),
            )
            .unwrap();

        assert_eq!(renderer.backend().draws().len(), 1);
        assert!(renderer.systems().render_target.current().is_none());
    }

    #[test]
    fn filtered_content_lands_back_on_screen() {
        let mut renderer = renderer();
        let program = renderer
            .systems_mut()
            .shaders
            .program(shaders::alpha_program());
        let filter: Rc<dyn Filter> = Rc::new(ShaderFilter::new(
            program,
            UniformGroup::new(false).with("uAlpha", 0.5f32),
        ));
        let a = quad(0.0);

        renderer
            .render(
                &[
                    RenderItem::PushFilter {
                        target: 1,
                        bounds: Rectangle::new(0.0, 0.0, 8.0, 8.0),
                        filters: vec![filter],
                    },
                    RenderItem::Batch(&a),
                    RenderItem::PopFilter,
                ],
                RenderOptions::default(),
            )
            .unwrap();

        assert_eq!(renderer.backend().draws().len(), 2);
        assert!(renderer.systems().render_target.current().is_none());
        assert_eq!(renderer.systems().filter.depth(), 0);
    }

    #[test]
    fn unpopped_filters_are_applied_at_end_of_frame() {
        let mut renderer = renderer();
        let program = renderer
            .systems_mut()
            .shaders
            .program(shaders::alpha_program());
        let filter: Rc<dyn Filter> = Rc::new(ShaderFilter::new(
            program,
            UniformGroup::new(false).with("uAlpha", 0.5f32),
        ));
        let a = quad(0.0);

        renderer
            .render(
                &[
                    RenderItem::PushFilter {
                        target: 1,
                        bounds: Rectangle::new(0.0, 0.0, 8.0, 8.0),
                        filters: vec![filter],
                    },
                    RenderItem::Batch(&a),
                ],
                RenderOptions::default(),
            )
            .unwrap();

        assert_eq!(renderer.backend().draws().len(), 2);
        assert_eq!(renderer.systems().filter.depth(), 0);
        assert!(renderer.systems().render_target.current().is_none());
    }

    #[test]
    fn stale_stacks_are_dropped_when_a_frame_starts() {
        let mut renderer = renderer();
        let mask = MaskData::new(Rc::new(quad(0.0)));
        renderer
            .systems
            .bind_render_target(&mut renderer.backend, None, None, None)
            .unwrap();
        renderer
            .systems
            .push_mask(&mut renderer.backend, 3, mask)
            .unwrap();
        assert_eq!(renderer.systems().mask_depth(), 1);

        renderer.backend_mut().clear_commands();
        let a = quad(0.0);
        renderer
            .render(&[RenderItem::Batch(&a)], RenderOptions::default())
            .unwrap();

        assert!(renderer.systems().mask.is_empty());
        assert_eq!(
            renderer
                .backend()
                .count(|c| matches!(c, Command::Scissor(Some(_)))),
            0
        );
        assert_eq!(renderer.backend().draws().len(), 1);
    }

    #[test]
    fn lost_context_rebuilds_tables() {
        let mut renderer = renderer();
        let a = quad(0.0);
        renderer
            .render(&[RenderItem::Batch(&a)], RenderOptions::default())
            .unwrap();
        assert!(renderer.systems().textures.managed_count() > 0);

        renderer.backend_mut().lose_context();
        renderer.backend_mut().clear_commands();
        renderer
            .render(&[RenderItem::Batch(&a)], RenderOptions::default())
            .unwrap();

        let backend = renderer.backend();
        assert!(backend.count(|c| matches!(c, Command::CreateTexture(_))) > 0);
        assert!(backend.count(|c| matches!(c, Command::CreateProgram { .. })) > 0);
        assert_eq!(backend.draws().len(), 1);
    }
}
