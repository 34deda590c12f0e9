//! Post-processing filters
//!
//! Pushing a filter chain redirects drawing into a pooled render texture sized
//! to the padded bounds of the filtered content. Popping runs the chain: one
//! filter draws straight into the previous target, longer chains ping-pong
//! between two pooled textures and only the last filter writes to the
//! previous target.

mod sprite_mask;

use std::fmt;
use std::rc::Rc;

use tessera_core::{
    Attribute, BlendMode, Buffer, DrawMode, Geometry, Matrix, Rectangle, Sprite,
};

use crate::backend::Backend;
use crate::error::{RendererError, Result};
use crate::render_target::ClearBits;
use crate::render_texture::{RenderTexture, RenderTexturePool};
use crate::renderer::Systems;
use crate::shader::{Program, Shader, UniformGroup};
use crate::state::State;

pub use sprite_mask::SpriteMaskFilter;

/// Name of the nested group holding the per-pass filter uniforms
pub const FILTER_GLOBALS: &str = "filterGlobals";
/// Sampler every filter reads its input from
pub const INPUT_SAMPLER: &str = "uSampler";

/// What happens to the output before a filter draws into it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClearMode {
    /// Keep the contents and blend over them
    #[default]
    Blend,
    /// Clear to transparent
    Clear,
    /// Clear only when blending is on or clears are forced
    Blit,
}

/// Knobs every filter carries
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterSettings {
    /// Render texture resolution; `None` follows the bound target
    pub resolution: Option<f32>,
    /// Extra logical pixels around the filtered bounds
    pub padding: f32,
    /// Clip the filtered area to the visible frame
    pub auto_fit: bool,
    pub enabled: bool,
    pub blend_mode: BlendMode,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            resolution: None,
            padding: 0.0,
            auto_fit: true,
            enabled: true,
            blend_mode: BlendMode::Normal,
        }
    }
}

/// A full-screen pass over a render texture
pub trait Filter {
    fn settings(&self) -> FilterSettings;

    fn shader(&self) -> &Shader;

    fn state(&self) -> State {
        State::for_2d().with_blend_mode(self.settings().blend_mode)
    }

    /// Draw `input` into `output` (`None` is the screen)
    fn apply(
        &self,
        systems: &mut Systems,
        backend: &mut dyn Backend,
        input: &RenderTexture,
        output: Option<&RenderTexture>,
        clear: ClearMode,
    ) -> Result<()> {
        systems.apply_filter(backend, self.shader(), self.state(), input, output, clear)
    }
}

/// A filter that is only a shader and settings
#[derive(Clone, Debug)]
pub struct ShaderFilter {
    shader: Shader,
    pub settings: FilterSettings,
}

impl ShaderFilter {
    pub fn new(program: Program, uniforms: UniformGroup) -> Self {
        Self {
            shader: Shader::new(program, uniforms),
            settings: FilterSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: FilterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn uniforms(&self) -> &UniformGroup {
        &self.shader.uniforms
    }
}

impl Filter for ShaderFilter {
    fn settings(&self) -> FilterSettings {
        self.settings
    }

    fn shader(&self) -> &Shader {
        &self.shader
    }
}

/// One pushed filter chain
struct FilterState {
    target: u64,
    filters: Vec<Rc<dyn Filter>>,
    resolution: f32,
    /// Filtered area in world units
    source_frame: Rectangle,
    /// Size of the render texture, in logical units
    destination_frame: Rectangle,
    render_texture: RenderTexture,
    /// Frames the previous target was bound with
    binding_source_frame: Rectangle,
    binding_destination_frame: Rectangle,
    transform: Option<Matrix>,
}

impl fmt::Debug for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterState")
            .field("target", &self.target)
            .field("filters", &self.filters.len())
            .field("resolution", &self.resolution)
            .field("source_frame", &self.source_frame)
            .finish()
    }
}

/// Frames of the chain currently being popped
#[derive(Clone, Copy, Debug)]
struct ActiveFrames {
    source_frame: Rectangle,
    destination_frame: Rectangle,
    binding_source_frame: Rectangle,
    binding_destination_frame: Rectangle,
    transform: Option<Matrix>,
}

pub struct FilterSystem {
    stack: Vec<FilterState>,
    /// Target bound when the outermost chain was pushed
    base_target: Option<RenderTexture>,
    active: Option<ActiveFrames>,
    pub texture_pool: RenderTexturePool,
    globals: UniformGroup,
    quad: Geometry,
    /// Clear outputs in [`ClearMode::Blit`] even without blending
    pub force_clear: bool,
}

impl fmt::Debug for FilterSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSystem")
            .field("stack", &self.stack)
            .field("pool", self.texture_pool.stats())
            .finish()
    }
}

impl Default for FilterSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterSystem {
    pub fn new() -> Self {
        let globals = UniformGroup::new(false)
            .with("outputFrame", [0.0f32; 4])
            .with("inputSize", [0.0f32; 4])
            .with("inputPixel", [0.0f32; 4])
            .with("inputClamp", [0.0f32; 4])
            .with("resolution", 1.0f32);

        let positions = Buffer::vertices(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0], true);
        let mut quad = Geometry::new();
        quad.add_attribute("aVertexPosition", &positions, Attribute::new(0, 2));
        quad.draw_mode = DrawMode::TriangleStrip;

        Self {
            stack: Vec::new(),
            base_target: None,
            active: None,
            texture_pool: RenderTexturePool::new(),
            globals,
            quad,
            force_clear: false,
        }
    }

    /// Chains currently pushed
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Drop pushed chains without running them, returning their textures
    pub fn reset(&mut self) {
        for state in self.stack.drain(..) {
            self.texture_pool.return_texture(state.render_texture);
        }
        self.base_target = None;
        self.active = None;
    }

    pub fn globals(&self) -> &UniformGroup {
        &self.globals
    }

    /// Target the chain below the top renders into
    fn previous_target(&self) -> Option<RenderTexture> {
        match self.stack.last() {
            Some(state) => Some(state.render_texture.clone()),
            None => self.base_target.clone(),
        }
    }

    /// Map the sprite's UV space into the active chain's input coordinates
    pub fn calculate_sprite_matrix(&self, sprite: &Sprite) -> Matrix {
        let Some(active) = &self.active else {
            return Matrix::IDENTITY;
        };
        let source = active.source_frame;
        let destination = active.destination_frame;
        let orig = sprite.texture().orig();
        let anchor = sprite.anchor();

        let mut mapped = Matrix::new(
            destination.width,
            0.0,
            0.0,
            destination.height,
            source.x,
            source.y,
        );
        mapped.prepend(&sprite.world_transform().inverted());
        mapped.scale(1.0 / orig.width, 1.0 / orig.height);
        mapped.translate(anchor.x, anchor.y);
        mapped
    }

    pub fn context_change(&mut self) {
        self.texture_pool.clear(false);
    }
}

/// Grow `frame` to whole pixels of the target it lands in
fn round_frame(
    frame: &mut Rectangle,
    resolution: f32,
    binding_source: &Rectangle,
    binding_destination: &Rectangle,
    transform: Option<&Matrix>,
) {
    if frame.is_empty() || binding_source.is_empty() {
        return;
    }
    if let Some(t) = transform {
        let rotated = t.b.abs() > 1e-4 || t.c.abs() > 1e-4;
        let scaled = t.a.abs() > 1e-4 || t.d.abs() > 1e-4;
        if rotated && scaled {
            return;
        }
    }

    let mut to_pixels = transform.copied().unwrap_or(Matrix::IDENTITY);
    to_pixels
        .translate(-binding_source.x, -binding_source.y)
        .scale(
            binding_destination.width / binding_source.width,
            binding_destination.height / binding_source.height,
        )
        .translate(binding_destination.x, binding_destination.y);

    let mut pixels = frame.transformed(&to_pixels);
    pixels.ceil(resolution, 1e-3);
    *frame = pixels.transformed(&to_pixels.inverted());
}

impl Systems {
    /// Redirect drawing into a render texture covering `bounds`
    ///
    /// Disabled filters are skipped; a chain with no enabled filter is an
    /// error and nothing is pushed.
    pub fn push_filters(
        &mut self,
        backend: &mut dyn Backend,
        target: u64,
        bounds: Rectangle,
        filters: &[Rc<dyn Filter>],
    ) -> Result<()> {
        let filters: Vec<Rc<dyn Filter>> = filters
            .iter()
            .filter(|f| f.settings().enabled)
            .cloned()
            .collect();
        let Some(first) = filters.first().map(|f| f.settings()) else {
            return Err(RendererError::EmptyFilterChain(target));
        };

        let target_resolution = self
            .render_target
            .current()
            .map_or(self.resolution, RenderTexture::resolution);

        let mut resolution = first.resolution.unwrap_or(target_resolution);
        let mut padding = first.padding;
        let mut auto_fit = first.auto_fit;
        for settings in filters[1..].iter().map(|f| f.settings()) {
            resolution = resolution.min(settings.resolution.unwrap_or(target_resolution));
            padding = padding.max(settings.padding);
            auto_fit = auto_fit && settings.auto_fit;
        }

        if self.filter.stack.is_empty() {
            self.filter.base_target = self.render_target.current().cloned();
        }

        let mut source_frame = bounds;
        source_frame.pad(padding, padding);

        let mut visible = self.render_target.source_frame();
        if let Some(transform) = &self.projection.transform {
            visible = visible.transformed(&transform.inverted());
        }
        if auto_fit {
            source_frame.fit(&visible);
            if source_frame.width <= 0.0 || source_frame.height <= 0.0 {
                source_frame.width = 0.0;
                source_frame.height = 0.0;
            }
        } else if !source_frame.intersects(&visible) {
            source_frame.width = 0.0;
            source_frame.height = 0.0;
        }

        let binding_source_frame = self.render_target.source_frame();
        let binding_destination_frame = self.render_target.destination_frame();
        round_frame(
            &mut source_frame,
            target_resolution,
            &binding_source_frame,
            &binding_destination_frame,
            self.projection.transform.as_ref(),
        );

        let render_texture = self.filter.texture_pool.get_optimal_texture(
            source_frame.width,
            source_frame.height,
            resolution,
        );
        render_texture.set_filter_frame(Some(source_frame));

        let destination_frame =
            Rectangle::new(0.0, 0.0, render_texture.width(), render_texture.height());
        let transform = self.projection.transform.take();

        self.filter.stack.push(FilterState {
            target,
            filters,
            resolution,
            source_frame,
            destination_frame,
            render_texture: render_texture.clone(),
            binding_source_frame,
            binding_destination_frame,
            transform,
        });

        self.bind_render_target(
            backend,
            Some(&render_texture),
            Some(source_frame),
            Some(Rectangle::new(0.0, 0.0, source_frame.width, source_frame.height)),
        )?;
        self.framebuffers
            .clear(backend, Some([0.0, 0.0, 0.0, 0.0]), false, false);
        Ok(())
    }

    /// Run the top filter chain into the target below it
    pub fn pop_filters(&mut self, backend: &mut dyn Backend) -> Result<()> {
        self.flush(backend)?;

        let Some(state) = self.filter.stack.pop() else {
            tracing::warn!("filter pop without a pushed chain");
            return Ok(());
        };

        let input_w = state.destination_frame.width;
        let input_h = state.destination_frame.height;
        let pixel_w = (input_w * state.resolution).round();
        let pixel_h = (input_h * state.resolution).round();
        let input_pixel = [pixel_w, pixel_h, 1.0 / pixel_w, 1.0 / pixel_h];
        let input_size = [input_w, input_h, 1.0 / input_w, 1.0 / input_h];
        let source = state.source_frame;

        let globals = &self.filter.globals;
        globals.set("outputFrame", [source.x, source.y, source.width, source.height]);
        globals.set("inputSize", input_size);
        globals.set("inputPixel", input_pixel);
        globals.set(
            "inputClamp",
            [
                0.5 * input_pixel[2],
                0.5 * input_pixel[3],
                source.width * input_size[2] - 0.5 * input_pixel[2],
                source.height * input_size[3] - 0.5 * input_pixel[3],
            ],
        );
        globals.set("resolution", state.resolution);

        self.filter.active = Some(ActiveFrames {
            source_frame: state.source_frame,
            destination_frame: state.destination_frame,
            binding_source_frame: state.binding_source_frame,
            binding_destination_frame: state.binding_destination_frame,
            transform: state.transform,
        });
        let output = self.filter.previous_target();

        let result = if let [filter] = state.filters.as_slice() {
            let result = filter.apply(
                self,
                backend,
                &state.render_texture,
                output.as_ref(),
                ClearMode::Blend,
            );
            self.filter.texture_pool.return_texture(state.render_texture);
            result
        } else {
            self.run_chain(backend, &state, output.as_ref())
        };

        if self.filter.stack.is_empty() {
            self.filter.base_target = None;
        }
        self.filter.active = None;
        result
    }

    fn run_chain(
        &mut self,
        backend: &mut dyn Backend,
        state: &FilterState,
        output: Option<&RenderTexture>,
    ) -> Result<()> {
        let mut flip = state.render_texture.clone();
        let mut flop = self.filter.texture_pool.get_optimal_texture(
            flip.width(),
            flip.height(),
            state.resolution,
        );
        flop.set_filter_frame(flip.filter_frame());

        let (last, passes) = match state.filters.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        let mut result = Ok(());
        for filter in passes {
            result = filter.apply(self, backend, &flip, Some(&flop), ClearMode::Clear);
            if result.is_err() {
                break;
            }
            std::mem::swap(&mut flip, &mut flop);
        }
        if result.is_ok() {
            result = last.apply(self, backend, &flip, output, ClearMode::Blend);
        }

        self.filter.texture_pool.return_texture(flip);
        self.filter.texture_pool.return_texture(flop);
        result
    }

    /// Bind `output` for a filter pass and clear it according to `clear`
    pub fn bind_and_clear(
        &mut self,
        backend: &mut dyn Backend,
        output: Option<&RenderTexture>,
        clear: ClearMode,
    ) -> Result<()> {
        let previous = self.filter.previous_target();
        let is_previous = output == previous.as_ref();
        let active = self.filter.active;

        self.projection.transform = if is_previous {
            active.and_then(|a| a.transform)
        } else {
            None
        };

        match (output, output.and_then(RenderTexture::filter_frame)) {
            (Some(texture), Some(frame)) => {
                let destination = Rectangle::new(0.0, 0.0, frame.width, frame.height);
                self.bind_render_target(backend, Some(texture), Some(frame), Some(destination))?;
            }
            _ if !is_previous => {
                self.bind_render_target(backend, output, None, None)?;
            }
            _ => {
                let (source, destination) = match active {
                    Some(a) => (
                        Some(a.binding_source_frame),
                        Some(a.binding_destination_frame),
                    ),
                    None => (None, None),
                };
                self.bind_render_target(backend, output, source, destination)?;
            }
        }

        let blending = self.state.current().map_or(false, |s| s.blend());
        let auto_clear = blending || self.filter.force_clear;
        if clear == ClearMode::Clear || (clear == ClearMode::Blit && auto_clear) {
            self.clear_render_target(backend, Some([0.0, 0.0, 0.0, 0.0]), ClearBits::COLOR);
        }
        Ok(())
    }

    /// Draw `input` through `shader` into `output`
    pub fn apply_filter(
        &mut self,
        backend: &mut dyn Backend,
        shader: &Shader,
        state: State,
        input: &RenderTexture,
        output: Option<&RenderTexture>,
        clear: ClearMode,
    ) -> Result<()> {
        self.state.set(backend, state);
        self.bind_and_clear(backend, output, clear)?;

        shader.uniforms.set(INPUT_SAMPLER, input.texture());
        if shader.uniforms.get(FILTER_GLOBALS).is_none() {
            shader.uniforms.set(FILTER_GLOBALS, self.filter.globals.clone());
        }
        self.shaders
            .bind(backend, &mut self.textures, shader, false)?;
        self.geometry
            .bind(backend, &self.filter.quad, &shader.program)?;
        self.geometry.draw(
            backend,
            &self.filter.quad,
            DrawMode::TriangleStrip,
            None,
            0,
            None,
        );
        Ok(())
    }

    /// Pooled texture matching `input`, for filters needing scratch space
    pub fn get_filter_texture(&mut self, input: &RenderTexture, resolution: Option<f32>) -> RenderTexture {
        self.filter.texture_pool.get_filter_texture(input, resolution)
    }

    pub fn return_filter_texture(&mut self, texture: RenderTexture) {
        self.filter.texture_pool.return_texture(texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capabilities, Command, RecordingBackend};
    use crate::config::RendererConfig;
    use crate::shaders;

    fn setup() -> (RecordingBackend, Systems) {
        let caps = Capabilities::default();
        let mut backend = RecordingBackend::new(caps);
        let mut systems = Systems::new(RendererConfig::default().with_size(200.0, 100.0), caps);
        systems.bind_render_target(&mut backend, None, None, None).unwrap();
        backend.clear_commands();
        (backend, systems)
    }

    fn pass_through(systems: &mut Systems) -> Rc<dyn Filter> {
        let program = systems.shaders.program(shaders::pass_through_program());
        Rc::new(ShaderFilter::new(program, UniformGroup::new(false)))
    }

    fn framebuffer_binds(backend: &RecordingBackend) -> usize {
        backend.count(|c| matches!(c, Command::BindFramebuffer(_)))
    }

    #[test]
    fn empty_chain_is_rejected() {
        let (mut backend, mut systems) = setup();

        let err = systems
            .push_filters(&mut backend, 7, Rectangle::new(0.0, 0.0, 10.0, 10.0), &[])
            .unwrap_err();

        assert_eq!(err, RendererError::EmptyFilterChain(7));
        assert_eq!(systems.filter.depth(), 0);
    }

    #[test]
    fn push_binds_padded_pooled_texture() {
        let (mut backend, mut systems) = setup();
        let filter = Rc::new(
            ShaderFilter::new(
                systems.shaders.program(shaders::pass_through_program()),
                UniformGroup::new(false),
            )
            .with_settings(FilterSettings {
                padding: 2.0,
                ..FilterSettings::default()
            }),
        );

        systems
            .push_filters(&mut backend, 1, Rectangle::new(10.0, 10.0, 20.0, 20.0), &[filter])
            .unwrap();

        let target = systems.render_target.current().cloned().unwrap();
        assert_eq!(target.filter_frame(), Some(Rectangle::new(8.0, 8.0, 24.0, 24.0)));
        assert_eq!(target.width(), 32.0);
        assert!(backend.commands().contains(&Command::Clear {
            color: Some([0.0, 0.0, 0.0, 0.0]),
            depth: None,
            stencil: None
        }));
    }

    #[test]
    fn auto_fit_clips_to_visible_frame() {
        let (mut backend, mut systems) = setup();
        let filter = pass_through(&mut systems);

        systems
            .push_filters(&mut backend, 1, Rectangle::new(180.0, 90.0, 50.0, 50.0), &[filter])
            .unwrap();

        let frame = systems.render_target.current().and_then(|t| t.filter_frame());
        assert_eq!(frame, Some(Rectangle::new(180.0, 90.0, 20.0, 10.0)));
    }

    #[test]
    fn single_filter_draws_into_previous_target() {
        let (mut backend, mut systems) = setup();
        let filter = pass_through(&mut systems);
        systems
            .push_filters(&mut backend, 1, Rectangle::new(0.0, 0.0, 16.0, 16.0), &[filter])
            .unwrap();
        backend.clear_commands();

        systems.pop_filters(&mut backend).unwrap();

        assert!(systems.render_target.current().is_none());
        assert_eq!(backend.draws().len(), 1);
        assert_eq!(backend.draws()[0].mode, DrawMode::TriangleStrip);
        assert_eq!(systems.filter.texture_pool.stats().pool_count, 1);
    }

    #[test]
    fn chains_ping_pong_between_two_textures() {
        let (mut backend, mut systems) = setup();
        let filters = [
            pass_through(&mut systems),
            pass_through(&mut systems),
            pass_through(&mut systems),
        ];
        systems
            .push_filters(&mut backend, 1, Rectangle::new(0.0, 0.0, 16.0, 16.0), &filters)
            .unwrap();
        backend.clear_commands();

        systems.pop_filters(&mut backend).unwrap();

        assert_eq!(backend.draws().len(), 3);
        assert_eq!(framebuffer_binds(&backend), 3);
        assert!(systems.render_target.current().is_none());
        assert_eq!(systems.filter.texture_pool.stats().pool_count, 2);
    }

    #[test]
    fn filter_uniforms_describe_the_input() {
        let (mut backend, mut systems) = setup();
        let filter = pass_through(&mut systems);
        systems
            .push_filters(&mut backend, 1, Rectangle::new(4.0, 4.0, 10.0, 12.0), &[filter])
            .unwrap();

        systems.pop_filters(&mut backend).unwrap();

        let globals = systems.filter.globals();
        assert_eq!(
            globals.value("outputFrame"),
            Some([4.0, 4.0, 10.0, 12.0].into())
        );
        assert_eq!(
            globals.value("inputSize"),
            Some([16.0, 16.0, 1.0 / 16.0, 1.0 / 16.0].into())
        );
    }

    #[test]
    fn nested_chains_restore_the_outer_texture() {
        let (mut backend, mut systems) = setup();
        let outer = pass_through(&mut systems);
        let inner = pass_through(&mut systems);
        systems
            .push_filters(&mut backend, 1, Rectangle::new(0.0, 0.0, 64.0, 64.0), &[outer])
            .unwrap();
        let outer_texture = systems.render_target.current().cloned();
        systems
            .push_filters(&mut backend, 2, Rectangle::new(8.0, 8.0, 8.0, 8.0), &[inner])
            .unwrap();

        systems.pop_filters(&mut backend).unwrap();
        assert_eq!(systems.render_target.current().cloned(), outer_texture);

        systems.pop_filters(&mut backend).unwrap();
        assert!(systems.render_target.current().is_none());
    }

    #[test]
    fn round_frame_snaps_to_target_pixels() {
        let mut frame = Rectangle::new(0.2, 0.2, 9.5, 9.5);
        let binding = Rectangle::new(0.0, 0.0, 100.0, 100.0);

        round_frame(&mut frame, 2.0, &binding, &binding, None);

        assert_eq!(frame, Rectangle::new(0.0, 0.0, 10.0, 10.0));
    }
}
