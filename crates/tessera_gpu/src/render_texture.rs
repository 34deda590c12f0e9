//! Textures that can be rendered into, and the pool filters draw from

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use tessera_core::{BaseTexture, BaseTextureOptions, MipmapMode, Rectangle, Texture};

use crate::framebuffer::Framebuffer;

/// A base texture backed by a framebuffer
#[derive(Clone, Debug)]
pub struct BaseRenderTexture {
    base: BaseTexture,
    framebuffer: Framebuffer,
    clear_color: Cell<[f32; 4]>,
}

impl BaseRenderTexture {
    pub fn new(width: f32, height: f32, resolution: f32) -> Self {
        let options = BaseTextureOptions {
            mipmap: MipmapMode::Off,
            ..BaseTextureOptions::default()
        }
        .with_size(width, height)
        .with_resolution(resolution);
        let base = BaseTexture::new_render_target(options);
        let framebuffer = Framebuffer::new(base.real_width(), base.real_height());
        framebuffer.add_color_texture(0, Some(base.clone()));

        Self {
            base,
            framebuffer,
            clear_color: Cell::new([0.0; 4]),
        }
    }

    pub fn base_texture(&self) -> &BaseTexture {
        &self.base
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color.get()
    }

    pub fn set_clear_color(&self, color: [f32; 4]) {
        self.clear_color.set(color);
    }

    /// Resize in logical units at the current resolution
    pub fn resize(&self, width: f32, height: f32) {
        let resolution = self.base.resolution();
        self.framebuffer.resize(width * resolution, height * resolution);
        self.base.set_real_size(
            self.framebuffer.width() as f32,
            self.framebuffer.height() as f32,
            None,
        );
    }

    pub fn destroy(&self) {
        self.framebuffer.dispose();
        self.base.destroy();
    }
}

/// Bucket of a pooled render texture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// Power-of-two device pixel size
    Sized { width: u32, height: u32 },
    /// Exactly the screen size in device pixels
    Screen,
}

struct RenderTextureInner {
    texture: Texture,
    base_render: BaseRenderTexture,
    filter_frame: Cell<Option<Rectangle>>,
    pool_key: Cell<Option<PoolKey>>,
}

/// A texture view over a [`BaseRenderTexture`]
#[derive(Clone)]
pub struct RenderTexture(Rc<RenderTextureInner>);

impl PartialEq for RenderTexture {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RenderTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTexture")
            .field("base", &self.0.base_render.base.uid())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("pool_key", &self.0.pool_key.get())
            .finish()
    }
}

impl RenderTexture {
    pub fn create(width: f32, height: f32, resolution: f32) -> Self {
        Self::from_base(BaseRenderTexture::new(width, height, resolution))
    }

    pub fn from_base(base_render: BaseRenderTexture) -> Self {
        let texture = Texture::from_base(base_render.base.clone());
        Self(Rc::new(RenderTextureInner {
            texture,
            base_render,
            filter_frame: Cell::new(None),
            pool_key: Cell::new(None),
        }))
    }

    pub fn texture(&self) -> &Texture {
        &self.0.texture
    }

    pub fn base_render(&self) -> &BaseRenderTexture {
        &self.0.base_render
    }

    pub fn base_texture(&self) -> &BaseTexture {
        &self.0.base_render.base
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.0.base_render.framebuffer
    }

    pub fn width(&self) -> f32 {
        self.0.base_render.base.width()
    }

    pub fn height(&self) -> f32 {
        self.0.base_render.base.height()
    }

    pub fn resolution(&self) -> f32 {
        self.0.base_render.base.resolution()
    }

    /// Rectangle of world space the contents were rendered from
    pub fn filter_frame(&self) -> Option<Rectangle> {
        self.0.filter_frame.get()
    }

    pub fn set_filter_frame(&self, frame: Option<Rectangle>) {
        self.0.filter_frame.set(frame);
    }

    pub fn pool_key(&self) -> Option<PoolKey> {
        self.0.pool_key.get()
    }

    /// Resize in logical units, snapping to whole device pixels
    pub fn resize(&self, width: f32, height: f32) {
        let resolution = self.resolution();
        let width = (width * resolution).round() / resolution;
        let height = (height * resolution).round() / resolution;
        self.0.base_render.resize(width, height);
    }

    /// Reinterpret the same pixels at another resolution
    pub fn set_resolution(&self, resolution: f32) {
        self.0.base_render.base.set_resolution(resolution);
    }

    pub fn destroy(&self) {
        self.0.base_render.destroy();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────────────────────────

/// Hit and miss counters of a [`RenderTexturePool`]
#[derive(Debug, Default, Clone)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    /// Textures currently waiting in the pool
    pub pool_count: usize,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Reuses render textures by size bucket
///
/// Sizes round up to powers of two so nearby requests share textures. When
/// full-screen pooling is on, a request exactly the size of the screen gets
/// its own bucket, dropped whenever the screen size changes.
#[derive(Debug, Default)]
pub struct RenderTexturePool {
    pool: FxHashMap<PoolKey, Vec<RenderTexture>>,
    full_screen: bool,
    screen: (u32, u32),
    stats: PoolStats,
}

fn min_pixels(size: f32, resolution: f32) -> u32 {
    ((size * resolution - 1e-6).ceil() as u32).max(1)
}

impl RenderTexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// A texture at least `min_width`×`min_height` logical units at `resolution`
    pub fn get_optimal_texture(
        &mut self,
        min_width: f32,
        min_height: f32,
        resolution: f32,
    ) -> RenderTexture {
        let width = min_pixels(min_width, resolution);
        let height = min_pixels(min_height, resolution);

        let (key, width, height) = if self.full_screen && (width, height) == self.screen {
            (PoolKey::Screen, width, height)
        } else {
            let (w, h) = (width.next_power_of_two(), height.next_power_of_two());
            (PoolKey::Sized { width: w, height: h }, w, h)
        };

        let texture = match self.pool.get_mut(&key).and_then(Vec::pop) {
            Some(texture) => {
                self.stats.hits += 1;
                self.stats.pool_count -= 1;
                texture
            }
            None => {
                self.stats.misses += 1;
                tracing::debug!("render texture pool miss for {:?}", key);
                RenderTexture::create(width as f32, height as f32, 1.0)
            }
        };
        texture.0.pool_key.set(Some(key));
        texture.set_resolution(resolution);
        texture
    }

    /// A texture sized like `input`, inheriting its filter frame
    pub fn get_filter_texture(
        &mut self,
        input: &RenderTexture,
        resolution: Option<f32>,
    ) -> RenderTexture {
        let texture = self.get_optimal_texture(
            input.width(),
            input.height(),
            resolution.unwrap_or_else(|| input.resolution()),
        );
        texture.set_filter_frame(input.filter_frame());
        texture
    }

    /// Put `texture` back in its bucket
    pub fn return_texture(&mut self, texture: RenderTexture) {
        let Some(key) = texture.pool_key() else {
            tracing::warn!("returned a render texture the pool did not hand out");
            return;
        };
        texture.set_filter_frame(None);
        self.pool.entry(key).or_default().push(texture);
        self.stats.pool_count += 1;
    }

    /// Empty the pool, optionally destroying the textures
    pub fn clear(&mut self, destroy: bool) {
        for (_, textures) in self.pool.drain() {
            if destroy {
                textures.iter().for_each(RenderTexture::destroy);
            }
        }
        self.stats.pool_count = 0;
    }

    /// Screen size in device pixels; enables the screen bucket when positive
    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        if (width, height) == self.screen {
            return;
        }
        self.full_screen = width > 0 && height > 0;
        if let Some(textures) = self.pool.remove(&PoolKey::Screen) {
            self.stats.pool_count -= textures.len();
            textures.iter().for_each(RenderTexture::destroy);
        }
        self.screen = (width, height);
    }

    /// Disable the screen bucket regardless of screen size
    pub fn disable_full_screen(&mut self) {
        self.set_screen_size(0, 0);
    }
}
