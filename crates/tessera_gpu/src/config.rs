//! Renderer configuration and environment overrides

use tessera_core::Color;

use crate::backend::Capabilities;
use crate::texture_gc::GcMode;

/// Hard cap on batched vertices; indices are 16-bit
pub const MAX_BATCH_VERTICES: usize = 65_536;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

/// Configuration for creating a renderer
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Screen width in logical units
    pub width: f32,
    /// Screen height in logical units
    pub height: f32,
    /// Device pixels per logical unit
    pub resolution: f32,
    /// Vertices buffered before the batch renderer flushes
    pub batch_size: usize,
    /// Texture units used per batch (None = backend maximum)
    pub max_textures: Option<u32>,
    pub gc_mode: GcMode,
    /// Frames a texture may stay unused before its GPU storage is released
    pub gc_max_idle: u64,
    /// Frames between automatic garbage collection passes
    pub gc_check_interval: u64,
    /// Allow rectangle masks to use the scissor test
    pub enable_scissor: bool,
    /// Pool full-screen filter textures in their own bucket
    pub full_screen_filter_pool: bool,
    pub background: Color,
    pub clear_before_render: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            resolution: 1.0,
            batch_size: 4096,
            max_textures: None,
            gc_mode: GcMode::Auto,
            gc_max_idle: 60 * 60,
            gc_check_interval: 60 * 10,
            enable_scissor: true,
            full_screen_filter_pool: true,
            background: Color::BLACK,
            clear_before_render: true,
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_resolution(mut self, resolution: f32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_textures(mut self, max_textures: u32) -> Self {
        self.max_textures = Some(max_textures);
        self
    }

    pub fn with_gc(mut self, mode: GcMode, max_idle: u64, check_interval: u64) -> Self {
        self.gc_mode = mode;
        self.gc_max_idle = max_idle;
        self.gc_check_interval = check_interval;
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    /// Texture units the batch renderer will use on `caps`
    pub fn texture_units(&self, caps: &Capabilities) -> u32 {
        self.max_textures
            .unwrap_or(caps.max_texture_units)
            .clamp(1, caps.max_texture_units.max(1))
    }
}

/// Apply `TESSERA_*` environment overrides and clamp to backend limits
pub(crate) fn apply_renderer_config_overrides(
    mut config: RendererConfig,
    caps: &Capabilities,
) -> RendererConfig {
    // Env:
    // - TESSERA_BATCH_SIZE=8192
    // - TESSERA_MAX_TEXTURES=8
    // - TESSERA_GC_MAX_IDLE=3600
    // - TESSERA_GC_CHECK_INTERVAL=600
    if let Some(v) = env_usize("TESSERA_BATCH_SIZE") {
        config.batch_size = v;
    }
    if let Some(v) = env_u64("TESSERA_MAX_TEXTURES") {
        config.max_textures = Some(v.min(u32::MAX as u64) as u32);
    }
    if let Some(v) = env_u64("TESSERA_GC_MAX_IDLE") {
        config.gc_max_idle = v;
    }
    if let Some(v) = env_u64("TESSERA_GC_CHECK_INTERVAL") {
        config.gc_check_interval = v;
    }

    // At least one quad per batch, and indices must stay addressable by u16
    config.batch_size = config.batch_size.clamp(4, MAX_BATCH_VERTICES);
    config.max_textures = Some(config.texture_units(caps));
    if config.resolution <= 0.0 {
        config.resolution = 1.0;
    }
    config
}

pub(crate) fn log_renderer_config(config: &RendererConfig, caps: &Capabilities) {
    tracing::info!(
        "tessera config: batch_size={}, max_textures={:?} (backend {}), gc={:?} max_idle={} interval={}, resolution={}",
        config.batch_size,
        config.max_textures,
        caps.max_texture_units,
        config.gc_mode,
        config.gc_max_idle,
        config.gc_check_interval,
        config.resolution
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(units: u32) -> Capabilities {
        Capabilities {
            max_texture_units: units,
            ..Capabilities::default()
        }
    }

    #[test]
    fn clamps_to_backend_limits() {
        let config = RendererConfig::default()
            .with_batch_size(1_000_000)
            .with_max_textures(64);
        let config = apply_renderer_config_overrides(config, &caps(16));
        assert_eq!(config.batch_size, MAX_BATCH_VERTICES);
        assert_eq!(config.max_textures, Some(16));
    }

    #[test]
    fn defaults_to_backend_units() {
        let config = apply_renderer_config_overrides(RendererConfig::default(), &caps(8));
        assert_eq!(config.max_textures, Some(8));
        assert_eq!(config.texture_units(&caps(8)), 8);
    }
}
